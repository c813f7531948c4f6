//! Background recalculation worker.
//!
//! A tokio task owns the `Engine` and is its single writer. Hosts talk to it
//! through a `WorkerHandle`: edits go in over an unbounded channel, pass
//! reports come back on a broadcast channel, and settled values are read
//! directly through an `EngineReader` without involving the task.
//!
//! The task coalesces every edit already queued when it wakes into one
//! pass, evaluates it `batch_size` cells at a time and yields between
//! batches. Edits arriving mid-pass form the next pass.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cell::{CellRef, Reference, SheetId};
use crate::error::{EngineError, EngineResult, StoreError};
use crate::store::CellStore;

use super::{CellUpdate, Engine, EngineReader, PassReport, SubscriptionHandle, Subscriptions};

/// Capacity of the report channel; slower receivers see `Lagged`.
const REPORT_CAPACITY: usize = 64;

enum Request {
    SetInput { cell: CellRef, raw: String },
    Flush(oneshot::Sender<EngineResult<()>>),
    Shutdown,
}

/// The task side of the worker.
pub struct Worker<S: CellStore> {
    engine: Engine<S>,
    requests: mpsc::UnboundedReceiver<Request>,
    reports: broadcast::Sender<PassReport>,
    batch_size: usize,

    /// Flush requests waiting for the engine to go quiet.
    waiters: Vec<oneshot::Sender<EngineResult<()>>>,

    /// Failure since the last flush, reported to its waiters.
    failure: Option<StoreError>,
}

impl<S: CellStore + 'static> Worker<S> {
    /// Move `engine` onto a new tokio task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(engine: Engine<S>) -> WorkerHandle<S> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);

        let reader = engine.reader();
        let subscriptions = engine.subscriptions().clone();
        let worker = Worker {
            batch_size: engine.config().batch_size,
            engine,
            requests: rx,
            reports: reports.clone(),
            waiters: Vec::new(),
            failure: None,
        };
        let task = tokio::spawn(worker.run());

        WorkerHandle {
            requests: tx,
            reports,
            reader,
            subscriptions,
            task,
        }
    }

    async fn run(mut self) -> Engine<S> {
        tracing::debug!(batch_size = self.batch_size, "recalculation worker started");
        let mut open = true;

        loop {
            if self.engine.is_idle() && !self.engine.has_pending() {
                self.release_waiters();
                if !open {
                    break;
                }
                match self.requests.recv().await {
                    Some(request) => open &= self.handle(request),
                    None => break,
                }
            }

            // Coalesce everything already queued.
            while open {
                match self.requests.try_recv() {
                    Ok(request) => open &= self.handle(request),
                    Err(_) => break,
                }
            }

            if let Err(e) = self.step() {
                tracing::error!(error = %e, "recalculation pass failed");
                self.failure = Some(match e {
                    EngineError::Store(e) => e,
                    other => StoreError::Unavailable(other.to_string()),
                });
            }
            tokio::task::yield_now().await;
        }

        self.release_waiters();
        tracing::debug!(epoch = self.engine.epoch(), "recalculation worker stopped");
        self.engine
    }

    /// Returns false once the worker should stop accepting requests.
    fn handle(&mut self, request: Request) -> bool {
        match request {
            Request::SetInput { cell, raw } => {
                if let Err(e) = self.engine.enqueue(cell, raw) {
                    tracing::warn!(cell = %cell, error = %e, "dropped edit");
                }
                true
            }
            Request::Flush(reply) => {
                self.waiters.push(reply);
                true
            }
            Request::Shutdown => false,
        }
    }

    /// Advance the current pass by one batch, starting one if needed.
    fn step(&mut self) -> EngineResult<()> {
        if self.engine.is_idle() && !self.engine.begin_pass()? {
            return Ok(());
        }
        if self.engine.evaluate_batch(self.batch_size)? {
            let report = self.engine.commit()?;
            if !report.is_empty() {
                // No receivers is fine.
                let _ = self.reports.send(report);
            }
        }
        Ok(())
    }

    fn release_waiters(&mut self) {
        // A failure is kept until a flush can report it.
        if self.waiters.is_empty() {
            return;
        }
        let failure = self.failure.take();
        for waiter in self.waiters.drain(..) {
            let result = match &failure {
                Some(e) => Err(EngineError::Store(e.clone())),
                None => Ok(()),
            };
            let _ = waiter.send(result);
        }
    }
}

/// Host side of a running worker.
pub struct WorkerHandle<S: CellStore> {
    requests: mpsc::UnboundedSender<Request>,
    reports: broadcast::Sender<PassReport>,
    reader: EngineReader<S>,
    subscriptions: Subscriptions,
    task: JoinHandle<Engine<S>>,
}

impl<S: CellStore + 'static> WorkerHandle<S> {
    /// Queue an input. Returns immediately; the pass runs in the background.
    pub fn set_cell_input(&self, cell: CellRef, raw: impl Into<String>) -> EngineResult<()> {
        if !self.reader.sheets.read().contains(cell.sheet) {
            return Err(EngineError::UnknownSheet(format!("#{}", cell.sheet.raw())));
        }
        self.requests
            .send(Request::SetInput {
                cell,
                raw: raw.into(),
            })
            .map_err(|_| EngineError::WorkerClosed)
    }

    /// Clear a cell in the background.
    pub fn clear_cell(&self, cell: CellRef) -> EngineResult<()> {
        self.set_cell_input(cell, String::new())
    }

    /// Wait until every edit sent so far has been committed.
    ///
    /// Fails with the store error if a pass failed since the last flush.
    pub async fn flush(&self) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Flush(tx))
            .map_err(|_| EngineError::WorkerClosed)?;
        rx.await.map_err(|_| EngineError::WorkerClosed)?
    }

    /// Receive the report of every committed pass from now on.
    pub fn reports(&self) -> broadcast::Receiver<PassReport> {
        self.reports.subscribe()
    }

    pub fn reader(&self) -> &EngineReader<S> {
        &self.reader
    }

    /// Add a sheet; visible to edits sent after this returns.
    pub fn add_sheet(&self, name: &str) -> SheetId {
        self.reader.sheets.write().add(name)
    }

    pub fn subscribe<F>(&self, watch: Reference, callback: F) -> SubscriptionHandle
    where
        F: Fn(&[CellUpdate]) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(watch, callback)
    }

    /// Finish queued work, stop the task and take the engine back.
    pub async fn shutdown(self) -> EngineResult<Engine<S>> {
        // A closed channel means the task is already on its way out.
        let _ = self.requests.send(Request::Shutdown);
        self.task.await.map_err(|e| {
            tracing::error!(error = %e, "recalculation worker panicked");
            EngineError::WorkerClosed
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::cell::CellValue;
    use crate::config::EngineConfig;
    use crate::store::OutageStore;

    fn at(a1: &str) -> CellRef {
        CellRef::parse_a1(SheetId(0), a1).unwrap()
    }

    fn spawn_with(config: EngineConfig) -> WorkerHandle<crate::store::MemoryStore> {
        Worker::spawn(Engine::new(config).unwrap())
    }

    #[tokio::test]
    async fn queued_edits_coalesce_into_one_pass() {
        let handle = spawn_with(EngineConfig::default());
        let mut reports = handle.reports();

        handle.set_cell_input(at("A1"), "5").unwrap();
        handle.set_cell_input(at("A2"), "10").unwrap();
        handle.set_cell_input(at("B1"), "=SUM(A1:A2)").unwrap();
        handle.flush().await.unwrap();

        assert_eq!(handle.reader().get_cell_value(at("B1")).unwrap(), CellValue::Number(15.0));
        let report = reports.recv().await.unwrap();
        assert_eq!(report.value_of(&at("B1")), Some(&CellValue::Number(15.0)));

        let engine = handle.shutdown().await.unwrap();
        assert_eq!(engine.epoch(), 1);
    }

    #[tokio::test]
    async fn small_batches_still_settle() {
        let config = EngineConfig {
            batch_size: 1,
            ..EngineConfig::default()
        };
        let handle = spawn_with(config);

        handle.set_cell_input(at("A1"), "1").unwrap();
        for row in 2..=20 {
            let a1 = format!("A{row}");
            handle.set_cell_input(at(&a1), format!("=A{}+1", row - 1)).unwrap();
        }
        handle.flush().await.unwrap();
        assert_eq!(handle.reader().value_at("A20").unwrap(), CellValue::Number(20.0));

        handle.set_cell_input(at("A1"), "101").unwrap();
        handle.flush().await.unwrap();
        assert_eq!(handle.reader().value_at("A20").unwrap(), CellValue::Number(120.0));
    }

    #[tokio::test]
    async fn subscribers_hear_committed_changes() {
        let handle = spawn_with(EngineConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = handle.subscribe(Reference::Cell(at("B1")), move |batch| {
            assert_eq!(batch.len(), 1);
            assert_eq!(batch[0].cell, at("B1"));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle.set_cell_input(at("B1"), "=A1*2").unwrap();
        handle.flush().await.unwrap();
        handle.set_cell_input(at("A1"), "4").unwrap();
        handle.flush().await.unwrap();
        // Unchanged value, no notification.
        handle.set_cell_input(at("A1"), "4").unwrap();
        handle.flush().await.unwrap();

        // B1 goes 0 then 8.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_edits_are_reported() {
        let handle = spawn_with(EngineConfig::default());
        let mut reports = handle.reports();

        handle.set_cell_input(at("A1"), "=A1+1").unwrap();
        handle.flush().await.unwrap();

        let report = reports.recv().await.unwrap();
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].cell, at("A1"));
    }

    #[tokio::test]
    async fn shutdown_drains_pending_edits() {
        let handle = spawn_with(EngineConfig::default());
        handle.set_cell_input(at("A1"), "2").unwrap();
        handle.set_cell_input(at("A2"), "=A1^10").unwrap();

        let engine = handle.shutdown().await.unwrap();
        assert_eq!(engine.get_cell_value(at("A2")).unwrap(), CellValue::Number(1024.0));
    }

    #[tokio::test]
    async fn unknown_sheet_is_rejected_up_front() {
        let handle = spawn_with(EngineConfig::default());
        let err = handle.set_cell_input(CellRef::new(SheetId(3), 0, 0), "1").unwrap_err();
        assert!(matches!(err, EngineError::UnknownSheet(_)));

        let data = handle.add_sheet("Data");
        handle.set_cell_input(CellRef::new(data, 0, 0), "1").unwrap();
        handle.flush().await.unwrap();
        assert_eq!(handle.reader().value_at("Data!A1").unwrap(), CellValue::Number(1.0));
    }

    #[tokio::test]
    async fn flush_reports_a_pass_that_could_not_start() {
        let (store, down) = OutageStore::new();
        let handle = Worker::spawn(Engine::with_store(EngineConfig::default(), store).unwrap());

        // Leave an invalid cell behind so every pass start reads the store.
        handle.set_cell_input(at("A1"), "=B1").unwrap();
        handle.flush().await.unwrap();
        handle.set_cell_input(at("B1"), "=A1").unwrap();
        handle.flush().await.unwrap();

        down.store(true, Ordering::SeqCst);
        handle.set_cell_input(at("C1"), "1").unwrap();
        let err = handle.flush().await.unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Unavailable(_))));

        down.store(false, Ordering::SeqCst);
        handle.set_cell_input(at("C1"), "2").unwrap();
        handle.flush().await.unwrap();
        assert_eq!(handle.reader().get_cell_value(at("C1")).unwrap(), CellValue::Number(2.0));
    }
}
