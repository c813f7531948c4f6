//! Change subscriptions.
//!
//! A subscription watches one cell or one range. It is called at most once
//! per committed pass, with every value change of that pass inside the
//! watched area. Callbacks run after the pass has committed, outside every
//! engine lock, so they may read the engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cell::{CellRef, CellValue, Reference};

/// A committed value change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub cell: CellRef,
    pub value: CellValue,
}

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback = Arc<dyn Fn(&[CellUpdate]) + Send + Sync>;

struct Subscription {
    watch: Reference,
    callback: Callback,
}

type Table = RwLock<HashMap<SubscriptionId, Subscription>>;

/// Registry of live subscriptions.
#[derive(Default, Clone)]
pub struct Subscriptions {
    table: Arc<Table>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for changes inside `watch`.
    ///
    /// The callback receives the changed cells of one pass in address
    /// order, never an empty slice. The subscription lives until the
    /// returned handle is dropped.
    pub fn subscribe<F>(&self, watch: Reference, callback: F) -> SubscriptionHandle
    where
        F: Fn(&[CellUpdate]) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.table.write().insert(
            id,
            Subscription {
                watch,
                callback: Arc::new(callback),
            },
        );
        tracing::trace!(id = id.0, watch = %watch, "subscribed");
        SubscriptionHandle {
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Deliver one pass's updates, once to each subscription they touch.
    pub fn publish(&self, updates: &[CellUpdate]) {
        if updates.is_empty() {
            return;
        }

        // Collect under the lock, call outside it.
        let deliveries: Vec<(Callback, Vec<CellUpdate>)> = {
            let table = self.table.read();
            let mut out = Vec::new();
            for subscription in table.values() {
                let batch: Vec<CellUpdate> = updates
                    .iter()
                    .filter(|u| subscription.watch.covers(&u.cell))
                    .cloned()
                    .collect();
                if !batch.is_empty() {
                    out.push((Arc::clone(&subscription.callback), batch));
                }
            }
            out
        };

        for (callback, batch) in deliveries {
            callback(&batch);
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions").field("len", &self.len()).finish()
    }
}

/// Handle to a live subscription.
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping the handle cancels the subscription"]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    table: Weak<Table>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Cancel the subscription now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.write().remove(&self.id);
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscriptionHandle").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{RangeRef, SheetId};
    use parking_lot::Mutex;

    fn at(row: u32, col: u32) -> CellRef {
        CellRef::new(SheetId(0), row, col)
    }

    fn update(cell: CellRef, n: f64) -> CellUpdate {
        CellUpdate {
            cell,
            value: CellValue::Number(n),
        }
    }

    #[test]
    fn subscription_ids_are_unique() {
        assert_ne!(SubscriptionId::next(), SubscriptionId::next());
    }

    #[test]
    fn cell_and_range_watches_filter_updates() {
        let subs = Subscriptions::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        let _cell = subs.subscribe(Reference::Cell(at(0, 0)), move |batch| {
            log.lock().extend(batch.iter().map(|u| ("cell", u.cell)));
        });

        let log = Arc::clone(&seen);
        let range = RangeRef::from_corners(at(0, 0), at(9, 0)).unwrap();
        let _range = subs.subscribe(Reference::Range(range), move |batch| {
            log.lock().extend(batch.iter().map(|u| ("range", u.cell)));
        });

        subs.publish(&[update(at(0, 0), 1.0), update(at(5, 0), 2.0), update(at(0, 1), 3.0)]);

        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![("cell", at(0, 0)), ("range", at(0, 0)), ("range", at(5, 0))]);
    }

    #[test]
    fn dropping_the_handle_unsubscribes() {
        let subs = Subscriptions::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let handle = subs.subscribe(Reference::Cell(at(0, 0)), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subs.publish(&[update(at(0, 0), 1.0)]);
        assert_eq!(subs.len(), 1);
        handle.unsubscribe();
        subs.publish(&[update(at(0, 0), 2.0)]);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(subs.is_empty());
    }

    #[test]
    fn callbacks_may_subscribe_reentrantly() {
        let subs = Subscriptions::new();
        let inner = subs.clone();
        let spawned = Arc::new(Mutex::new(Vec::new()));
        let keep = Arc::clone(&spawned);
        let _outer = subs.subscribe(Reference::Cell(at(0, 0)), move |_| {
            keep.lock().push(inner.subscribe(Reference::Cell(at(1, 1)), |_| {}));
        });

        subs.publish(&[update(at(0, 0), 1.0)]);
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn range_watch_hears_a_batch_once() {
        let subs = Subscriptions::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&calls);
        let range = RangeRef::from_corners(at(0, 0), at(9, 0)).unwrap();
        let _range = subs.subscribe(Reference::Range(range), move |batch| {
            log.lock().push(batch.len());
        });

        let pass: Vec<CellUpdate> = (0..10).map(|row| update(at(row, 0), row as f64)).collect();
        subs.publish(&pass);
        subs.publish(&[update(at(20, 0), 1.0)]);

        assert_eq!(*calls.lock(), vec![10]);
    }
}
