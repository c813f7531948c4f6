//! Python bindings.
//!
//! Exposes a synchronous `Workbook` wrapping one `Engine`. Addresses are
//! A1 strings, optionally sheet-qualified (`Data!B2`).

use std::borrow::Cow;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::cell::CellValue;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::store::Snapshot;

fn to_py_err(err: EngineError) -> PyErr {
    match err {
        EngineError::Parse(_)
        | EngineError::Cycle(_)
        | EngineError::UnknownSheet(_)
        | EngineError::Config(_) => PyValueError::new_err(err.to_string()),
        EngineError::Store(_) | EngineError::WorkerClosed => PyRuntimeError::new_err(err.to_string()),
    }
}

fn value_to_py(py: Python<'_>, value: CellValue) -> PyObject {
    match value {
        CellValue::Empty => py.None(),
        CellValue::Number(n) => n.into_py(py),
        CellValue::Text(s) => s.into_py(py),
        CellValue::Bool(b) => b.into_py(py),
        CellValue::Error(e) => e.to_string().into_py(py),
    }
}

/// Python-exposed workbook.
#[pyclass(name = "Workbook")]
pub struct PyWorkbook {
    engine: Engine,
}

#[pymethods]
impl PyWorkbook {
    /// Create an empty workbook, optionally from a JSON config.
    #[new]
    #[pyo3(signature = (config_json=None))]
    fn new(config_json: Option<&str>) -> PyResult<Self> {
        let config = match config_json {
            Some(json) => EngineConfig::from_json(json).map_err(to_py_err)?,
            None => EngineConfig::default(),
        };
        let engine = Engine::new(config).map_err(to_py_err)?;
        Ok(Self { engine })
    }

    /// Restore a workbook from MessagePack snapshot bytes.
    #[staticmethod]
    fn load(bytes: &[u8]) -> PyResult<Self> {
        let snapshot = Snapshot::from_msgpack(bytes)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        let engine = Engine::restore(EngineConfig::default(), &snapshot).map_err(to_py_err)?;
        Ok(Self { engine })
    }

    /// Serialize the workbook to MessagePack bytes.
    fn save(&self) -> PyResult<Cow<'static, [u8]>> {
        self.engine
            .snapshot()
            .and_then(|s| s.to_msgpack().map_err(EngineError::from))
            .map(Cow::Owned)
            .map_err(to_py_err)
    }

    fn add_sheet(&mut self, name: &str) -> u32 {
        self.engine.add_sheet(name).raw()
    }

    /// Set a cell's input and recalculate. Returns the addresses whose
    /// values changed.
    fn set_cell_input(&mut self, address: &str, raw: &str) -> PyResult<Vec<String>> {
        let cell = self.engine.resolve(address).map_err(to_py_err)?;
        let report = self.engine.set_cell_input(cell, raw).map_err(to_py_err)?;
        Ok(report.updates.iter().map(|u| u.cell.to_string()).collect())
    }

    fn clear_cell(&mut self, address: &str) -> PyResult<()> {
        let cell = self.engine.resolve(address).map_err(to_py_err)?;
        self.engine.clear_cell(cell).map_err(to_py_err)?;
        Ok(())
    }

    fn get_cell_value(&self, py: Python<'_>, address: &str) -> PyResult<PyObject> {
        let cell = self.engine.resolve(address).map_err(to_py_err)?;
        let value = self.engine.get_cell_value(cell).map_err(to_py_err)?;
        Ok(value_to_py(py, value))
    }

    fn get_cell_input(&self, address: &str) -> PyResult<Option<String>> {
        let cell = self.engine.resolve(address).map_err(to_py_err)?;
        self.engine.cell_input(cell).map_err(to_py_err)
    }

    /// `(depends_on, dependents)` of a cell as address strings.
    fn dependencies(&self, address: &str) -> PyResult<(Vec<String>, Vec<String>)> {
        let cell = self.engine.resolve(address).map_err(to_py_err)?;
        let deps = self.engine.dependencies(cell);
        Ok((
            deps.depends_on.iter().map(|r| r.to_string()).collect(),
            deps.dependents.iter().map(|c| c.to_string()).collect(),
        ))
    }

    fn recalculate_all(&mut self) -> PyResult<usize> {
        let report = self.engine.recalculate_all().map_err(to_py_err)?;
        Ok(report.evaluated)
    }

    #[getter]
    fn epoch(&self) -> u64 {
        self.engine.epoch()
    }

    fn __repr__(&self) -> String {
        format!("Workbook(epoch={})", self.engine.epoch())
    }
}

/// Python module definition.
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyWorkbook>()?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
