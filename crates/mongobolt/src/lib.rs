//! mongobolt: high-performance MongoDB ODM engine for Python
//!
//! The heavy lifting — BSON conversion, schema validation, change tracking,
//! driver I/O — happens in Rust with the GIL released; Python sees a small
//! async API plus a per-document state tracker.
//!
//! # Usage
//! ```python
//! from mongobolt.mongodb import init, insert_one, find_as_dicts
//!
//! await init("mongodb://localhost:27017/mydb")
//! await insert_one("users", {"name": "Alice", "age": 30})
//! rows = await find_as_dicts("users", {"name": "Alice"})
//! ```

use pyo3::prelude::*;

pub mod config;
pub mod conversion;
pub mod error_handling;

mod mongodb;

/// mongobolt Python module
#[pymodule]
fn mongobolt(py: Python, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    // Security configuration functions
    config::register_functions(m)?;

    // MongoDB operations submodule
    let mongodb_module = PyModule::new(py, "mongodb")?;
    mongodb::register_module(&mongodb_module)?;
    m.add_submodule(&mongodb_module)?;

    Ok(())
}
