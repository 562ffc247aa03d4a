//! Process-wide security configuration
//!
//! Governs how aggressively the extraction phase coerces ObjectIds, whether
//! filters run through the query sanitiser, and whether driver error
//! messages are scrubbed before reaching Python.

use once_cell::sync::Lazy;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::sync::RwLock;

/// How string values relate to ObjectId during extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectIdConversionMode {
    /// Auto-convert any 24-character hex string. Backward compatible,
    /// rejected by the injection-hardening work; avoid in new code.
    Lenient,
    /// Convert only values whose type says ObjectId (wrapper classes,
    /// declared id fields)
    TypeHinted,
    /// Never auto-convert; explicit wrappers only
    Strict,
}

impl ObjectIdConversionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectIdConversionMode::Lenient => "lenient",
            ObjectIdConversionMode::TypeHinted => "type_hinted",
            ObjectIdConversionMode::Strict => "strict",
        }
    }

    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "lenient" => Some(ObjectIdConversionMode::Lenient),
            "type_hinted" => Some(ObjectIdConversionMode::TypeHinted),
            "strict" => Some(ObjectIdConversionMode::Strict),
            _ => None,
        }
    }
}

/// Security configuration shared by every operation
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub objectid_mode: ObjectIdConversionMode,
    /// Run the query sanitiser on every filter
    pub validate_queries: bool,
    /// Scrub credentials out of driver error messages
    pub sanitize_errors: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            objectid_mode: ObjectIdConversionMode::TypeHinted,
            validate_queries: true,
            sanitize_errors: true,
        }
    }
}

static CONFIG: Lazy<RwLock<SecurityConfig>> = Lazy::new(|| RwLock::new(SecurityConfig::default()));

/// Snapshot of the current configuration. Fetched once per operation, not
/// once per field.
pub fn get_config() -> SecurityConfig {
    CONFIG
        .read()
        .map(|config| config.clone())
        .unwrap_or_default()
}

fn update_config(update: impl FnOnce(&mut SecurityConfig)) {
    if let Ok(mut config) = CONFIG.write() {
        update(&mut config);
    }
}

/// Set the ObjectId conversion mode: "lenient", "type_hinted" or "strict"
#[pyfunction]
fn set_objectid_mode(mode: &str) -> PyResult<()> {
    let parsed = ObjectIdConversionMode::parse(mode)
        .ok_or_else(|| PyValueError::new_err(format!("unknown ObjectId mode '{}'", mode)))?;
    update_config(|config| config.objectid_mode = parsed);
    Ok(())
}

/// Enable or disable the query sanitiser
#[pyfunction]
fn set_validate_queries(enabled: bool) {
    update_config(|config| config.validate_queries = enabled);
}

/// Enable or disable error message scrubbing
#[pyfunction]
fn set_sanitize_errors(enabled: bool) {
    update_config(|config| config.sanitize_errors = enabled);
}

/// Current security configuration as a dict
#[pyfunction]
fn get_security_config(py: Python<'_>) -> PyResult<Bound<'_, PyDict>> {
    let config = get_config();
    let dict = PyDict::new(py);
    dict.set_item("objectid_mode", config.objectid_mode.as_str())?;
    dict.set_item("validate_queries", config.validate_queries)?;
    dict.set_item("sanitize_errors", config.sanitize_errors)?;
    Ok(dict)
}

pub fn register_functions(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(set_objectid_mode, m)?)?;
    m.add_function(wrap_pyfunction!(set_validate_queries, m)?)?;
    m.add_function(wrap_pyfunction!(set_sanitize_errors, m)?)?;
    m.add_function(wrap_pyfunction!(get_security_config, m)?)?;
    Ok(())
}
