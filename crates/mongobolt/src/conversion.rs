//! Host-value extraction and materialisation
//!
//! These are the only two places the interpreter lock is held during an
//! operation. Extraction walks a Python value once and copies it into the
//! engine's owned intermediate form; materialisation builds Python dicts
//! from that form after decode. Everything between those endpoints runs
//! without the GIL.

use crate::config::{ObjectIdConversionMode, SecurityConfig};
use crate::error_handling::bolt_to_pyerr;
use mongobolt_common::BoltError;
use mongobolt_mongodb::convert::{DocumentFields, ExtractedValue};
use mongobolt_mongodb::security::ObjectIdParser;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyBytes, PyDict, PyFloat, PyInt, PyList, PyString};

/// Maximum nesting depth for recursive structures (MongoDB limit)
const MAX_DEPTH: usize = 100;

fn unconvertible(path: &str, reason: impl Into<String>) -> PyErr {
    bolt_to_pyerr(BoltError::UnconvertibleValue {
        path: path.to_string(),
        reason: reason.into(),
    })
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

/// Extract a Python dict into the engine's field list (GIL held).
pub fn extract_document(
    py: Python<'_>,
    dict: &Bound<'_, PyDict>,
    config: &SecurityConfig,
) -> PyResult<DocumentFields> {
    extract_dict_fields(py, dict, config, "", 0)
}

fn extract_dict_fields(
    py: Python<'_>,
    dict: &Bound<'_, PyDict>,
    config: &SecurityConfig,
    path: &str,
    depth: usize,
) -> PyResult<DocumentFields> {
    let mut fields = Vec::with_capacity(dict.len());
    for (key, value) in dict.iter() {
        let key: String = key
            .extract()
            .map_err(|_| unconvertible(path, "dict keys must be strings"))?;
        let value_path = child_path(path, &key);
        let extracted = extract_value(py, &value, config, &value_path, depth + 1)?;
        fields.push((key, extracted));
    }
    Ok(fields)
}

fn extract_value(
    py: Python<'_>,
    value: &Bound<'_, PyAny>,
    config: &SecurityConfig,
    path: &str,
    depth: usize,
) -> PyResult<ExtractedValue> {
    if depth > MAX_DEPTH {
        return Err(unconvertible(
            path,
            "maximum nesting depth exceeded (possible circular reference)",
        ));
    }

    // None
    if value.is_none() {
        return Ok(ExtractedValue::Null);
    }

    // Boolean (must check before int since bool is subclass of int in Python)
    if value.is_instance_of::<PyBool>() {
        return Ok(ExtractedValue::Bool(value.extract::<bool>()?));
    }

    // Bytes
    if let Ok(bytes) = value.downcast::<PyBytes>() {
        return Ok(ExtractedValue::Bytes(bytes.as_bytes().to_vec()));
    }

    // Type name check for types not reachable through abi3 downcasts
    let type_name = value
        .get_type()
        .name()
        .map(|s| s.to_string())
        .unwrap_or_default();

    // DateTime
    if type_name == "datetime" {
        let timestamp = value
            .call_method0("timestamp")
            .and_then(|ts| ts.extract::<f64>())
            .map_err(|_| unconvertible(path, "failed to convert datetime to timestamp"))?;
        return Ok(ExtractedValue::DateTimeMillis((timestamp * 1000.0) as i64));
    }

    // Date (no time component): midnight at the start of the day
    if type_name == "date" {
        let datetime_mod = py.import("datetime")?;
        let datetime_cls = datetime_mod.getattr("datetime")?;
        let midnight = datetime_mod.getattr("time")?.call0()?;
        let combined = datetime_cls
            .call_method1("combine", (value, midnight))
            .map_err(|_| unconvertible(path, "failed to convert date to datetime"))?;
        let timestamp = combined
            .call_method0("timestamp")
            .and_then(|ts| ts.extract::<f64>())
            .map_err(|_| unconvertible(path, "failed to convert date to timestamp"))?;
        return Ok(ExtractedValue::DateTimeMillis((timestamp * 1000.0) as i64));
    }

    // Decimal
    if type_name == "Decimal" {
        let repr = value
            .str()
            .map_err(|_| unconvertible(path, "failed to render Decimal"))?;
        return Ok(ExtractedValue::Decimal(repr.to_string()));
    }

    // ObjectId wrapper classes
    if matches!(
        type_name.as_str(),
        "ObjectId" | "PydanticObjectId" | "BsonObjectId" | "MongoObjectId"
    ) {
        let hex = value
            .str()
            .map_err(|_| unconvertible(path, "failed to render ObjectId"))?
            .to_string();
        if !ObjectIdParser::should_convert_to_objectid(&hex, Some(&type_name)) {
            return Err(unconvertible(path, format!("invalid ObjectId value '{}'", hex)));
        }
        return Ok(ExtractedValue::ObjectId(hex));
    }

    // Integer: i64 when it fits, otherwise the decimal digits are kept and
    // encoded as Decimal128 instead of being truncated
    if value.downcast::<PyInt>().is_ok() {
        if let Ok(i) = value.extract::<i64>() {
            return Ok(ExtractedValue::Int64(i));
        }
        let digits = value
            .str()
            .map_err(|_| unconvertible(path, "failed to render oversized integer"))?;
        return Ok(ExtractedValue::BigInt(digits.to_string()));
    }

    // Float
    if let Ok(f) = value.downcast::<PyFloat>() {
        return Ok(ExtractedValue::Double(f.extract::<f64>()?));
    }

    // String
    if let Ok(s) = value.downcast::<PyString>() {
        let s = s.extract::<String>()?;
        let auto_convert = match config.objectid_mode {
            ObjectIdConversionMode::Lenient => ObjectIdParser::is_valid_objectid_format(&s),
            ObjectIdConversionMode::TypeHinted | ObjectIdConversionMode::Strict => false,
        };
        if auto_convert {
            return Ok(ExtractedValue::ObjectId(s));
        }
        return Ok(ExtractedValue::String(s));
    }

    // Dict
    if let Ok(dict) = value.downcast::<PyDict>() {
        let fields = extract_dict_fields(py, dict, config, path, depth)?;
        return Ok(ExtractedValue::Document(fields));
    }

    // List
    if let Ok(list) = value.downcast::<PyList>() {
        let mut items = Vec::with_capacity(list.len());
        for (index, item) in list.iter().enumerate() {
            let item_path = format!("{}[{}]", path, index);
            items.push(extract_value(py, &item, config, &item_path, depth + 1)?);
        }
        return Ok(ExtractedValue::Array(items));
    }

    Err(unconvertible(
        path,
        format!("unsupported type '{}'", type_name),
    ))
}

/// Materialise an extracted value as a Python object (GIL held).
pub fn extracted_to_py(py: Python<'_>, value: ExtractedValue) -> PyResult<PyObject> {
    match value {
        ExtractedValue::Null => Ok(py.None()),
        ExtractedValue::Bool(b) => Ok(b.into_pyobject(py)?.to_owned().into_any().unbind()),
        ExtractedValue::Int64(i) => Ok(i.into_pyobject(py)?.into_any().unbind()),
        ExtractedValue::BigInt(digits) => {
            let int_cls = py.import("builtins")?.getattr("int")?;
            Ok(int_cls.call1((digits,))?.unbind())
        }
        ExtractedValue::Double(f) => Ok(f.into_pyobject(py)?.into_any().unbind()),
        ExtractedValue::String(s) => Ok(s.into_pyobject(py)?.into_any().unbind()),
        // ObjectId crosses the boundary as its 24-character hex string
        ExtractedValue::ObjectId(hex) => Ok(hex.into_pyobject(py)?.into_any().unbind()),
        ExtractedValue::DateTimeMillis(millis) => {
            let datetime_mod = py.import("datetime")?;
            let datetime_cls = datetime_mod.getattr("datetime")?;
            let utc = datetime_mod.getattr("timezone")?.getattr("utc")?;
            let secs = (millis as f64) / 1000.0;
            Ok(datetime_cls
                .call_method1("fromtimestamp", (secs, utc))?
                .unbind())
        }
        ExtractedValue::Bytes(b) => Ok(PyBytes::new(py, &b).into_any().unbind()),
        ExtractedValue::Decimal(s) => {
            let decimal_cls = py.import("decimal")?.getattr("Decimal")?;
            Ok(decimal_cls.call1((s,))?.unbind())
        }
        ExtractedValue::Array(items) => {
            let list = PyList::empty(py);
            for item in items {
                list.append(extracted_to_py(py, item)?)?;
            }
            Ok(list.into_any().unbind())
        }
        ExtractedValue::Document(fields) => Ok(fields_to_py_dict(py, fields)?.into_any()),
    }
}

/// Materialise a decoded field list as a Python dict (GIL held). Field order
/// is preserved, so `_id` stays first on read results.
pub fn fields_to_py_dict(py: Python<'_>, fields: DocumentFields) -> PyResult<Py<PyDict>> {
    let dict = PyDict::new(py);
    for (key, value) in fields {
        dict.set_item(key, extracted_to_py(py, value)?)?;
    }
    Ok(dict.unbind())
}
