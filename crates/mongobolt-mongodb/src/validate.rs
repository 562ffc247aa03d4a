//! Recursive document validation against a parsed schema
//!
//! The validator is a pure function of `(document, schema)`. It never fails
//! fatally: traversal continues after each violation and the full error list
//! comes back in deterministic pre-order (schema field order, array elements
//! left to right). The operation layer decides whether to surface the list
//! as a fatal `InvalidDocument`.

use crate::schema::{ConstraintBound, Constraints, DocumentSchema, FieldSchema, StringFormat, TypeDescriptor};
use bson::{Bson, Document as BsonDocument};
use mongobolt_common::{ValidationError, ValidationErrorKind};
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());

static URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").unwrap());

/// BSON type name for error messages
fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::Timestamp(_) => "timestamp",
        Bson::Binary(_) => "binary",
        Bson::ObjectId(_) => "objectid",
        Bson::DateTime(_) => "datetime",
        Bson::Symbol(_) => "symbol",
        Bson::Decimal128(_) => "decimal",
        _ => "unknown",
    }
}

/// Validate a document against a schema, returning every violation found.
/// An empty list means the document is valid.
pub fn validate_document(doc: &BsonDocument, schema: &DocumentSchema) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    validate_fields(None, doc, schema.fields(), &mut errors);
    errors
}

fn join_path(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(parent) => format!("{}.{}", parent, name),
        None => name.to_string(),
    }
}

fn validate_fields(
    parent: Option<&str>,
    doc: &BsonDocument,
    fields: &[(String, FieldSchema)],
    errors: &mut Vec<ValidationError>,
) {
    for (name, field) in fields {
        let path = join_path(parent, name);
        match doc.get(name) {
            None => {
                if !field.optional {
                    errors.push(ValidationError {
                        field_path: path,
                        kind: ValidationErrorKind::FieldRequired,
                        expected: Some(field.descriptor.type_name()),
                        got: None,
                        message: "required field is missing".to_string(),
                    });
                }
            }
            Some(Bson::Null) => {
                // Null is a value for a Null-typed field and a valid absence
                // for an optional one; anything else is a violation.
                if !field.optional && field.descriptor != TypeDescriptor::Null
                    && field.descriptor != TypeDescriptor::Any
                {
                    errors.push(ValidationError {
                        field_path: path,
                        kind: ValidationErrorKind::NotNullable,
                        expected: Some(field.descriptor.type_name()),
                        got: Some("null".to_string()),
                        message: "required field cannot be null".to_string(),
                    });
                }
            }
            Some(value) => validate_value(&path, value, field, errors),
        }
    }
}

fn type_mismatch(path: &str, field: &FieldSchema, value: &Bson) -> ValidationError {
    let expected = field.descriptor.type_name();
    let got = bson_type_name(value);
    ValidationError {
        field_path: path.to_string(),
        kind: ValidationErrorKind::TypeMismatch,
        expected: Some(expected.clone()),
        got: Some(got.to_string()),
        message: format!("expected type '{}', got '{}'", expected, got),
    }
}

fn validate_value(path: &str, value: &Bson, field: &FieldSchema, errors: &mut Vec<ValidationError>) {
    match &field.descriptor {
        TypeDescriptor::Any => {}

        TypeDescriptor::String => match value {
            Bson::String(s) => check_string_constraints(path, s, &field.constraints, errors),
            _ => errors.push(type_mismatch(path, field, value)),
        },

        TypeDescriptor::Int64 => match value {
            Bson::Int64(n) => check_int_constraints(path, *n, &field.constraints, errors),
            Bson::Int32(n) => check_int_constraints(path, *n as i64, &field.constraints, errors),
            _ => errors.push(type_mismatch(path, field, value)),
        },

        TypeDescriptor::Double => match value {
            Bson::Double(n) => check_double_constraints(path, *n, &field.constraints, errors),
            _ => errors.push(type_mismatch(path, field, value)),
        },

        TypeDescriptor::Bool => {
            if !matches!(value, Bson::Boolean(_)) {
                errors.push(type_mismatch(path, field, value));
            }
        }

        TypeDescriptor::Bytes => {
            if !matches!(value, Bson::Binary(_)) {
                errors.push(type_mismatch(path, field, value));
            }
        }

        TypeDescriptor::DateTime => {
            if !matches!(value, Bson::DateTime(_)) {
                errors.push(type_mismatch(path, field, value));
            }
        }

        TypeDescriptor::Decimal => match value {
            Bson::Decimal128(dec) => {
                // Constraint comparison goes through f64; exact for every
                // bound the shape parser accepts.
                if let Ok(n) = dec.to_string().parse::<f64>() {
                    check_double_constraints(path, n, &field.constraints, errors);
                }
            }
            _ => errors.push(type_mismatch(path, field, value)),
        },

        TypeDescriptor::ObjectId => {
            if !matches!(value, Bson::ObjectId(_)) {
                errors.push(type_mismatch(path, field, value));
            }
        }

        TypeDescriptor::Null => {
            if !matches!(value, Bson::Null) {
                errors.push(type_mismatch(path, field, value));
            }
        }

        TypeDescriptor::Array { items } => match value {
            Bson::Array(arr) => {
                check_array_length(path, arr.len(), &field.constraints, errors);
                for (index, item) in arr.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, index);
                    if matches!(item, Bson::Null) && items.optional {
                        continue;
                    }
                    validate_value(&item_path, item, items, errors);
                }
            }
            _ => errors.push(type_mismatch(path, field, value)),
        },

        TypeDescriptor::Object { fields } => match value {
            Bson::Document(doc) => validate_fields(Some(path), doc, fields, errors),
            _ => errors.push(type_mismatch(path, field, value)),
        },
    }
}

fn check_string_constraints(
    path: &str,
    value: &str,
    constraints: &Constraints,
    errors: &mut Vec<ValidationError>,
) {
    let length = value.chars().count();

    if let Some(min_len) = constraints.min_length {
        if length < min_len {
            errors.push(ValidationError {
                field_path: path.to_string(),
                kind: ValidationErrorKind::TooShort,
                expected: Some(format!("min length {}", min_len)),
                got: Some(length.to_string()),
                message: format!("string too short (min: {}, got: {})", min_len, length),
            });
        }
    }

    if let Some(max_len) = constraints.max_length {
        if length > max_len {
            errors.push(ValidationError {
                field_path: path.to_string(),
                kind: ValidationErrorKind::TooLong,
                expected: Some(format!("max length {}", max_len)),
                got: Some(length.to_string()),
                message: format!("string too long (max: {}, got: {})", max_len, length),
            });
        }
    }

    if let Some(format) = constraints.format {
        let (matches, name) = match format {
            StringFormat::Email => (EMAIL_REGEX.is_match(value), "email"),
            StringFormat::Url => (URL_REGEX.is_match(value), "url"),
        };
        if !matches {
            errors.push(ValidationError {
                field_path: path.to_string(),
                kind: ValidationErrorKind::InvalidFormat,
                expected: Some(name.to_string()),
                got: None,
                message: format!("invalid {} format", name),
            });
        }
    }
}

fn check_array_length(
    path: &str,
    length: usize,
    constraints: &Constraints,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(min_len) = constraints.min_length {
        if length < min_len {
            errors.push(ValidationError {
                field_path: path.to_string(),
                kind: ValidationErrorKind::TooShort,
                expected: Some(format!("min length {}", min_len)),
                got: Some(length.to_string()),
                message: format!("array too short (min: {}, got: {})", min_len, length),
            });
        }
    }
    if let Some(max_len) = constraints.max_length {
        if length > max_len {
            errors.push(ValidationError {
                field_path: path.to_string(),
                kind: ValidationErrorKind::TooLong,
                expected: Some(format!("max length {}", max_len)),
                got: Some(length.to_string()),
                message: format!("array too long (max: {}, got: {})", max_len, length),
            });
        }
    }
}

// Integer bounds compare in the integer domain; a Float bound falls back to
// f64 comparison.
fn check_int_constraints(
    path: &str,
    value: i64,
    constraints: &Constraints,
    errors: &mut Vec<ValidationError>,
) {
    let below = |bound: &ConstraintBound| match bound {
        ConstraintBound::Int(min) => value < *min,
        ConstraintBound::Float(min) => (value as f64) < *min,
    };
    let above = |bound: &ConstraintBound| match bound {
        ConstraintBound::Int(max) => value > *max,
        ConstraintBound::Float(max) => (value as f64) > *max,
    };
    push_range_errors(path, value.to_string(), constraints, below, above, errors);
}

fn check_double_constraints(
    path: &str,
    value: f64,
    constraints: &Constraints,
    errors: &mut Vec<ValidationError>,
) {
    let below = |bound: &ConstraintBound| value < bound.as_f64();
    let above = |bound: &ConstraintBound| value > bound.as_f64();
    push_range_errors(path, value.to_string(), constraints, below, above, errors);
}

fn push_range_errors(
    path: &str,
    got: String,
    constraints: &Constraints,
    below: impl Fn(&ConstraintBound) -> bool,
    above: impl Fn(&ConstraintBound) -> bool,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(min) = &constraints.min {
        if below(min) {
            errors.push(ValidationError {
                field_path: path.to_string(),
                kind: ValidationErrorKind::OutOfRange,
                expected: Some(format!("min {}", min)),
                got: Some(got.clone()),
                message: format!("value below minimum (min: {}, got: {})", min, got),
            });
        }
    }
    if let Some(max) = &constraints.max {
        if above(max) {
            errors.push(ValidationError {
                field_path: path.to_string(),
                kind: ValidationErrorKind::OutOfRange,
                expected: Some(format!("max {}", max)),
                got: Some(got.clone()),
                message: format!("value above maximum (max: {}, got: {})", max, got),
            });
        }
    }
}
