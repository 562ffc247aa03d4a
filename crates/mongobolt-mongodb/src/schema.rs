//! Type descriptors and the process-wide schema cache
//!
//! A binding registers one schema per document class, keyed by the fully
//! qualified class name so classes with the same short name in different
//! host modules never collide. The serialisable shape the binding sends is
//! parsed into [`TypeDescriptor`] trees exactly once per registration; the
//! validator and the operation layer only ever see the parsed form.

use crate::convert::ExtractedValue;
use crate::security::{FieldContext, ValidatedFieldName};
use mongobolt_common::{BoltError, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Numeric bound kept in the descriptor's declared domain; an Int64 field
/// compares against `Int` bounds without widening to double.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintBound {
    Int(i64),
    Float(f64),
}

impl ConstraintBound {
    pub fn as_f64(&self) -> f64 {
        match self {
            ConstraintBound::Int(i) => *i as f64,
            ConstraintBound::Float(f) => *f,
        }
    }
}

impl std::fmt::Display for ConstraintBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintBound::Int(i) => write!(f, "{}", i),
            ConstraintBound::Float(v) => write!(f, "{}", v),
        }
    }
}

/// String format constraint; the vocabulary is deliberately minimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Email,
    Url,
}

/// Constraints attached to a field, evaluated after the type check passes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    /// Minimum length in code points (strings) or elements (arrays)
    pub min_length: Option<usize>,
    /// Maximum length in code points (strings) or elements (arrays)
    pub max_length: Option<usize>,
    pub min: Option<ConstraintBound>,
    pub max: Option<ConstraintBound>,
    pub format: Option<StringFormat>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.min_length.is_none()
            && self.max_length.is_none()
            && self.min.is_none()
            && self.max.is_none()
            && self.format.is_none()
    }
}

/// The schema atom: one field's declared type
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    String,
    Int64,
    Double,
    Bool,
    Bytes,
    DateTime,
    Decimal,
    ObjectId,
    Null,
    /// No validation at all
    Any,
    /// Every element validated against `items`
    Array { items: Box<FieldSchema> },
    /// Declared fields validated; unknown fields pass (permissive schema)
    Object { fields: Vec<(String, FieldSchema)> },
}

impl TypeDescriptor {
    /// Human-readable type name for error messages
    pub fn type_name(&self) -> String {
        match self {
            TypeDescriptor::String => "string".to_string(),
            TypeDescriptor::Int64 => "int64".to_string(),
            TypeDescriptor::Double => "double".to_string(),
            TypeDescriptor::Bool => "bool".to_string(),
            TypeDescriptor::Bytes => "binary".to_string(),
            TypeDescriptor::DateTime => "datetime".to_string(),
            TypeDescriptor::Decimal => "decimal".to_string(),
            TypeDescriptor::ObjectId => "objectid".to_string(),
            TypeDescriptor::Null => "null".to_string(),
            TypeDescriptor::Any => "any".to_string(),
            TypeDescriptor::Array { items } => format!("array<{}>", items.descriptor.type_name()),
            TypeDescriptor::Object { .. } => "object".to_string(),
        }
    }
}

/// One field of a document schema
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub descriptor: TypeDescriptor,
    /// A missing key or an explicit null is accepted
    pub optional: bool,
    pub constraints: Constraints,
}

/// Parsed schema of one document class: an ordered field list.
///
/// The order is the registration shape's order; the validator reports errors
/// in this order, which keeps error lists deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSchema {
    fields: Vec<(String, FieldSchema)>,
}

impl DocumentSchema {
    /// Parse a binding-provided schema shape.
    ///
    /// The shape is a mapping from field name to a field shape; each field
    /// shape carries a `type` tag plus optional `constraints`, and the
    /// composite tags `optional`, `array` and `object` nest via `inner`,
    /// `items` and `schema` respectively.
    pub fn from_shape(shape: &[(String, ExtractedValue)]) -> Result<Self> {
        let mut fields = Vec::with_capacity(shape.len());
        for (name, field_shape) in shape {
            ValidatedFieldName::new(name, FieldContext::Document)?;
            let field = parse_field_shape(name, field_shape)?;
            fields.push((name.clone(), field));
        }
        Ok(DocumentSchema { fields })
    }

    pub fn fields(&self) -> &[(String, FieldSchema)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.fields
            .iter()
            .find(|(field_name, _)| field_name == name)
            .map(|(_, field)| field)
    }
}

fn shape_error(path: &str, reason: impl Into<String>) -> BoltError {
    BoltError::UnconvertibleValue {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn shape_entry<'a>(shape: &'a [(String, ExtractedValue)], key: &str) -> Option<&'a ExtractedValue> {
    shape
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value)
}

fn parse_field_shape(path: &str, shape: &ExtractedValue) -> Result<FieldSchema> {
    let entries = match shape {
        ExtractedValue::Document(entries) => entries,
        _ => return Err(shape_error(path, "field shape must be a mapping")),
    };

    let type_tag = match shape_entry(entries, "type") {
        Some(ExtractedValue::String(tag)) => tag.as_str(),
        Some(_) => return Err(shape_error(path, "'type' tag must be a string")),
        None => return Err(shape_error(path, "field shape missing 'type' tag")),
    };

    let constraints = match shape_entry(entries, "constraints") {
        Some(value) => parse_constraints(path, value)?,
        None => Constraints::default(),
    };

    let descriptor = match type_tag {
        "string" => TypeDescriptor::String,
        "int64" => TypeDescriptor::Int64,
        "double" => TypeDescriptor::Double,
        "bool" => TypeDescriptor::Bool,
        "binary" => TypeDescriptor::Bytes,
        "datetime" => TypeDescriptor::DateTime,
        "decimal" => TypeDescriptor::Decimal,
        "objectid" => TypeDescriptor::ObjectId,
        "null" => TypeDescriptor::Null,
        "any" => TypeDescriptor::Any,
        "optional" => {
            let inner_shape = shape_entry(entries, "inner")
                .ok_or_else(|| shape_error(path, "optional shape missing 'inner'"))?;
            let mut inner = parse_field_shape(path, inner_shape)?;
            inner.optional = true;
            // Constraints declared on the wrapper win over the inner shape's.
            if !constraints.is_empty() {
                inner.constraints = constraints;
            }
            return Ok(inner);
        }
        "array" => {
            let items_shape = shape_entry(entries, "items")
                .ok_or_else(|| shape_error(path, "array shape missing 'items'"))?;
            let items = parse_field_shape(&format!("{}[]", path), items_shape)?;
            TypeDescriptor::Array {
                items: Box::new(items),
            }
        }
        "object" => {
            let schema_shape = shape_entry(entries, "schema")
                .ok_or_else(|| shape_error(path, "object shape missing 'schema'"))?;
            let nested = match schema_shape {
                ExtractedValue::Document(nested) => nested,
                _ => return Err(shape_error(path, "'schema' must be a mapping")),
            };
            let mut fields = Vec::with_capacity(nested.len());
            for (name, field_shape) in nested {
                ValidatedFieldName::new(name, FieldContext::Document)?;
                let nested_path = format!("{}.{}", path, name);
                fields.push((name.clone(), parse_field_shape(&nested_path, field_shape)?));
            }
            TypeDescriptor::Object { fields }
        }
        other => return Err(shape_error(path, format!("unknown type tag '{}'", other))),
    };

    Ok(FieldSchema {
        descriptor,
        optional: false,
        constraints,
    })
}

fn parse_constraints(path: &str, shape: &ExtractedValue) -> Result<Constraints> {
    let entries = match shape {
        ExtractedValue::Document(entries) => entries,
        _ => return Err(shape_error(path, "'constraints' must be a mapping")),
    };

    let mut constraints = Constraints::default();
    for (key, value) in entries {
        match (key.as_str(), value) {
            ("min_length", ExtractedValue::Int64(n)) if *n >= 0 => {
                constraints.min_length = Some(*n as usize);
            }
            ("max_length", ExtractedValue::Int64(n)) if *n >= 0 => {
                constraints.max_length = Some(*n as usize);
            }
            ("min", ExtractedValue::Int64(n)) => constraints.min = Some(ConstraintBound::Int(*n)),
            ("min", ExtractedValue::Double(f)) => {
                constraints.min = Some(ConstraintBound::Float(*f))
            }
            ("max", ExtractedValue::Int64(n)) => constraints.max = Some(ConstraintBound::Int(*n)),
            ("max", ExtractedValue::Double(f)) => {
                constraints.max = Some(ConstraintBound::Float(*f))
            }
            ("format", ExtractedValue::String(format)) => {
                constraints.format = Some(match format.as_str() {
                    "email" => StringFormat::Email,
                    "url" => StringFormat::Url,
                    other => {
                        return Err(shape_error(path, format!("unknown format '{}'", other)))
                    }
                });
            }
            (key, _) => {
                return Err(shape_error(
                    path,
                    format!("invalid constraint entry '{}'", key),
                ));
            }
        }
    }
    Ok(constraints)
}

// Process-wide schema cache keyed by fully-qualified class name.
// Writers are rare (registration); reads happen on every validated operation.
static SCHEMAS: Lazy<RwLock<HashMap<String, Arc<DocumentSchema>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a schema for a class. Re-registration overwrites, which supports
/// interactive redefinition; the last writer wins.
pub fn register_schema(class_name: &str, schema: DocumentSchema) -> Result<()> {
    let mut cache = SCHEMAS
        .write()
        .map_err(|e| BoltError::Internal(format!("schema cache lock poisoned: {}", e)))?;
    cache.insert(class_name.to_string(), Arc::new(schema));
    Ok(())
}

/// Look up the schema registered for a class. A miss means validation is
/// skipped for that class.
pub fn lookup_schema(class_name: &str) -> Option<Arc<DocumentSchema>> {
    SCHEMAS
        .read()
        .ok()
        .and_then(|cache| cache.get(class_name).cloned())
}

/// Drop every registered schema (shutdown and test isolation)
pub fn clear_schemas() {
    if let Ok(mut cache) = SCHEMAS.write() {
        cache.clear();
    }
}
