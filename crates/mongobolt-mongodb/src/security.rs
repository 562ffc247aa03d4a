//! Input validation for MongoDB operations
//!
//! Security-focused validation applied to every user-controlled identifier
//! before it reaches the driver: collection names, field names, query
//! filters, and ObjectId coercion.

use bson::{oid::ObjectId, Bson, Document as BsonDocument};
use mongobolt_common::{BoltError, Result};

/// Maximum allowed length for collection names (MongoDB limit is 255, we're more conservative)
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Maximum allowed length for field names
const MAX_FIELD_NAME_LENGTH: usize = 1024;

/// Where a field name appears, which decides whether `$`-prefixed operators
/// are acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldContext {
    /// Plain document field; `$` prefix is never allowed
    Document,
    /// Key position inside a query or update document; recognised operators pass
    QueryOperator,
}

/// Validated collection name that prevents injection attacks
///
/// # Guarantees
/// - Not empty
/// - Maximum 120 characters
/// - No null bytes
/// - No "system." prefix (system collections)
/// - No $ characters (special operators)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(BoltError::InvalidIdentifier(
                "collection name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(BoltError::InvalidIdentifier(format!(
                "collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }

        if name.contains('\0') {
            return Err(BoltError::InvalidIdentifier(
                "collection name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with("system.") {
            return Err(BoltError::InvalidIdentifier(format!(
                "collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }

        if name.contains('$') {
            return Err(BoltError::InvalidIdentifier(format!(
                "collection name cannot contain '$' character: '{}'",
                name
            )));
        }

        Ok(ValidatedCollectionName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Update operators accepted at the top level of an update document
const UPDATE_OPERATORS: &[&str] = &[
    "$set", "$unset", "$inc", "$mul", "$rename", "$setOnInsert",
    "$min", "$max", "$currentDate", "$addToSet", "$pop", "$pull",
    "$push", "$pullAll", "$each", "$slice", "$sort", "$position",
];

/// Query operators accepted in key position of a filter document
const QUERY_OPERATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin",
    "$and", "$or", "$not", "$nor", "$exists", "$type", "$mod",
    "$regex", "$options", "$all", "$elemMatch", "$size", "$expr",
];

/// Geospatial operators accepted in key position of a filter document
const GEO_OPERATORS: &[&str] = &[
    "$geoWithin", "$geoIntersects", "$near", "$nearSphere", "$geometry",
    "$maxDistance", "$minDistance", "$box", "$center", "$centerSphere",
    "$polygon",
];

/// Checks if the name is a recognised MongoDB operator
fn is_known_operator(name: &str) -> bool {
    UPDATE_OPERATORS.contains(&name)
        || QUERY_OPERATORS.contains(&name)
        || GEO_OPERATORS.contains(&name)
}

/// Validated field name that prevents operator injection
///
/// # Guarantees
/// - Not empty
/// - Maximum 1024 characters
/// - No null bytes
/// - `$` prefix only in [`FieldContext::QueryOperator`] position, and only
///   for operators on the allowlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFieldName {
    name: String,
}

impl ValidatedFieldName {
    pub fn new(name: &str, context: FieldContext) -> Result<Self> {
        if name.is_empty() {
            return Err(BoltError::InvalidIdentifier(
                "field name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_FIELD_NAME_LENGTH {
            return Err(BoltError::InvalidIdentifier(format!(
                "field name exceeds maximum length of {} characters",
                MAX_FIELD_NAME_LENGTH
            )));
        }

        if name.contains('\0') {
            return Err(BoltError::InvalidIdentifier(
                "field name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with('$') {
            match context {
                FieldContext::Document => {
                    return Err(BoltError::InvalidIdentifier(format!(
                        "field name cannot start with '$' (reserved for operators): '{}'",
                        name
                    )));
                }
                FieldContext::QueryOperator => {
                    if !is_known_operator(name) {
                        return Err(BoltError::InvalidIdentifier(format!(
                            "unknown MongoDB operator: '{}'",
                            name
                        )));
                    }
                }
            }
        }

        Ok(ValidatedFieldName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedFieldName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedFieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Context-aware ObjectId parser that prevents auto-conversion attacks
///
/// An attacker who controls a filter value must not be able to smuggle in a
/// value that the engine silently upgrades to an ObjectId. Conversion only
/// happens when the caller's type information says the field IS an ObjectId.
pub struct ObjectIdParser;

impl ObjectIdParser {
    /// Parse `value` as an ObjectId only when the caller expects one;
    /// otherwise the value is returned unchanged.
    pub fn parse(value: Bson, expect_object_id: bool) -> Bson {
        match value {
            Bson::String(s) if expect_object_id => ObjectId::parse_str(&s)
                .map(Bson::ObjectId)
                .unwrap_or(Bson::String(s)),
            other => other,
        }
    }

    /// Checks if a string should be converted to ObjectId based on a type hint.
    /// Without a hint, even valid 24-hex strings remain strings.
    pub fn should_convert_to_objectid(value: &str, type_name: Option<&str>) -> bool {
        if !Self::is_valid_objectid_format(value) {
            return false;
        }
        match type_name {
            Some(name) => Self::is_objectid_type(name),
            None => false,
        }
    }

    /// Checks if a string has valid ObjectId format (24 hex characters)
    pub fn is_valid_objectid_format(value: &str) -> bool {
        value.len() == 24 && value.chars().all(|c| c.is_ascii_hexdigit())
    }

    fn is_objectid_type(type_name: &str) -> bool {
        matches!(
            type_name,
            "ObjectId" | "PydanticObjectId" | "BsonObjectId" | "MongoObjectId"
        )
    }
}

/// MongoDB operators that execute server-side JavaScript; always blocked
const DANGEROUS_OPERATORS: &[&str] = &["$where", "$function", "$accumulator"];

/// Reject any occurrence of a blocked operator at any depth of a filter.
///
/// Rejection is fatal; there is no partial sanitisation.
pub fn sanitize_filter(filter: &Bson) -> Result<()> {
    match filter {
        Bson::Document(doc) => {
            for (key, value) in doc.iter() {
                if DANGEROUS_OPERATORS.contains(&key.as_str()) {
                    return Err(BoltError::DangerousOperator(format!(
                        "operator '{}' is not allowed",
                        key
                    )));
                }
                sanitize_filter(value)?;
            }
            Ok(())
        }
        Bson::Array(arr) => {
            for item in arr {
                sanitize_filter(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// [`sanitize_filter`] for a top-level filter document.
pub fn sanitize_filter_document(doc: &BsonDocument) -> Result<()> {
    for (key, value) in doc.iter() {
        if DANGEROUS_OPERATORS.contains(&key.as_str()) {
            return Err(BoltError::DangerousOperator(format!(
                "operator '{}' is not allowed",
                key
            )));
        }
        sanitize_filter(value)?;
    }
    Ok(())
}

/// Validate the top-level keys of an update document.
///
/// Every `$`-prefixed key must be a recognised update/query operator; plain
/// keys are allowed (they get wrapped in `$set` by the operation layer).
pub fn validate_update_operators(update: &BsonDocument) -> Result<()> {
    for key in update.keys() {
        if key.starts_with('$') {
            ValidatedFieldName::new(key, FieldContext::QueryOperator)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_valid_collection_names() {
        for name in ["users", "posts", "my_collection", "test123"] {
            assert!(
                ValidatedCollectionName::new(name).is_ok(),
                "should accept valid name: {}",
                name
            );
        }
    }

    #[test]
    fn test_empty_collection_name() {
        let result = ValidatedCollectionName::new("");
        assert!(matches!(result, Err(BoltError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_collection_name_too_long() {
        let long_name = "a".repeat(MAX_COLLECTION_NAME_LENGTH + 1);
        assert!(ValidatedCollectionName::new(&long_name).is_err());
    }

    #[test]
    fn test_collection_name_with_null_byte() {
        assert!(ValidatedCollectionName::new("test\0collection").is_err());
    }

    #[test]
    fn test_system_collection_blocked() {
        let result = ValidatedCollectionName::new("system.users");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("system."));
    }

    #[test]
    fn test_collection_name_with_dollar_sign() {
        assert!(ValidatedCollectionName::new("$users").is_err());
        assert!(ValidatedCollectionName::new("users$tmp").is_err());
    }

    #[test]
    fn test_validated_collection_name_display() {
        let validated = ValidatedCollectionName::new("users").unwrap();
        assert_eq!(validated.as_str(), "users");
        assert_eq!(validated.to_string(), "users");
    }

    #[test]
    fn test_valid_field_names() {
        for name in ["email", "user_id", "created_at", "nested.field"] {
            assert!(
                ValidatedFieldName::new(name, FieldContext::Document).is_ok(),
                "should accept valid field name: {}",
                name
            );
        }
    }

    #[test]
    fn test_empty_field_name() {
        assert!(ValidatedFieldName::new("", FieldContext::Document).is_err());
    }

    #[test]
    fn test_field_name_with_null_byte() {
        assert!(ValidatedFieldName::new("test\0field", FieldContext::Document).is_err());
    }

    #[test]
    fn test_operator_rejected_in_document_context() {
        assert!(ValidatedFieldName::new("$set", FieldContext::Document).is_err());
    }

    #[test]
    fn test_known_operators_accepted_in_operator_context() {
        for op in ["$set", "$inc", "$push", "$pull", "$gte", "$in", "$elemMatch", "$nearSphere"] {
            assert!(
                ValidatedFieldName::new(op, FieldContext::QueryOperator).is_ok(),
                "should accept known operator: {}",
                op
            );
        }
    }

    #[test]
    fn test_unknown_operator_rejected_in_operator_context() {
        let result = ValidatedFieldName::new("$frobnicate", FieldContext::QueryOperator);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("$frobnicate"));
    }

    #[test]
    fn test_where_not_on_allowlist() {
        assert!(ValidatedFieldName::new("$where", FieldContext::QueryOperator).is_err());
    }

    #[test]
    fn test_objectid_parse_with_expectation() {
        let hex = "507f1f77bcf86cd799439011";
        let parsed = ObjectIdParser::parse(Bson::String(hex.to_string()), true);
        assert!(matches!(parsed, Bson::ObjectId(_)));
    }

    #[test]
    fn test_objectid_parse_without_expectation_is_identity() {
        let hex = "507f1f77bcf86cd799439011";
        let parsed = ObjectIdParser::parse(Bson::String(hex.to_string()), false);
        assert_eq!(parsed, Bson::String(hex.to_string()));
    }

    #[test]
    fn test_objectid_parser_without_type_hint() {
        assert!(!ObjectIdParser::should_convert_to_objectid(
            "507f1f77bcf86cd799439011",
            None
        ));
    }

    #[test]
    fn test_objectid_parser_with_type_hint() {
        assert!(ObjectIdParser::should_convert_to_objectid(
            "507f1f77bcf86cd799439011",
            Some("ObjectId")
        ));
        assert!(!ObjectIdParser::should_convert_to_objectid(
            "not-an-objectid",
            Some("ObjectId")
        ));
    }

    #[test]
    fn test_sanitize_safe_filter() {
        let safe = doc! {"email": "test@example.com", "age": {"$gt": 18}};
        assert!(sanitize_filter(&Bson::Document(safe)).is_ok());
    }

    #[test]
    fn test_sanitize_rejects_where() {
        let dangerous = doc! {"$where": "this.email == 'admin@example.com'"};
        let result = sanitize_filter(&Bson::Document(dangerous));
        assert!(matches!(result, Err(BoltError::DangerousOperator(_))));
    }

    #[test]
    fn test_sanitize_rejects_function_and_accumulator() {
        for op in ["$function", "$accumulator"] {
            let dangerous = doc! { op: {"body": "function() {}", "args": [], "lang": "js"} };
            assert!(sanitize_filter(&Bson::Document(dangerous)).is_err());
        }
    }

    #[test]
    fn test_sanitize_recurses_into_arrays_and_documents() {
        let nested = doc! {
            "$and": [
                {"email": "test@example.com"},
                {"profile": {"inner": {"$where": "true"}}}
            ]
        };
        assert!(sanitize_filter(&Bson::Document(nested)).is_err());
    }

    #[test]
    fn test_sanitize_filter_document_top_level() {
        assert!(sanitize_filter_document(&doc! {"age": {"$gt": 18}}).is_ok());
        assert!(sanitize_filter_document(&doc! {"$where": "true"}).is_err());
        assert!(sanitize_filter_document(&doc! {"a": {"$where": "true"}}).is_err());
    }

    #[test]
    fn test_validate_update_operators() {
        assert!(validate_update_operators(&doc! {"$set": {"age": 31}}).is_ok());
        assert!(validate_update_operators(&doc! {"age": 31}).is_ok());
        assert!(validate_update_operators(&doc! {"$evil": {"x": 1}}).is_err());
    }
}
