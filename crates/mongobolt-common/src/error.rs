//! Error types for mongobolt

use thiserror::Error;

/// Result type alias for mongobolt operations
pub type Result<T> = std::result::Result<T, BoltError>;

/// Kind tag for a single schema-validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Value's BSON type differs from the declared type
    TypeMismatch,
    /// Required field is missing from the document
    FieldRequired,
    /// Required field was explicitly null
    NotNullable,
    /// String or array shorter than `min_length`
    TooShort,
    /// String or array longer than `max_length`
    TooLong,
    /// Numeric value outside the declared `min`/`max` bounds
    OutOfRange,
    /// String does not match the declared format (email, url)
    InvalidFormat,
}

impl ValidationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorKind::TypeMismatch => "type_mismatch",
            ValidationErrorKind::FieldRequired => "field_required",
            ValidationErrorKind::NotNullable => "not_nullable",
            ValidationErrorKind::TooShort => "too_short",
            ValidationErrorKind::TooLong => "too_long",
            ValidationErrorKind::OutOfRange => "out_of_range",
            ValidationErrorKind::InvalidFormat => "invalid_format",
        }
    }
}

impl std::fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single violation found while validating a document against a schema.
///
/// `field_path` uses dotted nesting for objects and `name[index]` for array
/// elements, e.g. `address.city` or `tags[2].label`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field_path: String,
    pub kind: ValidationErrorKind,
    pub expected: Option<String>,
    pub got: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "field '{}': {}", self.field_path, self.message)
    }
}

/// Unified error type for all mongobolt operations
#[derive(Error, Debug, Clone)]
pub enum BoltError {
    /// Collection or field name rejected by the security filter
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Query filter contained a blocked operator ($where, $function, ...)
    #[error("Dangerous operator: {0}")]
    DangerousOperator(String),

    /// Document failed schema validation; every violation is listed
    #[error("Invalid document: {} validation error(s)", errors.len())]
    InvalidDocument { errors: Vec<ValidationError> },

    /// A host value could not be converted to BSON
    #[error("Unconvertible value at '{path}': {reason}")]
    UnconvertibleValue { path: String, reason: String },

    /// Validation was requested but no schema is registered for the class
    #[error("No schema registered for class '{0}'")]
    SchemaNotFound(String),

    /// Error reported by the MongoDB driver
    #[error("Driver error: {0}")]
    Driver(String),

    /// Unique index violation, surfaced distinctly so callers can branch on it
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Operation exceeded its deadline; may succeed on retry
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation was cancelled before completion; never retried automatically
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Update/delete matched zero documents and the caller required a match
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invariant breakage inside the engine (lock poisoning and the like)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BoltError {
    /// Stable machine-readable kind string; this is the external taxonomy.
    pub fn kind(&self) -> &'static str {
        match self {
            BoltError::InvalidIdentifier(_) => "InvalidIdentifier",
            BoltError::DangerousOperator(_) => "DangerousOperator",
            BoltError::InvalidDocument { .. } => "InvalidDocument",
            BoltError::UnconvertibleValue { .. } => "UnconvertibleValue",
            BoltError::SchemaNotFound(_) => "SchemaNotFound",
            BoltError::Driver(_) => "DriverError",
            BoltError::DuplicateKey(_) => "DuplicateKey",
            BoltError::Timeout(_) => "Timeout",
            BoltError::Cancelled(_) => "OperationCancelled",
            BoltError::NotFound(_) => "NotFound",
            BoltError::Internal(_) => "InternalError",
        }
    }

    /// Returns true if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, BoltError::Driver(_) | BoltError::Timeout(_))
    }

    /// Validation errors carried by an `InvalidDocument`, if any
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            BoltError::InvalidDocument { errors } => errors,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for BoltError {
    fn from(err: serde_json::Error) -> Self {
        BoltError::Internal(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for BoltError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::{ErrorKind, WriteFailure};

        if let ErrorKind::Write(WriteFailure::WriteError(we)) = &*err.kind {
            if we.code == 11000 || we.code == 11001 {
                return BoltError::DuplicateKey(err.to_string());
            }
        }

        let msg = err.to_string();
        // Bulk writes report duplicate keys through a different error kind;
        // the server message carries the E11000 code either way.
        if msg.contains("E11000") || msg.contains("E11001") {
            BoltError::DuplicateKey(msg)
        } else {
            BoltError::Driver(msg)
        }
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for BoltError {
    fn from(err: bson::ser::Error) -> Self {
        BoltError::Internal(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for BoltError {
    fn from(err: bson::de::Error) -> Self {
        BoltError::Internal(format!("BSON deserialization error: {}", err))
    }
}
