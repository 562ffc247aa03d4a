//! MongoDB ODM engine for mongobolt
//!
//! This crate is the native core behind the Python binding: everything that
//! is performance- or correctness-critical lives here, free of any host
//! runtime dependency.
//!
//! # Features
//! - Schema registry with cached, pre-parsed type descriptors
//! - Recursive validator producing complete, path-tagged error lists
//! - Two-phase BSON conversion with threshold-gated parallelism
//! - Copy-on-write field change tracking for minimal `$set` updates
//! - Identifier validation and query sanitisation
//! - Batched link resolution with cycle detection
//! - Async operation layer over the official driver with per-op deadlines

pub mod connection;
pub mod convert;
pub mod links;
pub mod ops;
pub mod schema;
pub mod security;
pub mod state;
pub mod validate;

pub use connection::{Connection, PoolConfig};
pub use convert::{DocumentFields, ExtractedValue, DEFAULT_PARALLEL_THRESHOLD};
pub use mongobolt_common::{BoltError, Result, ValidationError, ValidationErrorKind};
pub use schema::{Constraints, DocumentSchema, FieldSchema, TypeDescriptor};
pub use security::{
    FieldContext, ObjectIdParser, ValidatedCollectionName, ValidatedFieldName,
};
pub use state::StateTracker;
