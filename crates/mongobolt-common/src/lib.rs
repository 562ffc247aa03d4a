//! Shared types for the mongobolt workspace.
//!
//! This crate holds the error taxonomy spoken by every other crate: the
//! engine raises `BoltError`, the Python binding maps it onto exceptions.

pub mod error;

pub use error::{BoltError, Result, ValidationError, ValidationErrorKind};
