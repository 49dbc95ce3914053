//! Shared building blocks for the Switchyard crates: configuration,
//! the common error type, and the schema-validation capability consumed
//! by the procedure pipeline.

pub mod config;
pub mod error;
pub mod schema;

pub use error::{Error, Result};
pub use schema::{FieldError, Kind, ObjectSchema, Schema};
