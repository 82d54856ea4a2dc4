//! Shared building blocks for the fnemu controller: the structured error
//! taxonomy, the function model, and the merged configuration.

pub mod config;
pub mod error;
pub mod model;

pub use config::EmulatorConfig;
pub use error::{ConfigError, ErrorDetail, ErrorKind, FieldViolation, StructuredError};
pub use model::{CallResult, FunctionDescriptor, FunctionName, Trigger};
