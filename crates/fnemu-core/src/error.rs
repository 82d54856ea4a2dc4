use std::backtrace::Backtrace;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const TYPE_URL_PREFIX: &str = "types.googleapis.com/google.rpc";

/// The closed set of failure kinds surfaced by the controller.
///
/// Each kind fixes a status code; the numeric values are the gRPC canonical
/// codes so the same error can be reported over either transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Conflict,
    Internal,
    InvalidArgument,
    NotFound,
}

impl ErrorKind {
    pub fn status(&self) -> &'static str {
        match self {
            ErrorKind::Conflict => "ALREADY_EXISTS",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
        }
    }

    pub fn grpc_code(&self) -> i32 {
        match self {
            ErrorKind::InvalidArgument => 3,
            ErrorKind::NotFound => 5,
            ErrorKind::Conflict => 6,
            ErrorKind::Internal => 13,
        }
    }

    /// Map an HTTP status returned by the REST surface onto a kind.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::InvalidArgument,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        }
    }

    /// Map a gRPC status code onto a kind.
    pub fn from_grpc_code(code: i32) -> Self {
        match code {
            3 => ErrorKind::InvalidArgument,
            5 => ErrorKind::NotFound,
            6 => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status())
    }
}

/// One field that failed request validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub description: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            description: description.into(),
        }
    }
}

/// Typed diagnostic block attached to a [`StructuredError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "snake_case")]
pub enum ErrorDetail {
    DebugInfo {
        stack_entries: Vec<String>,
        detail: String,
    },
    BadRequest {
        field_violations: Vec<FieldViolation>,
    },
    ResourceInfo {
        resource_type: String,
        resource_name: String,
        description: String,
    },
}

impl ErrorDetail {
    pub fn type_url(&self) -> String {
        let name = match self {
            ErrorDetail::DebugInfo { .. } => "DebugInfo",
            ErrorDetail::BadRequest { .. } => "BadRequest",
            ErrorDetail::ResourceInfo { .. } => "ResourceInfo",
        };
        format!("{TYPE_URL_PREFIX}.{name}")
    }
}

/// A code-bearing error with an ordered list of detail blocks.
///
/// Construction always records a `DebugInfo` block holding the message and
/// the captured call stack. Further blocks are attached with the `with_*`
/// builders, which consume `self`; the value is never mutated after it has
/// been handed to a caller.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StructuredError {
    kind: ErrorKind,
    message: String,
    details: Vec<ErrorDetail>,
}

impl StructuredError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let stack_entries = Backtrace::force_capture()
            .to_string()
            .lines()
            .map(|line| line.trim_end().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        let debug = ErrorDetail::DebugInfo {
            stack_entries,
            detail: message.clone(),
        };
        Self {
            kind,
            message,
            details: vec![debug],
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Attach a single-field `BadRequest` block.
    pub fn with_field_violation(
        self,
        field: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.with_field_violations(vec![FieldViolation::new(field, description)])
    }

    pub fn with_field_violations(mut self, field_violations: Vec<FieldViolation>) -> Self {
        self.details
            .push(ErrorDetail::BadRequest { field_violations });
        self
    }

    pub fn with_resource_info(
        mut self,
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
    ) -> Self {
        let description = self.message.clone();
        self.details.push(ErrorDetail::ResourceInfo {
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
            description,
        });
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

/// Invalid or incomplete controller configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Please provide a project ID: set `project_id` in the config file, pass --project-id, or export GCLOUD_PROJECT"
    )]
    MissingProjectId,

    #[error("\"service_mode\" must be one of \"rest\" or \"grpc\", got {0:?}")]
    UnknownServiceMode(String),

    #[error("invalid transport settings: {0}")]
    InvalidTransport(String),

    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
