use std::path::PathBuf;

use fnemu_core::StructuredError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackagerError {
    #[error("One of \"stage-directory\" or \"stage-bucket\" must be set!")]
    MissingDestination,

    #[error("Only one of \"stage-directory\" or \"stage-bucket\" may be set!")]
    ConflictingDestination,

    #[error("source directory {} does not exist", .0.display())]
    SourceMissing(PathBuf),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PackagerError> for StructuredError {
    fn from(err: PackagerError) -> Self {
        let message = err.to_string();
        match err {
            PackagerError::MissingDestination | PackagerError::ConflictingDestination => {
                StructuredError::invalid_argument(message)
                    .with_field_violation("stage-bucket", "exactly one destination is required")
                    .with_field_violation("stage-directory", "exactly one destination is required")
            }
            PackagerError::SourceMissing(_) => StructuredError::invalid_argument(message)
                .with_field_violation("local-path", "must be an existing directory"),
            PackagerError::Archive(_) | PackagerError::Sink(_) | PackagerError::Io(_) => {
                StructuredError::internal(message)
            }
        }
    }
}
