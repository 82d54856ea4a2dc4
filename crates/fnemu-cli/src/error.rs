use fnemu_core::{ConfigError, StructuredError};
use fnemu_supervisor::SupervisorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Api(#[from] StructuredError),

    /// Several concurrent operations failed; every failure is kept.
    #[error("{} of {total} operations failed", .failures.len())]
    Aggregate {
        total: usize,
        failures: Vec<StructuredError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Structured errors carried by this error, for detailed reporting.
    pub fn structured(&self) -> Vec<&StructuredError> {
        match self {
            ControllerError::Api(e) => vec![e],
            ControllerError::Supervisor(SupervisorError::Transport(e)) => vec![e],
            ControllerError::Aggregate { failures, .. } => failures.iter().collect(),
            _ => Vec::new(),
        }
    }
}
