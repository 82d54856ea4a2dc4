use std::path::PathBuf;

use fnemu_core::StructuredError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Emulator did not {action} within {timeout_ms}ms")]
    Timeout { action: &'static str, timeout_ms: u64 },

    #[error("Emulator process {pid} exited during startup, check {}", .log_file.display())]
    ExitedDuringStartup { pid: u32, log_file: PathBuf },

    #[error("Emulator is not running. Run \"fnemu start\" to start it.")]
    NotRunning,

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },

    #[error("Server record error: {0}")]
    Record(String),

    #[error("Server record {} is unreadable: {message}", .path.display())]
    CorruptRecord { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] StructuredError),
}

impl From<serde_json::Error> for SupervisorError {
    fn from(err: serde_json::Error) -> Self {
        SupervisorError::Record(err.to_string())
    }
}
