//! Lifecycle management for the emulator's external process: launch,
//! readiness and shutdown detection, and the persisted server record.

pub mod error;
pub mod process;
pub mod record;
pub mod supervisor;

pub use error::SupervisorError;
pub use process::{LaunchSpec, OsLauncher, ProcessHandle, ProcessLauncher, StopSignal};
pub use record::{FileRecordStore, MemoryRecordStore, RecordStore, ServerRecord};
pub use supervisor::{POLL_INTERVAL, ServerState, ServerStatus, StopOutcome, Supervisor};
