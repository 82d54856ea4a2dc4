//! Controller for a local Cloud Functions emulator: process lifecycle,
//! deployment, invocation and log access behind one facade.

pub mod controller;
pub mod error;
pub mod logs;
pub mod output;

pub use controller::{Controller, DeployOptions};
pub use error::ControllerError;

use std::time::Duration;

/// Parse a timeout given as `"60s"` or a bare number of seconds.
pub fn parse_timeout(value: &str) -> Result<Duration, String> {
    let digits = value.trim().strip_suffix('s').unwrap_or(value.trim());
    digits
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| format!("invalid timeout {value:?}, expected seconds such as \"60s\""))
}
