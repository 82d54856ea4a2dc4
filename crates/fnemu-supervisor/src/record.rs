use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fnemu_core::EmulatorConfig;
use fnemu_transport::ClientConfig;
use serde::{Deserialize, Serialize};

use crate::error::SupervisorError;

/// What the controller remembers about the emulator process it launched.
///
/// Outlives the invocation that wrote it, so a later `stop` or `kill` can
/// still find the process.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerRecord {
    pub pid: Option<u32>,
    pub host: String,
    pub port: u16,
    pub service_mode: String,
    pub project_id: String,
    pub log_file: Option<PathBuf>,
    pub debug: bool,
    pub inspect: bool,
    pub debug_port: u16,
    pub started: Option<DateTime<Utc>>,
    pub stopped: Option<DateTime<Utc>>,
}

impl ServerRecord {
    /// Record for a process about to be launched with `config`. Only the
    /// previous `stopped` stamp carries over.
    pub fn launching(config: &EmulatorConfig, previous: Option<&ServerRecord>) -> Self {
        Self {
            pid: None,
            host: config.host.clone(),
            port: config.port,
            service_mode: config.service_mode.clone(),
            project_id: config.project().to_string(),
            log_file: Some(config.log_path()),
            debug: config.debug,
            inspect: config.inspect,
            debug_port: config.debug_port,
            started: Some(Utc::now()),
            stopped: previous.and_then(|p| p.stopped),
        }
    }

    /// Point a client at the recorded endpoint: a recorded host and port win
    /// over configured ones.
    pub fn apply_endpoint(&self, client: &mut ClientConfig) {
        if !self.host.is_empty() {
            client.host = self.host.clone();
        }
        if self.port != 0 {
            client.port = self.port;
        }
    }
}

/// Persistence for the single active [`ServerRecord`].
pub trait RecordStore: Send + Sync {
    fn load(&self) -> Result<Option<ServerRecord>, SupervisorError>;

    fn save(&self, record: &ServerRecord) -> Result<(), SupervisorError>;

    /// Like [`load`](Self::load), but an unparseable record counts as absent
    /// so the next `save` replaces it.
    fn load_or_discard(&self) -> Result<Option<ServerRecord>, SupervisorError> {
        match self.load() {
            Err(SupervisorError::CorruptRecord { path, message }) => {
                tracing::warn!(path = %path.display(), error = %message, "Ignoring corrupt server record");
                Ok(None)
            }
            other => other,
        }
    }
}

/// Pretty JSON file, by default `{config_dir}/fnemu/active-server.json`.
pub struct FileRecordStore {
    path: PathBuf,
}

impl FileRecordStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> PathBuf {
        EmulatorConfig::base_dir().join("active-server.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for FileRecordStore {
    fn load(&self) -> Result<Option<ServerRecord>, SupervisorError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        let record =
            serde_json::from_str(&content).map_err(|e| SupervisorError::CorruptRecord {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        Ok(Some(record))
    }

    fn save(&self, record: &ServerRecord) -> Result<(), SupervisorError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(record)?;
        // Readers see the old record or the new one, never a torn write.
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, json)?;
        std::fs::rename(&staging, &self.path)?;
        tracing::debug!(path = %self.path.display(), pid = ?record.pid, "Server record saved");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRecordStore {
    record: Mutex<Option<ServerRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: ServerRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self) -> Result<Option<ServerRecord>, SupervisorError> {
        let record = self
            .record
            .lock()
            .map_err(|_| SupervisorError::Record("record lock poisoned".into()))?;
        Ok(record.clone())
    }

    fn save(&self, record: &ServerRecord) -> Result<(), SupervisorError> {
        let mut slot = self
            .record
            .lock()
            .map_err(|_| SupervisorError::Record("record lock poisoned".into()))?;
        *slot = Some(record.clone());
        Ok(())
    }
}
