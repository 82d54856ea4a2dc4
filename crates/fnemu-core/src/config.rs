use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable consulted when no project id is configured.
pub const PROJECT_ENV: &str = "GCLOUD_PROJECT";
/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "FNEMU_CONFIG";

/// Merged controller configuration.
///
/// Every field has a default so an empty file (or no file) is valid, except
/// that a project id must come from somewhere; see [`EmulatorConfig::finalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub project_id: Option<String>,
    pub region: String,
    pub host: String,
    pub port: u16,
    /// Transport mode. Kept as a string so an unknown value is reported by
    /// the transport factory rather than rejected while parsing.
    pub service_mode: String,
    pub timeout_ms: u64,
    pub verbose: bool,
    pub use_mocks: bool,
    pub debug: bool,
    pub inspect: bool,
    pub debug_port: u16,
    pub log_file: Option<PathBuf>,
    pub run_supervisor: bool,
    pub supervisor_host: String,
    pub supervisor_port: u16,
    pub emulator_bin: String,
    pub emulator_args: Vec<String>,
    pub stage_bucket: Option<String>,
    pub stage_directory: Option<PathBuf>,
    pub storage_endpoint: String,
    pub storage_token: Option<String>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            region: "us-central1".into(),
            host: "localhost".into(),
            port: 8008,
            service_mode: "rest".into(),
            timeout_ms: 10_000,
            verbose: false,
            use_mocks: false,
            debug: false,
            inspect: false,
            debug_port: 5858,
            log_file: None,
            run_supervisor: true,
            supervisor_host: "localhost".into(),
            supervisor_port: 8010,
            emulator_bin: "functions-emulator".into(),
            emulator_args: Vec::new(),
            stage_bucket: None,
            stage_directory: None,
            storage_endpoint: "https://storage.googleapis.com".into(),
            storage_token: None,
        }
    }
}

impl EmulatorConfig {
    /// `{config_dir}/fnemu`, where the config file and the server record live.
    pub fn base_dir() -> PathBuf {
        dirs::config_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fnemu")
    }

    /// Config file location: `$FNEMU_CONFIG`, else `{base_dir}/config.toml`.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::base_dir().join("config.toml"))
    }

    pub fn default_log_file() -> PathBuf {
        Self::base_dir()
            .join("logs")
            .join("cloud-functions-emulator.log")
    }

    pub fn default_stage_directory() -> PathBuf {
        std::env::temp_dir().join("fnemu-staging")
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".into(),
            message: e.to_string(),
        })
    }

    /// Load the config file if it exists, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if path.exists() {
            tracing::debug!(path = %path.display(), "Loading config file");
            Self::from_file(&path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Resolve values that depend on the environment and make sure the log
    /// file's directory exists.
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        if self.project_id.as_deref().is_none_or(str::is_empty) {
            self.project_id = std::env::var(PROJECT_ENV).ok().filter(|p| !p.is_empty());
        }
        if self.project_id.is_none() {
            return Err(ConfigError::MissingProjectId);
        }

        let log_file = self.log_file.take().unwrap_or_else(Self::default_log_file);
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.log_file = Some(log_file);
        Ok(self)
    }

    /// The project id. Empty until [`finalize`](Self::finalize) succeeded.
    pub fn project(&self) -> &str {
        self.project_id.as_deref().unwrap_or_default()
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_file.clone().unwrap_or_else(Self::default_log_file)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_file_yields_defaults() {
        let config = EmulatorConfig::from_toml("").unwrap();
        assert_eq!(config, EmulatorConfig::default());
        assert_eq!(config.region, "us-central1");
        assert_eq!(config.port, 8008);
        assert_eq!(config.service_mode, "rest");
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
project_id = "my-project"
region = "europe-west1"
host = "127.0.0.1"
port = 9000
service_mode = "grpc"
timeout_ms = 2000
debug = true
debug_port = 9229
emulator_bin = "node"
emulator_args = ["."]
stage_bucket = "my-stage"
"#;
        let config = EmulatorConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.project_id.as_deref(), Some("my-project"));
        assert_eq!(config.region, "europe-west1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.service_mode, "grpc");
        assert!(config.debug);
        assert_eq!(config.emulator_args, vec!["."]);
        assert_eq!(config.stage_bucket.as_deref(), Some("my-stage"));
        assert!(config.stage_directory.is_none());
    }

    #[test]
    fn unknown_mode_survives_parsing() {
        let config = EmulatorConfig::from_toml(r#"service_mode = "soap""#).unwrap();
        assert_eq!(config.service_mode, "soap");
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = EmulatorConfig::from_toml("port = \"not a number\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn finalize_creates_log_directory() {
        let tmp = TempDir::new().unwrap();
        let log_file = tmp.path().join("nested").join("emulator.log");
        let config = EmulatorConfig {
            project_id: Some("p".into()),
            log_file: Some(log_file.clone()),
            ..Default::default()
        }
        .finalize()
        .unwrap();

        assert_eq!(config.log_path(), log_file);
        assert!(log_file.parent().unwrap().is_dir());
    }

    #[test]
    fn finalize_uses_env_project_and_fails_without_one() {
        let tmp = TempDir::new().unwrap();
        let base = EmulatorConfig {
            log_file: Some(tmp.path().join("emulator.log")),
            ..Default::default()
        };

        unsafe { std::env::set_var(PROJECT_ENV, "env-project") };
        let config = base.clone().finalize().unwrap();
        assert_eq!(config.project(), "env-project");

        unsafe { std::env::remove_var(PROJECT_ENV) };
        let err = base.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::MissingProjectId));
    }
}
