//! Clients for the functions emulator's control endpoint.
//!
//! [`TransportClient`] is the single capability contract the controller talks
//! to. Two wire protocols implement it, REST ([`rest::RestClient`]) and gRPC
//! ([`grpc::GrpcClient`]); [`connect`] is the only place that picks one.
//! Both report failures as [`StructuredError`]s with the same kinds, so callers
//! never branch on the transport mode.

pub mod grpc;
pub mod memory;
pub mod rest;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use fnemu_core::{CallResult, ConfigError, EmulatorConfig, FunctionDescriptor, StructuredError};

pub use grpc::GrpcClient;
pub use memory::MemoryTransport;
pub use rest::RestClient;

/// Boxed future returned by every [`TransportClient`] operation.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, StructuredError>> + Send + 'a>>;

/// Operations the controller performs against a running emulator.
///
/// Function names passed in are short names; implementations qualify them
/// with their configured project and region.
pub trait TransportClient: Send + Sync {
    fn mode(&self) -> TransportMode;

    /// Health probe. Succeeds only if the emulator answers.
    fn test_connection(&self) -> TransportFuture<'_, ()>;

    fn list_functions(&self) -> TransportFuture<'_, Vec<FunctionDescriptor>>;

    /// Fails with `NotFound` if the function does not exist.
    fn get_function<'a>(&'a self, name: &'a str) -> TransportFuture<'a, FunctionDescriptor>;

    /// Fails with `Conflict` if the name is taken and `InvalidArgument` if the
    /// descriptor has no trigger.
    fn create_function<'a>(
        &'a self,
        function: &'a FunctionDescriptor,
    ) -> TransportFuture<'a, ()>;

    /// Fails with `NotFound` if the function does not exist.
    fn delete_function<'a>(&'a self, name: &'a str) -> TransportFuture<'a, ()>;

    fn call_function<'a>(
        &'a self,
        name: &'a str,
        data: &'a serde_json::Value,
    ) -> TransportFuture<'a, CallResult>;
}

/// Wire protocol used to reach the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Rest,
    Grpc,
}

impl FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rest" => Ok(TransportMode::Rest),
            "grpc" => Ok(TransportMode::Grpc),
            other => Err(ConfigError::UnknownServiceMode(other.to_string())),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Rest => write!(f, "rest"),
            TransportMode::Grpc => write!(f, "grpc"),
        }
    }
}

/// Connection parameters copied out of the merged configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub service_mode: String,
    pub host: String,
    pub port: u16,
    pub project_id: String,
    pub region: String,
    /// Upper bound for a single request, health probes included.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn from_config(config: &EmulatorConfig) -> Self {
        Self {
            service_mode: config.service_mode.clone(),
            host: config.host.clone(),
            port: config.port,
            project_id: config.project().to_string(),
            region: config.region.clone(),
            request_timeout: Duration::from_secs(5),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Build the transport selected by `config.service_mode`.
///
/// An unrecognized mode is rejected here, before anything touches the
/// network. The gRPC channel connects lazily.
pub fn connect(config: &ClientConfig) -> Result<Arc<dyn TransportClient>, ConfigError> {
    let mode: TransportMode = config.service_mode.parse()?;
    tracing::debug!(%mode, endpoint = %config.endpoint(), "Creating emulator client");

    let client: Arc<dyn TransportClient> = match mode {
        TransportMode::Rest => Arc::new(RestClient::new(config)?),
        TransportMode::Grpc => Arc::new(GrpcClient::new(config)?),
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: &str) -> ClientConfig {
        ClientConfig {
            service_mode: mode.into(),
            host: "localhost".into(),
            port: 8008,
            project_id: "p".into(),
            region: "us-central1".into(),
            request_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn parses_known_modes() {
        assert_eq!("rest".parse::<TransportMode>().unwrap(), TransportMode::Rest);
        assert_eq!("grpc".parse::<TransportMode>().unwrap(), TransportMode::Grpc);
        assert_eq!(TransportMode::Grpc.to_string(), "grpc");
    }

    #[test]
    fn unknown_mode_is_a_config_error() {
        let err = connect(&config("soap")).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownServiceMode(mode) if mode == "soap"));
    }

    #[test]
    fn mode_match_is_case_sensitive() {
        assert!(connect(&config("REST")).is_err());
    }

    #[test]
    fn builds_rest_client() {
        let client = connect(&config("rest")).unwrap();
        assert_eq!(client.mode(), TransportMode::Rest);
    }

    #[test]
    fn builds_grpc_client_without_a_runtime() {
        // Nothing listens on this port; construction must still succeed.
        let mut cfg = config("grpc");
        cfg.port = 1;
        let client = connect(&cfg).unwrap();
        assert_eq!(client.mode(), TransportMode::Grpc);
    }
}
