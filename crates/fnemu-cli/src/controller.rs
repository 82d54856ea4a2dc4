use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fnemu_core::{
    CallResult, EmulatorConfig, FunctionDescriptor, FunctionName, StructuredError, Trigger,
};
use fnemu_packager::{ArchiveOptions, Packager};
use fnemu_supervisor::{
    FileRecordStore, OsLauncher, ProcessLauncher, RecordStore, ServerRecord, ServerStatus,
    StopOutcome, Supervisor,
};
use fnemu_transport::{ClientConfig, TransportClient};
use futures::future::join_all;

use crate::error::ControllerError;
use crate::logs::{self, DEFAULT_LOG_LIMIT};

/// Inputs of a deploy request.
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    pub local_path: Option<PathBuf>,
    pub stage_bucket: Option<String>,
    pub stage_directory: Option<PathBuf>,
    pub trigger_http: bool,
    pub trigger_topic: Option<String>,
    pub trigger_bucket: Option<String>,
    pub timeout: Option<Duration>,
}

/// Entry point for every emulator operation: process lifecycle through the
/// supervisor, function management through the transport.
pub struct Controller {
    /// Launch configuration; never rewritten by a server record.
    config: EmulatorConfig,
    /// Where the transport points, possibly a live server's recorded endpoint.
    client: ClientConfig,
    transport: Arc<dyn TransportClient>,
    launcher: Arc<dyn ProcessLauncher>,
    store: Arc<dyn RecordStore>,
    supervisor: Supervisor,
    packager: Packager,
}

impl Controller {
    /// Controller backed by the on-disk server record and real processes.
    pub fn new(config: EmulatorConfig) -> Result<Self, ControllerError> {
        let store = Arc::new(FileRecordStore::new(FileRecordStore::default_path()));
        Self::with_store(config, store, Arc::new(OsLauncher))
    }

    /// Finalizes `config`, points the transport at a live server's recorded
    /// host and port, and connects it. Fails before any I/O on a bad mode.
    pub fn with_store(
        config: EmulatorConfig,
        store: Arc<dyn RecordStore>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<Self, ControllerError> {
        let config = config.finalize()?;
        let mut client = ClientConfig::from_config(&config);
        if let Some(record) = store.load_or_discard()?.filter(|r| r.pid.is_some()) {
            record.apply_endpoint(&mut client);
        }
        let transport = fnemu_transport::connect(&client)?;
        let mut controller = Self::from_parts(config, transport, launcher, store);
        controller.client = client;
        Ok(controller)
    }

    pub fn from_parts(
        config: EmulatorConfig,
        transport: Arc<dyn TransportClient>,
        launcher: Arc<dyn ProcessLauncher>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let supervisor = Supervisor::new(
            config.clone(),
            transport.clone(),
            launcher.clone(),
            store.clone(),
        );
        let packager = Packager::from_config(&config);
        Self {
            client: ClientConfig::from_config(&config),
            config,
            transport,
            launcher,
            store,
            supervisor,
            packager,
        }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.client
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Launch with the configured endpoint and probe that endpoint, even when
    /// a stale record pointed the transport somewhere else.
    pub async fn start(&self) -> Result<ServerRecord, ControllerError> {
        let launch = ClientConfig::from_config(&self.config);
        if launch.endpoint() == self.client.endpoint() {
            return Ok(self.supervisor.start().await?);
        }
        tracing::debug!(
            recorded = %self.client.endpoint(),
            launch = %launch.endpoint(),
            "Ignoring recorded endpoint for launch"
        );
        let supervisor = Supervisor::new(
            self.config.clone(),
            fnemu_transport::connect(&launch)?,
            self.launcher.clone(),
            self.store.clone(),
        );
        Ok(supervisor.start().await?)
    }

    pub async fn stop(&self) -> Result<StopOutcome, ControllerError> {
        Ok(self.supervisor.stop().await?)
    }

    pub fn kill(&self) -> Result<ServerRecord, ControllerError> {
        Ok(self.supervisor.kill()?)
    }

    pub async fn status(&self) -> Result<ServerStatus, ControllerError> {
        Ok(self.supervisor.status().await?)
    }

    pub async fn ensure_running(&self) -> Result<ServerRecord, ControllerError> {
        Ok(self.supervisor.ensure_running().await?)
    }

    // ── Functions ──────────────────────────────────────────────────────────

    /// Package `opts.local_path` and register it as function `name`.
    ///
    /// Trigger and source are validated before the archive is built.
    pub async fn deploy(
        &self,
        name: &str,
        opts: &DeployOptions,
    ) -> Result<FunctionDescriptor, ControllerError> {
        let trigger = Trigger::resolve(
            opts.trigger_http,
            opts.trigger_topic.as_deref(),
            opts.trigger_bucket.as_deref(),
        )?;
        let local_path = opts.local_path.as_deref().ok_or_else(|| {
            StructuredError::invalid_argument("One of \"local-path\" or \"source-path\" must be set!")
                .with_field_violation("local-path", "a source directory is required")
        })?;
        let local_path = std::path::absolute(local_path)?;

        let mut function = FunctionDescriptor::new(FunctionName::format(
            self.config.project(),
            &self.config.region,
            name,
        ));
        function.trigger = Some(trigger);
        function.timeout = opts.timeout;
        function.local_path = Some(local_path.clone());

        let (stage_bucket, stage_directory) = self.staging(opts);
        let archive = ArchiveOptions {
            local_path,
            region: self.config.region.clone(),
            stage_bucket,
            stage_directory,
        };
        let location = self
            .packager
            .create_archive(name, &archive)
            .await
            .map_err(StructuredError::from)?;
        function.source_archive_url = Some(location);

        self.transport.create_function(&function).await?;
        tracing::info!(
            function = %name,
            source = function.source_archive_url.as_deref().unwrap_or_default(),
            "Function deployed"
        );
        Ok(function)
    }

    /// Request destinations win; otherwise configured ones; otherwise the
    /// default staging directory.
    fn staging(&self, opts: &DeployOptions) -> (Option<String>, Option<PathBuf>) {
        if opts.stage_bucket.is_some() || opts.stage_directory.is_some() {
            return (opts.stage_bucket.clone(), opts.stage_directory.clone());
        }
        if self.config.stage_bucket.is_some() || self.config.stage_directory.is_some() {
            return (
                self.config.stage_bucket.clone(),
                self.config.stage_directory.clone(),
            );
        }
        (None, Some(EmulatorConfig::default_stage_directory()))
    }

    pub async fn list(&self) -> Result<Vec<FunctionDescriptor>, ControllerError> {
        Ok(self.transport.list_functions().await?)
    }

    pub async fn describe(&self, name: &str) -> Result<FunctionDescriptor, ControllerError> {
        Ok(self.transport.get_function(name).await?)
    }

    pub async fn undeploy(&self, name: &str) -> Result<(), ControllerError> {
        Ok(self.transport.delete_function(name).await?)
    }

    /// Undeploy every function concurrently. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize, ControllerError> {
        let functions = self.list().await?;
        let names: Vec<&str> = functions.iter().map(FunctionDescriptor::short_name).collect();
        self.undeploy_all(&names).await
    }

    /// Undeploy functions whose local source directory no longer exists.
    /// Returns how many were removed.
    pub async fn prune(&self) -> Result<usize, ControllerError> {
        let functions = self.list().await?;
        let stale: Vec<&str> = functions
            .iter()
            .filter(|f| !f.local_path.as_deref().is_some_and(|p| p.exists()))
            .map(FunctionDescriptor::short_name)
            .collect();
        tracing::debug!(total = functions.len(), stale = stale.len(), "Pruning functions");
        self.undeploy_all(&stale).await
    }

    async fn undeploy_all(&self, names: &[&str]) -> Result<usize, ControllerError> {
        let results = join_all(names.iter().map(|name| self.transport.delete_function(name))).await;
        let failures: Vec<StructuredError> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            Ok(names.len())
        } else {
            Err(ControllerError::Aggregate {
                total: names.len(),
                failures,
            })
        }
    }

    pub async fn call(
        &self,
        name: &str,
        data: &serde_json::Value,
    ) -> Result<CallResult, ControllerError> {
        Ok(self.transport.call_function(name, data).await?)
    }

    /// The last `limit` (default 20) lines of the emulator log.
    pub fn get_logs(&self, limit: Option<usize>) -> Result<Vec<String>, ControllerError> {
        let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LOG_LIMIT);
        Ok(logs::read_last_lines(&self.config.log_path(), limit)?)
    }
}
