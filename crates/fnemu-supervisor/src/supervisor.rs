use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fnemu_core::{EmulatorConfig, StructuredError};
use fnemu_transport::TransportClient;

use crate::error::SupervisorError;
use crate::process::{LaunchSpec, ProcessHandle, ProcessLauncher, StopSignal};
use crate::record::{RecordStore, ServerRecord};

/// Delay between health probes while waiting for a state change.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Whether the emulator answered its health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerState {
    Running,
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Running => write!(f, "RUNNING"),
            ServerState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Result of one health probe, together with the last persisted record.
///
/// A stopped status with no record fields set means the emulator was never
/// started here; a stopped status with a pid means it died unexpectedly.
#[derive(Debug)]
pub struct ServerStatus {
    pub state: ServerState,
    pub record: ServerRecord,
    /// Why the health check failed, when stopped.
    pub error: Option<StructuredError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The emulator stopped answering after SIGTERM.
    Graceful,
    /// SIGTERM was not honored in time and the process was killed.
    Forced,
}

/// Owns the emulator process lifecycle and its [`ServerRecord`].
pub struct Supervisor {
    config: EmulatorConfig,
    transport: Arc<dyn TransportClient>,
    launcher: Arc<dyn ProcessLauncher>,
    store: Arc<dyn RecordStore>,
    poll_interval: Duration,
}

impl Supervisor {
    pub fn new(
        config: EmulatorConfig,
        transport: Arc<dyn TransportClient>,
        launcher: Arc<dyn ProcessLauncher>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            config,
            transport,
            launcher,
            store,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Probe budget for one wait: `timeout / interval`, at least one.
    pub fn attempts(&self) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        let attempts = u128::from(self.config.timeout_ms) / interval;
        u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
    }

    /// Current record, or an empty one when nothing was ever started or the
    /// stored record is unreadable.
    pub fn record(&self) -> Result<ServerRecord, SupervisorError> {
        Ok(self.store.load_or_discard()?.unwrap_or_default())
    }

    /// Spawn the emulator and wait until it answers health checks.
    ///
    /// The record, including the new pid, is persisted before the first
    /// probe. On timeout the process is left running.
    pub async fn start(&self) -> Result<ServerRecord, SupervisorError> {
        let previous = self.store.load_or_discard()?;
        let spec = LaunchSpec::from_config(&self.config);

        if self.config.inspect {
            tracing::info!(log_file = %spec.log_file.display(), "Starting in inspect mode");
        } else if self.config.debug {
            tracing::info!(port = self.config.debug_port, "Starting in debug mode");
        }

        let mut child = self.launcher.launch(&spec)?;
        let mut record = ServerRecord::launching(&self.config, previous.as_ref());
        record.pid = Some(child.pid());
        self.store.save(&record)?;

        self.wait_for_start(child.as_mut()).await?;
        tracing::info!(
            pid = child.pid(),
            host = %record.host,
            port = record.port,
            "Emulator started"
        );
        Ok(record)
    }

    async fn wait_for_start(&self, child: &mut dyn ProcessHandle) -> Result<(), SupervisorError> {
        let mut remaining = self.attempts();
        loop {
            match self.transport.test_connection().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(remaining, error = %e, "Emulator not ready");
                }
            }

            if child.has_exited() {
                return Err(SupervisorError::ExitedDuringStartup {
                    pid: child.pid(),
                    log_file: self.config.log_path(),
                });
            }

            remaining -= 1;
            if remaining == 0 {
                return Err(SupervisorError::Timeout {
                    action: "start",
                    timeout_ms: self.config.timeout_ms,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wait_for_stop(&self) -> Result<(), SupervisorError> {
        let mut remaining = self.attempts();
        loop {
            if self.transport.test_connection().await.is_err() {
                return Ok(());
            }

            remaining -= 1;
            if remaining == 0 {
                return Err(SupervisorError::Timeout {
                    action: "stop",
                    timeout_ms: self.config.timeout_ms,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn status(&self) -> Result<ServerStatus, SupervisorError> {
        let record = self.record()?;
        Ok(match self.transport.test_connection().await {
            Ok(()) => ServerStatus {
                state: ServerState::Running,
                record,
                error: None,
            },
            Err(e) => ServerStatus {
                state: ServerState::Stopped,
                record,
                error: Some(e),
            },
        })
    }

    /// Fail with [`SupervisorError::NotRunning`] unless the emulator answers.
    pub async fn ensure_running(&self) -> Result<ServerRecord, SupervisorError> {
        let status = self.status().await?;
        match status.state {
            ServerState::Running => Ok(status.record),
            ServerState::Stopped => {
                if let Some(e) = &status.error {
                    tracing::debug!(error = %e, "Health check failed");
                }
                Err(SupervisorError::NotRunning)
            }
        }
    }

    /// SIGTERM, wait for the emulator to go quiet, then [`kill`](Self::kill)
    /// regardless of how the wait ended.
    pub async fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        let record = self.record()?;
        if let Some(pid) = record.pid {
            if let Err(e) = self.launcher.signal(pid, StopSignal::Terminate) {
                tracing::debug!(pid, error = %e, "SIGTERM failed");
            }
        }

        let outcome = match self.wait_for_stop().await {
            Ok(()) => StopOutcome::Graceful,
            Err(e) => {
                tracing::warn!(error = %e, "Graceful shutdown timed out, killing");
                StopOutcome::Forced
            }
        };
        self.kill()?;
        Ok(outcome)
    }

    /// SIGKILL the recorded pid, clear it and stamp `stopped`. Safe to repeat.
    pub fn kill(&self) -> Result<ServerRecord, SupervisorError> {
        let mut record = self.record()?;
        if let Some(pid) = record.pid.take() {
            match self.launcher.signal(pid, StopSignal::Kill) {
                Ok(()) => tracing::info!(pid, "Emulator process killed"),
                Err(e) => tracing::debug!(pid, error = %e, "SIGKILL failed"),
            }
        }
        record.stopped = Some(Utc::now());
        self.store.save(&record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FileRecordStore, MemoryRecordStore};
    use fnemu_core::{CallResult, FunctionDescriptor};
    use fnemu_transport::{ClientConfig, MemoryTransport, TransportFuture, TransportMode};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Records launches and signals; the fake process can be told to exit.
    #[derive(Default)]
    struct FakeLauncher {
        next_pid: AtomicU32,
        exited: Arc<AtomicBool>,
        signals: Mutex<Vec<(u32, StopSignal)>>,
        launched: Mutex<Vec<LaunchSpec>>,
    }

    struct FakeProcess {
        pid: u32,
        exited: Arc<AtomicBool>,
    }

    impl ProcessHandle for FakeProcess {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn has_exited(&mut self) -> bool {
            self.exited.load(Ordering::SeqCst)
        }
    }

    impl ProcessLauncher for FakeLauncher {
        fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, SupervisorError> {
            self.launched.lock().unwrap().push(spec.clone());
            let pid = 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeProcess {
                pid,
                exited: self.exited.clone(),
            }))
        }

        fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), SupervisorError> {
            self.signals.lock().unwrap().push((pid, signal));
            Ok(())
        }
    }

    /// Healthy transport that notes the recorded pid at every probe.
    struct PidRecordingTransport {
        inner: MemoryTransport,
        store: Arc<MemoryRecordStore>,
        seen: Mutex<Vec<Option<u32>>>,
    }

    impl TransportClient for PidRecordingTransport {
        fn mode(&self) -> TransportMode {
            self.inner.mode()
        }

        fn test_connection(&self) -> TransportFuture<'_, ()> {
            let pid = self.store.load().unwrap().and_then(|r| r.pid);
            self.seen.lock().unwrap().push(pid);
            self.inner.test_connection()
        }

        fn list_functions(&self) -> TransportFuture<'_, Vec<FunctionDescriptor>> {
            self.inner.list_functions()
        }

        fn get_function<'a>(&'a self, name: &'a str) -> TransportFuture<'a, FunctionDescriptor> {
            self.inner.get_function(name)
        }

        fn create_function<'a>(
            &'a self,
            function: &'a FunctionDescriptor,
        ) -> TransportFuture<'a, ()> {
            self.inner.create_function(function)
        }

        fn delete_function<'a>(&'a self, name: &'a str) -> TransportFuture<'a, ()> {
            self.inner.delete_function(name)
        }

        fn call_function<'a>(
            &'a self,
            name: &'a str,
            data: &'a serde_json::Value,
        ) -> TransportFuture<'a, CallResult> {
            self.inner.call_function(name, data)
        }
    }

    struct Harness {
        transport: Arc<MemoryTransport>,
        launcher: Arc<FakeLauncher>,
        store: Arc<MemoryRecordStore>,
        supervisor: Supervisor,
    }

    fn harness(timeout_ms: u64) -> Harness {
        let config = EmulatorConfig {
            project_id: Some("demo".into()),
            timeout_ms,
            log_file: Some("/tmp/fnemu-test.log".into()),
            ..Default::default()
        };
        let transport = Arc::new(MemoryTransport::new(&ClientConfig::from_config(&config)));
        let launcher = Arc::new(FakeLauncher::default());
        let store = Arc::new(MemoryRecordStore::new());
        let supervisor = Supervisor::new(
            config,
            transport.clone(),
            launcher.clone(),
            store.clone(),
        );
        Harness {
            transport,
            launcher,
            store,
            supervisor,
        }
    }

    #[test]
    fn attempts_are_at_least_one() {
        assert_eq!(harness(1000).supervisor.attempts(), 2);
        assert_eq!(harness(10_000).supervisor.attempts(), 20);
        assert_eq!(harness(100).supervisor.attempts(), 1);
        assert_eq!(harness(0).supervisor.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_then_status_reports_running() {
        let h = harness(10_000);

        let record = h.supervisor.start().await.unwrap();
        assert_eq!(record.pid, Some(1000));
        assert_eq!(h.transport.probe_count(), 1);

        let status = h.supervisor.status().await.unwrap();
        assert_eq!(status.state, ServerState::Running);
        assert_eq!(status.record.pid, Some(1000));
        assert!(status.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn start_times_out_after_exact_probe_budget() {
        let h = harness(1000);
        h.transport.set_healthy(false);

        let err = h.supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::Timeout { action: "start", .. }));
        assert_eq!(h.transport.probe_count(), 2);

        // Pid was recorded before polling and the process is left alone.
        assert_eq!(h.store.load().unwrap().unwrap().pid, Some(1000));
        assert!(h.launcher.signals.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_notices_a_crashed_child() {
        let h = harness(10_000);
        h.transport.set_healthy(false);
        h.launcher.exited.store(true, Ordering::SeqCst);

        let err = h.supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::ExitedDuringStartup { pid: 1000, .. }));
        assert_eq!(h.transport.probe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_preserves_previous_stop_stamp() {
        let h = harness(10_000);
        h.supervisor.start().await.unwrap();
        let killed = h.supervisor.kill().unwrap();

        let restarted = h.supervisor.start().await.unwrap();
        assert_eq!(restarted.pid, Some(1001));
        assert_eq!(restarted.stopped, killed.stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_graceful_when_emulator_goes_quiet() {
        let h = harness(1000);
        h.supervisor.start().await.unwrap();
        h.transport.set_healthy(false);

        let outcome = h.supervisor.stop().await.unwrap();
        assert_eq!(outcome, StopOutcome::Graceful);

        let record = h.store.load().unwrap().unwrap();
        assert_eq!(record.pid, None);
        assert!(record.stopped.is_some());
        assert_eq!(
            *h.launcher.signals.lock().unwrap(),
            vec![(1000, StopSignal::Terminate), (1000, StopSignal::Kill)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_forces_when_sigterm_is_ignored() {
        let h = harness(1000);
        h.supervisor.start().await.unwrap();

        let outcome = h.supervisor.stop().await.unwrap();
        assert_eq!(outcome, StopOutcome::Forced);

        let record = h.store.load().unwrap().unwrap();
        assert_eq!(record.pid, None);
        assert!(record.stopped.is_some());
    }

    #[test]
    fn kill_is_idempotent() {
        let h = harness(1000);
        h.store
            .save(&ServerRecord {
                pid: Some(77),
                ..Default::default()
            })
            .unwrap();

        let first = h.supervisor.kill().unwrap();
        let second = h.supervisor.kill().unwrap();
        assert_eq!(first.pid, None);
        assert_eq!(second.pid, None);
        assert!(second.stopped.is_some());
        assert_eq!(
            *h.launcher.signals.lock().unwrap(),
            vec![(77, StopSignal::Kill)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pid_is_persisted_before_first_probe() {
        let config = EmulatorConfig {
            project_id: Some("demo".into()),
            timeout_ms: 1000,
            ..Default::default()
        };
        let store = Arc::new(MemoryRecordStore::new());
        let transport = Arc::new(PidRecordingTransport {
            inner: MemoryTransport::new(&ClientConfig::from_config(&config)),
            store: store.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let supervisor = Supervisor::new(
            config,
            transport.clone(),
            Arc::new(FakeLauncher::default()),
            store,
        );

        supervisor.start().await.unwrap();
        assert_eq!(*transport.seen.lock().unwrap(), vec![Some(1000)]);
    }

    #[test]
    fn kill_replaces_a_corrupt_record() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("active-server.json");
        std::fs::write(&path, "{\"pid\": 12").unwrap();

        let config = EmulatorConfig {
            project_id: Some("demo".into()),
            ..Default::default()
        };
        let transport = Arc::new(MemoryTransport::new(&ClientConfig::from_config(&config)));
        let launcher = Arc::new(FakeLauncher::default());
        let store = Arc::new(FileRecordStore::new(path));
        let supervisor = Supervisor::new(config, transport, launcher.clone(), store.clone());

        let record = supervisor.kill().unwrap();
        assert_eq!(record.pid, None);
        assert!(record.stopped.is_some());
        assert!(launcher.signals.lock().unwrap().is_empty());

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.pid, None);
        assert_eq!(saved.stopped, record.stopped);
    }

    #[tokio::test]
    async fn ensure_running_fails_fast_when_stopped() {
        let h = harness(1000);
        h.transport.set_healthy(false);
        let err = h.supervisor.ensure_running().await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning));
        assert_eq!(h.transport.probe_count(), 1);
    }

    #[tokio::test]
    async fn launch_spec_is_built_from_config() {
        let h = harness(1000);
        h.supervisor.start().await.unwrap();
        let launched = h.launcher.launched.lock().unwrap();
        assert_eq!(launched.len(), 1);
        assert!(launched[0].args.windows(2).any(|w| w == ["--projectId", "demo"]));
    }
}
