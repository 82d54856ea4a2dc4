//! Controller operations against the in-memory transport and record store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fnemu_cli::{Controller, ControllerError, DeployOptions};
use fnemu_core::{ConfigError, EmulatorConfig, ErrorKind, Trigger};
use fnemu_supervisor::{
    FileRecordStore, LaunchSpec, MemoryRecordStore, ProcessHandle, ProcessLauncher, ServerRecord, ServerState,
    StopSignal, SupervisorError,
};
use fnemu_transport::{ClientConfig, MemoryTransport};
use serde_json::json;
use tempfile::TempDir;

/// A process that never exits and ignores signals.
struct InertLauncher;

struct InertProcess;

impl ProcessHandle for InertProcess {
    fn pid(&self) -> u32 {
        4242
    }

    fn has_exited(&mut self) -> bool {
        false
    }
}

impl ProcessLauncher for InertLauncher {
    fn launch(&self, _spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, SupervisorError> {
        Ok(Box::new(InertProcess))
    }

    fn signal(&self, _pid: u32, _signal: StopSignal) -> Result<(), SupervisorError> {
        Ok(())
    }
}

struct Fixture {
    tmp: TempDir,
    transport: Arc<MemoryTransport>,
    controller: Controller,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let config = EmulatorConfig {
            project_id: Some("demo".into()),
            log_file: Some(tmp.path().join("logs").join("emulator.log")),
            stage_directory: Some(tmp.path().join("stage")),
            timeout_ms: 1000,
            ..Default::default()
        }
        .finalize()
        .unwrap();

        let transport = Arc::new(MemoryTransport::new(&ClientConfig::from_config(&config)));
        let controller = Controller::from_parts(
            config,
            transport.clone(),
            Arc::new(InertLauncher),
            Arc::new(MemoryRecordStore::new()),
        );
        Self {
            tmp,
            transport,
            controller,
        }
    }

    fn source_dir(&self, name: &str) -> std::path::PathBuf {
        let dir = self.tmp.path().join("src").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.js"), "exports.handler = () => {};").unwrap();
        dir
    }

    fn stage_dir(&self) -> std::path::PathBuf {
        self.tmp.path().join("stage")
    }

    async fn deploy_http(&self, name: &str) {
        let opts = DeployOptions {
            local_path: Some(self.source_dir(name)),
            trigger_http: true,
            ..Default::default()
        };
        self.controller.deploy(name, &opts).await.unwrap();
    }
}

#[tokio::test]
async fn deploy_then_describe_points_at_a_staged_file() {
    let fx = Fixture::new();
    let source = fx.source_dir("hello");

    let opts = DeployOptions {
        local_path: Some(source.clone()),
        trigger_topic: Some("events".into()),
        timeout: Some(Duration::from_secs(60)),
        ..Default::default()
    };
    fx.controller.deploy("hello", &opts).await.unwrap();

    let described = fx.controller.describe("hello").await.unwrap();
    assert_eq!(described.name, "projects/demo/locations/us-central1/functions/hello");
    assert_eq!(described.trigger, Some(Trigger::Topic("events".into())));
    assert_eq!(described.timeout, Some(Duration::from_secs(60)));
    assert_eq!(described.local_path.as_deref(), Some(source.as_path()));

    let staged = described.source_archive_url.unwrap();
    assert!(Path::new(&staged).is_file());
    assert!(Path::new(&staged).starts_with(fx.stage_dir()));
}

#[tokio::test]
async fn deploy_without_trigger_fails_before_packaging() {
    let fx = Fixture::new();
    let opts = DeployOptions {
        local_path: Some(fx.source_dir("hello")),
        ..Default::default()
    };

    let err = fx.controller.deploy("hello", &opts).await.unwrap_err();
    match err {
        ControllerError::Api(e) => {
            assert_eq!(e.kind(), ErrorKind::InvalidArgument);
            assert_eq!(e.message(), "You must specify a trigger type!");
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
    assert!(!fx.stage_dir().exists());
}

#[tokio::test]
async fn deploy_with_two_destinations_is_invalid() {
    let fx = Fixture::new();
    let opts = DeployOptions {
        local_path: Some(fx.source_dir("hello")),
        trigger_http: true,
        stage_bucket: Some("bucket".into()),
        stage_directory: Some(fx.stage_dir()),
        ..Default::default()
    };

    let err = fx.controller.deploy("hello", &opts).await.unwrap_err();
    assert!(matches!(err, ControllerError::Api(ref e) if e.kind() == ErrorKind::InvalidArgument));
}

#[tokio::test]
async fn clear_removes_every_function() {
    let fx = Fixture::new();
    for name in ["one", "two", "three"] {
        fx.deploy_http(name).await;
    }

    let removed = fx.controller.clear().await.unwrap();
    assert_eq!(removed, 3);
    assert_eq!(fx.transport.delete_count(), 3);
    assert!(fx.controller.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn prune_only_removes_functions_with_missing_sources() {
    let fx = Fixture::new();
    fx.deploy_http("kept").await;
    fx.deploy_http("orphan").await;
    std::fs::remove_dir_all(fx.tmp.path().join("src").join("orphan")).unwrap();

    let removed = fx.controller.prune().await.unwrap();
    assert_eq!(removed, 1);

    let names: Vec<String> = fx
        .controller
        .list()
        .await
        .unwrap()
        .iter()
        .map(|f| f.short_name().to_string())
        .collect();
    assert_eq!(names, vec!["kept"]);
}

#[tokio::test]
async fn call_and_missing_function() {
    let fx = Fixture::new();
    fx.deploy_http("echo").await;

    let result = fx.controller.call("echo", &json!({"n": 1})).await.unwrap();
    assert_eq!(result.result.as_deref(), Some(r#"{"n":1}"#));

    let err = fx.controller.undeploy("ghost").await.unwrap_err();
    assert!(matches!(err, ControllerError::Api(ref e) if e.is_not_found()));
}

#[tokio::test(start_paused = true)]
async fn lifecycle_through_the_controller() {
    let fx = Fixture::new();

    let record = fx.controller.start().await.unwrap();
    assert_eq!(record.pid, Some(4242));
    assert_eq!(fx.controller.status().await.unwrap().state, ServerState::Running);
    fx.controller.ensure_running().await.unwrap();

    fx.transport.set_healthy(false);
    fx.controller.stop().await.unwrap();
    let status = fx.controller.status().await.unwrap();
    assert_eq!(status.state, ServerState::Stopped);
    assert_eq!(status.record.pid, None);
    assert!(status.record.stopped.is_some());

    let err = fx.controller.ensure_running().await.unwrap_err();
    assert!(matches!(err, ControllerError::Supervisor(SupervisorError::NotRunning)));
}

#[test]
fn logs_default_to_twenty_lines() {
    let fx = Fixture::new();
    let log = fx.controller.config().log_path();
    let content: String = (1..=25).map(|i| format!("entry {i}\n")).collect();
    std::fs::write(&log, content).unwrap();

    let lines = fx.controller.get_logs(None).unwrap();
    assert_eq!(lines.len(), 20);
    assert_eq!(lines[0], "entry 6");

    assert_eq!(fx.controller.get_logs(Some(2)).unwrap(), vec!["entry 24", "entry 25"]);
}

#[test]
fn unknown_service_mode_is_rejected_at_construction() {
    let tmp = TempDir::new().unwrap();
    let config = EmulatorConfig {
        project_id: Some("demo".into()),
        service_mode: "soap".into(),
        log_file: Some(tmp.path().join("emulator.log")),
        ..Default::default()
    };
    let result = Controller::with_store(
        config,
        Arc::new(MemoryRecordStore::new()),
        Arc::new(InertLauncher),
    );
    assert!(matches!(
        result,
        Err(ControllerError::Config(ConfigError::UnknownServiceMode(ref mode))) if mode == "soap"
    ));
}

#[tokio::test]
async fn live_record_overrides_configured_endpoint() {
    let tmp = TempDir::new().unwrap();
    let config = EmulatorConfig {
        project_id: Some("demo".into()),
        port: 8008,
        log_file: Some(tmp.path().join("emulator.log")),
        ..Default::default()
    };

    let live = MemoryRecordStore::with_record(ServerRecord {
        pid: Some(1),
        host: "127.0.0.1".into(),
        port: 9100,
        ..Default::default()
    });
    let controller =
        Controller::with_store(config.clone(), Arc::new(live), Arc::new(InertLauncher)).unwrap();
    assert_eq!(controller.client_config().port, 9100);
    assert_eq!(controller.client_config().host, "127.0.0.1");
    // Launches still use the configured endpoint.
    assert_eq!(controller.config().port, 8008);
    let launch = LaunchSpec::from_config(controller.config());
    assert!(launch.args.windows(2).any(|w| w == ["--port", "8008"]));

    let dead = MemoryRecordStore::with_record(ServerRecord {
        pid: None,
        port: 9100,
        ..Default::default()
    });
    let controller = Controller::with_store(config, Arc::new(dead), Arc::new(InertLauncher)).unwrap();
    assert_eq!(controller.client_config().port, 8008);
}

#[test]
fn corrupt_record_does_not_block_construction() {
    let tmp = TempDir::new().unwrap();
    let record_path = tmp.path().join("active-server.json");
    std::fs::write(&record_path, "{\"pid\": 12").unwrap();
    let config = EmulatorConfig {
        project_id: Some("demo".into()),
        port: 8008,
        log_file: Some(tmp.path().join("emulator.log")),
        ..Default::default()
    };

    let controller = Controller::with_store(
        config,
        Arc::new(FileRecordStore::new(record_path.clone())),
        Arc::new(InertLauncher),
    )
    .unwrap();
    assert_eq!(controller.client_config().port, 8008);

    let record = controller.kill().unwrap();
    assert_eq!(record.pid, None);
    let rewritten: ServerRecord =
        serde_json::from_str(&std::fs::read_to_string(record_path).unwrap()).unwrap();
    assert_eq!(rewritten.stopped, record.stopped);
}
