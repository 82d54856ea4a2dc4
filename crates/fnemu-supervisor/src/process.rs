use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;

use fnemu_core::EmulatorConfig;
use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};
use tokio::process::{Child, Command};

use crate::error::SupervisorError;

/// How hard to ask the emulator to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM; the emulator may shut down cleanly.
    Terminate,
    /// SIGKILL.
    Kill,
}

impl From<StopSignal> for Signal {
    fn from(signal: StopSignal) -> Self {
        match signal {
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        }
    }
}

/// Program, arguments and log destination for one emulator launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub log_file: PathBuf,
}

impl LaunchSpec {
    /// Build the command line for `config`.
    ///
    /// `--inspect` wins over `--debug=<port>` and comes first, then any extra
    /// emulator arguments, then one flag per setting the emulator needs to
    /// rebuild its own configuration. Nothing is passed through the
    /// environment.
    pub fn from_config(config: &EmulatorConfig) -> Self {
        let mut args = Vec::new();
        if config.inspect {
            args.push("--inspect".to_string());
        } else if config.debug {
            args.push(format!("--debug={}", config.debug_port));
        }
        args.extend(config.emulator_args.iter().cloned());

        let log_file = config.log_path();
        let flags = [
            ("--host", config.host.clone()),
            ("--port", config.port.to_string()),
            ("--projectId", config.project().to_string()),
            ("--timeout", config.timeout_ms.to_string()),
            ("--verbose", config.verbose.to_string()),
            ("--serviceMode", config.service_mode.clone()),
            ("--useMocks", config.use_mocks.to_string()),
            ("--logFile", log_file.display().to_string()),
            ("--runSupervisor", config.run_supervisor.to_string()),
            ("--supervisorHost", config.supervisor_host.clone()),
            ("--supervisorPort", config.supervisor_port.to_string()),
        ];
        for (flag, value) in flags {
            args.push(flag.to_string());
            args.push(value);
        }

        Self {
            program: config.emulator_bin.clone(),
            args,
            log_file,
        }
    }
}

/// A launched process, observed from the launching side only.
pub trait ProcessHandle: Send {
    fn pid(&self) -> u32;

    /// True once the process is known to have exited.
    fn has_exited(&mut self) -> bool;
}

/// Starts and signals emulator processes.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, SupervisorError>;

    fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), SupervisorError>;
}

/// Launches real OS processes detached into their own process group, with
/// stdin closed and both output streams appended to the log file.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

struct OsProcess {
    child: Child,
    pid: u32,
}

impl ProcessHandle for OsProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

impl ProcessLauncher for OsLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, SupervisorError> {
        if let Some(parent) = spec.log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_file)?;
        let err = out.try_clone()?;

        let spawn_error = |source| SupervisorError::Spawn {
            program: spec.program.clone(),
            source,
        };
        // Not killed on drop: the emulator outlives this invocation.
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .process_group(0)
            .spawn()
            .map_err(spawn_error)?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_error(std::io::Error::other("exited before its pid was read")))?;

        tracing::info!(
            pid,
            program = %spec.program,
            log_file = %spec.log_file.display(),
            "Emulator process spawned"
        );
        Ok(Box::new(OsProcess { child, pid }))
    }

    fn signal(&self, pid: u32, stop: StopSignal) -> Result<(), SupervisorError> {
        let raw = i32::try_from(pid).map_err(|_| SupervisorError::Signal {
            pid,
            message: "pid out of range".into(),
        })?;
        let target = Pid::from_raw(raw);
        let sig = Signal::from(stop);

        // Only a group leader gets its whole group signalled; a recycled pid
        // in someone else's group gets the single signal.
        let leads_group = unistd::getpgid(Some(target)).is_ok_and(|group| group == target);
        let sent = if leads_group && signal::killpg(target, sig).is_ok() {
            Ok(())
        } else {
            signal::kill(target, sig)
        };
        sent.map_err(|e| SupervisorError::Signal {
            pid,
            message: e.desc().to_string(),
        })
    }
}
