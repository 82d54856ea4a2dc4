//! Plain-text rendering of controller results for the terminal.

use std::fmt::Write as _;

use fnemu_core::{CallResult, FunctionDescriptor};
use fnemu_supervisor::{ServerState, ServerStatus};

const NAME_WIDTH: usize = 16;
const TRIGGER_WIDTH: usize = 10;

/// One row per function: name, trigger kind, and trigger target. Rows whose
/// local source directory is gone are marked with `!`.
pub fn function_table(functions: &[FunctionDescriptor]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "  {:<NAME_WIDTH$} {:<TRIGGER_WIDTH$} URL/Topic/Bucket",
        "Name", "Trigger"
    );

    if functions.is_empty() {
        out.push_str("  No functions deployed. Run \"fnemu deploy\" to deploy a function.\n");
        return out;
    }

    for function in functions {
        let (label, target) = match &function.trigger {
            Some(trigger) => (trigger.label(), trigger.target().unwrap_or("Unknown")),
            None => ("Unknown", "Unknown"),
        };
        let marker = if function.local_path.as_deref().is_some_and(|p| p.exists()) {
            ' '
        } else {
            '!'
        };
        let _ = writeln!(
            out,
            "{marker} {:<NAME_WIDTH$} {:<TRIGGER_WIDTH$} {target}",
            function.short_name(),
            label
        );
    }
    out
}

pub fn describe(function: &FunctionDescriptor) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "name:     {}", function.name);
    if let Some(trigger) = &function.trigger {
        let _ = writeln!(
            out,
            "trigger:  {} {}",
            trigger.label(),
            trigger.target().unwrap_or_default()
        );
    }
    if let Some(source) = &function.source_archive_url {
        let _ = writeln!(out, "source:   {source}");
    }
    if let Some(path) = &function.local_path {
        let _ = writeln!(out, "path:     {}", path.display());
    }
    if let Some(timeout) = function.timeout {
        let _ = writeln!(out, "timeout:  {}s", timeout.as_secs());
    }
    out
}

pub fn status(status: &ServerStatus) -> String {
    let record = &status.record;
    let mut out = String::new();
    let _ = writeln!(out, "Emulator is {}", status.state);
    if status.state == ServerState::Running {
        let _ = writeln!(out, "  endpoint:  http://{}:{}", record.host, record.port);
        if let Some(pid) = record.pid {
            let _ = writeln!(out, "  pid:       {pid}");
        }
        let _ = writeln!(out, "  mode:      {}", record.service_mode);
        let _ = writeln!(out, "  project:   {}", record.project_id);
        if let Some(started) = record.started {
            let _ = writeln!(out, "  started:   {}", started.to_rfc3339());
        }
        if record.inspect {
            let _ = writeln!(out, "  inspect:   enabled");
        } else if record.debug {
            let _ = writeln!(out, "  debugger:  port {}", record.debug_port);
        }
    } else if let Some(stopped) = record.stopped {
        let _ = writeln!(out, "  stopped:   {}", stopped.to_rfc3339());
    }
    if let Some(log_file) = &record.log_file {
        let _ = writeln!(out, "  log file:  {}", log_file.display());
    }
    out
}

pub fn call_result(result: &CallResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "executionId: {}", result.execution_id);
    if let Some(value) = &result.result {
        let _ = writeln!(out, "result: {value}");
    }
    if let Some(error) = &result.error {
        let _ = writeln!(out, "error: {error}");
    }
    out
}
