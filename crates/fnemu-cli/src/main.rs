use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fnemu_cli::{Controller, ControllerError, DeployOptions, output, parse_timeout};
use fnemu_core::EmulatorConfig;
use fnemu_supervisor::{ServerState, ServerStatus, StopOutcome};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "fnemu", version, about = "Manage a local Cloud Functions emulator")]
struct Cli {
    /// Config file (defaults to $FNEMU_CONFIG or the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project the emulator serves
    #[arg(long, global = true)]
    project_id: Option<String>,

    /// Compute region, e.g. us-central1
    #[arg(long, global = true)]
    region: Option<String>,

    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    /// "rest" or "grpc"
    #[arg(long, global = true)]
    service_mode: Option<String>,

    /// Milliseconds to wait for the emulator to start or stop
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the emulator
    Start(StartArgs),
    /// Stop the emulator gracefully, killing it if it does not exit in time
    Stop,
    /// Force-kill the emulator process
    Kill,
    /// Stop, then start the emulator
    Restart(StartArgs),
    /// Report whether the emulator is running
    Status,
    /// Package a local directory and deploy it as a function
    Deploy(DeployArgs),
    /// List deployed functions
    List,
    /// Show a deployed function
    Describe { name: String },
    /// Undeploy a function
    Delete { name: String },
    /// Undeploy all functions
    Clear,
    /// Undeploy functions whose local source directory no longer exists
    Prune,
    /// Invoke a function
    Call {
        name: String,
        /// JSON payload
        #[arg(long, default_value = "{}")]
        data: String,
    },
    /// Print the end of the emulator log
    Logs {
        #[arg(long, default_value_t = fnemu_cli::logs::DEFAULT_LOG_LIMIT)]
        limit: usize,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the merged configuration
    Show,
}

#[derive(Args)]
struct StartArgs {
    /// Start with the legacy debugger enabled
    #[arg(long)]
    debug: bool,

    /// Start with the inspector enabled; wins over --debug
    #[arg(long)]
    inspect: bool,

    #[arg(long)]
    debug_port: Option<u16>,

    #[arg(long)]
    verbose: bool,

    #[arg(long)]
    use_mocks: bool,

    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Args)]
struct DeployArgs {
    name: String,

    /// Directory holding the function source
    #[arg(long, default_value = ".")]
    local_path: PathBuf,

    /// Bucket to stage the archive in
    #[arg(long)]
    stage_bucket: Option<String>,

    /// Local directory to stage the archive in
    #[arg(long)]
    stage_directory: Option<PathBuf>,

    #[arg(long)]
    trigger_http: bool,

    #[arg(long)]
    trigger_topic: Option<String>,

    #[arg(long)]
    trigger_bucket: Option<String>,

    /// Function timeout such as "60s"
    #[arg(long, value_parser = parse_timeout)]
    function_timeout: Option<Duration>,
}

impl From<DeployArgs> for DeployOptions {
    fn from(args: DeployArgs) -> Self {
        DeployOptions {
            local_path: Some(args.local_path),
            stage_bucket: args.stage_bucket,
            stage_directory: args.stage_directory,
            trigger_http: args.trigger_http,
            trigger_topic: args.trigger_topic,
            trigger_bucket: args.trigger_bucket,
            timeout: args.function_timeout,
        }
    }
}

impl Cli {
    fn load_config(&self) -> Result<EmulatorConfig> {
        let mut config = EmulatorConfig::load(self.config.as_deref())?;
        if let Some(project_id) = &self.project_id {
            config.project_id = Some(project_id.clone());
        }
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(mode) = &self.service_mode {
            config.service_mode = mode.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_ms = timeout;
        }
        if let Command::Start(args) | Command::Restart(args) = &self.command {
            args.apply(&mut config);
        }
        Ok(config)
    }
}

impl StartArgs {
    fn apply(&self, config: &mut EmulatorConfig) {
        config.debug |= self.debug;
        config.inspect |= self.inspect;
        config.verbose |= self.verbose;
        config.use_mocks |= self.use_mocks;
        if let Some(port) = self.debug_port {
            config.debug_port = port;
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = Some(log_file.clone());
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so command output on stdout stays clean
    fmt()
        .with_env_filter(EnvFilter::from_env("FNEMU_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;

    if let Command::Config {
        action: ConfigCommand::Show,
    } = &cli.command
    {
        let shown = config.clone().finalize().unwrap_or(config);
        print!("{}", toml::to_string_pretty(&shown).context("rendering config")?);
        return Ok(());
    }

    let controller = Controller::new(config)?;
    tracing::debug!(
        endpoint = %controller.client_config().endpoint(),
        mode = %controller.client_config().service_mode,
        "Controller ready"
    );

    match cli.command {
        Command::Start(_) => start(&controller).await?,
        Command::Stop => stop(&controller).await?,
        Command::Kill => {
            controller.kill()?;
            println!("Emulator killed.");
        }
        Command::Restart(_) => {
            if controller.status().await?.state == ServerState::Running {
                stop(&controller).await?;
            }
            start(&controller).await?;
        }
        Command::Status => {
            let status = controller.status().await?;
            if let Some(err) = &status.error {
                tracing::debug!(error = %err, details = ?err.details(), "Health check failed");
            }
            print!("{}", output::status(&status));
        }
        Command::Deploy(args) => {
            controller.ensure_running().await?;
            let name = args.name.clone();
            let function = controller.deploy(&name, &args.into()).await?;
            println!("Function {name} deployed.");
            print!("{}", output::describe(&function));
        }
        Command::List => {
            controller.ensure_running().await?;
            print!("{}", output::function_table(&controller.list().await?));
        }
        Command::Describe { name } => {
            controller.ensure_running().await?;
            print!("{}", output::describe(&controller.describe(&name).await?));
        }
        Command::Delete { name } => {
            controller.ensure_running().await?;
            controller.undeploy(&name).await?;
            println!("Function {name} deleted.");
        }
        Command::Clear => {
            controller.ensure_running().await?;
            let count = controller.clear().await?;
            println!("Removed {count} function(s).");
        }
        Command::Prune => {
            controller.ensure_running().await?;
            let count = controller.prune().await?;
            println!("Removed {count} function(s).");
        }
        Command::Call { name, data } => {
            controller.ensure_running().await?;
            let data: serde_json::Value =
                serde_json::from_str(&data).context("--data must be valid JSON")?;
            print!("{}", output::call_result(&controller.call(&name, &data).await?));
        }
        Command::Logs { limit } => {
            for line in controller.get_logs(Some(limit))? {
                println!("{line}");
            }
        }
        Command::Config { .. } => {}
    }
    Ok(())
}

async fn start(controller: &Controller) -> Result<()> {
    let status = controller.status().await?;
    if status.state == ServerState::Running {
        println!("Emulator is already running.");
        print!("{}", output::status(&status));
        return Ok(());
    }

    println!("Starting emulator...");
    let record = controller.start().await?;
    print!(
        "{}",
        output::status(&ServerStatus {
            state: ServerState::Running,
            record,
            error: None,
        })
    );
    Ok(())
}

async fn stop(controller: &Controller) -> Result<()> {
    println!("Stopping emulator...");
    match controller.stop().await? {
        StopOutcome::Graceful => println!("Emulator stopped."),
        StopOutcome::Forced => println!("Emulator did not exit in time and was killed."),
    }
    Ok(())
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<ControllerError>() {
        Some(ControllerError::Aggregate { failures, .. }) => {
            for failure in failures {
                tracing::debug!(kind = %failure.kind(), details = ?failure.details(), "Operation failed");
                eprintln!("ERROR: {failure}");
            }
        }
        Some(controller_err) => {
            for structured in controller_err.structured() {
                tracing::debug!(kind = %structured.kind(), details = ?structured.details(), "Operation failed");
            }
            eprintln!("ERROR: {controller_err}");
        }
        None => eprintln!("ERROR: {err:#}"),
    }
}
