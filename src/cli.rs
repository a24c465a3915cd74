use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::artifacts::ZipArtifactUploader;
use crate::config::{self, HarnessConfig};
use crate::harness_log::{self, Level};
use crate::installer::Installer;
use crate::launcher;
use crate::lifecycle;
use crate::probe::{HttpProbe, Probe};
use crate::runtime_state::RuntimePaths;
use crate::shutdown::OsSignals;

#[derive(Parser)]
#[command(name = "homeserver-harness")]
#[command(about = "Run a throwaway homeserver for the duration of a CI workflow", version)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file (default: ./harness.yaml when present).")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Directory holding the handoff store and harness log.")]
    state_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Start(StartArgs),
    Stop(StopArgs),
    Status(StatusArgs),
    Probe(ProbeArgs),
}

#[derive(Parser)]
#[command(
    about = "Install, configure and launch the homeserver, then wait until it is ready.",
    long_about = "Launches the server detached from this process, records its pid and working directory in the handoff store and polls the readiness endpoint. Exits non-zero if the server does not answer 200 within the retry budget.",
    after_help = "Everything after `--` replaces the installer's launch command."
)]
struct StartArgs {
    #[arg(long)]
    workdir: Option<PathBuf>,
    #[arg(long, value_enum)]
    installer: Option<Installer>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    public_baseurl: Option<String>,
    #[arg(long)]
    health_path: Option<String>,
    #[arg(long)]
    disable_rate_limiting: bool,
    #[arg(long = "module", help = "Extra python module to install (repeatable).")]
    modules: Vec<String>,
    #[arg(long, help = "File whose contents become custom.yaml.")]
    custom_config_file: Option<PathBuf>,
    #[arg(long, help = "Skip installation and config generation.")]
    skip_install: bool,
    #[arg(last = true)]
    command: Vec<String>,
}

#[derive(Parser)]
#[command(
    about = "Stop the server recorded by `start` and archive its logs.",
    long_about = "Sends SIGTERM, waits the grace period, then sends SIGKILL. Failures are reported as warnings and never fail the step."
)]
struct StopArgs {
    #[arg(long)]
    no_upload: bool,
    #[arg(long)]
    artifact_name: Option<String>,
    #[arg(long)]
    retention_days: Option<u32>,
    #[arg(long)]
    grace_period_ms: Option<u64>,
}

#[derive(Parser)]
#[command(about = "Show the pid and working directory recorded by `start`.")]
struct StatusArgs {}

#[derive(Parser)]
#[command(about = "Probe a URL once and print the HTTP status (0 when nothing answered).")]
struct ProbeArgs {
    url: String,
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        let Cli {
            config,
            state_dir,
            verbose,
            command,
        } = self;
        let level = if verbose { Level::Debug } else { Level::Info };

        match command {
            Command::Probe(args) => {
                harness_log::set_console_level(level);
                args.run()
            }
            Command::Start(args) => {
                let (harness, cwd) = load_harness_config(config.as_deref(), state_dir)?;
                args.run(prepare_state(harness, &cwd, level))
            }
            Command::Status(args) => {
                let (harness, cwd) = load_harness_config(config.as_deref(), state_dir)?;
                args.run(&prepare_state(harness, &cwd, level))
            }
            Command::Stop(args) => {
                // Teardown has to run even when the config cannot be read.
                match load_harness_config(config.as_deref(), state_dir.clone()) {
                    Ok((harness, cwd)) => args.run(prepare_state(harness, &cwd, level)),
                    Err(err) => {
                        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                        let mut harness = HarnessConfig::default();
                        if let Some(state_dir) = state_dir {
                            harness.state_dir = state_dir;
                        }
                        let harness = prepare_state(harness, &cwd, level);
                        harness_log::warn(
                            module_path!(),
                            format!("{err:#}; stopping with default settings"),
                        );
                        args.run(harness)
                    }
                }
            }
        }
    }
}

/// Reads the config file (default `./harness.yaml`) and applies the global `--state-dir`.
fn load_harness_config(
    config_path: Option<&Path>,
    state_dir: Option<PathBuf>,
) -> anyhow::Result<(HarnessConfig, PathBuf)> {
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.join(config::DEFAULT_CONFIG_FILE));
    let mut harness = config::load_config(&config_path)?.unwrap_or_default();
    if let Some(state_dir) = state_dir {
        harness.state_dir = state_dir;
    }
    Ok((harness, cwd))
}

/// Resolves paths and opens the harness log. A log that cannot be opened only costs the file copy.
fn prepare_state(mut config: HarnessConfig, cwd: &Path, level: Level) -> HarnessConfig {
    config.absolutize(cwd);
    if let Err(err) = harness_log::init(RuntimePaths::new(&config.state_dir).logs_dir(), level) {
        eprintln!("{err:#}");
    }
    config
}

impl StartArgs {
    fn run(self, mut config: HarnessConfig) -> anyhow::Result<()> {
        if let Some(workdir) = self.workdir {
            config.workdir = workdir;
        }
        if let Some(installer) = self.installer {
            config.installer = installer;
        }
        if let Some(port) = self.port {
            config.http_port = port;
        }
        if self.public_baseurl.is_some() {
            config.public_baseurl = self.public_baseurl;
        }
        if let Some(path) = self.health_path {
            config.health_path = path;
        }
        config.disable_rate_limiting |= self.disable_rate_limiting;
        config.custom_modules.extend(self.modules);
        if let Some(path) = self.custom_config_file {
            config.custom_config = std::fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
        }
        if !self.command.is_empty() {
            config.command = Some(self.command);
        }
        if let Ok(cwd) = std::env::current_dir() {
            config.absolutize(&cwd);
        }

        let result = run_start(&config, self.skip_install);
        if let Err(err) = &result {
            harness_log::error(module_path!(), format!("{err:#}"));
        }
        result
    }
}

fn run_start(config: &HarnessConfig, skip_install: bool) -> anyhow::Result<()> {
    config.validate()?;
    if !skip_install {
        lifecycle::provision(config)?;
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;
    let probe = HttpProbe::new(config.readiness.probe_timeout());
    let report = runtime.block_on(lifecycle::launch_and_wait(config, &probe))?;
    harness_log::info(
        module_path!(),
        format!(
            "synapse ready at {} (pid {}, {} attempt(s))",
            report.service_url, report.process.pid, report.readiness.attempts
        ),
    );
    Ok(())
}

impl StopArgs {
    fn run(self, mut config: HarnessConfig) -> anyhow::Result<()> {
        if self.no_upload {
            config.artifacts.upload_logs = false;
        }
        if let Some(name) = self.artifact_name {
            config.artifacts.name = name;
        }
        if self.retention_days.is_some() {
            config.artifacts.retention_days = self.retention_days;
        }
        if let Some(grace) = self.grace_period_ms {
            config.shutdown.grace_period_ms = grace;
        }
        let uploader = ZipArtifactUploader::new(config.artifacts_dir());
        let report = lifecycle::teardown(&config, OsSignals, &uploader);
        println!(
            "teardown: shutdown={:?} artifact={} warnings={}",
            report.shutdown,
            report
                .artifact
                .as_ref()
                .map(|receipt| receipt.location.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
            report.warnings.len()
        );
        Ok(())
    }
}

impl StatusArgs {
    fn run(self, config: &HarnessConfig) -> anyhow::Result<()> {
        let store = lifecycle::handoff_store(config);
        let run_id = store.run_id()?;
        let Some(pid) = store.pid()? else {
            println!("no server recorded in {}", store.path().display());
            return Ok(());
        };
        let workdir = store
            .workdir()?
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        let state = if launcher::is_running(pid) {
            "running"
        } else {
            "not running"
        };
        println!(
            "run={} pid={} workdir={} state={}",
            run_id.as_deref().unwrap_or("-"),
            pid,
            workdir,
            state
        );
        Ok(())
    }
}

impl ProbeArgs {
    fn run(self) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to create tokio runtime")?;
        let probe = HttpProbe::new(Duration::from_millis(self.timeout_ms));
        let result = runtime.block_on(probe.probe(&self.url));
        println!("{}", result.status_code());
        Ok(())
    }
}
