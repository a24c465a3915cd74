//! The two workflow phases: `start` brings a server up and waits for it to be
//! ready, `stop` (a separate invocation) tears it down and collects its logs.

use std::time::Duration;

use anyhow::Context;

use crate::artifacts::{ArtifactUploader, UploadReceipt, UploadRequest};
use crate::config::HarnessConfig;
use crate::handoff::{HandoffKey, HandoffStore};
use crate::harness_log;
use crate::homeserver_config;
use crate::launcher::{self, LaunchSpec, SupervisedProcess};
use crate::probe::Probe;
use crate::readiness::{ReadinessReport, ReadinessState, wait_until_ready};
use crate::runtime_state::RuntimePaths;
use crate::shutdown::{ShutdownController, ShutdownOutcome, SignalSender};
use crate::sinks::LogSinkSet;
use crate::workflow;

#[derive(Clone, Debug)]
pub struct StartReport {
    pub process: SupervisedProcess,
    pub service_url: String,
    pub readiness: ReadinessReport,
}

#[derive(Clone, Debug, Default)]
pub struct TeardownReport {
    pub shutdown: Option<ShutdownOutcome>,
    pub artifact: Option<UploadReceipt>,
    pub warnings: Vec<String>,
}

impl TeardownReport {
    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        harness_log::warn(module_path!(), &message);
        self.warnings.push(message);
    }
}

pub fn handoff_store(config: &HarnessConfig) -> HandoffStore {
    HandoffStore::new(RuntimePaths::new(&config.state_dir).handoff_path())
}

/// Installs the server and writes its configuration files.
pub fn provision(config: &HarnessConfig) -> anyhow::Result<()> {
    harness_log::info(module_path!(), "Installing synapse");
    config.installer.prepare(&config.workdir)?;
    config
        .installer
        .install_modules(&config.workdir, &config.custom_modules)?;
    harness_log::info(module_path!(), "Generating config...");
    config.installer.generate_config(&config.workdir)?;
    homeserver_config::write_configs(&config.workdir, config)
}

/// Launches the server detached and polls it until ready. Any error is fatal to the workflow.
pub async fn launch_and_wait(
    config: &HarnessConfig,
    probe: &dyn Probe,
) -> anyhow::Result<StartReport> {
    config.validate()?;
    let workdir = config
        .workdir
        .to_str()
        .with_context(|| format!("workdir {} is not valid UTF-8", config.workdir.display()))?
        .to_string();
    let store = handoff_store(config);
    if let Some(pid) = store.pid().ok().flatten()
        && launcher::is_running(pid)
    {
        return Err(anyhow::anyhow!(
            "a server started by run {} is still running (pid {}); run stop first",
            store.run_id()?.unwrap_or_else(|| "<unknown>".to_string()),
            pid
        ));
    }
    store.reset(&workflow::run_id())?;

    let sinks = LogSinkSet::new(&config.workdir);
    sinks.ensure_exist()?;

    let argv = config
        .command
        .clone()
        .unwrap_or_else(|| config.installer.server_argv());
    harness_log::info(module_path!(), "Starting synapse");
    let process = launcher::launch(&LaunchSpec {
        argv,
        cwd: config.workdir.clone(),
        stdout_log: sinks.stdout_log(),
        stderr_log: sinks.stderr_log(),
    })?;
    store.put(HandoffKey::Pid, process.pid.to_string())?;
    store.put(HandoffKey::WorkDir, workdir)?;
    harness_log::debug(
        module_path!(),
        format!("recorded pid {} in {}", process.pid, store.path().display()),
    );

    harness_log::info(module_path!(), "Waiting until C-S api is available");
    let readiness = wait_until_ready(probe, &config.health_url(), &config.readiness).await;
    if readiness.state != ReadinessState::Ready {
        return Err(anyhow::anyhow!(
            "Unable to start synapse in {:?}",
            config.readiness.budget()
        ));
    }

    let service_url = config.service_url();
    workflow::set_output("synapse-url", &service_url)?;
    Ok(StartReport {
        process,
        service_url,
        readiness,
    })
}

/// Stops the recorded server and uploads its logs. Never fails: problems become warnings.
pub fn teardown<S: SignalSender>(
    config: &HarnessConfig,
    signals: S,
    uploader: &dyn ArtifactUploader,
) -> TeardownReport {
    harness_log::info(module_path!(), "Destroying synapse");
    let mut report = TeardownReport::default();
    let store = handoff_store(config);

    match store.pid() {
        Ok(Some(pid)) => {
            let controller = ShutdownController::new(
                signals,
                Duration::from_millis(config.shutdown.grace_period_ms),
            );
            let outcome = controller.shutdown(pid);
            if outcome == ShutdownOutcome::NotRunning {
                report.warn(format!("synapse (pid {pid}) was not running at teardown time"));
            }
            report.shutdown = Some(outcome);
        }
        Ok(None) => report.warn(format!(
            "no pid recorded in {}; nothing to stop",
            store.path().display()
        )),
        Err(err) => report.warn(format!("unable to read handoff store: {err:#}")),
    }

    if config.artifacts.upload_logs {
        let workdir = match store.workdir() {
            Ok(Some(dir)) => dir,
            Ok(None) | Err(_) => {
                report.warn(format!(
                    "no working directory recorded; collecting logs from {}",
                    config.workdir.display()
                ));
                config.workdir.clone()
            }
        };
        match upload_logs(config, &LogSinkSet::new(workdir), uploader) {
            Ok(receipt) => {
                harness_log::info(
                    module_path!(),
                    format!("uploaded artifact {} to {}", receipt.name, receipt.location.display()),
                );
                report.artifact = Some(receipt);
            }
            Err(err) => {
                let message = format!("{err:#}");
                harness_log::error(module_path!(), &message);
                report.warnings.push(message);
            }
        }
    }
    report
}

fn upload_logs(
    config: &HarnessConfig,
    sinks: &LogSinkSet,
    uploader: &dyn ArtifactUploader,
) -> anyhow::Result<UploadReceipt> {
    sinks.ensure_exist()?;
    uploader.upload(&UploadRequest {
        name: config.artifacts.name.clone(),
        files: sinks.files(),
        root: sinks.root().to_path_buf(),
        retention_days: config.artifacts.retention_days,
    })
}
