//! Installs the homeserver with pip or poetry by shelling out to the usual tools.

use std::path::Path;
use std::process::Command;

use anyhow::Context;
use clap::ValueEnum;
use serde::Deserialize;

use crate::harness_log;
use crate::sinks::{ADDITIONAL_CONFIG, BASE_CONFIG, CUSTOM_CONFIG};

const SYNAPSE_REPO: &str = "https://github.com/element-hq/synapse.git";
const POETRY_VERSION: &str = "poetry==2.1.1";
const HOMESERVER_MODULE: &str = "synapse.app.homeserver";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Installer {
    Pip,
    Poetry,
    /// Nothing is installed; the configured command is launched as-is.
    None,
}

impl Installer {
    /// Populates `workdir` with an installed homeserver.
    pub fn prepare(self, workdir: &Path) -> anyhow::Result<()> {
        match self {
            Installer::Pip => {
                std::fs::create_dir_all(workdir)
                    .with_context(|| format!("create {}", workdir.display()))?;
                run_step("python", &["-m", "venv", "env"], workdir)?;
                run_step("env/bin/pip", &["install", "-q", "--upgrade", "pip"], workdir)?;
                run_step(
                    "env/bin/pip",
                    &["install", "-q", "--upgrade", "setuptools"],
                    workdir,
                )?;
                run_step("env/bin/pip", &["install", "-q", "matrix-synapse"], workdir)
            }
            Installer::Poetry => {
                // poetry installs from a source checkout.
                let parent = workdir.parent().unwrap_or(Path::new("."));
                std::fs::create_dir_all(parent)?;
                let target = workdir.to_string_lossy().to_string();
                run_step("git", &["clone", SYNAPSE_REPO, &target], parent)?;
                run_step("python", &["-m", "pip", "install", "pipx"], workdir)?;
                run_step("python", &["-m", "pipx", "ensurepath"], workdir)?;
                run_step("pipx", &["install", POETRY_VERSION], workdir)?;
                run_step("poetry", &["install", "-vv", "--extras", "all"], workdir)
            }
            Installer::None => {
                std::fs::create_dir_all(workdir)
                    .with_context(|| format!("create {}", workdir.display()))?;
                Ok(())
            }
        }
    }

    pub fn install_modules(self, workdir: &Path, modules: &[String]) -> anyhow::Result<()> {
        for module in modules {
            match self {
                Installer::Pip => run_step("env/bin/pip", &["install", "-q", module], workdir)?,
                Installer::Poetry => run_step("poetry", &["add", module], workdir)?,
                Installer::None => {
                    harness_log::warn(
                        module_path!(),
                        format!("skipping module {module}: no installer selected"),
                    );
                }
            }
        }
        Ok(())
    }

    /// Writes the stock `homeserver.yaml` for server name `localhost`.
    pub fn generate_config(self, workdir: &Path) -> anyhow::Result<()> {
        let mut argv = self.python_prefix();
        if argv.is_empty() {
            return Ok(());
        }
        argv.extend(
            [
                "-m",
                HOMESERVER_MODULE,
                "--server-name",
                "localhost",
                "--config-path",
                BASE_CONFIG,
                "--generate-config",
                "--report-stats=no",
            ]
            .map(String::from),
        );
        let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
        run_step(&argv[0], &args, workdir)
    }

    /// Launch argv for the homeserver using the base, additional and custom configs.
    pub fn server_argv(self) -> Vec<String> {
        let mut argv = self.python_prefix();
        if argv.is_empty() {
            return argv;
        }
        argv.extend(["-m".to_string(), HOMESERVER_MODULE.to_string()]);
        for config in [BASE_CONFIG, ADDITIONAL_CONFIG, CUSTOM_CONFIG] {
            argv.push("--config-path".to_string());
            argv.push(config.to_string());
        }
        argv
    }

    fn python_prefix(self) -> Vec<String> {
        match self {
            Installer::Pip => vec!["env/bin/python3".to_string()],
            Installer::Poetry => ["poetry", "run", "python"].map(String::from).to_vec(),
            Installer::None => Vec::new(),
        }
    }
}

/// Runs one external command in `cwd`, failing on a non-zero exit.
pub fn run_step(program: &str, args: &[&str], cwd: &Path) -> anyhow::Result<()> {
    harness_log::info(
        module_path!(),
        format!("[command]{} {}", program, args.join(" ")),
    );
    let status = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .status()
        .with_context(|| format!("failed to run {program}"))?;
    if !status.success() {
        return Err(anyhow::anyhow!(
            "{} {} exited with {}",
            program,
            args.join(" "),
            status
        ));
    }
    Ok(())
}
