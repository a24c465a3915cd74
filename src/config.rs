use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::installer::Installer;
use crate::readiness::ReadinessPolicy;
use crate::runtime_state::RuntimePaths;

pub const DEFAULT_CONFIG_FILE: &str = "harness.yaml";
pub const DEFAULT_HEALTH_PATH: &str = "/_matrix/client/versions";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub workdir: PathBuf,
    pub state_dir: PathBuf,
    pub installer: Installer,
    /// Launch argv used instead of the installer's homeserver command.
    pub command: Option<Vec<String>>,
    pub http_port: u16,
    pub public_baseurl: Option<String>,
    pub health_path: String,
    pub disable_rate_limiting: bool,
    pub custom_modules: Vec<String>,
    pub custom_config: String,
    pub readiness: ReadinessPolicy,
    pub shutdown: ShutdownConfig,
    pub artifacts: ArtifactsConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("synapse"),
            state_dir: PathBuf::from(".homeserver-harness"),
            installer: Installer::Pip,
            command: None,
            http_port: 8008,
            public_baseurl: None,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            disable_rate_limiting: false,
            custom_modules: Vec::new(),
            custom_config: String::new(),
            readiness: ReadinessPolicy::default(),
            shutdown: ShutdownConfig::default(),
            artifacts: ArtifactsConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_period_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub upload_logs: bool,
    pub name: String,
    pub retention_days: Option<u32>,
    pub output_dir: Option<PathBuf>,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            upload_logs: true,
            name: "synapse-logs".to_string(),
            retention_days: None,
            output_dir: None,
        }
    }
}

impl HarnessConfig {
    pub fn public_baseurl(&self) -> String {
        match self.public_baseurl.as_deref() {
            Some(url) if !url.trim().is_empty() => url.to_string(),
            _ => format!("http://localhost:{}", self.http_port),
        }
    }

    pub fn health_url(&self) -> String {
        let path = self.health_path.trim();
        if path.starts_with('/') {
            format!("http://localhost:{}{}", self.http_port, path)
        } else {
            format!("http://localhost:{}/{}", self.http_port, path)
        }
    }

    pub fn service_url(&self) -> String {
        format!("http://localhost:{}/", self.http_port)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.artifacts
            .output_dir
            .clone()
            .unwrap_or_else(|| RuntimePaths::new(&self.state_dir).artifacts_dir())
    }

    /// Resolves relative directories against `base` so later phases see absolute paths.
    pub fn absolutize(&mut self, base: &Path) {
        if self.workdir.is_relative() {
            self.workdir = base.join(&self.workdir);
        }
        if self.state_dir.is_relative() {
            self.state_dir = base.join(&self.state_dir);
        }
        if let Some(dir) = self.artifacts.output_dir.as_mut()
            && dir.is_relative()
        {
            *dir = base.join(&*dir);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.http_port == 0 {
            anyhow::bail!("http_port must be between 1 and 65535");
        }
        if self.readiness.max_attempts == 0 {
            anyhow::bail!("readiness.max_attempts must be at least 1");
        }
        if self.artifacts.name.trim().is_empty() {
            anyhow::bail!("artifacts.name cannot be empty");
        }
        if self.installer == Installer::None
            && self.command.as_ref().is_none_or(|argv| argv.is_empty())
        {
            anyhow::bail!("installer 'none' requires a launch command");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<Option<HarnessConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if contents
        .lines()
        .all(|line| line.trim().is_empty() || line.trim().starts_with('#'))
    {
        return Ok(Some(HarnessConfig::default()));
    }
    let config: HarnessConfig = serde_yaml_bw::from_str(&contents)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(config))
}
