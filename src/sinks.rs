use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub const STDOUT_LOG: &str = "out.log";
pub const STDERR_LOG: &str = "err.log";
pub const SERVER_LOG: &str = "homeserver.log";
pub const BASE_CONFIG: &str = "homeserver.yaml";
pub const ADDITIONAL_CONFIG: &str = "additional.yaml";
pub const CUSTOM_CONFIG: &str = "custom.yaml";

const SINK_FILES: [&str; 6] = [
    BASE_CONFIG,
    SERVER_LOG,
    CUSTOM_CONFIG,
    ADDITIONAL_CONFIG,
    STDOUT_LOG,
    STDERR_LOG,
];

/// The files collected as artifacts after teardown, rooted at the server's working directory.
#[derive(Clone, Debug)]
pub struct LogSinkSet {
    root: PathBuf,
}

impl LogSinkSet {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stdout_log(&self) -> PathBuf {
        self.root.join(STDOUT_LOG)
    }

    pub fn stderr_log(&self) -> PathBuf {
        self.root.join(STDERR_LOG)
    }

    pub fn files(&self) -> Vec<PathBuf> {
        SINK_FILES.iter().map(|name| self.root.join(name)).collect()
    }

    /// Creates every sink that is missing without truncating existing content.
    pub fn ensure_exist(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("create {}", self.root.display()))?;
        for path in self.files() {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("unable to create {}", path.display()))?;
        }
        Ok(())
    }
}
