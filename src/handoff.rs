//! Durable key/value store bridging the `start` and `stop` invocations.
//!
//! The store is a single JSON document:
//!
//! ```json
//! { "run_id": "1234", "entries": { "pid": "4242", "workdir": "/work/synapse" } }
//! ```
//!
//! Each key is written once by `start` and read by `stop`. Values are kept as the
//! exact strings that were written.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::runtime_state::{read_json, write_json};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum HandoffKey {
    Pid,
    WorkDir,
}

impl HandoffKey {
    pub fn as_str(self) -> &'static str {
        match self {
            HandoffKey::Pid => "pid",
            HandoffKey::WorkDir => "workdir",
        }
    }
}

impl fmt::Display for HandoffKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
struct HandoffDocument {
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

pub struct HandoffStore {
    path: PathBuf,
}

impl HandoffStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts a fresh store for `run_id`, discarding entries left by a previous run.
    pub fn reset(&self, run_id: &str) -> anyhow::Result<()> {
        let document = HandoffDocument {
            run_id: Some(run_id.to_string()),
            entries: BTreeMap::new(),
        };
        write_json(&self.path, &document)
    }

    pub fn run_id(&self) -> anyhow::Result<Option<String>> {
        Ok(self.load()?.run_id)
    }

    pub fn put(&self, key: HandoffKey, value: impl Into<String>) -> anyhow::Result<()> {
        let mut document = self.load()?;
        if let Some(existing) = document.entries.get(key.as_str()) {
            return Err(anyhow::anyhow!(
                "handoff key '{}' already written ({}) in {}",
                key,
                existing,
                self.path.display()
            ));
        }
        document
            .entries
            .insert(key.as_str().to_string(), value.into());
        write_json(&self.path, &document)
    }

    pub fn get(&self, key: HandoffKey) -> anyhow::Result<Option<String>> {
        Ok(self.load()?.entries.remove(key.as_str()))
    }

    pub fn pid(&self) -> anyhow::Result<Option<i32>> {
        match self.get(HandoffKey::Pid)? {
            Some(raw) => {
                let pid = raw.trim().parse().map_err(|err| {
                    anyhow::anyhow!("invalid pid '{}' in {}: {err}", raw, self.path.display())
                })?;
                Ok(Some(pid))
            }
            None => Ok(None),
        }
    }

    pub fn workdir(&self) -> anyhow::Result<Option<PathBuf>> {
        Ok(self.get(HandoffKey::WorkDir)?.map(PathBuf::from))
    }

    fn load(&self) -> anyhow::Result<HandoffDocument> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }
}
