use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Filesystem layout shared by the `start` and `stop` invocations.
#[derive(Clone, Debug)]
pub struct RuntimePaths {
    state_dir: PathBuf,
}

impl RuntimePaths {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn handoff_path(&self) -> PathBuf {
        self.state_dir.join("handoff.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.state_dir.join("artifacts")
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let value = serde_json::from_slice(&data)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(value))
}

pub fn atomic_write(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn atomic_write_replaces_existing_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("value.json");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn read_json_missing_file_is_none() {
        let temp = tempfile::tempdir().unwrap();
        let value: Option<BTreeMap<String, String>> =
            read_json(&temp.path().join("missing.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn paths_live_under_state_dir() {
        let paths = RuntimePaths::new("/tmp/state");
        assert_eq!(paths.handoff_path(), PathBuf::from("/tmp/state/handoff.json"));
        assert_eq!(paths.logs_dir(), PathBuf::from("/tmp/state/logs"));
        assert_eq!(paths.artifacts_dir(), PathBuf::from("/tmp/state/artifacts"));
    }
}
