use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use zip::write::{FileOptions, ZipWriter};

use crate::runtime_state::write_json;

#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub name: String,
    pub files: Vec<PathBuf>,
    pub root: PathBuf,
    pub retention_days: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadReceipt {
    pub name: String,
    pub location: PathBuf,
    pub files: Vec<String>,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub trait ArtifactUploader {
    fn upload(&self, request: &UploadRequest) -> anyhow::Result<UploadReceipt>;
}

/// Stores each artifact as `<output_dir>/<name>.zip` plus a `<name>.json` receipt.
pub struct ZipArtifactUploader {
    output_dir: PathBuf,
}

impl ZipArtifactUploader {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl ArtifactUploader for ZipArtifactUploader {
    fn upload(&self, request: &UploadRequest) -> anyhow::Result<UploadReceipt> {
        validate_name(&request.name)?;
        let entries = request
            .files
            .iter()
            .map(|file| entry_name(&request.root, file).map(|name| (file, name)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("create {}", self.output_dir.display()))?;
        let location = self.output_dir.join(format!("{}.zip", request.name));
        let archive = File::create(&location)
            .with_context(|| format!("create {}", location.display()))?;
        let mut writer = ZipWriter::new(archive);
        let options: FileOptions<'_, ()> =
            FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (file, name) in &entries {
            let mut source =
                File::open(file).with_context(|| format!("open {}", file.display()))?;
            writer.start_file(name.as_str(), options)?;
            io::copy(&mut source, &mut writer)?;
        }
        let mut archive = writer.finish()?;
        archive.flush()?;

        let created_at = Utc::now();
        let receipt = UploadReceipt {
            name: request.name.clone(),
            size: std::fs::metadata(&location)?.len(),
            location,
            files: entries.into_iter().map(|(_, name)| name).collect(),
            created_at,
            expires_at: request
                .retention_days
                .map(|days| created_at + ChronoDuration::days(i64::from(days))),
        };
        write_json(
            &self.output_dir.join(format!("{}.json", request.name)),
            &receipt,
        )?;
        Ok(receipt)
    }
}

fn validate_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() {
        return Err(anyhow::anyhow!("artifact name cannot be empty"));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        || name.starts_with('.')
    {
        return Err(anyhow::anyhow!(
            "invalid artifact name '{}'; use alphanumeric, '-', '_' or '.'",
            name
        ));
    }
    Ok(())
}

fn entry_name(root: &Path, file: &Path) -> anyhow::Result<String> {
    let relative = file.strip_prefix(root).map_err(|_| {
        anyhow::anyhow!(
            "{} is not under artifact root {}",
            file.display(),
            root.display()
        )
    })?;
    let name = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if name.is_empty() {
        anyhow::bail!("{} is the artifact root, not a file", file.display());
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn request(root: &Path, files: &[&str]) -> UploadRequest {
        UploadRequest {
            name: "synapse-logs".to_string(),
            files: files.iter().map(|file| root.join(file)).collect(),
            root: root.to_path_buf(),
            retention_days: Some(3),
        }
    }

    #[test]
    fn archives_files_relative_to_root() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let root = temp.path().join("synapse");
        std::fs::create_dir_all(&root)?;
        std::fs::write(root.join("out.log"), "started\n")?;
        std::fs::write(root.join("err.log"), "")?;

        let uploader = ZipArtifactUploader::new(temp.path().join("artifacts"));
        let receipt = uploader.upload(&request(&root, &["out.log", "err.log"]))?;
        assert_eq!(receipt.files, vec!["out.log", "err.log"]);
        assert_eq!(
            receipt.expires_at,
            Some(receipt.created_at + ChronoDuration::days(3))
        );

        let mut archive = ZipArchive::new(File::open(&receipt.location)?)?;
        assert_eq!(archive.len(), 2);
        let mut contents = String::new();
        archive.by_name("out.log")?.read_to_string(&mut contents)?;
        assert_eq!(contents, "started\n");

        let persisted: UploadReceipt = serde_json::from_slice(&std::fs::read(
            temp.path().join("artifacts").join("synapse-logs.json"),
        )?)?;
        assert_eq!(persisted, receipt);
        Ok(())
    }

    #[test]
    fn rejects_files_outside_root() {
        let temp = tempfile::tempdir().unwrap();
        let uploader = ZipArtifactUploader::new(temp.path().join("artifacts"));
        let mut request = request(&temp.path().join("synapse"), &[]);
        request.files.push(temp.path().join("elsewhere.log"));
        let err = uploader.upload(&request).unwrap_err();
        assert!(err.to_string().contains("not under artifact root"));
    }

    #[test]
    fn missing_file_fails_upload() {
        let temp = tempfile::tempdir().unwrap();
        let uploader = ZipArtifactUploader::new(temp.path().join("artifacts"));
        assert!(uploader.upload(&request(temp.path(), &["absent.log"])).is_err());
    }

    #[test]
    fn validates_artifact_names() {
        assert!(validate_name("synapse-logs_2.1").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name("with space").is_err());
    }
}
