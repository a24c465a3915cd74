use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::Context;

pub const OUTPUT_FILE_ENV: &str = "GITHUB_OUTPUT";
pub const RUN_ID_ENV: &str = "GITHUB_RUN_ID";

/// Publishes a step output, falling back to stdout outside a workflow runner.
pub fn set_output(name: &str, value: &str) -> anyhow::Result<()> {
    match std::env::var_os(OUTPUT_FILE_ENV) {
        Some(path) if !path.is_empty() => append_output(Path::new(&path), name, value),
        _ => {
            println!("{name}={value}");
            Ok(())
        }
    }
}

pub fn append_output(path: &Path, name: &str, value: &str) -> anyhow::Result<()> {
    if name.contains('=') || name.contains('\n') || value.contains('\n') {
        anyhow::bail!("output {name} cannot contain '=' in its name or newlines");
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open workflow output file {}", path.display()))?;
    writeln!(file, "{name}={value}")?;
    Ok(())
}

/// Identifier of the current workflow run, or a fresh one outside CI.
pub fn run_id() -> String {
    match std::env::var(RUN_ID_ENV) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}
