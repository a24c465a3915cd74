//! Process-wide logger for the harness.
//!
//! Records go to `harness.log` in the state directory and are echoed to stdout
//! using workflow-command prefixes so CI runners render them as annotations.

use std::{
    fs::{File, OpenOptions},
    io,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
    sync::atomic::{AtomicU8, Ordering},
};

use chrono::Utc;
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            _ => Level::Error,
        }
    }
}

struct Logger {
    writer: Mutex<File>,
    min_level: Level,
}

static LOGGER: OnceLock<Logger> = OnceLock::new();
static CONSOLE_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

pub const LOG_FILE_NAME: &str = "harness.log";

pub fn init(log_dir: PathBuf, min_level: Level) -> anyhow::Result<PathBuf> {
    set_console_level(min_level);
    let fallback = std::env::temp_dir().join("homeserver-harness");

    let mut candidates = vec![log_dir.clone()];
    if fallback != log_dir {
        candidates.push(fallback);
    }

    let mut last_error: Option<(PathBuf, io::Error)> = None;
    for candidate in candidates {
        match try_open_log(&candidate) {
            Ok(file) => {
                let logger = Logger {
                    writer: Mutex::new(file),
                    min_level,
                };
                if LOGGER.set(logger).is_err() {
                    anyhow::bail!("harness logger already initialized");
                }
                if candidate != log_dir {
                    eprintln!(
                        "unable to write {LOG_FILE_NAME} at {}; falling back to {}",
                        log_dir.display(),
                        candidate.display()
                    );
                }
                return Ok(candidate);
            }
            Err(err) => {
                last_error = Some((candidate, err));
            }
        }
    }

    if let Some((path, err)) = last_error {
        Err(anyhow::anyhow!(
            "unable to open harness log at {}: {}",
            path.display(),
            err
        ))
    } else {
        anyhow::bail!("unable to initialize harness log")
    }
}

pub fn set_console_level(level: Level) {
    CONSOLE_LEVEL.store(level as u8, Ordering::Relaxed);
}

fn try_open_log(log_dir: &Path) -> io::Result<File> {
    std::fs::create_dir_all(log_dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))
}

/// Formats a message the way a workflow runner expects to see it on stdout.
pub fn console_line(level: Level, message: &str) -> String {
    match level {
        Level::Trace | Level::Debug => format!("::debug::{message}"),
        Level::Info => message.to_string(),
        Level::Warn => format!("::warning::{message}"),
        Level::Error => format!("::error::{message}"),
    }
}

pub fn log(level: Level, target: &str, message: String) {
    if level >= Level::from_u8(CONSOLE_LEVEL.load(Ordering::Relaxed)) {
        println!("{}", console_line(level, &message));
    }
    let logger = match LOGGER.get() {
        Some(logger) => logger,
        None => return,
    };
    if level < logger.min_level {
        return;
    }
    let mut writer = match logger.writer.lock() {
        Ok(writer) => writer,
        Err(_) => return,
    };
    let timestamp = Utc::now().to_rfc3339();
    if writeln!(*writer, "{timestamp} [{level:?}] {target} - {message}").is_err() {
        let _ = writer.flush();
    }
}

pub fn trace(target: &str, message: impl AsRef<str>) {
    log(Level::Trace, target, message.as_ref().to_string());
}

pub fn debug(target: &str, message: impl AsRef<str>) {
    log(Level::Debug, target, message.as_ref().to_string());
}

pub fn info(target: &str, message: impl AsRef<str>) {
    log(Level::Info, target, message.as_ref().to_string());
}

pub fn warn(target: &str, message: impl AsRef<str>) {
    log(Level::Warn, target, message.as_ref().to_string());
}

pub fn error(target: &str, message: impl AsRef<str>) {
    log(Level::Error, target, message.as_ref().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn writes_harness_log() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let _ = init(dir.path().to_path_buf(), Level::Info)?;
        info("tests::writes_harness_log", "hello world");
        debug("tests::writes_harness_log", "below threshold");
        let contents = fs::read_to_string(dir.path().join(LOG_FILE_NAME))?;
        assert!(contents.contains("hello world"));
        assert!(!contents.contains("below threshold"));
        Ok(())
    }

    #[test]
    fn console_lines_use_workflow_commands() {
        assert_eq!(console_line(Level::Info, "ok"), "ok");
        assert_eq!(console_line(Level::Warn, "careful"), "::warning::careful");
        assert_eq!(console_line(Level::Error, "boom"), "::error::boom");
        assert_eq!(console_line(Level::Debug, "detail"), "::debug::detail");
    }
}
