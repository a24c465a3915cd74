use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
}

/// A server started by [`launch`]. Only the identity is kept; the process itself is not owned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisedProcess {
    pub pid: u32,
    pub workdir: PathBuf,
    pub argv: Vec<String>,
    pub detached: bool,
}

/// Spawns `spec.argv` in its own session with stdout/stderr appended to the given logs.
///
/// The returned pid is valid as soon as the fork succeeds. A program that exits
/// right away still yields a pid; readiness is decided by probing, not here.
pub fn launch(spec: &LaunchSpec) -> anyhow::Result<SupervisedProcess> {
    if spec.argv.is_empty() {
        return Err(anyhow::anyhow!("launch argv cannot be empty"));
    }
    let stdout = open_append(&spec.stdout_log)?;
    let stderr = open_append(&spec.stderr_log)?;

    let mut command = Command::new(&spec.argv[0]);
    command.args(&spec.argv[1..]);
    command.current_dir(&spec.cwd);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()
        .with_context(|| format!("failed to spawn {}", spec.argv[0]))?;

    let pid = release(child);
    Ok(SupervisedProcess {
        pid,
        workdir: spec.cwd.clone(),
        argv: spec.argv.clone(),
        detached: true,
    })
}

/// Drops the child handle without waiting so the harness can exit while the server keeps running.
fn release(child: Child) -> u32 {
    let pid = child.id();
    drop(child);
    pid
}

fn open_append(path: &Path) -> anyhow::Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("unable to open log {}", path.display()))
}

#[cfg(unix)]
pub fn is_running(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spec(dir: &Path, argv: &[&str]) -> LaunchSpec {
        LaunchSpec {
            argv: argv.iter().map(|arg| arg.to_string()).collect(),
            cwd: dir.to_path_buf(),
            stdout_log: dir.join("out.log"),
            stderr_log: dir.join("err.log"),
        }
    }

    #[test]
    fn appends_output_to_existing_logs() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("out.log"), "previous\n").unwrap();
        let process = launch(&spec(
            temp.path(),
            &["sh", "-c", "echo ready; echo oops >&2"],
        ))
        .unwrap();
        assert!(process.pid > 0);
        assert!(process.detached);
        assert_eq!(process.workdir, temp.path());

        std::thread::sleep(Duration::from_millis(300));
        let out = std::fs::read_to_string(temp.path().join("out.log")).unwrap();
        let err = std::fs::read_to_string(temp.path().join("err.log")).unwrap();
        assert_eq!(out, "previous\nready\n");
        assert_eq!(err, "oops\n");
    }

    #[test]
    fn runs_in_requested_working_directory() {
        let temp = tempfile::tempdir().unwrap();
        launch(&spec(temp.path(), &["sh", "-c", "pwd"])).unwrap();
        std::thread::sleep(Duration::from_millis(300));
        let out = std::fs::read_to_string(temp.path().join("out.log")).unwrap();
        let expected = temp.path().canonicalize().unwrap();
        assert_eq!(PathBuf::from(out.trim()).canonicalize().unwrap(), expected);
    }

    #[test]
    fn child_gets_its_own_session() {
        let temp = tempfile::tempdir().unwrap();
        let process = launch(&spec(temp.path(), &["sleep", "2"])).unwrap();
        let pid = process.pid as i32;
        assert!(is_running(pid));
        let sid = unsafe { libc::getsid(pid) };
        assert_eq!(sid, pid);
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
    }

    #[test]
    fn missing_executable_is_a_spawn_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = launch(&spec(temp.path(), &["/definitely/not/here"])).unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[test]
    fn empty_argv_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        assert!(launch(&spec(temp.path(), &[])).is_err());
    }

    #[test]
    fn non_positive_pids_are_never_running() {
        assert!(!is_running(0));
        assert!(!is_running(-1));
    }
}
