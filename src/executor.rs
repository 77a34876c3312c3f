//! External process execution with timeout enforcement.
//!
//! Spawns one toolchain process, drains stdout/stderr concurrently so large
//! output never blocks on a full pipe buffer, and races process exit against
//! a wall-clock budget. On timeout the whole process tree is killed; a
//! process is never left running after `execute` returns.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ExecError;

/// A single external-process execution request. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    /// Environment overrides (sandboxed home/cache/temp paths).
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, work_dir: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: work_dir.as_ref().to_path_buf(),
            env: Vec::new(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = env.into_iter().collect();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Duration::from_millis(timeout_ms);
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

/// Captured outcome of a completed invocation.
#[derive(Debug)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawn the invocation in its own process group with piped output.
pub(crate) fn spawn(inv: &Invocation) -> Result<Child, ExecError> {
    let mut cmd = Command::new(&inv.program);
    cmd.args(&inv.args)
        .current_dir(&inv.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group so a timeout can take down grandchildren too.
    #[cfg(unix)]
    cmd.process_group(0);
    for (key, value) in &inv.env {
        cmd.env(key, value);
    }
    cmd.spawn().map_err(|e| ExecError::Launch {
        program: inv.program.clone(),
        source: e,
    })
}

pub(crate) struct DrainHandles {
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
}

impl DrainHandles {
    pub(crate) async fn join(self) -> (String, String) {
        let stdout = match self.stdout {
            Some(h) => h.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match self.stderr {
            Some(h) => h.await.unwrap_or_default(),
            None => String::new(),
        };
        (stdout, stderr)
    }
}

/// Start draining both output pipes while the process runs. Without this a
/// child writing more than the pipe buffer would block forever.
pub(crate) fn spawn_drains(child: &mut Child) -> DrainHandles {
    let stdout = child.stdout.take().map(|mut out| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        })
    });
    let stderr = child.stderr.take().map(|mut err| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = err.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        })
    });
    DrainHandles { stdout, stderr }
}

/// Kill the whole process tree and reap the child. Best-effort teardown:
/// never raises.
pub(crate) async fn kill_process_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

pub(crate) fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let clipped: String = s.chars().take(max).collect();
        format!("{clipped}...")
    }
}

/// Run one invocation to completion.
///
/// Fails with [`ExecError::Timeout`] if the process has not exited within
/// its budget (the tree is killed first) and [`ExecError::Launch`] if the
/// executable cannot be started.
pub async fn execute(inv: &Invocation) -> Result<ProcessOutput, ExecError> {
    debug!(
        program = %inv.program,
        args = ?inv.args,
        work_dir = %inv.work_dir.display(),
        timeout_ms = inv.timeout_ms(),
        "proc start"
    );

    let mut child = spawn(inv)?;
    let drains = spawn_drains(&mut child);

    let status = match tokio::time::timeout(inv.timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            kill_process_tree(&mut child).await;
            return Err(ExecError::Io {
                program: inv.program.clone(),
                source: e,
            });
        }
        Err(_) => {
            kill_process_tree(&mut child).await;
            warn!(
                program = %inv.program,
                timeout_ms = inv.timeout_ms(),
                "proc timeout, process tree killed"
            );
            return Err(ExecError::Timeout {
                program: inv.program.clone(),
                timeout_ms: inv.timeout_ms(),
            });
        }
    };

    let (stdout, stderr) = drains.join().await;
    let exit_code = status.code().unwrap_or(-1);

    // Log sizes, not content, to bound log volume.
    debug!(
        program = %inv.program,
        exit_code,
        out_len = stdout.len(),
        err_len = stderr.len(),
        "proc end"
    );
    if exit_code != 0 {
        debug!(out_snippet = %clip(&stdout, 400), err_snippet = %clip(&stderr, 400), "proc output");
    }

    Ok(ProcessOutput {
        exit_code,
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str, timeout_ms: u64) -> Invocation {
        Invocation::new("sh", std::env::temp_dir())
            .with_args(["-c", script])
            .with_timeout_ms(timeout_ms)
    }

    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let out = execute(&sh("echo out; echo err >&2; exit 3", 5_000))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.is_success());
    }

    #[tokio::test]
    async fn large_output_does_not_deadlock() {
        // Well past the 64 KiB pipe buffer.
        let out = execute(&sh("head -c 300000 /dev/zero | tr '\\0' 'a'", 10_000))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.len(), 300_000);
    }

    #[tokio::test]
    async fn missing_executable_is_a_launch_failure() {
        let inv = Invocation::new("definitely-not-a-real-binary", std::env::temp_dir())
            .with_timeout_ms(1_000);
        let err = execute(&inv).await.unwrap_err();
        assert!(matches!(err, ExecError::Launch { .. }));
    }

    #[tokio::test]
    async fn timeout_returns_promptly_and_kills_the_tree() {
        let marker = format!("assessor-exec-marker-{}", std::process::id());
        let start = Instant::now();
        let err = execute(&sh(&format!("sleep 30 # {marker}"), 300))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        // Budget plus bounded scheduling slack.
        assert!(start.elapsed() < Duration::from_secs(5));

        // No process of this invocation may survive the call.
        if let Ok(status) = std::process::Command::new("pgrep")
            .args(["-f", &marker])
            .status()
        {
            assert!(!status.success(), "timed-out process tree still alive");
        }
    }

    #[tokio::test]
    async fn env_overrides_reach_the_child() {
        let inv = sh("printf '%s' \"$ASSESS_PROBE\"", 5_000)
            .with_env([("ASSESS_PROBE".to_string(), "sandboxed".to_string())]);
        let out = execute(&inv).await.unwrap();
        assert_eq!(out.stdout, "sandboxed");
    }
}
