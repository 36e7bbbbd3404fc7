/// Service lifecycle: spawn the service command in its own process group and
/// stop the whole group again.
use crate::process::{ChildProcess, ProcessHandle, ProcessStatus};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Errors that can occur while starting or stopping a service.
#[derive(Debug)]
pub enum LaunchError {
    /// No command was configured.
    EmptyCommand,
    /// Failed to spawn the service process.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// Failed to signal the service's process group.
    Signal { pid: u32, source: Errno },
    /// Failed while waiting for the service to exit.
    Wait { source: std::io::Error },
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::EmptyCommand => write!(f, "no service command configured"),
            LaunchError::Spawn { command, source } => {
                write!(f, "failed to spawn service '{}': {}", command, source)
            }
            LaunchError::Signal { pid, source } => {
                write!(f, "failed to signal process group {}: {}", pid, source)
            }
            LaunchError::Wait { source } => {
                write!(f, "failed to wait for service process: {}", source)
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::EmptyCommand => None,
            LaunchError::Spawn { source, .. } => Some(source),
            LaunchError::Signal { source, .. } => Some(source),
            LaunchError::Wait { source } => Some(source),
        }
    }
}

/// Spawn `command` with `args` and extra environment variables.
///
/// The service inherits stdio and gets its own process group (via
/// `process_group(0)`) so it can be stopped together with its children.
pub fn launch(
    command: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> Result<ChildProcess, LaunchError> {
    if command.trim().is_empty() {
        return Err(LaunchError::EmptyCommand);
    }

    tracing::info!(command, args = ?args, "spawning service");

    let child = Command::new(command)
        .args(args)
        .envs(env)
        .stdin(Stdio::null())
        .process_group(0) // New process group for clean kill
        .spawn()
        .map_err(|e| LaunchError::Spawn {
            command: command.to_string(),
            source: e,
        })?;

    let process = ChildProcess::new(child);
    tracing::info!(pid = ?process.pid(), "service process started");
    Ok(process)
}

impl ChildProcess {
    /// Stop the service: SIGTERM to the process group, then SIGKILL if it is
    /// still running after `grace`.
    ///
    /// Returns the exit status, or `None` if nothing was ever started.
    pub async fn stop(&mut self, grace: Duration) -> Result<Option<ExitStatus>, LaunchError> {
        if self.status() != ProcessStatus::Started {
            return Ok(self.exit_status());
        }
        let Some(pid) = self.pid() else {
            return Ok(None);
        };

        tracing::info!(pid, grace_ms = grace.as_millis() as u64, "stopping service");
        signal_group(pid, Signal::SIGTERM)?;

        match tokio::time::timeout(grace, self.wait()).await {
            Ok(result) => result.map_err(|e| LaunchError::Wait { source: e }),
            Err(_) => {
                tracing::warn!(pid, "service ignored SIGTERM, sending SIGKILL");
                signal_group(pid, Signal::SIGKILL)?;
                self.wait().await.map_err(|e| LaunchError::Wait { source: e })
            }
        }
    }
}

fn signal_group(pid: u32, signal: Signal) -> Result<(), LaunchError> {
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(()),
        // Group already gone
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(LaunchError::Signal { pid, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_launch_and_stop_running_service() {
        let mut process = launch("sleep", &args(&["30"]), &BTreeMap::new()).unwrap();
        assert!(process.pid().unwrap() > 0);
        assert_eq!(process.status(), ProcessStatus::Started);

        let status = process.stop(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
        assert_eq!(process.status(), ProcessStatus::Terminated);
    }

    #[tokio::test]
    async fn test_stop_escalates_to_sigkill() {
        let mut process = launch(
            "sh",
            &args(&["-c", "trap '' TERM; sleep 30"]),
            &BTreeMap::new(),
        )
        .unwrap();
        // Let the shell install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = process
            .stop(Duration::from_millis(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
    }

    #[tokio::test]
    async fn test_stop_after_exit_returns_cached_status() {
        let mut process = launch("sh", &args(&["-c", "exit 4"]), &BTreeMap::new()).unwrap();
        process.wait().await.unwrap();

        let status = process.stop(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(status.code(), Some(4));
    }

    #[tokio::test]
    async fn test_stop_not_started_is_noop() {
        let mut process = ChildProcess::not_started();
        assert!(process.stop(Duration::from_secs(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_launch_passes_environment() {
        let mut env = BTreeMap::new();
        env.insert("READYPROBE_TEST_CODE".to_string(), "9".to_string());
        let mut process = launch(
            "sh",
            &args(&["-c", "exit $READYPROBE_TEST_CODE"]),
            &env,
        )
        .unwrap();

        let status = process.wait().await.unwrap().unwrap();
        assert_eq!(status.code(), Some(9));
    }

    #[test]
    fn test_launch_empty_command() {
        let err = launch("  ", &[], &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, LaunchError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_launch_spawn_failure() {
        let err = launch("nonexistent-binary-xyz", &[], &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(err.to_string().contains("failed to spawn service 'nonexistent-binary-xyz'"));
    }
}
