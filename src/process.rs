//! Process liveness as seen by the readiness loop.
use std::fmt;
use std::process::ExitStatus;
use tokio::process::Child;

/// Liveness of the process behind a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// No process has been attached yet.
    NotStarted,
    /// The process is running.
    Started,
    /// The process exited or was killed.
    Terminated,
}

impl ProcessStatus {
    pub fn is_started(self) -> bool {
        self == ProcessStatus::Started
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessStatus::NotStarted => "not started",
            ProcessStatus::Started => "started",
            ProcessStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Anything that can report the liveness of a process.
///
/// Process managers hand the readiness loop either a [`ChildProcess`] or a
/// closure that queries their own bookkeeping.
pub trait ProcessHandle {
    fn status(&mut self) -> ProcessStatus;
}

impl<F> ProcessHandle for F
where
    F: FnMut() -> ProcessStatus,
{
    fn status(&mut self) -> ProcessStatus {
        self()
    }
}

/// A service process spawned through `tokio::process`.
///
/// The exit status is cached the first time it is observed, so the handle
/// keeps reporting `Terminated` after the child has been reaped.
#[derive(Debug)]
pub struct ChildProcess {
    child: Option<Child>,
    pid: Option<u32>,
    exit: Option<ExitStatus>,
}

impl ChildProcess {
    /// Wrap a spawned child.
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Some(child),
            pid,
            exit: None,
        }
    }

    /// A handle with no process attached.
    pub fn not_started() -> Self {
        Self {
            child: None,
            pid: None,
            exit: None,
        }
    }

    /// OS process id, captured at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, once the process has been observed to exit.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    /// Wait for the process to exit. Returns `None` if nothing was started.
    pub async fn wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        if let Some(status) = self.exit {
            return Ok(Some(status));
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        let status = child.wait().await?;
        tracing::debug!(pid = ?self.pid, %status, "service process exited");
        self.exit = Some(status);
        Ok(Some(status))
    }
}

impl ProcessHandle for ChildProcess {
    fn status(&mut self) -> ProcessStatus {
        if self.exit.is_some() {
            return ProcessStatus::Terminated;
        }
        let Some(child) = self.child.as_mut() else {
            return ProcessStatus::NotStarted;
        };
        match child.try_wait() {
            Ok(None) => ProcessStatus::Started,
            Ok(Some(status)) => {
                tracing::debug!(pid = ?self.pid, %status, "service process exited");
                self.exit = Some(status);
                ProcessStatus::Terminated
            }
            Err(e) => {
                tracing::warn!(pid = ?self.pid, error = %e, "failed to query service process");
                ProcessStatus::Terminated
            }
        }
    }
}
