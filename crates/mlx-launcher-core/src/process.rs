use crate::config::ServerCommand;
use crate::stdio::OutputSink;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Unique identifier for a process
pub type ProcessId = u32;

/// Exit status of a reaped process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus(pub std::process::ExitStatus);

impl ProcessStatus {
    /// Exit code to propagate for a finished process.
    ///
    /// A child killed by a signal reports `128 + signal`, the shell convention.
    pub fn exit_code(&self) -> Option<i32> {
        self.0.code().or_else(|| signal_exit_code(&self.0))
    }
}

impl From<std::process::ExitStatus> for ProcessStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        ProcessStatus(status)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(unix)]
fn signal_exit_code(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|signal| 128 + signal)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Signal was delivered
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

/// Trait representing a handle to a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None once the process has been reaped)
    fn pid(&self) -> Option<ProcessId>;

    /// Get the command that started this process
    fn command(&self) -> &str;

    /// Try to get exit status without blocking
    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessStatus>;
}

/// Platform process manager: spawn, signal and reap the server process
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// The type of process handle this manager produces
    type Handle: ProcessHandle;

    /// Spawn the server with its stdout and stderr drained into `sink`
    async fn spawn(&self, command: &ServerCommand, sink: OutputSink) -> Result<Self::Handle>;

    /// Ask the process to stop (SIGTERM on Unix)
    async fn terminate_gracefully(&self, handle: &mut Self::Handle) -> TerminationResult;

    /// Force kill the process (SIGKILL on Unix)
    async fn force_kill(&self, handle: &mut Self::Handle) -> TerminationResult;

    /// Wait for a process to exit with optional timeout
    async fn wait_for_exit(
        &self,
        handle: &mut Self::Handle,
        timeout: Option<Duration>,
    ) -> Result<ProcessStatus> {
        match timeout {
            Some(duration) => tokio::time::timeout(duration, handle.wait())
                .await
                .map_err(|_| anyhow::anyhow!("Timeout waiting for process exit"))?,
            None => handle.wait().await,
        }
    }
}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessManager;

    /// Create a process manager for the current platform
    fn create_process_manager() -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    #[test]
    fn test_exit_code_from_normal_exit() {
        let status = ProcessStatus::from(ExitStatus::from_raw(7 << 8));
        assert_eq!(status.exit_code(), Some(7));
    }

    #[test]
    fn test_exit_code_from_signal() {
        // SIGTERM
        let status = ProcessStatus::from(ExitStatus::from_raw(15));
        assert_eq!(status.exit_code(), Some(143));
    }

    #[test]
    fn test_display_uses_exit_status() {
        let status = ProcessStatus::from(ExitStatus::from_raw(3 << 8));
        assert_eq!(status.to_string(), "exit status: 3");
    }
}
