use anyhow::Result;
use async_trait::async_trait;
use mlx_launcher_core::{
    OutputPumps, OutputSink, ProcessHandle, ProcessId, ProcessManager, ProcessStatus,
    ServerCommand, TerminationResult,
};
use std::time::Duration;

/// How long to keep forwarding output after the child has exited
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use anyhow::Context;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::process::Stdio;
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// Unix-specific process handle. The child leads its own process group.
    pub struct UnixProcessHandle {
        child: Child,
        command: String,
        pumps: Option<OutputPumps>,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, command: String, pumps: OutputPumps) -> Self {
            Self {
                child,
                command,
                pumps: Some(pumps),
            }
        }

        async fn drain_output(&mut self) {
            if let Some(pumps) = self.pumps.take() {
                let bytes = pumps.finish(OUTPUT_DRAIN_GRACE).await;
                debug!(bytes, "Forwarded child output");
            }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
        fn pid(&self) -> Option<ProcessId> {
            self.child.id()
        }

        fn command(&self) -> &str {
            &self.command
        }

        async fn try_wait(&mut self) -> Result<Option<ProcessStatus>> {
            match self.child.try_wait()? {
                Some(status) => {
                    self.drain_output().await;
                    Ok(Some(ProcessStatus::from(status)))
                }
                None => Ok(None),
            }
        }

        async fn wait(&mut self) -> Result<ProcessStatus> {
            let status = self.child.wait().await?;
            self.drain_output().await;
            Ok(ProcessStatus::from(status))
        }
    }

    impl Drop for UnixProcessHandle {
        fn drop(&mut self) {
            // Emergency cleanup: never leave a running server behind
            if let (Some(pid), Ok(None)) = (self.child.id(), self.child.try_wait()) {
                warn!(
                    "Server process {} ({}) still running on drop, sending SIGTERM",
                    pid, self.command
                );
                if let Err(e) = signal::killpg(NixPid::from_raw(pid as i32), Signal::SIGTERM) {
                    warn!("Emergency cleanup failed for process {}: {}", pid, e);
                }
            }
        }
    }

    /// Unix process manager: one process group per server, signals via `nix`
    #[derive(Debug, Default)]
    pub struct UnixProcessManager;

    impl UnixProcessManager {
        pub fn new() -> Self {
            info!("Initializing Unix process manager");
            Self
        }

        fn signal_group(pid: ProcessId, sig: Signal) -> TerminationResult {
            let pgid = NixPid::from_raw(pid as i32);

            match signal::killpg(pgid, sig) {
                Ok(()) => {
                    info!("Sent {} to process group {}", sig, pid);
                    TerminationResult::Success
                }
                Err(Errno::ESRCH) => {
                    info!("Process group {} not found (already terminated)", pid);
                    TerminationResult::ProcessNotFound
                }
                Err(Errno::EPERM) => {
                    warn!("Permission denied to signal process group {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send {} to process group {}: {}", sig, pid, e);
                    TerminationResult::Failed(format!("{sig} to process group failed: {e}"))
                }
            }
        }
    }

    #[async_trait]
    impl ProcessManager for UnixProcessManager {
        type Handle = UnixProcessHandle;

        async fn spawn(&self, command: &ServerCommand, sink: OutputSink) -> Result<Self::Handle> {
            let mut cmd = Command::new(&command.command);
            cmd.args(&command.args)
                .envs(&command.env)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());

            if let Some(dir) = &command.working_directory {
                cmd.current_dir(dir);
            }

            // Own process group: terminal Ctrl-C reaches only the launcher,
            // which then decides how to stop the server
            cmd.process_group(0);

            let mut child = cmd
                .spawn()
                .with_context(|| format!("Failed to spawn process: {}", command.command))?;

            if let Some(pid) = child.id() {
                info!(
                    "Spawned Unix process: {} (PID: {}) with args: {:?}",
                    command.command, pid, command.args
                );
            }

            let pumps = OutputPumps::attach(&mut child, sink);
            Ok(UnixProcessHandle::new(child, command.command.clone(), pumps))
        }

        async fn terminate_gracefully(&self, handle: &mut Self::Handle) -> TerminationResult {
            match handle.pid() {
                Some(pid) => Self::signal_group(pid, Signal::SIGTERM),
                None => TerminationResult::ProcessNotFound,
            }
        }

        async fn force_kill(&self, handle: &mut Self::Handle) -> TerminationResult {
            let Some(pid) = handle.pid() else {
                return TerminationResult::ProcessNotFound;
            };

            let result = Self::signal_group(pid, Signal::SIGKILL);
            if result == TerminationResult::Success {
                // Reap the child so its status is available
                if let Err(e) = handle.wait().await {
                    warn!("Failed to reap killed process {}: {}", pid, e);
                }
            }
            result
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};
