use crate::config::{ServerCommand, SupervisorConfig};
use crate::error::{FAILURE_EXIT_CODE, LauncherError};
use crate::preflight::Preflight;
use crate::probe::ReadinessProbe;
use crate::process::{ProcessHandle, ProcessId, ProcessManager, ProcessStatus, TerminationResult};
use crate::stdio::OutputSink;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of one supervised server process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Spawned,
    Probing,
    Ready,
    Running,
    TimedOut,
    Interrupted,
    Failed,
    Terminating,
    Exited,
}

impl SupervisorState {
    fn for_error(err: &LauncherError) -> Self {
        match err {
            LauncherError::Interrupted => SupervisorState::Interrupted,
            LauncherError::ProbeTimeout { .. } => SupervisorState::TimedOut,
            _ => SupervisorState::Failed,
        }
    }
}

/// Hooks for user-facing status output. All methods default to no-ops.
pub trait LifecycleObserver: Send + Sync {
    fn spawned(&self, _pid: Option<ProcessId>, _command: &ServerCommand) {}
    fn waiting(&self, _elapsed: Duration) {}
    fn ready(&self, _addr: SocketAddr) {}
    fn stopping(&self, _reason: &LauncherError) {}
    fn stopped(&self, _status: Option<&ProcessStatus>) {}
    fn exited(&self, _status: &ProcessStatus) {}
}

/// Observer that reports nothing
#[derive(Debug, Default)]
pub struct SilentObserver;

impl LifecycleObserver for SilentObserver {}

/// Outcome of [`Supervisor::run`]
#[derive(Debug)]
pub struct SupervisorReport {
    /// Exit code the launcher should terminate with
    pub exit_code: i32,
    /// Why the run ended early, if it did
    pub error: Option<LauncherError>,
    /// Last observed status of the child, if it was reaped
    pub child_status: Option<ProcessStatus>,
    /// Every state visited, starting with `NotStarted`
    pub transitions: Vec<SupervisorState>,
}

impl SupervisorReport {
    pub fn final_state(&self) -> SupervisorState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(SupervisorState::NotStarted)
    }

    pub fn passed_through(&self, state: SupervisorState) -> bool {
        self.transitions.contains(&state)
    }
}

/// Spawns the server, waits for it to accept connections and owns it until it exits
pub struct Supervisor<M: ProcessManager> {
    manager: M,
    command: ServerCommand,
    config: SupervisorConfig,
    preflight: Option<Box<dyn Preflight>>,
    observer: Arc<dyn LifecycleObserver>,
    output: OutputSink,
    transitions: Vec<SupervisorState>,
}

impl<M: ProcessManager> Supervisor<M> {
    pub fn new(manager: M, command: ServerCommand, config: SupervisorConfig) -> Self {
        let output = OutputSink::for_mode(command.output);
        Self {
            manager,
            command,
            config,
            preflight: None,
            observer: Arc::new(SilentObserver),
            output,
            transitions: vec![SupervisorState::NotStarted],
        }
    }

    pub fn with_preflight(mut self, preflight: impl Preflight + 'static) -> Self {
        self.preflight = Some(Box::new(preflight));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(SupervisorState::NotStarted)
    }

    /// Run the whole lifecycle. Cancelling `shutdown` is treated as an
    /// operator interrupt: the child is stopped and the run exits with 0.
    pub async fn run(mut self, shutdown: CancellationToken) -> SupervisorReport {
        let mut child = match self.launch(&shutdown).await {
            Ok(child) => child,
            Err(err) => {
                self.transition(SupervisorState::for_error(&err));
                return self.finish(Err(err), None);
            }
        };

        match self.supervise(&mut child, &shutdown).await {
            Ok(status) => {
                self.observer.exited(&status);
                self.finish(Ok(status.clone()), Some(status))
            }
            Err(err) => {
                self.transition(SupervisorState::for_error(&err));
                let status = if err.needs_cleanup() {
                    self.stop(&mut child, &err).await
                } else {
                    None
                };
                self.finish(Err(err), status)
            }
        }
    }

    /// Validate, run the preflight check and spawn the child
    async fn launch(&mut self, shutdown: &CancellationToken) -> Result<M::Handle, LauncherError> {
        self.config
            .probe
            .validate()
            .map_err(|e| LauncherError::Configuration(e.to_string()))?;

        if let Some(preflight) = &self.preflight {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(LauncherError::Interrupted),
                checked = preflight.check() => checked?,
            }
        }

        info!(
            name = %self.command.name,
            command = %self.command.display_line(),
            "Starting server process"
        );

        let handle = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(LauncherError::Interrupted),
            spawned = self.manager.spawn(&self.command, self.output.clone()) => {
                spawned.map_err(|e| LauncherError::SpawnFailed(format!("{e:#}")))?
            }
        };

        debug!(pid = ?handle.pid(), command = handle.command(), "Server process spawned");
        self.transition(SupervisorState::Spawned);
        self.observer.spawned(handle.pid(), &self.command);
        Ok(handle)
    }

    async fn supervise(
        &mut self,
        child: &mut M::Handle,
        shutdown: &CancellationToken,
    ) -> Result<ProcessStatus, LauncherError> {
        let grace = self.config.startup_grace;
        if !grace.is_zero() {
            debug!("Giving the server {:?} to start before probing", grace);
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(LauncherError::Interrupted),
                status = child.wait() => return Err(exited_before_ready(status?)),
                _ = tokio::time::sleep(grace) => {}
            }
        }

        self.transition(SupervisorState::Probing);
        let probe = ReadinessProbe::new(self.config.probe.clone());
        let addr = probe.config().addr();
        let timeout = probe.config().timeout();
        let observer = self.observer.clone();

        let ready = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(LauncherError::Interrupted),
            status = child.wait() => return Err(exited_before_ready(status?)),
            ready = probe.wait(|elapsed| observer.waiting(elapsed)) => ready?,
        };

        if !ready {
            error!(%addr, ?timeout, "Server failed to start within timeout");
            return Err(LauncherError::ProbeTimeout { addr, timeout });
        }

        self.transition(SupervisorState::Ready);
        self.observer.ready(addr);
        self.transition(SupervisorState::Running);

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(LauncherError::Interrupted),
            status = child.wait() => {
                let status = status?;
                info!(%status, "Server process exited");
                Ok(status)
            }
        }
    }

    /// Ask the child to stop and wait for it within the shutdown grace
    async fn stop(&mut self, child: &mut M::Handle, reason: &LauncherError) -> Option<ProcessStatus> {
        self.transition(SupervisorState::Terminating);
        self.observer.stopping(reason);

        match self.manager.terminate_gracefully(child).await {
            TerminationResult::Success => info!("Asked server process to stop"),
            TerminationResult::ProcessNotFound => debug!("Server process already gone"),
            other => warn!(result = ?other, "Graceful termination failed"),
        }

        let grace = self.config.shutdown_grace;
        let status = match self.manager.wait_for_exit(child, Some(grace)).await {
            Ok(status) => {
                info!(%status, "Server process stopped");
                Some(status)
            }
            Err(e) if self.config.force_kill_after_grace => {
                warn!(error = %e, "Server process outlived {:?}, killing it", grace);
                match self.manager.force_kill(child).await {
                    TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                    other => warn!(result = ?other, "Force kill failed"),
                }
                child.try_wait().await.ok().flatten()
            }
            Err(e) => {
                warn!(error = %e, "Server process did not exit within {:?}", grace);
                None
            }
        };

        self.observer.stopped(status.as_ref());
        status
    }

    fn finish(
        mut self,
        result: Result<ProcessStatus, LauncherError>,
        child_status: Option<ProcessStatus>,
    ) -> SupervisorReport {
        self.transition(SupervisorState::Exited);

        let (exit_code, error) = match result {
            Ok(status) => (status.exit_code().unwrap_or(FAILURE_EXIT_CODE), None),
            Err(err) => (err.exit_code(), Some(err)),
        };

        info!(exit_code, "Supervisor finished");
        SupervisorReport {
            exit_code,
            error,
            child_status,
            transitions: self.transitions,
        }
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!(from = ?self.state(), to = ?next, "Supervisor state changed");
        self.transitions.push(next);
    }
}

fn exited_before_ready(status: ProcessStatus) -> LauncherError {
    warn!(%status, "Server process exited before accepting connections");
    LauncherError::ExitedBeforeReady {
        code: status.exit_code().unwrap_or(FAILURE_EXIT_CODE),
        status: status.to_string(),
    }
}
