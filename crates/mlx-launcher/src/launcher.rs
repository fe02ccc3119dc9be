use crate::dependency::MlxDependencyCheck;
use crate::settings::ServerSettings;
use mlx_launcher_core::{
    ChildOutput, LauncherError, LifecycleObserver, ProcessManagerFactory, SilentObserver,
    Supervisor, SupervisorConfig, SupervisorReport, SupervisorState,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Process manager factory for the platform the launcher was built for
pub struct PlatformProcessManagerFactory;

#[cfg(unix)]
impl ProcessManagerFactory for PlatformProcessManagerFactory {
    type Manager = mlx_launcher_unix::UnixProcessManager;

    fn create_process_manager() -> Self::Manager {
        mlx_launcher_unix::UnixProcessManagerFactory::create_process_manager()
    }

    fn platform_name() -> &'static str {
        mlx_launcher_unix::UnixProcessManagerFactory::platform_name()
    }
}

pub type PlatformProcessManager = <PlatformProcessManagerFactory as ProcessManagerFactory>::Manager;

/// Runs one MLX server from settings: dependency check, spawn, probe, supervise
pub struct Launcher {
    settings: ServerSettings,
    config: SupervisorConfig,
    output: ChildOutput,
    observer: Arc<dyn LifecycleObserver>,
}

impl Launcher {
    pub fn new(settings: ServerSettings, config: SupervisorConfig) -> Self {
        Self {
            settings,
            config,
            output: ChildOutput::default(),
            observer: Arc::new(SilentObserver),
        }
    }

    pub fn with_output(mut self, output: ChildOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn supervisor(&self) -> Result<Supervisor<PlatformProcessManager>, LauncherError> {
        let command = self
            .settings
            .to_command(self.output)
            .map_err(|e| LauncherError::Configuration(format!("{e:#}")))?;

        Ok(Supervisor::new(
            PlatformProcessManagerFactory::create_process_manager(),
            command,
            self.config.clone(),
        )
        .with_preflight(MlxDependencyCheck::new(&self.settings))
        .with_observer(self.observer.clone()))
    }

    pub async fn run(self, shutdown: CancellationToken) -> SupervisorReport {
        info!(
            platform = PlatformProcessManagerFactory::platform_name(),
            model = %self.settings.model,
            "Launching MLX server"
        );

        match self.supervisor() {
            Ok(supervisor) => supervisor.run(shutdown).await,
            Err(err) => SupervisorReport {
                exit_code: err.exit_code(),
                error: Some(err),
                child_status: None,
                transitions: vec![
                    SupervisorState::NotStarted,
                    SupervisorState::Failed,
                    SupervisorState::Exited,
                ],
            },
        }
    }
}
