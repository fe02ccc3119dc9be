//! Unix process management for the MLX launcher

mod unix_process_manager;

#[cfg(unix)]
pub use unix_process_manager::{UnixProcessHandle, UnixProcessManager};

/// Unix process manager factory
#[cfg(unix)]
pub struct UnixProcessManagerFactory;

#[cfg(unix)]
impl mlx_launcher_core::ProcessManagerFactory for UnixProcessManagerFactory {
    type Manager = UnixProcessManager;

    fn create_process_manager() -> UnixProcessManager {
        UnixProcessManager::new()
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
