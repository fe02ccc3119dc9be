//! # MLX launcher
//!
//! Starts `python -m mlx_lm.server` for a model, waits until the server
//! accepts TCP connections and then owns the process until it exits or the
//! operator interrupts it.
//!
//! ```rust,no_run
//! use mlx_launcher::{Launcher, ServerSettings};
//! use mlx_launcher_core::SupervisorConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let settings = ServerSettings::default();
//! let config = SupervisorConfig {
//!     probe: settings.probe_config(),
//!     ..Default::default()
//! };
//!
//! let report = Launcher::new(settings, config)
//!     .run(CancellationToken::new())
//!     .await;
//! std::process::exit(report.exit_code);
//! # }
//! ```

#[cfg(not(unix))]
compile_error!("mlx-launcher only supports Unix platforms");

mod cli;
mod console;
mod dependency;
mod launcher;
mod settings;
mod signals;

pub use cli::Cli;
pub use console::Console;
pub use dependency::MlxDependencyCheck;
pub use launcher::{Launcher, PlatformProcessManager, PlatformProcessManagerFactory};
pub use settings::ServerSettings;
pub use signals::shutdown_on_signal;
