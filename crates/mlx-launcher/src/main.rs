use clap::Parser;
use mlx_launcher::{Cli, Console, Launcher, shutdown_on_signal};
use mlx_launcher_core::LauncherError;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Launcher logs go to stderr; stdout carries the operator-facing status lines
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(cli: Cli) -> i32 {
    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => {
            let err = LauncherError::Configuration(format!("{e:#}"));
            eprintln!("{err}");
            return err.exit_code();
        }
    };

    let console = Arc::new(Console::stdout(&settings));
    console.banner(&settings);

    let shutdown = shutdown_on_signal();
    let report = Launcher::new(settings.clone(), cli.supervisor_config(&settings))
        .with_output(cli.child_output())
        .with_observer(console.clone())
        .run(shutdown)
        .await;

    if let Some(err) = &report.error {
        console.failure(err);
    }
    tracing::debug!(transitions = ?report.transitions, "Launcher finished");
    report.exit_code
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let code = run(cli).await;
    std::process::exit(code);
}
