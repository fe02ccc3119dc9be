use crate::settings::ServerSettings;
use anyhow::Result;
use clap::Parser;
use mlx_launcher_core::{ChildOutput, SupervisorConfig};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Start an MLX model server and wait until it accepts connections
#[derive(Debug, Parser)]
#[command(name = "mlx-launcher", version)]
pub struct Cli {
    /// JSON file with server settings; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Model to serve
    #[arg(long, env = "MLX_MODEL")]
    pub model: Option<String>,

    /// Address the server binds to
    #[arg(long, env = "MLX_HOST")]
    pub host: Option<IpAddr>,

    /// Port the server listens on
    #[arg(long, env = "MLX_PORT")]
    pub port: Option<u16>,

    /// Maximum tokens per completion
    #[arg(long, env = "MLX_MAX_TOKENS")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(long, env = "MLX_TEMPERATURE")]
    pub temperature: Option<f64>,

    /// Python interpreter that runs the server
    #[arg(long, env = "MLX_PYTHON")]
    pub interpreter: Option<String>,

    /// Seconds to wait for the server to accept connections
    #[arg(long, env = "MLX_READY_TIMEOUT_SECS", default_value_t = 120)]
    pub ready_timeout_secs: u64,

    /// Seconds to wait after spawning before the first readiness probe
    #[arg(long, default_value_t = 5)]
    pub startup_grace_secs: u64,

    /// Seconds to wait for the server to exit after asking it to stop
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace_secs: u64,

    /// Send SIGKILL if the server is still running after the shutdown grace
    #[arg(long)]
    pub force_kill: bool,

    /// Drop the server's own output instead of forwarding it
    #[arg(long)]
    pub quiet_server: bool,

    /// Emit launcher logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Extra arguments passed to the server after `--`
    #[arg(last = true, value_name = "SERVER_ARGS")]
    pub server_args: Vec<String>,
}

impl Cli {
    /// Settings from the config file (or defaults) with flags applied on top
    pub fn settings(&self) -> Result<ServerSettings> {
        let mut settings = match &self.config {
            Some(path) => ServerSettings::from_json_file(path)?,
            None => ServerSettings::default(),
        };

        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        if let Some(host) = self.host {
            settings.host = host;
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(max_tokens) = self.max_tokens {
            settings.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            settings.temperature = temperature;
        }
        if let Some(interpreter) = &self.interpreter {
            settings.interpreter = interpreter.clone();
        }
        settings.extra_args.extend(self.server_args.iter().cloned());

        settings.validate()?;
        Ok(settings)
    }

    pub fn supervisor_config(&self, settings: &ServerSettings) -> SupervisorConfig {
        SupervisorConfig {
            startup_grace: Duration::from_secs(self.startup_grace_secs),
            probe: settings
                .probe_config()
                .with_timeout(Duration::from_secs(self.ready_timeout_secs)),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            force_kill_after_grace: self.force_kill,
        }
    }

    pub fn child_output(&self) -> ChildOutput {
        if self.quiet_server {
            ChildOutput::Discard
        } else {
            ChildOutput::Forward
        }
    }
}
