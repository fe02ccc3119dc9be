use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Loopback address the server is bound to and probed on
pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// What happens to the child's combined stdout/stderr
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChildOutput {
    /// Copy the child's output to the launcher's stderr as it arrives
    #[default]
    Forward,
    /// Drain the pipes and drop the bytes
    Discard,
}

/// Command line and environment of the server process
#[derive(Default, Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct ServerCommand {
    pub name: String,
    pub command: String,
    #[builder(default)]
    #[builder(setter(custom))]
    pub args: Vec<String>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    #[builder(default)]
    pub working_directory: Option<PathBuf>,
    #[builder(default)]
    pub output: ChildOutput,
}

impl ServerCommand {
    pub fn builder() -> ServerCommandBuilder {
        ServerCommandBuilder::default()
    }

    /// The full command line joined with spaces, for display
    pub fn display_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl ServerCommandBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }
}

/// Configuration of the TCP readiness probe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    /// Address to connect to
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to connect to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Give up once this much time has passed without a successful connect (in milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Fixed pause between attempts (in milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound on a single connect attempt (in milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Cadence of "still waiting" notices (in milliseconds)
    #[serde(default = "default_progress_every_ms")]
    pub progress_every_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
            interval_ms: default_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            progress_every_ms: default_progress_every_ms(),
        }
    }
}

impl ProbeConfig {
    /// Probe `127.0.0.1:port` with the default cadence
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = duration_ms(interval);
        self
    }

    pub fn with_progress_every(mut self, every: Duration) -> Self {
        self.progress_every_ms = duration_ms(every);
        self
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            return Err(anyhow::anyhow!("port must be non-zero"));
        }

        if self.interval_ms == 0 {
            return Err(anyhow::anyhow!("interval_ms must be greater than zero"));
        }

        if self.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!(
                "connect_timeout_ms must be greater than zero"
            ));
        }

        if self.progress_every_ms == 0 {
            return Err(anyhow::anyhow!(
                "progress_every_ms must be greater than zero"
            ));
        }

        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn progress_every(&self) -> Duration {
        Duration::from_millis(self.progress_every_ms)
    }

    /// Upper bound on the number of retries that can fit into the timeout
    pub fn max_retries(&self) -> usize {
        let interval = self.interval_ms.max(1);
        self.timeout_ms.div_ceil(interval) as usize + 1
    }
}

/// Timing of the supervised lifecycle around the probe
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Pause between spawning the child and the first probe
    pub startup_grace: Duration,
    pub probe: ProbeConfig,
    /// How long to wait for the child after asking it to stop
    pub shutdown_grace: Duration,
    /// Send SIGKILL when the child outlives the shutdown grace
    pub force_kill_after_grace: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(5),
            probe: ProbeConfig::default(),
            shutdown_grace: Duration::from_secs(5),
            force_kill_after_grace: false,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// Default value functions for serde
fn default_host() -> IpAddr {
    LOOPBACK
}
fn default_port() -> u16 {
    8080
}
fn default_timeout_ms() -> u64 {
    120_000
}
fn default_interval_ms() -> u64 {
    1_000
}
fn default_connect_timeout_ms() -> u64 {
    1_000
}
fn default_progress_every_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_probe_config() {
        let config = ProbeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.addr(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.timeout(), Duration::from_secs(120));
        assert_eq!(config.interval(), Duration::from_secs(1));
        assert_eq!(config.progress_every(), Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_probe_config() {
        let mut config = ProbeConfig::new(0);
        assert!(config.validate().is_err());

        config.port = 9999;
        config.interval_ms = 0;
        assert!(config.validate().is_err());

        config.interval_ms = 1_000;
        config.progress_every_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_retries_covers_timeout() {
        let config = ProbeConfig::new(9999).with_timeout(Duration::from_secs(3));
        assert_eq!(config.max_retries(), 4);

        let config = ProbeConfig::new(9999)
            .with_timeout(Duration::from_millis(250))
            .with_interval(Duration::from_millis(100));
        assert_eq!(config.max_retries(), 4);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ProbeConfig = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, LOOPBACK);
        assert_eq!(config.timeout_ms, 120_000);

        let config: ProbeConfig =
            serde_json::from_str(r#"{"host": "::1", "timeoutMs": 500}"#).unwrap();
        assert_eq!(config.host, "::1".parse::<IpAddr>().unwrap());
        assert_eq!(config.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_server_command_builder() {
        let command = ServerCommand::builder()
            .name("mlx")
            .command("python3")
            .args(["-m", "mlx_lm.server"])
            .env("PYTHONUNBUFFERED", "1")
            .build()
            .unwrap();

        assert_eq!(command.args, vec!["-m", "mlx_lm.server"]);
        assert_eq!(command.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
        assert_eq!(command.output, ChildOutput::Forward);
        assert!(command.working_directory.is_none());
        assert_eq!(command.display_line(), "python3 -m mlx_lm.server");
    }

    #[test]
    fn test_server_command_requires_command() {
        let result = ServerCommand::builder().name("incomplete").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_supervisor_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.startup_grace, Duration::from_secs(5));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert!(!config.force_kill_after_grace);
    }
}
