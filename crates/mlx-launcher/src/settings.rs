use anyhow::{Context, Result};
use mlx_launcher_core::{ChildOutput, LOOPBACK, ProbeConfig, ServerCommand};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

/// What to launch: the MLX server module, its model and generation limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    /// Python interpreter used to run the server module
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Module started with `python -m`
    #[serde(default = "default_server_module")]
    pub server_module: String,

    /// Hugging Face model identifier
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Appended verbatim after the generated arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            server_module: default_server_module(),
            model: default_model(),
            host: default_host(),
            port: default_port(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            extra_args: Vec::new(),
        }
    }
}

impl ServerSettings {
    /// Load settings from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            anyhow::bail!("model must not be empty");
        }
        if self.server_module.trim().is_empty() {
            anyhow::bail!("server module must not be empty");
        }
        if self.port == 0 {
            anyhow::bail!("port must be non-zero");
        }
        if self.max_tokens == 0 {
            anyhow::bail!("max tokens must be greater than zero");
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            anyhow::bail!("temperature must be a non-negative number");
        }
        Ok(())
    }

    /// Arguments passed to the interpreter
    pub fn server_args(&self) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            self.server_module.clone(),
            "--model".to_string(),
            self.model.clone(),
            "--host".to_string(),
            self.host.to_string(),
            "--port".to_string(),
            self.port.to_string(),
            "--max-tokens".to_string(),
            self.max_tokens.to_string(),
            "--temperature".to_string(),
            self.temperature.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub fn to_command(&self, output: ChildOutput) -> Result<ServerCommand> {
        ServerCommand::builder()
            .name(self.model.clone())
            .command(self.interpreter.clone())
            .args(self.server_args())
            // Python buffers stdout when it is a pipe; forwarded logs should be live
            .env("PYTHONUNBUFFERED", "1")
            .output(output)
            .build()
            .context("Failed to build server command")
    }

    /// Where readiness is probed. A wildcard bind is probed over loopback.
    pub fn probe_config(&self) -> ProbeConfig {
        let host = if self.host.is_unspecified() {
            LOOPBACK
        } else {
            self.host
        };
        ProbeConfig {
            host,
            ..ProbeConfig::new(self.port)
        }
    }

    /// Top-level package of the server module, e.g. `mlx_lm`
    pub fn import_name(&self) -> &str {
        self.server_module
            .split('.')
            .next()
            .unwrap_or(&self.server_module)
    }

    /// pip distribution name of the server package, e.g. `mlx-lm`
    pub fn package_name(&self) -> String {
        self.import_name().replace('_', "-")
    }

    /// Base URL clients use to reach the server
    pub fn base_url(&self) -> String {
        let host = if self.host.is_loopback() || self.host.is_unspecified() {
            "localhost".to_string()
        } else {
            match self.host {
                IpAddr::V6(v6) => format!("[{v6}]"),
                IpAddr::V4(v4) => v4.to_string(),
            }
        };
        format!("http://{host}:{}", self.port)
    }
}

// Default value functions for serde
fn default_interpreter() -> String {
    "python3".to_string()
}
fn default_server_module() -> String {
    "mlx_lm.server".to_string()
}
fn default_model() -> String {
    "mlx-community/Qwen2.5-7B-Instruct-4bit".to_string()
}
fn default_host() -> IpAddr {
    LOOPBACK
}
fn default_port() -> u16 {
    8080
}
fn default_max_tokens() -> u32 {
    800
}
fn default_temperature() -> f64 {
    0.6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_line() {
        let settings = ServerSettings::default();
        assert!(settings.validate().is_ok());

        let command = settings.to_command(ChildOutput::Forward).unwrap();
        assert_eq!(
            command.display_line(),
            "python3 -m mlx_lm.server --model mlx-community/Qwen2.5-7B-Instruct-4bit \
             --host 127.0.0.1 --port 8080 --max-tokens 800 --temperature 0.6"
        );
        assert_eq!(command.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_extra_args_are_appended() {
        let settings = ServerSettings {
            extra_args: vec!["--trust-remote-code".to_string()],
            ..Default::default()
        };
        assert_eq!(
            settings.server_args().last().map(String::as_str),
            Some("--trust-remote-code")
        );
    }

    #[test]
    fn test_probe_targets_bind_address() {
        let settings = ServerSettings::default();
        assert_eq!(settings.probe_config().addr(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(settings.probe_config().timeout_ms, 120_000);

        let settings = ServerSettings {
            host: "0.0.0.0".parse().unwrap(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(settings.probe_config().addr(), "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn test_package_names() {
        let settings = ServerSettings::default();
        assert_eq!(settings.import_name(), "mlx_lm");
        assert_eq!(settings.package_name(), "mlx-lm");
    }

    #[test]
    fn test_base_url() {
        assert_eq!(ServerSettings::default().base_url(), "http://localhost:8080");

        let settings = ServerSettings {
            host: "192.168.1.20".parse().unwrap(),
            ..Default::default()
        };
        assert_eq!(settings.base_url(), "http://192.168.1.20:8080");
    }

    #[test]
    fn test_invalid_settings() {
        let settings = ServerSettings {
            temperature: -1.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = ServerSettings {
            model: "  ".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_json_file_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"model": "mlx-community/Llama-3.2-3B-Instruct-4bit", "maxTokens": 2048}"#,
        )
        .unwrap();

        let settings = ServerSettings::from_json_file(file.path()).unwrap();
        assert_eq!(settings.model, "mlx-community/Llama-3.2-3B-Instruct-4bit");
        assert_eq!(settings.max_tokens, 2048);
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.interpreter, "python3");
    }

    #[test]
    fn test_missing_json_file_names_path() {
        let err = ServerSettings::from_json_file("/nonexistent/mlx.json").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/mlx.json"));
    }
}
