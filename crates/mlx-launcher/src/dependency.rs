use crate::settings::ServerSettings;
use async_trait::async_trait;
use mlx_launcher_core::{CommandPreflight, LauncherError, Preflight};
use tracing::debug;

/// Verifies the interpreter exists and can import the server package
#[derive(Debug, Clone)]
pub struct MlxDependencyCheck {
    interpreter: String,
    import_name: String,
    package_name: String,
}

impl MlxDependencyCheck {
    pub fn new(settings: &ServerSettings) -> Self {
        Self {
            interpreter: settings.interpreter.clone(),
            import_name: settings.import_name().to_string(),
            package_name: settings.package_name(),
        }
    }

    fn remedy(&self) -> String {
        format!("Install it with: pip install {}", self.package_name)
    }
}

#[async_trait]
impl Preflight for MlxDependencyCheck {
    async fn check(&self) -> Result<(), LauncherError> {
        let interpreter =
            which::which(&self.interpreter).map_err(|e| LauncherError::MissingDependency {
                what: format!("Python interpreter `{}` ({e})", self.interpreter),
                remedy: "Install Python 3 or select one with --interpreter / MLX_PYTHON".to_string(),
            })?;
        debug!(interpreter = %interpreter.display(), "Resolved Python interpreter");

        CommandPreflight::new(interpreter, format!("{} is not installed", self.package_name))
            .args(["-c".to_string(), format!("import {}", self.import_name)])
            .remedy(self.remedy())
            .check()
            .await
    }
}
