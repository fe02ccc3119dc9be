use crate::error::LauncherError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Check run before anything is spawned. A failure aborts the launch.
#[async_trait]
pub trait Preflight: Send + Sync {
    async fn check(&self) -> Result<(), LauncherError>;
}

/// Dependency probe that runs a short command and requires it to succeed
#[derive(Debug, Clone)]
pub struct CommandPreflight {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Human-readable name of what is being checked
    pub what: String,
    /// How the operator can fix a failed check
    pub remedy: String,
}

impl CommandPreflight {
    pub fn new(program: impl Into<PathBuf>, what: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            what: what.into(),
            remedy: String::new(),
        }
    }

    pub fn args<S: ToString, I: IntoIterator<Item = S>>(mut self, iter: I) -> Self {
        self.args = iter.into_iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn remedy(mut self, remedy: impl Into<String>) -> Self {
        self.remedy = remedy.into();
        self
    }

    fn missing(&self, detail: impl std::fmt::Display) -> LauncherError {
        LauncherError::MissingDependency {
            what: format!("{} ({detail})", self.what),
            remedy: self.remedy.clone(),
        }
    }
}

#[async_trait]
impl Preflight for CommandPreflight {
    async fn check(&self) -> Result<(), LauncherError> {
        debug!(program = %self.program.display(), args = ?self.args, "Running dependency check");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // A terminal Ctrl-C must not fail the check; the launcher handles it
        #[cfg(unix)]
        cmd.process_group(0);

        let status = cmd.status().await.map_err(|e| self.missing(e))?;

        if status.success() {
            info!("Dependency check passed: {}", self.what);
            Ok(())
        } else {
            Err(self.missing(status))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_succeeding_command_passes() {
        let check = CommandPreflight::new("true", "always present");
        assert!(check.check().await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_command_is_missing_dependency() {
        let check = CommandPreflight::new("sh", "python module `nothing_here`")
            .args(["-c", "exit 1"])
            .remedy("Install it with: pip install nothing_here");

        let err = check.check().await.unwrap_err();
        assert!(matches!(err, LauncherError::MissingDependency { .. }));
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("pip install nothing_here"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_check_runs_in_its_own_process_group() {
        // Field 5 of /proc/<pid>/stat is the process group id
        let check = CommandPreflight::new("sh", "own process group")
            .args(["-c", r#"set -- $(cat /proc/$$/stat); [ "$5" = "$$" ]"#]);
        assert!(check.check().await.is_ok());
    }

    #[tokio::test]
    async fn test_unlaunchable_program_is_missing_dependency() {
        let check = CommandPreflight::new("/nonexistent/python3", "python interpreter");
        let err = check.check().await.unwrap_err();
        assert!(matches!(err, LauncherError::MissingDependency { .. }));
    }
}
