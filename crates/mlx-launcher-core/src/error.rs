use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Exit code for every failure that is not a clean shutdown
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Error taxonomy of a launcher run. Every variant maps to a process exit code.
#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Missing dependency: {what}. {remedy}")]
    MissingDependency { what: String, remedy: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to spawn server process: {0}")]
    SpawnFailed(String),

    #[error("Server did not accept connections on {addr} within {timeout:?}")]
    ProbeTimeout { addr: SocketAddr, timeout: Duration },

    #[error("Server exited before it became ready ({status})")]
    ExitedBeforeReady { status: String, code: i32 },

    #[error("Interrupted by operator")]
    Interrupted,

    #[error("Readiness probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("Unexpected error: {0:#}")]
    Unexpected(#[from] anyhow::Error),
}

impl LauncherError {
    /// Exit code the launcher process reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            LauncherError::Interrupted => 0,
            LauncherError::ExitedBeforeReady { code, .. } if *code != 0 => *code,
            _ => FAILURE_EXIT_CODE,
        }
    }

    /// Whether a child was possibly running when this error occurred
    pub fn needs_cleanup(&self) -> bool {
        !matches!(
            self,
            LauncherError::MissingDependency { .. }
                | LauncherError::Configuration(_)
                | LauncherError::SpawnFailed(_)
                | LauncherError::ExitedBeforeReady { .. }
        )
    }
}

/// Errors from a single readiness probe attempt
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Server not accepting connections yet: {0}")]
    NotReady(#[source] io::Error),

    #[error("Connect attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Invalid probe target: {0}")]
    InvalidTarget(String),

    #[error("Probe IO error: {0}")]
    Io(#[source] io::Error),
}

impl ProbeError {
    /// Classify an error returned by a TCP connect attempt.
    ///
    /// Only failures that mean "nothing is listening yet" are treated as
    /// not-ready; everything else surfaces to the caller.
    pub fn from_connect(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            // EINTR cut the attempt short before the server answered either way
            | io::ErrorKind::Interrupted => ProbeError::NotReady(err),
            _ => ProbeError::Io(err),
        }
    }

    /// Check if the probe should try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::NotReady(_) | ProbeError::ConnectTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let missing = LauncherError::MissingDependency {
            what: "mlx-lm".to_string(),
            remedy: "pip install mlx-lm".to_string(),
        };
        assert_eq!(missing.exit_code(), 1);
        assert_eq!(LauncherError::SpawnFailed("nope".into()).exit_code(), 1);
        assert_eq!(LauncherError::Interrupted.exit_code(), 0);

        let timeout = LauncherError::ProbeTimeout {
            addr: "127.0.0.1:8080".parse().unwrap(),
            timeout: Duration::from_secs(120),
        };
        assert_eq!(timeout.exit_code(), 1);
    }

    #[test]
    fn test_early_exit_keeps_child_code() {
        let err = LauncherError::ExitedBeforeReady {
            status: "exit status: 3".to_string(),
            code: 3,
        };
        assert_eq!(err.exit_code(), 3);

        // A child that quits cleanly before binding is still a failed launch
        let err = LauncherError::ExitedBeforeReady {
            status: "exit status: 0".to_string(),
            code: 0,
        };
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_cleanup_classification() {
        assert!(!LauncherError::SpawnFailed("x".into()).needs_cleanup());
        assert!(!LauncherError::Configuration("x".into()).needs_cleanup());
        let early = LauncherError::ExitedBeforeReady {
            status: "exit status: 1".into(),
            code: 1,
        };
        assert!(!early.needs_cleanup());
        assert!(LauncherError::Interrupted.needs_cleanup());
        assert!(LauncherError::Unexpected(anyhow::anyhow!("boom")).needs_cleanup());
    }

    #[test]
    fn test_probe_error_categorization() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(ProbeError::from_connect(refused).is_retryable());

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(ProbeError::from_connect(reset).is_retryable());

        assert!(ProbeError::ConnectTimeout(Duration::from_secs(1)).is_retryable());

        // A signal landing mid-connect says nothing about the server
        let interrupted = io::Error::from(io::ErrorKind::Interrupted);
        assert!(ProbeError::from_connect(interrupted).is_retryable());

        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(!ProbeError::from_connect(denied).is_retryable());
        assert!(!ProbeError::InvalidTarget("port 0".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let error = LauncherError::SpawnFailed("python3".to_string());
        assert!(format!("{error}").contains("Failed to spawn server process"));

        let error = LauncherError::Unexpected(anyhow::anyhow!("inner").context("outer"));
        let display = format!("{error}");
        assert!(display.contains("outer"));
        assert!(display.contains("inner"));
    }
}
