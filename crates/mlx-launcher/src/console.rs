use crate::settings::ServerSettings;
use mlx_launcher_core::{LauncherError, LifecycleObserver, ProcessId, ProcessStatus, ServerCommand};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

const RULE: &str = "============================================================";

/// Operator-facing status lines. Diagnostics go through `tracing` instead.
pub struct Console<W: Write + Send = io::Stdout> {
    out: Mutex<W>,
    base_url: String,
}

impl Console<io::Stdout> {
    pub fn stdout(settings: &ServerSettings) -> Self {
        Self::new(io::stdout(), settings)
    }
}

impl<W: Write + Send> Console<W> {
    pub fn new(out: W, settings: &ServerSettings) -> Self {
        Self {
            out: Mutex::new(out),
            base_url: settings.base_url(),
        }
    }

    /// Header printed before anything is checked or spawned
    pub fn banner(&self, settings: &ServerSettings) {
        self.lines(&[
            RULE.to_string(),
            "MLX model server".to_string(),
            RULE.to_string(),
            format!("Model:       {}", settings.model),
            format!("Address:     {}:{}", settings.host, settings.port),
            format!("Max tokens:  {}", settings.max_tokens),
            format!("Temperature: {}", settings.temperature),
            String::new(),
        ]);
    }

    /// Explain a run that ended without a child to stop
    pub fn failure(&self, err: &LauncherError) {
        match err {
            LauncherError::MissingDependency { what, remedy } => {
                self.lines(&[format!("Error: {what}"), remedy.clone()]);
            }
            LauncherError::ExitedBeforeReady { status, .. } => {
                self.lines(&[
                    format!("Server exited before it was ready ({status})"),
                    "Check the server output above for details".to_string(),
                ]);
            }
            // Reported through `stopping` while the child was being stopped
            LauncherError::Interrupted | LauncherError::ProbeTimeout { .. } => {}
            other => self.lines(&[format!("Error: {other}")]),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lines(&self, lines: &[String]) {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        for line in lines {
            // Status output is best effort; a closed stdout must not stop the server
            let _ = writeln!(out, "{line}");
        }
        let _ = out.flush();
    }
}

impl<W: Write + Send> LifecycleObserver for Console<W> {
    fn spawned(&self, pid: Option<ProcessId>, command: &ServerCommand) {
        let pid = pid.map(|p| format!(" (pid {p})")).unwrap_or_default();
        self.lines(&[
            format!("Command: {}", command.display_line()),
            format!("Loading model and starting server{pid}..."),
            "The first run downloads the model, this can take a while".to_string(),
        ]);
    }

    fn waiting(&self, elapsed: Duration) {
        self.lines(&[format!("Waiting for server... ({}s)", elapsed.as_secs())]);
    }

    fn ready(&self, addr: SocketAddr) {
        self.lines(&[
            String::new(),
            RULE.to_string(),
            format!("Server ready on {addr}"),
            RULE.to_string(),
            format!("URL:          {}", self.base_url),
            format!("Chat API:     {}/v1/chat/completions", self.base_url),
            format!("Models API:   {}/v1/models", self.base_url),
            format!("Backend connects at: {}/v1", self.base_url),
            String::new(),
            "Press Ctrl+C to stop the server".to_string(),
            String::new(),
        ]);
    }

    fn stopping(&self, reason: &LauncherError) {
        let line = match reason {
            LauncherError::Interrupted => "Stopping server...".to_string(),
            LauncherError::ProbeTimeout { timeout, .. } => {
                format!("Server failed to start within {}s, stopping it", timeout.as_secs())
            }
            other => format!("Error: {other}. Stopping server..."),
        };
        self.lines(&[String::new(), line]);
    }

    fn stopped(&self, status: Option<&ProcessStatus>) {
        let line = match status {
            Some(_) => "Server stopped".to_string(),
            None => "Server did not stop in time and may still be running".to_string(),
        };
        self.lines(&[line]);
    }

    fn exited(&self, status: &ProcessStatus) {
        self.lines(&[format!("Server exited ({status})")]);
    }
}
