use crate::config::ProbeConfig;
use crate::error::ProbeError;
use backon::{ConstantBuilder, Retryable};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info};

/// Poll `127.0.0.1:port` until it accepts a connection or `timeout` elapses.
///
/// Returns `Ok(false)` on timeout. Connection-level failures count as "not
/// ready yet"; only an unusable target or an unrelated IO error is returned
/// as `Err`.
pub async fn wait_for_server(port: u16, timeout: Duration) -> Result<bool, ProbeError> {
    let probe = ReadinessProbe::new(ProbeConfig::new(port).with_timeout(timeout));
    probe
        .wait(|elapsed| info!("Waiting for server... ({}s)", elapsed.as_secs()))
        .await
}

/// TCP connect probe with a fixed retry interval and an overall deadline
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    config: ProbeConfig,
}

impl ReadinessProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Run the probe loop, calling `on_progress` with the elapsed time each
    /// time another `progress_every` period has passed.
    pub async fn wait<F>(&self, mut on_progress: F) -> Result<bool, ProbeError>
    where
        F: FnMut(Duration),
    {
        let addr = self.config.addr();
        if addr.port() == 0 {
            return Err(ProbeError::InvalidTarget(format!("{addr} has no port")));
        }

        let deadline = self.config.timeout();
        let connect_timeout = self.config.connect_timeout();
        let progress_every = self.config.progress_every().as_millis().max(1);

        info!(
            "Polling server readiness at {} (timeout {:?}, {:?} interval)",
            addr,
            deadline,
            self.config.interval()
        );

        let backoff = ConstantBuilder::default()
            .with_delay(self.config.interval())
            .with_max_times(self.config.max_retries());

        let started = Instant::now();
        let mut reported = 0u128;

        let poll = (|| probe_once(addr, connect_timeout))
            .retry(backoff)
            .when(ProbeError::is_retryable)
            .notify(|err: &ProbeError, _| {
                debug!(%addr, error = %err, "Server not ready yet");
                let elapsed = started.elapsed();
                let period = elapsed.as_millis() / progress_every;
                if period > reported {
                    reported = period;
                    on_progress(elapsed);
                }
            });

        match tokio::time::timeout(deadline, poll).await {
            Ok(Ok(())) => {
                info!(%addr, elapsed = ?started.elapsed(), "Server is accepting connections");
                Ok(true)
            }
            // Retries ran out before the deadline did
            Ok(Err(err)) if err.is_retryable() => Ok(false),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                debug!(%addr, "Readiness deadline elapsed");
                Ok(false)
            }
        }
    }
}

/// Open and immediately drop a TCP connection
async fn probe_once(addr: SocketAddr, connect_timeout: Duration) -> Result<(), ProbeError> {
    match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(ProbeError::from_connect(e)),
        Err(_) => Err(ProbeError::ConnectTimeout(connect_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// A port that was free a moment ago
    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn fast_probe(port: u16, timeout: Duration) -> ReadinessProbe {
        ReadinessProbe::new(
            ProbeConfig::new(port)
                .with_timeout(timeout)
                .with_interval(Duration::from_millis(100))
                .with_progress_every(Duration::from_millis(300)),
        )
    }

    #[tokio::test]
    async fn test_times_out_when_nothing_listens() {
        let port = unused_port().await;
        let started = std::time::Instant::now();

        let ready = wait_for_server(port, Duration::from_secs(3)).await.unwrap();

        let elapsed = started.elapsed();
        assert!(!ready);
        assert!(elapsed >= Duration::from_secs(3), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "returned late: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_ready_immediately_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let started = std::time::Instant::now();

        let ready = wait_for_server(port, Duration::from_secs(10)).await.unwrap();

        assert!(ready);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_ready_shortly_after_listener_appears() {
        let port = unused_port().await;
        let probe = fast_probe(port, Duration::from_secs(5));

        let bind_after = Duration::from_millis(400);
        let listener = tokio::spawn(async move {
            tokio::time::sleep(bind_after).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            // Keep the listener open until the probe has connected
            let _ = listener.accept().await;
        });

        let started = std::time::Instant::now();
        let ready = probe.wait(|_| {}).await.unwrap();
        let elapsed = started.elapsed();

        assert!(ready);
        assert!(elapsed >= bind_after);
        assert!(elapsed < bind_after + Duration::from_millis(600), "took {elapsed:?}");
        listener.abort();
    }

    #[tokio::test]
    async fn test_progress_only_on_cadence() {
        let port = unused_port().await;
        let probe = fast_probe(port, Duration::from_millis(1_000));

        let mut notices = Vec::new();
        let ready = probe.wait(|elapsed| notices.push(elapsed)).await.unwrap();

        assert!(!ready);
        assert!(!notices.is_empty());
        assert!(notices.len() <= 3, "too many notices: {notices:?}");
        for (i, elapsed) in notices.iter().enumerate() {
            let floor = Duration::from_millis(300 * (i as u64 + 1));
            assert!(*elapsed >= floor, "notice {i} at {elapsed:?} before {floor:?}");
        }
    }

    #[tokio::test]
    async fn test_zero_port_is_rejected() {
        let result = wait_for_server(0, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProbeError::InvalidTarget(_))));
    }
}
