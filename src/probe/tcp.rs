//! TCP connect probe.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use super::{resolve_address, ProbeError};

/// Open a TCP connection to `address:port` and return the connect time.
///
/// Name resolution is excluded from the measurement but counts against the
/// timeout.
pub async fn run_tcp_probe(
    address: &str,
    port: u16,
    timeout: Duration,
) -> Result<Duration, ProbeError> {
    let deadline = Instant::now() + timeout;

    let ip = tokio::time::timeout(timeout, resolve_address(address))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))??;

    let remaining = deadline.saturating_duration_since(Instant::now());
    let start = Instant::now();
    let stream = tokio::time::timeout(remaining, TcpStream::connect((ip, port)))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| {
            ProbeError::Network(format!("connect to {}:{} failed: {}", address, port, e))
        })?;
    let elapsed = start.elapsed();
    drop(stream);

    Ok(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let latency = run_tcp_probe("127.0.0.1", port, Duration::from_secs(1)).await;
        tokio_test::assert_ok!(latency);
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_probe_closed_port() {
        // Bind then drop to get a port nobody is listening on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = run_tcp_probe("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tcp_probe_unresolvable_host() {
        let result = run_tcp_probe("host.invalid", 80, Duration::from_millis(500)).await;
        assert!(result.is_err());
    }
}
