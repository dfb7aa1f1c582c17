//! Probe module for target reachability.
//!
//! Targets with a port get a TCP connect probe, targets without one get an
//! ICMP echo. Probes run in sequential batches so no more than
//! `concurrency` are ever in flight.

mod ping;
mod tcp;

pub use ping::*;
pub use tcp::*;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tokio::task::AbortHandle;

use crate::model::{ProbeResult, Target};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Resolve a hostname or literal IP to the first address found.
pub(crate) async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host((address, 0))
        .await
        .map_err(|e| {
            ProbeError::Network(format!("DNS resolution failed for {}: {}", address, e))
        })?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("no addresses found for {}", address)))
}

/// Low-level network operations a prober needs.
#[async_trait]
pub trait ProbeTransport: Send + Sync + 'static {
    async fn tcp_connect(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Duration, ProbeError>;
    async fn icmp_echo(&self, address: &str, timeout: Duration) -> Result<Duration, ProbeError>;
}

/// Transport backed by real sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkTransport;

#[async_trait]
impl ProbeTransport for NetworkTransport {
    async fn tcp_connect(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Duration, ProbeError> {
        run_tcp_probe(address, port, timeout).await
    }

    async fn icmp_echo(&self, address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
        run_ping_probe(address, timeout).await
    }
}

/// Probe timeouts and batch width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub tcp_timeout: Duration,
    pub icmp_timeout: Duration,
    pub concurrency: usize,
}

impl ProbeSettings {
    /// Longest a full `probe` call over `target_count` targets can take.
    pub fn worst_case(&self, target_count: usize) -> Duration {
        let batches = target_count.div_ceil(self.concurrency.max(1));
        let per_batch = self.tcp_timeout.max(self.icmp_timeout) + TIMEOUT_SLACK;
        per_batch * u32::try_from(batches).unwrap_or(u32::MAX)
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            tcp_timeout: Duration::from_millis(1000),
            icmp_timeout: Duration::from_millis(800),
            concurrency: 2,
        }
    }
}

/// Extra time allowed on top of a probe's own timeout before it is abandoned.
const TIMEOUT_SLACK: Duration = Duration::from_millis(250);

/// Aborts the spawned probes of a batch if the batch is dropped before it
/// finishes, so an abandoned cycle leaves nothing running.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Runs reachability checks against a list of targets.
#[derive(Clone)]
pub struct Prober {
    transport: Arc<dyn ProbeTransport>,
}

impl Prober {
    pub fn new(transport: Arc<dyn ProbeTransport>) -> Self {
        Self { transport }
    }

    /// Probe every target and return one result per target, in input order.
    ///
    /// Batches of `settings.concurrency` run one after another; the probes
    /// inside a batch run concurrently. Failures of any kind become offline
    /// results.
    pub async fn probe(&self, targets: &[Target], settings: &ProbeSettings) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(targets.len());

        for batch in targets.chunks(settings.concurrency.max(1)) {
            let handles: Vec<_> = batch
                .iter()
                .cloned()
                .map(|target| {
                    let transport = self.transport.clone();
                    let settings = *settings;
                    tokio::spawn(async move {
                        probe_one(transport.as_ref(), &target, &settings).await
                    })
                })
                .collect();
            let _abort = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());

            for (target, joined) in batch.iter().zip(join_all(handles).await) {
                let result = joined.unwrap_or_else(|e| {
                    tracing::error!("Probe task for {} failed: {}", target.name, e);
                    ProbeResult::offline(target)
                });
                results.push(result);
            }
        }

        results
    }
}

async fn probe_one(
    transport: &dyn ProbeTransport,
    target: &Target,
    settings: &ProbeSettings,
) -> ProbeResult {
    let (timeout, attempt) = match target.port {
        Some(port) => (
            settings.tcp_timeout,
            transport.tcp_connect(&target.address, port, settings.tcp_timeout),
        ),
        None => (
            settings.icmp_timeout,
            transport.icmp_echo(&target.address, settings.icmp_timeout),
        ),
    };

    // The transport honours its own timeout; this outer bound catches anything
    // that does not, such as a hung ping command.
    let outcome = match tokio::time::timeout(timeout + TIMEOUT_SLACK, attempt).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };

    match outcome {
        Ok(latency) => ProbeResult::online(target, latency.as_millis() as i64),
        Err(e) => {
            tracing::debug!("Target {} ({}) offline: {}", target.name, target.address, e);
            ProbeResult::offline(target)
        }
    }
}
