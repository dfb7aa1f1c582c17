//! server-status - infrastructure health monitor.

use server_status::cache::SnapshotCache;
use server_status::config::{MonitorConfig, ServerConfig};
use server_status::metrics::HostCollector;
use server_status::probe::{NetworkTransport, Prober};
use server_status::scheduler::Scheduler;
use server_status::web::Server;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("server_status=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    let monitor = MonitorConfig::load_or_default(&cfg.config_path)?.with_server_overrides(&cfg);
    tracing::info!(
        "Loaded {} targets from {}",
        monitor.targets.len(),
        cfg.config_path.display()
    );

    let cache = Arc::new(SnapshotCache::new());
    let scheduler = Arc::new(Scheduler::new(
        monitor.targets,
        Arc::new(HostCollector::new()),
        Prober::new(Arc::new(NetworkTransport)),
        cache,
        monitor.settings,
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => tracing::warn!("Cannot listen for shutdown signal: {}", e),
            }
        }
    });

    // Start scheduler
    let scheduler_task = tokio::spawn({
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });

    // Start web server
    let server = Server::new(cfg, scheduler);
    let served = server.start(shutdown.clone()).await;
    shutdown.cancel();

    if let Err(e) = scheduler_task.await {
        tracing::error!("Scheduler task failed: {}", e);
    }

    served
}
