//! Kube Cluster Binpacking Exporter
//!
//! Watches nodes and pods, and on every scrape reports how much of each
//! node's and the cluster's allocatable capacity is requested by pods.

use anyhow::{anyhow, Context, Result};
use binpacking_exporter::{
    api,
    config::{ExporterConfig, Settings},
};
use binpacking_lib::{
    cache::{self, KubeCaches},
    collector::BinpackingCollector,
    duration::format_duration,
    leader::{detect_identity, ElectionOutcome, KubeLeaseBackend, LeaderElector},
    observability::{ExporterMetrics, StructuredLogger},
};
use prometheus::Registry;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let loaded = ExporterConfig::load();
    init_tracing(loaded.as_ref().map(|c| c.debug).unwrap_or(false));

    let settings = match loaded.and_then(|config| config.resolve()) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(settings).await {
        error!(error = %format!("{:#}", e), "Exporter failed");
        std::process::exit(1);
    }
}

/// JSON logs filtered by `RUST_LOG`, defaulting to `info` or `debug`
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with(fmt::layer().json())
        .init();
}

async fn run(settings: Settings) -> Result<()> {
    let identity = match &settings.leader_election {
        Some(leader) => leader.identity.clone(),
        None => detect_identity(None).unwrap_or_else(|_| "unknown".to_string()),
    };
    let logger = StructuredLogger::new(identity);
    logger.log_startup(EXPORTER_VERSION, &settings.resources);
    info!(
        metrics_addr = %settings.metrics_addr,
        metrics_path = %settings.metrics_path,
        resync_period = %format_duration(settings.resync_period),
        leader_election = settings.leader_election.is_some(),
        "Exporter configured"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let client = cache::connect(settings.kubeconfig.clone()).await?;
    let caches = KubeCaches::start(
        client.clone(),
        settings.resync_period,
        logger.clone(),
        &shutdown_tx,
    );

    let registry = Registry::new();
    let metrics = ExporterMetrics::register(&registry).context("Failed to register metrics")?;
    let collector = BinpackingCollector::new(
        Arc::new(caches.nodes()),
        Arc::new(caches.pods()),
        settings.resources.clone(),
    )
    .context("Failed to build binpacking collector")?
    .with_sync_info(caches.sync_info())
    .with_metrics(metrics.clone());
    registry
        .register(Box::new(collector))
        .context("Failed to register binpacking collector")?;

    let mut leader = None;
    let mut election = None;
    if let Some(config) = &settings.leader_election {
        let backend = Arc::new(KubeLeaseBackend::new(
            client.clone(),
            &config.lease_namespace,
            &config.lease_name,
        ));
        let elector = LeaderElector::new(config.clone(), backend, logger.clone());
        leader = Some(elector.status());
        election = Some(tokio::spawn(elector.run(shutdown_tx.subscribe())));
    }

    let state = Arc::new(api::AppState {
        registry,
        sync_info: caches.sync_info(),
        metrics,
        leader,
        settings: Arc::new(settings.clone()),
    });
    let mut server = tokio::spawn(api::serve(
        settings.metrics_addr,
        state,
        shutdown_tx.subscribe(),
    ));

    let mut election_finished = false;
    let lost_leadership = async {
        match election.as_mut() {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        reason = shutdown_signal() => {
            logger.log_shutdown(reason);
        }
        outcome = lost_leadership => {
            match outcome {
                Ok(ElectionOutcome::LeadershipLost) => {
                    // restart into a fresh election rather than keep publishing
                    logger.log_shutdown("leadership lost");
                    std::process::exit(0);
                }
                Ok(ElectionOutcome::Shutdown) => election_finished = true,
                Err(e) => return Err(anyhow!("leader election task failed: {}", e)),
            }
        }
        result = &mut server => {
            return match result {
                Ok(Ok(())) => Err(anyhow!("API server exited unexpectedly")),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(anyhow!("API server task failed: {}", e)),
            };
        }
    }

    let _ = shutdown_tx.send(());

    if let Some(handle) = election.filter(|_| !election_finished) {
        if let Err(e) = handle.await {
            warn!(error = %e, "Leader election task failed during shutdown");
        }
    }
    caches.join().await;
    match server.await {
        Ok(result) => result?,
        Err(e) => warn!(error = %e, "API server task failed during shutdown"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM with a description of the signal
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
        "SIGINT received"
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
        "SIGTERM received"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        reason = ctrl_c => reason,
        reason = terminate => reason,
    }
}
