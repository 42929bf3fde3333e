//! gpu-broker - main entry point.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use gpu_broker::{
    admission::AdmissionGate,
    api::{AppState, router},
    config::Config,
    market::{Marketplace, ProviderServicesCli},
    notify::Notifier,
    orchestrator::Orchestrator,
    queue::{MemoryQueue, QueueStore, RedisQueue},
    teardown::{MemoryTeardownStore, RedisTeardownStore, TeardownScheduler, TeardownStore},
    worker::QueueWorker,
};

#[derive(Parser, Debug)]
#[command(name = "gpu-broker")]
#[command(about = "HTTP broker that provisions GPU jobs on an Akash-style marketplace")]
#[command(version)]
struct Args {
    /// Listen address override (otherwise LISTEN_ADDR or 0.0.0.0:8080)
    #[arg(long)]
    listen: Option<std::net::SocketAddr>,

    /// Skip all marketplace transactions and fabricate results
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gpu_broker=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::resolve()?;
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if args.dry_run {
        config.orchestrator.dry_run = true;
    }
    let config = Arc::new(config);
    tracing::info!(
        listen = %config.server.listen,
        dry_run = config.orchestrator.dry_run,
        queue_enabled = config.queue.enabled,
        "starting gpu-broker"
    );

    // Storage backend: Redis when configured, in-memory otherwise. Both the
    // queue and the teardown records share one connection manager.
    let (queue, teardown_store): (Arc<dyn QueueStore>, Arc<dyn TeardownStore>) =
        match config.queue.redis_url.as_deref() {
            Some(url) => {
                let redis_queue = RedisQueue::connect(url, config.queue.key.clone()).await?;
                let manager = redis_queue.manager();
                tracing::info!(key = %config.queue.key, "connected to redis");
                (
                    Arc::new(redis_queue),
                    Arc::new(RedisTeardownStore::new(
                        manager,
                        format!("{}:teardowns", config.queue.key),
                    )),
                )
            }
            None => {
                tracing::warn!(
                    "no REDIS_URL; queue and pending teardowns will not survive a restart"
                );
                (
                    Arc::new(MemoryQueue::new()),
                    Arc::new(MemoryTeardownStore::new()),
                )
            }
        };

    let market: Arc<dyn Marketplace> = Arc::new(ProviderServicesCli::new(config.chain.clone()));
    let teardown = Arc::new(TeardownScheduler::new(teardown_store, market.clone()));
    match teardown.reconcile().await {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "re-armed pending teardowns"),
        Err(e) => tracing::error!(error = %e, "failed to reconcile pending teardowns"),
    }

    let notifier = Arc::new(Notifier::new(config.notify.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        market,
        notifier,
        teardown,
    ));
    let gate = Arc::new(AdmissionGate::new(config.probe.clone()));

    let worker = Arc::new(QueueWorker::new(
        config.clone(),
        gate.clone(),
        queue.clone(),
        orchestrator.clone(),
    ));
    worker.spawn();

    let state = AppState {
        config: config.clone(),
        orchestrator,
        gate,
        queue,
    };
    let listener = tokio::net::TcpListener::bind(config.server.listen).await?;
    tracing::info!(addr = %config.server.listen, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM. Armed timers and in-flight sessions are
/// process-local; pending teardowns are reconciled from the store on the
/// next start.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
