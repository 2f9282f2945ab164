use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use payrelay_api::app::{AppState, build_app};
use payrelay_infra::store::{InMemoryStore, PayoutStore, PostgresStore};
use payrelay_infra::upstream::HttpUpstream;
use payrelay_infra::{Config, Pipeline};

/// Upper bound on draining queues and pending retries at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    payrelay_observability::init();

    let config = Config::from_env().context("invalid configuration")?;

    let store: Arc<dyn PayoutStore> = if config.use_in_memory_store {
        warn!("USE_IN_MEMORY_STORE set; payouts are not persisted");
        InMemoryStore::arc()
    } else {
        let store = PostgresStore::connect(&config.database)
            .await
            .context("failed to connect to postgres")?;
        store
            .ensure_schema()
            .await
            .context("failed to create schema")?;
        Arc::new(store)
    };

    let upstream = Arc::new(HttpUpstream::new(&config.upstream).context("invalid upstream client configuration")?);
    let bind_addr = config.bind_addr.clone();

    let pipeline = Pipeline::new(config, store, upstream).spawn();
    let app = build_app(AppState::from_pipeline(&pipeline));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    // Past the deadline, unfinished status updates are dead-lettered and
    // picked up by reconciliation on the next start.
    pipeline.shutdown_within(DRAIN_TIMEOUT).await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
