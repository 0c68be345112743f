use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use staybook::config::Config;
use staybook::engine::Engine;
use staybook::observability;
use staybook::payment::{PaymentProcessor, SandboxProcessor, StripeProcessor};
use staybook::{reaper, tls, wire};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    observability::init(config.metrics_port)?;

    let tls_acceptor =
        tls::load_tls_acceptor(config.tls_cert.as_deref(), config.tls_key.as_deref())?;

    let processor: Arc<dyn PaymentProcessor> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeProcessor::new(key.clone(), config.stripe_api_base.clone())),
        None => {
            tracing::warn!("STAYBOOK_STRIPE_SECRET_KEY not set, using the in-memory sandbox processor");
            Arc::new(SandboxProcessor::new())
        }
    };

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        processor,
        config.engine_settings(),
    )?);

    let reaper_engine = engine.clone();
    tokio::spawn(async move {
        reaper::run_reaper(reaper_engine, Duration::from_secs(60)).await;
    });
    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        reaper::run_compactor(compactor_engine, threshold).await;
    });

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("staybook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  currency: {}", config.currency);
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!(
        "  pending ttl: {}",
        match config.pending_ttl_secs {
            0 => "disabled".to_string(),
            secs => format!("{secs}s"),
        }
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    tracing::warn!("connection limit reached, rejecting {peer}");
                    metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                    continue;
                };

                tracing::debug!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let password = config.password.clone();
                let tls = tls_acceptor.clone();
                tokio::spawn(async move {
                    if let Err(e) = wire::process_connection(socket, engine, password, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                    drop(permit);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    drain_connections(&semaphore, max_connections, Duration::from_secs(10)).await;
    info!("staybook stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!("no SIGTERM handler ({e}), waiting for ctrl-c only"),
        }
    }
    tokio::signal::ctrl_c().await.ok();
}

/// Wait until every connection permit is back, or give up after `grace`.
async fn drain_connections(semaphore: &Semaphore, max_connections: usize, grace: Duration) {
    info!("draining connections...");
    let deadline = tokio::time::Instant::now() + grace;
    while semaphore.available_permits() < max_connections {
        if tokio::time::Instant::now() >= deadline {
            let open = max_connections - semaphore.available_permits();
            tracing::warn!("drain timeout, {open} connections still open");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("all connections drained");
}
