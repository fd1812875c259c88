use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quotepay_backend::api::{self, AppState};
use quotepay_backend::config::{AppConfig, StorageBackend};
use quotepay_backend::database::memory::MemoryStore;
use quotepay_backend::database::quote_repository::QuoteRepository;
use quotepay_backend::database::repository::{QuoteStore, TransactionStore, WebhookEventStore};
use quotepay_backend::database::transaction_repository::TransactionRepository;
use quotepay_backend::database::webhook_repository::WebhookEventRepository;
use quotepay_backend::database::init_pool_from_config;
use quotepay_backend::health::HealthChecker;
use quotepay_backend::logging::init_tracing;
use quotepay_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use quotepay_backend::payments::factory::PaymentProviderFactory;
use quotepay_backend::services::payment_orchestrator::PaymentOrchestrator;
use quotepay_backend::services::webhook_processor::WebhookProcessor;
use quotepay_backend::workers::pending_sweeper::PendingSweeperWorker;
use quotepay_backend::workers::webhook_retry::WebhookRetryWorker;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

struct Stores {
    transactions: Arc<dyn TransactionStore>,
    quotes: Arc<dyn QuoteStore>,
    webhook_events: Arc<dyn WebhookEventStore>,
    db_pool: Option<sqlx::PgPool>,
}

async fn init_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match (config.storage, &config.database) {
        (StorageBackend::Postgres, Some(database)) => {
            info!("Initializing database connection pool...");
            let pool = init_pool_from_config(database)
                .await
                .context("failed to initialize database pool")?;

            if database.run_migrations {
                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .context("failed to run database migrations")?;
                info!("Database migrations applied");
            }

            Ok(Stores {
                transactions: Arc::new(TransactionRepository::new(pool.clone())),
                quotes: Arc::new(QuoteRepository::new(pool.clone())),
                webhook_events: Arc::new(WebhookEventRepository::new(pool.clone())),
                db_pool: Some(pool),
            })
        }
        (StorageBackend::Postgres, None) => {
            anyhow::bail!("postgres storage selected without database configuration")
        }
        (StorageBackend::Memory, _) => {
            warn!("Using in-memory storage; state is lost on restart");
            let store = MemoryStore::new();
            Ok(Stores {
                transactions: Arc::new(store.clone()),
                quotes: Arc::new(store.clone()),
                webhook_events: Arc::new(store),
                db_pool: None,
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.logging);
    config.validate().context("invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        storage = ?config.storage,
        "Starting payments backend"
    );

    let stores = init_stores(&config).await?;

    let gateways = PaymentProviderFactory::with_config(config.payments.gateways.clone())
        .build(
            config.payments.paystack.clone(),
            config.payments.flutterwave.clone(),
        )
        .context("failed to configure payment gateways")?;
    let enabled_gateways = gateways.enabled_gateways().to_vec();

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        stores.transactions,
        stores.quotes,
        gateways,
        config.reconciliation.policy.clone(),
        config.reconciliation.orchestrator.clone(),
    ));
    let webhooks = Arc::new(WebhookProcessor::new(
        stores.webhook_events,
        orchestrator.clone(),
    ));

    // Background workers share one shutdown channel with the HTTP server.
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let mut worker_handles: Vec<JoinHandle<()>> = Vec::new();
    if config.workers.enabled {
        let sweeper =
            PendingSweeperWorker::new(orchestrator.clone(), config.workers.pending_sweeper.clone());
        worker_handles.push(tokio::spawn(sweeper.run(worker_shutdown_rx.clone())));

        let retry = WebhookRetryWorker::new(webhooks.clone(), config.workers.webhook_retry.clone());
        worker_handles.push(tokio::spawn(retry.run(worker_shutdown_rx.clone())));
        info!(workers = worker_handles.len(), "Background workers started");
    } else {
        info!("Background workers disabled (WORKERS_ENABLED=false)");
    }

    let state = AppState {
        orchestrator,
        webhooks,
        health_checker: HealthChecker::new(stores.db_pool, enabled_gateways),
    };

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid HOST/PORT")?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await
        .context("server error")?;

    let _ = worker_shutdown_tx.send(true);
    for handle in worker_handles {
        if tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            error!("Timed out waiting for worker shutdown");
        }
    }

    info!("Server shutdown complete");

    Ok(())
}
