//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use execution_store::{ExecutionStore, InMemoryExecutionStore, PostgresExecutionStore};
use saga::SagaConfig;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, draining in-flight sagas");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, draining in-flight sagas");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn execution_store(config: &Config) -> Arc<dyn ExecutionStore> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresExecutionStore::connect(url)
                .await
                .expect("failed to connect to the execution store database");
            store
                .run_migrations()
                .await
                .expect("failed to run execution store migrations");
            tracing::info!("using PostgreSQL execution store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, executions are kept in memory");
            Arc::new(InMemoryExecutionStore::new())
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    init_tracing(&config);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let store = execution_store(&config).await;
    let saga_config = SagaConfig::from_env();
    tracing::info!(?saga_config, "saga configuration loaded");
    let state = api::create_default_state(store, saga_config);

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}
