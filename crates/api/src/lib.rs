//! HTTP API server for the saga workflows.
//!
//! Exposes the identity, booking and brand entry points plus execution
//! inspection, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use execution_store::ExecutionStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    BookingSaga, BrandSaga, IdentitySaga, InMemoryDatastore, InMemoryIdentityProvider,
    InMemoryOrganizationDirectory, InMemoryRefundHook, SagaConfig, WorkflowExecutor,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/users", post(routes::users::create))
        .route(
            "/users/{id}",
            patch(routes::users::update).delete(routes::users::delete),
        )
        .route("/users/{id}/bookings", get(routes::users::bookings))
        .route("/bookings", post(routes::bookings::create))
        .route("/bookings/check-in", post(routes::bookings::check_in))
        .route("/bookings/{id}/cancel", post(routes::bookings::cancel))
        .route(
            "/organizations/{id}/brands",
            post(routes::brands::create).get(routes::brands::list),
        )
        .route("/executions", get(routes::executions::list))
        .route("/executions/{id}", get(routes::executions::get))
        .route("/executions/{id}/cancel", post(routes::executions::cancel))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the sagas to one shared executor and in-memory service fakes.
pub fn create_default_state(store: Arc<dyn ExecutionStore>, config: SagaConfig) -> Arc<AppState> {
    let executor = WorkflowExecutor::new(store, config);
    let datastore = InMemoryDatastore::new();

    Arc::new(AppState {
        identity: IdentitySaga::new(
            executor.clone(),
            InMemoryIdentityProvider::new(),
            datastore.clone(),
        ),
        bookings: BookingSaga::new(executor.clone(), datastore.clone(), InMemoryRefundHook::new()),
        brands: BrandSaga::new(
            executor.clone(),
            datastore,
            InMemoryOrganizationDirectory::new(),
        ),
        executor,
    })
}
