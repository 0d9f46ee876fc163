//! Fare Matrix Service — Main Application Entry Point
//!
//! HTTP server wiring the upstream client, route normalizer, matrix
//! engine, and request scheduler together behind a thin Axum front-end.
//! Provides:
//! - RESTful endpoints to submit, poll, cancel, heartbeat, and retrieve
//!   fare-and-availability matrix computations
//! - A bounded in-process scheduler running computations in the background
//! - Graceful shutdown handling
//! - CORS and tracing middleware

mod config;
mod error;
mod handlers;
mod matrix;
mod route;
mod scheduler;
mod types;
mod upstream;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use config::Config;
use handlers::AppState;
use matrix::MatrixEngine;
use scheduler::Scheduler;
use upstream::UpstreamClient;

/// Create and configure the Axum router with all routes and middleware.
///
/// The middleware stack is applied in reverse order:
/// 1. CORS (outermost — handles preflight requests)
/// 2. Tracing (logs all requests and responses)
/// 3. Route handlers (innermost — actual business logic)
fn create_router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/submit", post(handlers::submit))
        .route("/status/:id", get(handlers::get_status))
        .route("/cancel/:id", post(handlers::cancel))
        .route("/cancel_beacon/:id", post(handlers::cancel_beacon))
        .route("/heartbeat/:id", post(handlers::heartbeat))
        .route("/result/:id", get(handlers::get_result))
        .route("/stats", get(handlers::stats))
        .route("/cleanup", post(handlers::cleanup))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Application entry point.
///
/// Startup sequence:
/// 1. Initialize structured logging with tracing
/// 2. Load configuration from environment variables
/// 3. Build the upstream client, matrix engine, and scheduler
/// 4. Spawn the scheduler's background dispatch and reaper tasks
/// 5. Build the HTTP router with middleware stack
/// 6. Start the server with graceful shutdown handling
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    info!("Starting fare matrix service...");
    info!("Bind address: {}", config.bind_address);

    let upstream_client = UpstreamClient::new(&config.upstream);
    let matrix_engine = MatrixEngine::new(upstream_client, config.upstream.fan_out_limit);
    let scheduler = Scheduler::new(config.scheduler.clone(), Arc::new(matrix_engine));
    scheduler.spawn_background_tasks();

    let state = AppState {
        scheduler: scheduler.clone(),
    };

    let app = create_router(state, &config.allowed_origins);

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .expect("invalid bind address format");

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Graceful shutdown signal handler: SIGTERM (process managers) or
/// SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
}
