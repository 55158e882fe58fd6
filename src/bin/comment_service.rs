//! Comment Service Binary
//!
//! Runs the threaded comment system as a REST API service:
//! - Structured JSON logging
//! - Request tracing with correlation IDs
//! - Legacy comment migration on startup
//! - Graceful shutdown handling
//! - Health check endpoints
//!
//! ## Configuration
//!
//! Environment variables:
//! - `COMMENT_BACKEND`: `memory`, `postgres` or `graph` (default: memory)
//! - `DATABASE_URL`: PostgreSQL connection string (store or legacy table)
//! - `NEO4J_URI`, `NEO4J_USER`, `NEO4J_PASSWORD`: graph database access
//! - `MIGRATE_ON_STARTUP`: import legacy comments into an empty store (default: true)
//! - `LEGACY_COMMENTS_TABLE`: legacy table name (default: legacy_comments)
//! - `PORT`: Service port (default: 8002)
//! - `HOST`: Service host (default: 0.0.0.0)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! COMMENT_BACKEND=graph NEO4J_URI=127.0.0.1:7687 cargo run --bin comment_service --features service
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use threadscape::service::{create_router, metrics_middleware, ServiceState};
use threadscape::{BackendKind, CommentBackend, MigrationOutcome, PostgresLegacySource, StoreConfig};

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "comment_service=info,threadscape=info,tower_http=info,sqlx=warn,neo4rs=warn".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    }
}

/// Request logging middleware that adds correlation ID and timing
async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let trace_id = request
        .headers()
        .get("X-Request-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let method = request.method().clone();
    let uri = request.uri().path().to_string();

    let span = info_span!(
        "request",
        trace_id = %trace_id,
        method = %method,
        path = %uri,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let response = next.run(request).instrument(span.clone()).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    span.record("status", status);
    span.record("latency_ms", latency.as_millis() as u64);

    info!(
        target: "comment_service::access",
        trace_id = %trace_id,
        method = %method,
        path = %uri,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request completed"
    );

    response
}

/// Import legacy comments into an empty store.
///
/// The legacy table always lives in PostgreSQL; a graph or in-memory store
/// reads it through a separate small pool.
async fn run_migration(
    config: &StoreConfig,
    state: &ServiceState<CommentBackend>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = match state.store().postgres_pool() {
        Some(pool) => pool.clone(),
        None if std::env::var("DATABASE_URL").is_ok() => {
            PgPoolOptions::new()
                .max_connections(2)
                .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout_secs))
                .connect(&config.postgres.database_url)
                .await?
        }
        None => {
            info!(backend = %config.backend, "DATABASE_URL not set, no legacy table to migrate");
            return Ok(());
        }
    };

    let source = PostgresLegacySource::new(pool, config.legacy_table.clone())?;
    match state.system.initialize(&source).await? {
        MigrationOutcome::Skipped { existing } => info!(existing, "legacy migration skipped"),
        MigrationOutcome::Completed { imported } => info!(imported, "legacy migration completed"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let version = env!("CARGO_PKG_VERSION");
    let build_sha = option_env!("BUILD_SHA").unwrap_or("dev");

    info!(version = version, build_sha = build_sha, "Starting Comment Service");

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8002);

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

    let config = StoreConfig::from_env();
    if config.backend == BackendKind::Memory {
        warn!("COMMENT_BACKEND is memory; comments are lost on restart");
    }

    info!(backend = %config.backend, "Connecting to comment store...");
    let connect_start = Instant::now();

    let store = match tokio::time::timeout(Duration::from_secs(30), CommentBackend::connect(&config)).await {
        Ok(Ok(store)) => store,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed to connect to comment store");
            return Err(e.into());
        }
        Err(_) => {
            tracing::error!("Comment store connection timeout after 30s");
            return Err("Comment store connection timeout".into());
        }
    };

    info!(
        latency_ms = connect_start.elapsed().as_millis() as u64,
        backend = %store.kind(),
        "Comment store ready"
    );

    let state = ServiceState::from_env(store);

    if config.migrate_on_startup {
        run_migration(&config, &state).await?;
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!(address = %addr, version = version, "Comment Service listening");

    let listener = TcpListener::bind(addr).await?;

    let shutdown_signal = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
            _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
        }
    };

    info!("Ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Comment Service shutdown complete");

    Ok(())
}
