mod api;
mod auth;
mod config;
mod cors;
mod db;
mod error;
mod library;
mod mcp;
mod store;
#[cfg(test)]
mod test_support;
mod validation;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::{
    auth::jwt::SessionTokenService,
    config::{LogFormat, ServerConfig},
    db::{
        migrations::run_migrations,
        pool::{check_pool_health, create_pg_pool, PoolConfig},
    },
    error::{
        attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
        ErrorCode, ServerError,
    },
    store::Store,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    init_tracing(&config);

    if config.is_dev_jwt_secret() {
        warn!("TEAMDOCS_SERVER_JWT_SECRET is unset; using the development-only secret");
    }
    let sessions =
        Arc::new(SessionTokenService::new(&config.jwt_secret).context("invalid session JWT secret")?);

    let database_url = config
        .database_url
        .as_deref()
        .context("TEAMDOCS_SERVER_DATABASE_URL must be set")?;
    let pool = create_pg_pool(database_url, PoolConfig::from_env()).await?;
    run_migrations(&pool).await?;
    check_pool_health(&pool).await?;
    let store = Store::Postgres(pool);

    let app = build_router(store, sessions, &config);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind teamdocs listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting teamdocs server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("teamdocs server exited unexpectedly")
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn build_router(store: Store, sessions: Arc<SessionTokenService>, config: &ServerConfig) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(api::build_router(store.clone(), sessions))
            .merge(mcp::router(store))
            .layer(cors::cors_layer(config.cors_origins.as_deref())),
        config.max_body_bytes,
    )
}

fn apply_middleware(router: Router, max_body_bytes: usize) -> Router {
    router
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(error = ?error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(error = ?error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            ServerError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
