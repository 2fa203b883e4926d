//! Gateway server: REST API under /api, static files for everything else

use crate::api;
use crate::auth::{require_basic_auth, BasicAuth};
use anyhow::Context;
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use scriptwatch_watch::WatchService;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    pub web_dir: PathBuf,
    pub auth: Option<BasicAuth>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            web_dir: PathBuf::from("web"),
            auth: None,
        }
    }
}

pub struct AppState {
    pub service: Arc<WatchService>,
    pub auth: Option<BasicAuth>,
}

pub fn build_router(state: Arc<AppState>, web_dir: impl Into<PathBuf>) -> Router {
    Router::new()
        .route("/api/urls", get(api::list_urls))
        .route("/api/commits", get(api::list_commits))
        .route("/api/diff", get(api::get_diff))
        .route("/api/add-url", post(api::add_url))
        .route("/api/edit-url", put(api::edit_url))
        .route("/api/delete-url", delete(api::delete_url))
        .route("/api/update-status", put(api::update_status))
        .route("/health", get(api::health))
        .fallback_service(ServeDir::new(web_dir.into()))
        .layer(middleware::from_fn_with_state(state.clone(), require_basic_auth))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn start_gateway(
    config: GatewayConfig,
    service: Arc<WatchService>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.bind, config.port))?;

    info!("Scriptwatch v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: http://{}", bind_addr);
    info!("  Web root:     {}", config.web_dir.display());
    match &config.auth {
        Some(auth) => info!("  Auth:         basic (user {})", auth.username()),
        None => info!("  Auth:         none"),
    }

    let state = Arc::new(AppState {
        service,
        auth: config.auth.clone(),
    });
    let app = build_router(state, config.web_dir.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Gateway stopped");
    Ok(())
}
