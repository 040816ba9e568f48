//! HTTP/WebSocket server for dashboard clients.
//!
//! Uses `axum` for routing with permissive CORS. Query endpoints live
//! under `/api`, the push channel at `/ws`, and an optional static
//! frontend is served for everything else.

pub mod api;
pub mod ws;

use axum::{routing::get, Router};
use std::future::Future;
use std::path::Path;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::info;

use crate::error::Result;
use crate::feed::Feed;

/// Shared application state for the HTTP/WS server.
#[derive(Clone)]
pub struct AppState {
    pub feed: Feed,
}

impl AppState {
    pub fn new(feed: Feed) -> Self {
        Self { feed }
    }
}

pub fn router(state: AppState, frontend_dir: Option<&Path>) -> Router {
    let api = Router::new()
        .route("/status", get(api::get_status))
        .route("/current", get(api::get_current))
        .route("/history", get(api::get_history))
        .route("/performance", get(api::get_performance));

    let mut app = Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::ws_handler));

    if let Some(dir) = frontend_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn start_server<F>(
    state: AppState,
    addr: &str,
    frontend_dir: Option<&Path>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state, frontend_dir);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "Starting HTTP/WebSocket server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server stopped");
    Ok(())
}
