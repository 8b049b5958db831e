pub mod bootstrap;
pub mod commentator;
pub mod config;
pub mod dispatch;
pub mod store;
pub mod stream;
pub mod webhook;

use std::sync::Arc;

use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use dispatch::Dispatcher;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(git_hash: &str) -> String {
    if git_hash.len() >= 8 {
        git_hash[..8].to_string()
    } else {
        git_hash.to_string()
    }
}

pub fn get_version() -> String {
    // Packaged builds pass the hash in; cargo builds detect it.
    if let Some(git_hash) = option_env!("ALFRED_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        short_hash(git_hash)
    } else {
        built_info::PKG_VERSION.to_string()
    }
}

pub struct AppState {
    pub webhook_secret: String,
    pub dispatcher: Dispatcher,
}

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "alfred",
        "version": get_version(),
    })))
}

/// The full HTTP surface: liveness checks plus the signed webhook routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/test", get(health_check))
        .merge(webhook::webhook_router(state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
