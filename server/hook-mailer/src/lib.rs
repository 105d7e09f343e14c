//! Build Hook Mailer
//!
//! HTTP service that receives container-registry push webhooks for build-hook
//! images, extracts the build report packaged in each accepted image and mails
//! it. Per-app daily counters (kept in `hook-stats`) drive scheduled alerts
//! for apps that saw no build or reported errors.

pub mod clock;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod mail;
pub mod notify;
pub mod scheduler;
pub mod state;

#[cfg(test)]
mod test_utils;

use axum::{routing::get, routing::post, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::HookError;
pub use scheduler::{SchedulePlan, Scheduler};
pub use state::AppState;

/// Webhook on `context_path`, liveness on `/health`.
pub fn router(state: Arc<AppState>, context_path: &str) -> Router {
  Router::new()
    .route("/health", get(handlers::health))
    .route(context_path, post(handlers::hook))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
