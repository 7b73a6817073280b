pub mod api;
pub mod config;
pub mod deploy;
pub mod error;
pub mod logging;
pub mod signature;
pub mod webhook;

use axum::{Router, routing};
use std::sync::Arc;

use config::{ListenerConfig, WebhookSecret};
use deploy::Dispatcher;

pub const WEBHOOK_PATH: &str = "/deploy-webhook";
pub const HEALTH_PATH: &str = "/health";

pub struct AppState {
    pub secret: WebhookSecret,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: &ListenerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            secret: config.secret.clone(),
            dispatcher,
        }
    }
}

pub type SharedState = Arc<AppState>;

/// Routes for the listener, ready to be served.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route(HEALTH_PATH, routing::get(api::health))
        .route(WEBHOOK_PATH, routing::post(api::handle_webhook))
        .with_state(state)
}
