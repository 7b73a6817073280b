//! HTTP handlers

pub mod health;
pub mod webhook;

pub use health::health;
pub use webhook::handle_webhook;
