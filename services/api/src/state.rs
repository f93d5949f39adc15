//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources: the database wrapper, the session orchestrator, and
//! the webhook receiver.

use crate::config::Config;
use crate::db::Db;
use parley_core::orchestrator::SessionOrchestrator;
use parley_core::webhook::WebhookReceiver;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub orchestrator: Arc<SessionOrchestrator>,
    pub webhook_receiver: WebhookReceiver,
    pub config: Arc<Config>,
}
