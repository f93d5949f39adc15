//! Parley Core
//!
//! Domain logic for the parley voice-agent platform: room-scoped credential
//! issuance, the room-server gateway, webhook verification, and the session
//! orchestrator that reconciles local records against the room server's
//! lifecycle events. The HTTP surface and Postgres persistence live in the
//! `parley-api` service crate and plug in through the traits defined here.

pub mod error;
pub mod orchestrator;
pub mod room;
pub mod store;
pub mod token;
pub mod webhook;

pub use error::CoreError;
pub use orchestrator::{Reconciliation, SessionOrchestrator};
