//! Session and agent domain types plus the persistence seams.
//!
//! The orchestrator never talks to a database directly. It goes through the
//! `SessionStore` and `AgentDirectory` traits, which the API service backs
//! with Postgres and tests back with in-memory fakes.
//!
//! Transition guards live here, at the store boundary: `activate_room` only
//! applies to a `pending` row, `complete_room` only to `pending` or `active`,
//! and `complete` never clears an `ended_at` that is already set. Each
//! operation is a single atomic update against the session row, so two
//! webhook deliveries racing for the same room serialize at the row and the
//! loser becomes a no-op instead of a downgrade.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// Forward-only session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl SessionStatus {
    /// True once the session has reached a state it can never leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// Upper bound on unrecognized metadata keys kept per session. Anything past
/// this is dropped during parsing.
pub const MAX_EXTRA_METADATA_KEYS: usize = 16;

/// Structured session metadata. Known fields are enumerated; unknown fields
/// from room-server metadata land in `extra`, bounded by
/// [`MAX_EXTRA_METADATA_KEYS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default)]
    pub is_test: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SessionMetadata {
    /// Lenient parse of room-server metadata. Malformed input yields the
    /// default record rather than an error; room metadata is advisory.
    pub fn parse_lenient(raw: &str) -> Self {
        let mut meta: SessionMetadata = serde_json::from_str(raw).unwrap_or_default();
        while meta.extra.len() > MAX_EXTRA_METADATA_KEYS {
            let _ = meta.extra.pop_last();
        }
        meta
    }
}

/// The orchestrator's durable record correlating a room, an agent, a user,
/// and lifecycle timestamps/metrics. Latency and message counters are written
/// by out-of-band reporters; the orchestrator only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub user_id: String,
    pub room_name: Option<String>,
    pub status: SessionStatus,
    pub metadata: SessionMetadata,
    pub total_duration: Option<i32>,
    pub avg_latency: Option<f64>,
    pub message_count: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Fields the orchestrator supplies when opening a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub agent_id: Uuid,
    pub user_id: String,
    pub room_name: String,
    pub metadata: SessionMetadata,
}

/// A voice-agent definition as the orchestrator sees it. The full CRUD
/// surface for agents lives outside the core; only these fields matter here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub id: Uuid,
    pub name: String,
    pub instructions: String,
    /// Worker name the room server dispatches into the room, when configured.
    pub dispatch_agent_name: Option<String>,
}

/// Persistence boundary for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a new `pending` session and returns the stored row.
    async fn create(&self, session: NewSession) -> Result<SessionRecord, CoreError>;

    async fn find(&self, id: Uuid) -> Result<Option<SessionRecord>, CoreError>;

    async fn find_by_room(&self, room_name: &str) -> Result<Option<SessionRecord>, CoreError>;

    /// Moves a `pending` session for `room_name` to `active`, replacing its
    /// metadata with the room's. Returns `None` when no row was in a state
    /// the transition applies to.
    async fn activate_room(
        &self,
        room_name: &str,
        metadata: SessionMetadata,
    ) -> Result<Option<SessionRecord>, CoreError>;

    /// Completes the session for `room_name`, recording duration and end
    /// time. Applies only to `pending` or `active` rows; an already-terminal
    /// row yields `None`.
    async fn complete_room(
        &self,
        room_name: &str,
        total_duration: i32,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, CoreError>;

    /// Administrative completion by session id. Always lands on `completed`
    /// but keeps an `ended_at` that is already set.
    async fn complete(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, CoreError>;

    /// Marks a non-terminal session `failed`.
    async fn fail(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, CoreError>;
}

/// Read-only lookup into the agent CRUD collaborator's store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn find_agent(&self, id: Uuid) -> Result<Option<AgentDefinition>, CoreError>;
}
