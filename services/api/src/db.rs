//! Data Access Layer
//!
//! Postgres persistence for sessions and voice-agent definitions, backing the
//! core's `SessionStore` and `AgentDirectory` traits. State transitions are
//! single guarded UPDATE statements: the WHERE clause checks the row's
//! current status, so concurrent webhook deliveries for the same room
//! serialize at the row and a transition that no longer applies returns no
//! row instead of downgrading the session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use parley_core::error::CoreError;
use parley_core::store::{
    AgentDefinition, AgentDirectory, NewSession, SessionMetadata, SessionRecord, SessionStore,
};

/// Column list shared by every session query; `status` comes back as text.
const SESSION_COLUMNS: &str = "id, agent_id, user_id, room_name, status::text AS status, \
     metadata, total_duration, avg_latency, message_count, started_at, ended_at";

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    agent_id: Uuid,
    user_id: String,
    room_name: Option<String>,
    status: String,
    metadata: serde_json::Value,
    total_duration: Option<i32>,
    avg_latency: Option<f64>,
    message_count: Option<i32>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    fn into_record(self) -> Result<SessionRecord, CoreError> {
        let status = self
            .status
            .parse()
            .map_err(|e: String| CoreError::Persistence(e))?;
        let metadata = serde_json::from_value(self.metadata).unwrap_or_default();
        Ok(SessionRecord {
            id: self.id,
            agent_id: self.agent_id,
            user_id: self.user_id,
            room_name: self.room_name,
            status,
            metadata,
            total_duration: self.total_duration,
            avg_latency: self.avg_latency,
            message_count: self.message_count,
            started_at: self.started_at,
            ended_at: self.ended_at,
        })
    }
}

#[derive(FromRow)]
struct AgentRow {
    id: Uuid,
    name: String,
    instructions: String,
    dispatch_agent_name: Option<String>,
}

fn persistence(err: sqlx::Error) -> CoreError {
    CoreError::Persistence(err.to_string())
}

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Db {
    async fn create(&self, session: NewSession) -> Result<SessionRecord, CoreError> {
        let metadata = serde_json::to_value(&session.metadata)
            .map_err(|e| CoreError::Persistence(e.to_string()))?;
        let sql = format!(
            "INSERT INTO agent_sessions (agent_id, user_id, room_name, metadata) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(session.agent_id)
            .bind(&session.user_id)
            .bind(&session.room_name)
            .bind(metadata)
            .fetch_one(&self.pool)
            .await
            .map_err(persistence)?;
        row.into_record()
    }

    async fn find(&self, id: Uuid) -> Result<Option<SessionRecord>, CoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM agent_sessions WHERE id = $1");
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        row.map(SessionRow::into_record).transpose()
    }

    async fn find_by_room(&self, room_name: &str) -> Result<Option<SessionRecord>, CoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM agent_sessions WHERE room_name = $1");
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(room_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        row.map(SessionRow::into_record).transpose()
    }

    async fn activate_room(
        &self,
        room_name: &str,
        metadata: SessionMetadata,
    ) -> Result<Option<SessionRecord>, CoreError> {
        let metadata = serde_json::to_value(&metadata)
            .map_err(|e| CoreError::Persistence(e.to_string()))?;
        let sql = format!(
            "UPDATE agent_sessions \
             SET status = 'active', metadata = $2 \
             WHERE room_name = $1 AND status = 'pending' \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(room_name)
            .bind(metadata)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        row.map(SessionRow::into_record).transpose()
    }

    async fn complete_room(
        &self,
        room_name: &str,
        total_duration: i32,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, CoreError> {
        let sql = format!(
            "UPDATE agent_sessions \
             SET status = 'completed', total_duration = $2, ended_at = $3 \
             WHERE room_name = $1 AND status IN ('pending', 'active') \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(room_name)
            .bind(total_duration)
            .bind(ended_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        row.map(SessionRow::into_record).transpose()
    }

    async fn complete(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, CoreError> {
        // COALESCE keeps the first recorded end time on repeated calls.
        let sql = format!(
            "UPDATE agent_sessions \
             SET status = 'completed', ended_at = COALESCE(ended_at, $2) \
             WHERE id = $1 \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .bind(ended_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        row.map(SessionRow::into_record).transpose()
    }

    async fn fail(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, CoreError> {
        let sql = format!(
            "UPDATE agent_sessions \
             SET status = 'failed', ended_at = $2 \
             WHERE id = $1 AND status IN ('pending', 'active') \
             RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .bind(ended_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        row.map(SessionRow::into_record).transpose()
    }
}

#[async_trait]
impl AgentDirectory for Db {
    async fn find_agent(&self, id: Uuid) -> Result<Option<AgentDefinition>, CoreError> {
        let row = sqlx::query_as::<_, AgentRow>(
            "SELECT id, name, instructions, dispatch_agent_name \
             FROM voice_agents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(row.map(|r| AgentDefinition {
            id: r.id,
            name: r.name,
            instructions: r.instructions,
            dispatch_agent_name: r.dispatch_agent_name,
        }))
    }
}
