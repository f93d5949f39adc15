//! The session orchestrator.
//!
//! Bridges the external room server, whose authoritative state arrives
//! asynchronously through webhooks, with the local session record whose
//! consumers expect a coherent monotonic view. Creation is all-or-nothing
//! (no room, no row); reconciliation is idempotent and never moves a session
//! backwards, because every transition is a guarded store update keyed on the
//! row's current status.
//!
//! All collaborators are injected at construction; there is no process-wide
//! singleton.

use chrono::Utc;
use rand::distr::{Alphanumeric, SampleString};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::room::{Participant, Room, RoomGateway};
use crate::store::{
    AgentDirectory, NewSession, SessionMetadata, SessionRecord, SessionStatus, SessionStore,
};
use crate::token::{RoomAgentDispatch, RoomConfiguration, TokenIssuer};
use crate::webhook::{EventKind, WebhookEvent};

/// What a caller gets back from [`SessionOrchestrator::create_session`]:
/// everything a client needs to join the room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    pub session_id: Uuid,
    pub room_name: String,
    pub access_token: String,
    /// The room server's participant-facing ws endpoint.
    pub endpoint_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_agent_name: Option<String>,
    pub agent_config: AgentConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub instructions: String,
}

/// Derived counters returned with session metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub duration: i32,
    pub avg_latency: f64,
    pub message_count: i32,
    pub participant_count: usize,
}

/// Composite metrics view: the stored record plus live room-server state.
/// `room` is `None` once the room has been torn down; the stored counters
/// still answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub session: SessionRecord,
    pub room: Option<Room>,
    pub participants: Vec<Participant>,
    pub metrics: MetricsSummary,
}

/// Outcome of reconciling one webhook event. Persistence failures surface as
/// `Err` so the caller can log and alert; they are never silently swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// A transition was applied; the session now has this status.
    Applied(SessionStatus),
    /// Nothing to do: no matching session, event kind without a transition,
    /// or the session had already moved past this event.
    Ignored,
}

pub struct SessionOrchestrator {
    gateway: Arc<dyn RoomGateway>,
    sessions: Arc<dyn SessionStore>,
    agents: Arc<dyn AgentDirectory>,
    issuer: TokenIssuer,
    endpoint_url: String,
}

impl SessionOrchestrator {
    pub fn new(
        gateway: Arc<dyn RoomGateway>,
        sessions: Arc<dyn SessionStore>,
        agents: Arc<dyn AgentDirectory>,
        issuer: TokenIssuer,
        endpoint_url: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            sessions,
            agents,
            issuer,
            endpoint_url: endpoint_url.into(),
        }
    }

    /// Globally unique room name: agent id, creation millis, random suffix.
    fn generate_room_name(agent_id: Uuid) -> String {
        let mut rng = rand::rng();
        let suffix = Alphanumeric.sample_string(&mut rng, 9).to_lowercase();
        format!("agent-{agent_id}-{}-{suffix}", Utc::now().timestamp_millis())
    }

    /// Provisions a room, opens a `pending` session for it, and mints the
    /// caller's join credential. If room creation fails nothing is written;
    /// if token signing fails after the row exists, the row is marked
    /// `failed` and the room deleted best-effort before the error surfaces.
    pub async fn create_session(
        &self,
        agent_id: Uuid,
        user_id: &str,
        is_test: bool,
    ) -> Result<CreatedSession, CoreError> {
        let agent = self
            .agents
            .find_agent(agent_id)
            .await?
            .ok_or(CoreError::AgentNotFound(agent_id))?;

        let room_name = Self::generate_room_name(agent_id);
        let now = Utc::now();
        let metadata = SessionMetadata {
            is_test,
            agent_id: Some(agent_id),
            instructions: Some(agent.instructions.clone()),
            created_at: Some(now),
            ..SessionMetadata::default()
        };
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| CoreError::Persistence(e.to_string()))?;

        self.gateway.create_room(&room_name, &metadata_json).await?;

        let session = self
            .sessions
            .create(NewSession {
                agent_id,
                user_id: user_id.to_owned(),
                room_name: room_name.clone(),
                metadata,
            })
            .await?;

        let room_config = agent.dispatch_agent_name.as_ref().map(|name| {
            let dispatch_metadata = serde_json::json!({
                "agentConfig": { "instructions": agent.instructions }
            });
            RoomConfiguration {
                agents: vec![RoomAgentDispatch {
                    agent_name: name.clone(),
                    metadata: Some(dispatch_metadata.to_string()),
                }],
            }
        });

        let participant_metadata =
            serde_json::json!({ "userId": user_id, "isTest": is_test }).to_string();
        let access_token = match self.issuer.issue(
            &format!("user-{user_id}"),
            &room_name,
            Some(&participant_metadata),
            room_config,
        ) {
            Ok(token) => token,
            Err(err) => {
                warn!(session = %session.id, room = %room_name, error = %err,
                    "token issuance failed after session creation, failing session");
                if let Err(store_err) = self.sessions.fail(session.id, Utc::now()).await {
                    warn!(session = %session.id, error = %store_err,
                        "could not mark session failed");
                }
                if let Err(gw_err) = self.gateway.delete_room(&room_name).await {
                    warn!(room = %room_name, error = %gw_err,
                        "could not clean up room after failed token issuance");
                }
                return Err(err);
            }
        };

        info!(session = %session.id, agent = %agent_id, room = %room_name, is_test,
            "session created");

        Ok(CreatedSession {
            session_id: session.id,
            room_name,
            access_token,
            endpoint_url: self.endpoint_url.clone(),
            dispatch_agent_name: agent.dispatch_agent_name,
            agent_config: AgentConfig {
                instructions: agent.instructions,
            },
        })
    }

    /// Applies one lifecycle event to stored state. Safe to call with
    /// duplicated or reordered deliveries: an event whose transition has
    /// already happened (or been overtaken) comes back `Ignored`.
    pub async fn reconcile(&self, event: &WebhookEvent) -> Result<Reconciliation, CoreError> {
        match event.kind() {
            EventKind::RoomStarted => {
                let Some(room) = &event.room else {
                    return Ok(Reconciliation::Ignored);
                };
                // Room metadata is authoritative here: full replace.
                let metadata = SessionMetadata::parse_lenient(&room.metadata);
                match self.sessions.activate_room(&room.name, metadata).await? {
                    Some(session) => {
                        info!(session = %session.id, room = %room.name, "session active");
                        Ok(Reconciliation::Applied(SessionStatus::Active))
                    }
                    None => Ok(Reconciliation::Ignored),
                }
            }
            EventKind::RoomFinished => {
                let Some(room) = &event.room else {
                    return Ok(Reconciliation::Ignored);
                };
                let now = Utc::now();
                let duration = Self::room_duration_secs(room, now.timestamp());
                match self
                    .sessions
                    .complete_room(&room.name, duration, now)
                    .await?
                {
                    Some(session) => {
                        info!(session = %session.id, room = %room.name, duration,
                            "session completed");
                        Ok(Reconciliation::Applied(SessionStatus::Completed))
                    }
                    None => Ok(Reconciliation::Ignored),
                }
            }
            EventKind::ParticipantJoined | EventKind::ParticipantLeft => {
                // Observability only; no session mutation.
                if let (Some(room), Some(participant)) = (&event.room, &event.participant) {
                    info!(room = %room.name, identity = %participant.identity,
                        event = %event.event, "participant lifecycle event");
                }
                Ok(Reconciliation::Ignored)
            }
            EventKind::TrackPublished | EventKind::TrackUnpublished => {
                Ok(Reconciliation::Ignored)
            }
            EventKind::Unknown => {
                debug!(event = %event.event, "ignoring unrecognized webhook event");
                Ok(Reconciliation::Ignored)
            }
        }
    }

    /// Duration from the server-reported creation time, falling back to the
    /// `createdAt` marker stamped into room metadata at creation.
    fn room_duration_secs(room: &Room, now_secs: i64) -> i32 {
        let started = if room.creation_time > 0 {
            Some(room.creation_time)
        } else {
            SessionMetadata::parse_lenient(&room.metadata)
                .created_at
                .map(|t| t.timestamp())
        };
        match started {
            Some(start) => (now_secs - start).clamp(0, i64::from(i32::MAX)) as i32,
            None => 0,
        }
    }

    /// Explicit termination. Deleting an already-absent room is fine, and a
    /// session that already completed stays completed with its original end
    /// time; the call still succeeds.
    pub async fn end_session(&self, session_id: Uuid) -> Result<SessionRecord, CoreError> {
        let session = self
            .sessions
            .find(session_id)
            .await?
            .ok_or(CoreError::SessionNotFound(session_id))?;
        let Some(room_name) = session.room_name.clone() else {
            return Err(CoreError::SessionNotFound(session_id));
        };

        self.gateway.delete_room(&room_name).await?;

        let updated = self
            .sessions
            .complete(session_id, Utc::now())
            .await?
            .ok_or(CoreError::SessionNotFound(session_id))?;
        info!(session = %session_id, room = %room_name, "session ended");
        Ok(updated)
    }

    /// Stored record plus a live snapshot. `None` for an unknown or room-less
    /// session; a torn-down room yields stored counters and no participants.
    pub async fn session_metrics(
        &self,
        session_id: Uuid,
    ) -> Result<Option<SessionMetrics>, CoreError> {
        let Some(session) = self.sessions.find(session_id).await? else {
            return Ok(None);
        };
        let Some(room_name) = session.room_name.clone() else {
            return Ok(None);
        };

        let room = self.gateway.get_room(&room_name).await;
        let participants = if room.is_some() {
            self.gateway.list_participants(&room_name).await?
        } else {
            Vec::new()
        };

        let metrics = MetricsSummary {
            duration: session.total_duration.unwrap_or(0),
            avg_latency: session.avg_latency.unwrap_or(0.0),
            message_count: session.message_count.unwrap_or(0),
            participant_count: participants.len(),
        };

        Ok(Some(SessionMetrics {
            session,
            room,
            participants,
            metrics,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::SendDataOptions;
    use crate::store::AgentDefinition;
    use crate::token::{decode_claims, ApiCredentials};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    // In-memory store mirroring the guarded-update semantics of the Postgres
    // implementation.
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<Uuid, SessionRecord>>,
    }

    impl MemoryStore {
        fn get(&self, id: Uuid) -> Option<SessionRecord> {
            self.rows.lock().unwrap().get(&id).cloned()
        }
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn create(&self, session: NewSession) -> Result<SessionRecord, CoreError> {
            let record = SessionRecord {
                id: Uuid::new_v4(),
                agent_id: session.agent_id,
                user_id: session.user_id,
                room_name: Some(session.room_name),
                status: SessionStatus::Pending,
                metadata: session.metadata,
                total_duration: None,
                avg_latency: None,
                message_count: None,
                started_at: Utc::now(),
                ended_at: None,
            };
            self.rows.lock().unwrap().insert(record.id, record.clone());
            Ok(record)
        }

        async fn find(&self, id: Uuid) -> Result<Option<SessionRecord>, CoreError> {
            Ok(self.get(id))
        }

        async fn find_by_room(
            &self,
            room_name: &str,
        ) -> Result<Option<SessionRecord>, CoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .find(|r| r.room_name.as_deref() == Some(room_name))
                .cloned())
        }

        async fn activate_room(
            &self,
            room_name: &str,
            metadata: SessionMetadata,
        ) -> Result<Option<SessionRecord>, CoreError> {
            let mut rows = self.rows.lock().unwrap();
            for row in rows.values_mut() {
                if row.room_name.as_deref() == Some(room_name)
                    && row.status == SessionStatus::Pending
                {
                    row.status = SessionStatus::Active;
                    row.metadata = metadata;
                    return Ok(Some(row.clone()));
                }
            }
            Ok(None)
        }

        async fn complete_room(
            &self,
            room_name: &str,
            total_duration: i32,
            ended_at: DateTime<Utc>,
        ) -> Result<Option<SessionRecord>, CoreError> {
            let mut rows = self.rows.lock().unwrap();
            for row in rows.values_mut() {
                if row.room_name.as_deref() == Some(room_name) && !row.status.is_terminal() {
                    row.status = SessionStatus::Completed;
                    row.total_duration = Some(total_duration);
                    row.ended_at = Some(ended_at);
                    return Ok(Some(row.clone()));
                }
            }
            Ok(None)
        }

        async fn complete(
            &self,
            id: Uuid,
            ended_at: DateTime<Utc>,
        ) -> Result<Option<SessionRecord>, CoreError> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(&id) else {
                return Ok(None);
            };
            row.status = SessionStatus::Completed;
            row.ended_at = Some(row.ended_at.unwrap_or(ended_at));
            Ok(Some(row.clone()))
        }

        async fn fail(
            &self,
            id: Uuid,
            ended_at: DateTime<Utc>,
        ) -> Result<Option<SessionRecord>, CoreError> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(&id) else {
                return Ok(None);
            };
            if row.status.is_terminal() {
                return Ok(None);
            }
            row.status = SessionStatus::Failed;
            row.ended_at = Some(ended_at);
            Ok(Some(row.clone()))
        }
    }

    #[derive(Default)]
    struct StubGateway {
        created: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
        fail_create: AtomicBool,
        live_room: Mutex<Option<Room>>,
        participants: Mutex<Vec<Participant>>,
    }

    #[async_trait]
    impl RoomGateway for StubGateway {
        async fn create_room(&self, name: &str, metadata: &str) -> Result<Room, CoreError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(CoreError::RoomServer("boom".into()));
            }
            self.created.lock().unwrap().push(name.to_owned());
            Ok(Room {
                sid: format!("RM_{name}"),
                name: name.to_owned(),
                metadata: metadata.to_owned(),
                creation_time: Utc::now().timestamp(),
                num_participants: 0,
            })
        }

        async fn delete_room(&self, name: &str) -> Result<(), CoreError> {
            self.deleted.lock().unwrap().push(name.to_owned());
            Ok(())
        }

        async fn get_room(&self, _name: &str) -> Option<Room> {
            self.live_room.lock().unwrap().clone()
        }

        async fn list_participants(&self, _name: &str) -> Result<Vec<Participant>, CoreError> {
            Ok(self.participants.lock().unwrap().clone())
        }

        async fn remove_participant(&self, _: &str, _: &str) -> Result<(), CoreError> {
            Ok(())
        }

        async fn send_data(
            &self,
            _: &str,
            _: &[u8],
            _: SendDataOptions,
        ) -> Result<(), CoreError> {
            Ok(())
        }

        async fn update_participant_metadata(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<(), CoreError> {
            Ok(())
        }
    }

    struct StubAgents {
        agents: HashMap<Uuid, AgentDefinition>,
    }

    #[async_trait]
    impl AgentDirectory for StubAgents {
        async fn find_agent(&self, id: Uuid) -> Result<Option<AgentDefinition>, CoreError> {
            Ok(self.agents.get(&id).cloned())
        }
    }

    struct Fixture {
        orchestrator: SessionOrchestrator,
        store: Arc<MemoryStore>,
        gateway: Arc<StubGateway>,
        agent_id: Uuid,
    }

    fn fixture_with(dispatch: Option<&str>) -> Fixture {
        let agent_id = Uuid::new_v4();
        let agent = AgentDefinition {
            id: agent_id,
            name: "support".into(),
            instructions: "You are a helpful voice assistant.".into(),
            dispatch_agent_name: dispatch.map(str::to_owned),
        };
        let store = Arc::new(MemoryStore::default());
        let gateway = Arc::new(StubGateway::default());
        let agents = Arc::new(StubAgents {
            agents: HashMap::from([(agent_id, agent)]),
        });
        let issuer = TokenIssuer::new(ApiCredentials::new("test-key", "test-secret").unwrap());
        let orchestrator = SessionOrchestrator::new(
            gateway.clone(),
            store.clone(),
            agents,
            issuer,
            "ws://localhost:7880",
        );
        Fixture {
            orchestrator,
            store,
            gateway,
            agent_id,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None)
    }

    fn started_event(room_name: &str, metadata: &str) -> WebhookEvent {
        WebhookEvent {
            event: "room_started".into(),
            id: Some("EV_started".into()),
            room: Some(Room {
                name: room_name.to_owned(),
                metadata: metadata.to_owned(),
                ..Room::default()
            }),
            participant: None,
        }
    }

    fn finished_event(room_name: &str, creation_time: i64) -> WebhookEvent {
        WebhookEvent {
            event: "room_finished".into(),
            id: Some("EV_finished".into()),
            room: Some(Room {
                name: room_name.to_owned(),
                creation_time,
                ..Room::default()
            }),
            participant: None,
        }
    }

    #[tokio::test]
    async fn full_lifecycle_pending_active_completed() {
        let f = fixture();
        let created = f
            .orchestrator
            .create_session(f.agent_id, "U1", true)
            .await
            .unwrap();

        assert!(created.room_name.contains(&f.agent_id.to_string()));
        assert!(!created.access_token.is_empty());
        assert_eq!(created.endpoint_url, "ws://localhost:7880");
        let stored = f.store.get(created.session_id).unwrap();
        assert_eq!(stored.status, SessionStatus::Pending);
        assert!(stored.metadata.is_test);

        let room_meta = format!(r#"{{"isTest":true,"agentId":"{}"}}"#, f.agent_id);
        let outcome = f
            .orchestrator
            .reconcile(&started_event(&created.room_name, &room_meta))
            .await
            .unwrap();
        assert_eq!(outcome, Reconciliation::Applied(SessionStatus::Active));
        let stored = f.store.get(created.session_id).unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert_eq!(stored.metadata.agent_id, Some(f.agent_id));

        let creation = Utc::now().timestamp() - 42;
        let outcome = f
            .orchestrator
            .reconcile(&finished_event(&created.room_name, creation))
            .await
            .unwrap();
        assert_eq!(outcome, Reconciliation::Applied(SessionStatus::Completed));
        let stored = f.store.get(created.session_id).unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.total_duration, Some(42));
        assert!(stored.ended_at.is_some());

        // Explicit end after the webhook already completed it: no-op success.
        let ended_at = stored.ended_at;
        let ended = f.orchestrator.end_session(created.session_id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert_eq!(ended.total_duration, Some(42));
        assert_eq!(ended.ended_at, ended_at);
    }

    #[tokio::test]
    async fn duplicate_room_finished_is_idempotent() {
        let f = fixture();
        let created = f
            .orchestrator
            .create_session(f.agent_id, "U1", false)
            .await
            .unwrap();
        let creation = Utc::now().timestamp() - 10;
        let event = finished_event(&created.room_name, creation);

        let first = f.orchestrator.reconcile(&event).await.unwrap();
        assert_eq!(first, Reconciliation::Applied(SessionStatus::Completed));
        let after_first = f.store.get(created.session_id).unwrap();

        let second = f.orchestrator.reconcile(&event).await.unwrap();
        assert_eq!(second, Reconciliation::Ignored);
        let after_second = f.store.get(created.session_id).unwrap();
        assert_eq!(after_second.status, after_first.status);
        assert_eq!(after_second.total_duration, after_first.total_duration);
        assert_eq!(after_second.ended_at, after_first.ended_at);
    }

    #[tokio::test]
    async fn completed_session_never_reactivates() {
        let f = fixture();
        let created = f
            .orchestrator
            .create_session(f.agent_id, "U1", false)
            .await
            .unwrap();
        f.orchestrator
            .reconcile(&finished_event(&created.room_name, Utc::now().timestamp()))
            .await
            .unwrap();

        // A late (reordered) room_started must not downgrade the session.
        let outcome = f
            .orchestrator
            .reconcile(&started_event(&created.room_name, "{}"))
            .await
            .unwrap();
        assert_eq!(outcome, Reconciliation::Ignored);
        let stored = f.store.get(created.session_id).unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn events_for_unknown_rooms_are_ignored() {
        let f = fixture();
        let outcome = f
            .orchestrator
            .reconcile(&started_event("agent-nobody-1-abc", "{}"))
            .await
            .unwrap();
        assert_eq!(outcome, Reconciliation::Ignored);
    }

    #[tokio::test]
    async fn participant_and_track_events_do_not_mutate() {
        let f = fixture();
        let created = f
            .orchestrator
            .create_session(f.agent_id, "U1", false)
            .await
            .unwrap();
        for kind in [
            "participant_joined",
            "participant_left",
            "track_published",
            "track_unpublished",
            "something_new",
        ] {
            let event = WebhookEvent {
                event: kind.into(),
                id: None,
                room: Some(Room {
                    name: created.room_name.clone(),
                    ..Room::default()
                }),
                participant: Some(Participant {
                    identity: "user-U1".into(),
                    ..Participant::default()
                }),
            };
            let outcome = f.orchestrator.reconcile(&event).await.unwrap();
            assert_eq!(outcome, Reconciliation::Ignored);
        }
        let stored = f.store.get(created.session_id).unwrap();
        assert_eq!(stored.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn room_names_are_unique_across_many_invocations() {
        let agent_id = Uuid::new_v4();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(SessionOrchestrator::generate_room_name(agent_id)));
        }
    }

    #[tokio::test]
    async fn unknown_agent_is_not_found_and_writes_nothing() {
        let missing = Uuid::new_v4();
        let mut agents = crate::store::MockAgentDirectory::new();
        agents
            .expect_find_agent()
            .withf(move |id| *id == missing)
            .returning(|_| Ok(None));

        let store = Arc::new(MemoryStore::default());
        let gateway = Arc::new(StubGateway::default());
        let issuer = TokenIssuer::new(ApiCredentials::new("test-key", "test-secret").unwrap());
        let orchestrator = SessionOrchestrator::new(
            gateway.clone(),
            store.clone(),
            Arc::new(agents),
            issuer,
            "ws://localhost:7880",
        );

        let err = orchestrator
            .create_session(missing, "U1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AgentNotFound(id) if id == missing));
        assert!(gateway.created.lock().unwrap().is_empty());
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_room_creation_writes_no_session() {
        let f = fixture();
        f.gateway.fail_create.store(true, Ordering::SeqCst);
        let err = f
            .orchestrator
            .create_session(f.agent_id, "U1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::RoomServer(_)));
        assert!(f.store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn end_session_unknown_id_is_not_found() {
        let f = fixture();
        let missing = Uuid::new_v4();
        let err = f.orchestrator.end_session(missing).await.unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn end_session_deletes_the_room() {
        let f = fixture();
        let created = f
            .orchestrator
            .create_session(f.agent_id, "U1", false)
            .await
            .unwrap();
        let ended = f.orchestrator.end_session(created.session_id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert!(ended.ended_at.is_some());
        assert_eq!(
            f.gateway.deleted.lock().unwrap().as_slice(),
            &[created.room_name]
        );
    }

    #[tokio::test]
    async fn metrics_for_unknown_session_is_none() {
        let f = fixture();
        let metrics = f.orchestrator.session_metrics(Uuid::new_v4()).await.unwrap();
        assert!(metrics.is_none());
    }

    #[tokio::test]
    async fn metrics_after_room_teardown_uses_stored_counters() {
        let f = fixture();
        let created = f
            .orchestrator
            .create_session(f.agent_id, "U1", false)
            .await
            .unwrap();
        f.orchestrator
            .reconcile(&finished_event(
                &created.room_name,
                Utc::now().timestamp() - 30,
            ))
            .await
            .unwrap();

        // get_room answers None: the room is gone.
        let metrics = f
            .orchestrator
            .session_metrics(created.session_id)
            .await
            .unwrap()
            .unwrap();
        assert!(metrics.room.is_none());
        assert!(metrics.participants.is_empty());
        assert_eq!(metrics.metrics.duration, 30);
        assert_eq!(metrics.metrics.participant_count, 0);
    }

    #[tokio::test]
    async fn metrics_with_live_room_reports_participants() {
        let f = fixture();
        let created = f
            .orchestrator
            .create_session(f.agent_id, "U1", false)
            .await
            .unwrap();
        *f.gateway.live_room.lock().unwrap() = Some(Room {
            name: created.room_name.clone(),
            ..Room::default()
        });
        *f.gateway.participants.lock().unwrap() = vec![
            Participant {
                identity: "user-U1".into(),
                ..Participant::default()
            },
            Participant {
                identity: "agent-worker".into(),
                ..Participant::default()
            },
        ];

        let metrics = f
            .orchestrator
            .session_metrics(created.session_id)
            .await
            .unwrap()
            .unwrap();
        assert!(metrics.room.is_some());
        assert_eq!(metrics.metrics.participant_count, 2);
    }

    #[tokio::test]
    async fn dispatch_worker_is_embedded_in_the_token() {
        let f = fixture_with(Some("parley-voice-worker"));
        let created = f
            .orchestrator
            .create_session(f.agent_id, "U9", true)
            .await
            .unwrap();
        assert_eq!(
            created.dispatch_agent_name.as_deref(),
            Some("parley-voice-worker")
        );

        let creds = ApiCredentials::new("test-key", "test-secret").unwrap();
        let claims = decode_claims(&created.access_token, &creds).unwrap();
        assert_eq!(claims.sub, "user-U9");
        let config = claims.room_config.unwrap();
        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.agents[0].agent_name, "parley-voice-worker");
    }

    #[tokio::test]
    async fn finished_event_without_creation_time_uses_metadata_marker() {
        let f = fixture();
        let created = f
            .orchestrator
            .create_session(f.agent_id, "U1", false)
            .await
            .unwrap();
        let started = Utc::now() - chrono::Duration::seconds(25);
        let metadata = format!(r#"{{"createdAt":"{}"}}"#, started.to_rfc3339());
        let event = WebhookEvent {
            event: "room_finished".into(),
            id: None,
            room: Some(Room {
                name: created.room_name.clone(),
                creation_time: 0,
                metadata,
                ..Room::default()
            }),
            participant: None,
        };
        f.orchestrator.reconcile(&event).await.unwrap();
        let stored = f.store.get(created.session_id).unwrap();
        let duration = stored.total_duration.unwrap();
        assert!((25..=27).contains(&duration), "duration was {duration}");
    }
}
