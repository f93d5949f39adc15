//! Authentication and decoding of room-server lifecycle webhooks.
//!
//! The room server signs each delivery with an HS256 JWT in the
//! `Authorization` header; its `sha256` claim is the base64 digest of the raw
//! body. Verification failure is expressed as `None`, the documented "reject,
//! unauthenticated" signal: the caller answers 401 and mutates nothing.
//! Unknown event kinds decode successfully and are ignored downstream.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::room::{Participant, Room};
use crate::token::ApiCredentials;

/// Lifecycle event kinds the orchestrator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    RoomStarted,
    RoomFinished,
    ParticipantJoined,
    ParticipantLeft,
    TrackPublished,
    TrackUnpublished,
    Unknown,
}

impl EventKind {
    fn from_wire(name: &str) -> Self {
        match name {
            "room_started" => EventKind::RoomStarted,
            "room_finished" => EventKind::RoomFinished,
            "participant_joined" => EventKind::ParticipantJoined,
            "participant_left" => EventKind::ParticipantLeft,
            "track_published" => EventKind::TrackPublished,
            "track_unpublished" => EventKind::TrackUnpublished,
            _ => EventKind::Unknown,
        }
    }
}

/// A decoded, authenticated lifecycle notification. Consumed once by the
/// orchestrator and discarded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Raw event name as sent on the wire; kept for logging unknown kinds.
    pub event: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub room: Option<Room>,
    #[serde(default)]
    pub participant: Option<Participant>,
}

impl WebhookEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::from_wire(&self.event)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WebhookClaims {
    iss: String,
    exp: i64,
    /// Base64 SHA-256 of the raw request body.
    sha256: String,
}

/// Verifies and decodes inbound webhook deliveries using the shared API
/// key/secret pair.
#[derive(Clone)]
pub struct WebhookReceiver {
    credentials: ApiCredentials,
}

impl WebhookReceiver {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self { credentials }
    }

    /// Returns the decoded event, or `None` when the signature is missing,
    /// invalid, or does not cover `body`.
    pub fn receive(&self, body: &str, authorization: Option<&str>) -> Option<WebhookEvent> {
        let token = authorization?.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.credentials.api_key()]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let claims = match jsonwebtoken::decode::<WebhookClaims>(
            token,
            &self.credentials.decoding_key(),
            &validation,
        ) {
            Ok(data) => data.claims,
            Err(err) => {
                debug!(error = %err, "webhook token verification failed");
                return None;
            }
        };

        let digest = BASE64.encode(Sha256::digest(body.as_bytes()));
        if digest != claims.sha256 {
            debug!("webhook body digest mismatch");
            return None;
        }

        match serde_json::from_str::<WebhookEvent>(body) {
            Ok(event) => Some(event),
            Err(err) => {
                debug!(error = %err, "webhook body did not decode as an event");
                None
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::sign_delivery;
    use super::*;

    const KEY: &str = "wh-key";
    const SECRET: &str = "wh-secret";

    fn receiver() -> WebhookReceiver {
        WebhookReceiver::new(ApiCredentials::new(KEY, SECRET).unwrap())
    }

    fn body(event: &str, room: &str) -> String {
        format!(r#"{{"event":"{event}","id":"EV_1","room":{{"name":"{room}","creationTime":"100"}}}}"#)
    }

    #[test]
    fn valid_delivery_decodes() {
        let body = body("room_started", "agent-a-room");
        let auth = sign_delivery(&body, KEY, SECRET);
        let event = receiver().receive(&body, Some(&auth)).unwrap();
        assert_eq!(event.kind(), EventKind::RoomStarted);
        assert_eq!(event.room.unwrap().name, "agent-a-room");
    }

    #[test]
    fn bearer_prefix_is_accepted() {
        let body = body("room_finished", "agent-b-room");
        let auth = format!("Bearer {}", sign_delivery(&body, KEY, SECRET));
        let event = receiver().receive(&body, Some(&auth)).unwrap();
        assert_eq!(event.kind(), EventKind::RoomFinished);
    }

    #[test]
    fn missing_header_is_rejected() {
        let body = body("room_started", "agent-c-room");
        assert!(receiver().receive(&body, None).is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = body("room_started", "agent-d-room");
        let auth = sign_delivery(&body, KEY, "some-other-secret");
        assert!(receiver().receive(&body, Some(&auth)).is_none());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let body = body("room_started", "agent-e-room");
        let auth = sign_delivery(&body, KEY, SECRET);
        let tampered = body.replace("agent-e-room", "agent-x-room");
        assert!(receiver().receive(&tampered, Some(&auth)).is_none());
    }

    #[test]
    fn unknown_event_kinds_decode() {
        let body = r#"{"event":"egress_ended","id":"EV_2"}"#;
        let auth = sign_delivery(body, KEY, SECRET);
        let event = receiver().receive(body, Some(&auth)).unwrap();
        assert_eq!(event.kind(), EventKind::Unknown);
        assert_eq!(event.event, "egress_ended");
    }
}
