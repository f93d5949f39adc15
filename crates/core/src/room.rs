//! Adapter over the external room server's control API.
//!
//! Every operation is a live network call; the gateway holds no cache, so
//! each answer reflects server state at call time (eventually consistent with
//! the webhook stream). The wire format is the server's twirp-style JSON
//! encoding, which renders 64-bit integers as strings and byte payloads as
//! base64.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CoreError;
use crate::token::TokenIssuer;

/// Rooms auto-expire after sitting empty for this long.
const ROOM_EMPTY_TIMEOUT_SECS: u32 = 300;

/// One human, one or two agent workers, headroom for observers.
const ROOM_MAX_PARTICIPANTS: u32 = 5;

/// Accepts both native numbers and the string-encoded int64s the JSON-proto
/// encoding produces.
fn de_i64_lenient<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(de::Error::custom),
    }
}

/// Live room snapshot as reported by the room server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Room {
    pub sid: String,
    pub name: String,
    pub metadata: String,
    /// Unix seconds; zero when the server did not report it.
    #[serde(deserialize_with = "de_i64_lenient")]
    pub creation_time: i64,
    pub num_participants: u32,
}

/// A connected participant, human or agent worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Participant {
    pub sid: String,
    pub identity: String,
    pub metadata: String,
    #[serde(deserialize_with = "de_i64_lenient")]
    pub joined_at: i64,
}

/// Delivery mode for in-room data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPacketKind {
    /// Ordered and retried.
    Reliable,
    /// Best effort, unordered.
    Lossy,
}

/// Options for [`RoomGateway::send_data`]. Empty destinations broadcast to
/// every current participant.
#[derive(Debug, Clone, Default)]
pub struct SendDataOptions {
    pub destination_sids: Vec<String>,
    pub lossy: bool,
    pub topic: Option<String>,
}

/// Thin async boundary over the room server. The orchestrator depends on
/// this trait; production wires in [`HttpRoomGateway`], tests wire in fakes.
#[async_trait]
pub trait RoomGateway: Send + Sync {
    /// Creates a room carrying `metadata` (the serialized agent config plus a
    /// creation marker), with the standard idle timeout and participant cap.
    async fn create_room(&self, name: &str, metadata: &str) -> Result<Room, CoreError>;

    /// Deletes a room. Deleting a room that no longer exists is a success.
    async fn delete_room(&self, name: &str) -> Result<(), CoreError>;

    /// Returns `None` when the room does not exist or the query fails;
    /// absence is a valid outcome, not an error.
    async fn get_room(&self, name: &str) -> Option<Room>;

    async fn list_participants(&self, name: &str) -> Result<Vec<Participant>, CoreError>;

    async fn remove_participant(&self, name: &str, identity: &str) -> Result<(), CoreError>;

    async fn send_data(
        &self,
        name: &str,
        payload: &[u8],
        options: SendDataOptions,
    ) -> Result<(), CoreError>;

    async fn update_participant_metadata(
        &self,
        name: &str,
        identity: &str,
        metadata: &str,
    ) -> Result<(), CoreError>;
}

/// reqwest-backed gateway speaking the control API over HTTP. The underlying
/// client and signing key are read-only after construction, so one instance
/// serves all requests concurrently.
pub struct HttpRoomGateway {
    http: reqwest::Client,
    base_url: String,
    issuer: TokenIssuer,
}

impl HttpRoomGateway {
    /// `ws_url` is the endpoint participants connect to (`ws://` or
    /// `wss://`); control calls go to its HTTP equivalent.
    pub fn new(ws_url: &str, issuer: TokenIssuer) -> Self {
        let base_url = ws_url
            .replacen("ws://", "http://", 1)
            .replacen("wss://", "https://", 1);
        Self {
            http: reqwest::Client::new(),
            base_url,
            issuer,
        }
    }

    async fn call(
        &self,
        method: &str,
        room: Option<&str>,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, CoreError> {
        let token = self.issuer.issue_admin(room)?;
        let url = format!("{}/twirp/livekit.RoomService/{method}", self.base_url);
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        Ok(response)
    }

    async fn call_ok(
        &self,
        method: &str,
        room: Option<&str>,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, CoreError> {
        let response = self.call(method, room, body).await?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(CoreError::RoomServer(format!(
                "{method} returned {status}: {detail}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl RoomGateway for HttpRoomGateway {
    async fn create_room(&self, name: &str, metadata: &str) -> Result<Room, CoreError> {
        let response = self
            .call_ok(
                "CreateRoom",
                Some(name),
                serde_json::json!({
                    "name": name,
                    "emptyTimeout": ROOM_EMPTY_TIMEOUT_SECS,
                    "maxParticipants": ROOM_MAX_PARTICIPANTS,
                    "metadata": metadata,
                }),
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn delete_room(&self, name: &str) -> Result<(), CoreError> {
        let response = self
            .call("DeleteRoom", Some(name), serde_json::json!({ "room": name }))
            .await?;
        // Idempotent by contract: a room torn down behind our back is fine.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(CoreError::RoomServer(format!(
                "DeleteRoom returned {status}"
            )));
        }
        Ok(())
    }

    async fn get_room(&self, name: &str) -> Option<Room> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct ListRoomsResponse {
            rooms: Vec<Room>,
        }

        let result = self
            .call_ok(
                "ListRooms",
                Some(name),
                serde_json::json!({ "names": [name] }),
            )
            .await;
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!(room = name, error = %err, "room lookup failed, treating as absent");
                return None;
            }
        };
        match response.json::<ListRoomsResponse>().await {
            Ok(list) => list.rooms.into_iter().next(),
            Err(err) => {
                warn!(room = name, error = %err, "room lookup decode failed, treating as absent");
                None
            }
        }
    }

    async fn list_participants(&self, name: &str) -> Result<Vec<Participant>, CoreError> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct ListParticipantsResponse {
            participants: Vec<Participant>,
        }

        let response = self
            .call_ok(
                "ListParticipants",
                Some(name),
                serde_json::json!({ "room": name }),
            )
            .await?;
        let list: ListParticipantsResponse = response.json().await?;
        Ok(list.participants)
    }

    async fn remove_participant(&self, name: &str, identity: &str) -> Result<(), CoreError> {
        self.call_ok(
            "RemoveParticipant",
            Some(name),
            serde_json::json!({ "room": name, "identity": identity }),
        )
        .await?;
        Ok(())
    }

    async fn send_data(
        &self,
        name: &str,
        payload: &[u8],
        options: SendDataOptions,
    ) -> Result<(), CoreError> {
        let kind = if options.lossy {
            DataPacketKind::Lossy
        } else {
            DataPacketKind::Reliable
        };
        self.call_ok(
            "SendData",
            Some(name),
            serde_json::json!({
                "room": name,
                "data": BASE64.encode(payload),
                "kind": match kind {
                    DataPacketKind::Reliable => "RELIABLE",
                    DataPacketKind::Lossy => "LOSSY",
                },
                "destinationSids": options.destination_sids,
                "topic": options.topic,
            }),
        )
        .await?;
        Ok(())
    }

    async fn update_participant_metadata(
        &self,
        name: &str,
        identity: &str,
        metadata: &str,
    ) -> Result<(), CoreError> {
        self.call_ok(
            "UpdateParticipant",
            Some(name),
            serde_json::json!({ "room": name, "identity": identity, "metadata": metadata }),
        )
        .await?;
        Ok(())
    }
}
