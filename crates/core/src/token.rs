//! Room-scoped access credentials.
//!
//! Tokens are HS256 JWTs signed with the process-wide room-server key pair.
//! A participant token grants join/publish/subscribe/self-metadata rights for
//! exactly one room and may carry a [`RoomConfiguration`] so the room server
//! auto-dispatches agent workers when the room comes up. Admin tokens are
//! short-lived and scoped for the control API.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default participant token lifetime.
fn default_token_ttl() -> Duration {
    Duration::hours(6)
}

/// Lifetime of admin tokens minted per control-API request.
fn admin_token_ttl() -> Duration {
    Duration::minutes(10)
}

/// Marker metadata attached when the caller supplies none, identifying the
/// participant as a non-human voice agent.
const VOICE_AGENT_METADATA: &str = r#"{"isVoiceAgent":true}"#;

/// Shared API key/secret pair for the room server. Read-only after startup;
/// safe for unsynchronized concurrent use.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    api_secret: String,
}

impl ApiCredentials {
    /// Fails with [`CoreError::Configuration`] when either half is empty.
    /// Callers treat that as fatal at process start.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Result<Self, CoreError> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(CoreError::Configuration);
        }
        Ok(Self { api_key, api_secret })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(self.api_secret.as_bytes())
    }

    pub(crate) fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(self.api_secret.as_bytes())
    }
}

/// Per-room permissions carried in the token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrants {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default)]
    pub room_join: bool,
    #[serde(default)]
    pub room_create: bool,
    #[serde(default)]
    pub room_list: bool,
    #[serde(default)]
    pub room_admin: bool,
    #[serde(default)]
    pub can_publish: bool,
    #[serde(default)]
    pub can_subscribe: bool,
    #[serde(default)]
    pub can_update_own_metadata: bool,
}

/// Dispatch instruction for a single agent worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAgentDispatch {
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

/// Agent workers the room server launches when the room is created. Built
/// per session-creation call and discarded after token issuance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfiguration {
    #[serde(default)]
    pub agents: Vec<RoomAgentDispatch>,
}

/// Claims carried by every issued token. Public so token consumers (and
/// tests) can verify what a credential grants.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub nbf: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    pub video: VideoGrants,
    #[serde(
        default,
        rename = "roomConfig",
        skip_serializing_if = "Option::is_none"
    )]
    pub room_config: Option<RoomConfiguration>,
}

/// Issues signed join credentials. One instance per process, injected into
/// the orchestrator and the HTTP gateway.
#[derive(Clone)]
pub struct TokenIssuer {
    credentials: ApiCredentials,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self {
            credentials,
            ttl: default_token_ttl(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Signs a participant token scoped to `room_name`. The token is not
    /// single-use; join semantics are the room server's concern.
    pub fn issue(
        &self,
        identity: &str,
        room_name: &str,
        metadata: Option<&str>,
        room_config: Option<RoomConfiguration>,
    ) -> Result<String, CoreError> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            iss: self.credentials.api_key.clone(),
            sub: identity.to_owned(),
            nbf: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            metadata: Some(metadata.unwrap_or(VOICE_AGENT_METADATA).to_owned()),
            video: VideoGrants {
                room: Some(room_name.to_owned()),
                room_join: true,
                can_publish: true,
                can_subscribe: true,
                can_update_own_metadata: true,
                ..VideoGrants::default()
            },
            room_config,
        };
        self.sign(&claims)
    }

    /// Signs a short-lived token carrying admin grants for control-API calls.
    pub fn issue_admin(&self, room_name: Option<&str>) -> Result<String, CoreError> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            iss: self.credentials.api_key.clone(),
            sub: self.credentials.api_key.clone(),
            nbf: now.timestamp(),
            exp: (now + admin_token_ttl()).timestamp(),
            metadata: None,
            video: VideoGrants {
                room: room_name.map(str::to_owned),
                room_create: true,
                room_list: true,
                room_admin: true,
                ..VideoGrants::default()
            },
            room_config: None,
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &AccessTokenClaims) -> Result<String, CoreError> {
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.credentials.encoding_key(),
        )?;
        Ok(token)
    }
}

/// Decodes a token back into its claims, verifying signature, expiry, and
/// issuer.
pub fn decode_claims(
    token: &str,
    credentials: &ApiCredentials,
) -> Result<AccessTokenClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[credentials.api_key()]);
    validation.set_required_spec_claims(&["exp", "iss"]);
    let data = jsonwebtoken::decode::<AccessTokenClaims>(
        token,
        &credentials.decoding_key(),
        &validation,
    )?;
    Ok(data.claims)
}
