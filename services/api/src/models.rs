//! API Models
//!
//! Request and response payloads for the session endpoints, doubling as the
//! OpenAPI component schemas via `utoipa`.

use parley_core::orchestrator::CreatedSession;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn default_is_test() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionPayload {
    #[schema(value_type = String, format = Uuid)]
    pub agent_id: Uuid,
    #[serde(default = "default_is_test")]
    pub is_test: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigBody {
    pub instructions: String,
}

/// Everything a client needs to join the provisioned room.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    pub room_name: String,
    pub access_token: String,
    pub endpoint_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_agent_name: Option<String>,
    pub agent_config: AgentConfigBody,
}

impl From<CreatedSession> for CreateSessionResponse {
    fn from(created: CreatedSession) -> Self {
        Self {
            session_id: created.session_id,
            room_name: created.room_name,
            access_token: created.access_token,
            endpoint_url: created.endpoint_url,
            dispatch_agent_name: created.dispatch_agent_name,
            agent_config: AgentConfigBody {
                instructions: created.agent_config.instructions,
            },
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EndSessionResponse {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
