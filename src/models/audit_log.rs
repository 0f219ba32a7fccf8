use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    AuthLogin,
    AuthRegisterOauth,
    AuthRegister,
    AuthRegisterUpdate,
    AuthCompleteProfile,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::AuthLogin => "AUTH_LOGIN",
            AuditAction::AuthRegisterOauth => "AUTH_REGISTER_OAUTH",
            AuditAction::AuthRegister => "AUTH_REGISTER",
            AuditAction::AuthRegisterUpdate => "AUTH_REGISTER_UPDATE",
            AuditAction::AuthCompleteProfile => "AUTH_COMPLETE_PROFILE",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failure => "FAILURE",
        }
    }
}

/// Append-only audit row. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub action: AuditAction,
    pub affected_table: String,
    pub description: Option<String>,
    pub previous_data: Option<JsonValue>,
    pub current_data: Option<JsonValue>,
    pub user_agent: Option<String>,
    pub endpoint: Option<String>,
    pub client_ip: Option<String>,
    pub status: AuditStatus,
    pub processing_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub digest: String,
}

impl AuditLog {
    /// Content covered by the digest, with keys in sorted order.
    pub fn digest_payload(&self) -> JsonValue {
        json!({
            "id": self.id,
            "user_id": self.user_id,
            "action": self.action.as_str(),
            "affected_table": self.affected_table,
            "description": self.description,
            "previous_data": self.previous_data,
            "current_data": self.current_data,
            "user_agent": self.user_agent,
            "endpoint": self.endpoint,
            "client_ip": self.client_ip,
            "status": self.status.as_str(),
            "processing_time_ms": self.processing_time_ms,
            "created_at": self.created_at.to_rfc3339(),
        })
    }
}
