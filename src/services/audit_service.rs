//! Best-effort audit trail.
//!
//! Records are sealed with a digest and handed to the sink on a spawned task.
//! The caller never sees a sink failure; failures are logged and published on
//! a broadcast channel instead.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::database::store::AuditSink;
use crate::dto::auth_dto::RequestContext;
use crate::models::audit_log::{AuditAction, AuditLog, AuditStatus};
use crate::utils::crypto::{content_digest, digest_matches};
use crate::utils::time::now;

const FAILURE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub user_id: Option<String>,
    pub action: AuditAction,
    pub table: String,
    pub description: Option<String>,
    pub previous_data: Option<JsonValue>,
    pub current_data: Option<JsonValue>,
    pub user_agent: Option<String>,
    pub endpoint: Option<String>,
    pub client_ip: Option<String>,
    pub status: AuditStatus,
    pub processing_time_ms: Option<i64>,
}

impl AuditEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            user_id: None,
            action,
            table: "users".to_string(),
            description: None,
            previous_data: None,
            current_data: None,
            user_agent: None,
            endpoint: None,
            client_ip: None,
            status: AuditStatus::Success,
            processing_time_ms: None,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn previous<T: Serialize>(mut self, value: Option<&T>) -> Self {
        self.previous_data = value.and_then(snapshot);
        self
    }

    pub fn current<T: Serialize>(mut self, value: Option<&T>) -> Self {
        self.current_data = value.and_then(snapshot);
        self
    }

    pub fn request(mut self, ctx: &RequestContext) -> Self {
        self.user_agent = ctx.user_agent.clone();
        self.endpoint = ctx.endpoint.clone();
        self.client_ip = ctx.ip.clone();
        self
    }

    pub fn failed(mut self) -> Self {
        self.status = AuditStatus::Failure;
        self
    }

    pub fn elapsed_since(mut self, started: Instant) -> Self {
        self.processing_time_ms = Some(started.elapsed().as_millis() as i64);
        self
    }
}

/// Serializes a snapshot, dropping it if it cannot be represented as JSON.
fn snapshot<T: Serialize>(value: &T) -> Option<JsonValue> {
    match serde_json::to_value(value) {
        Ok(JsonValue::Null) => None,
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(error = %e, "Audit snapshot is not serializable; storing without it");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditFailure {
    pub record_id: Uuid,
    pub action: AuditAction,
    pub user_id: Option<String>,
    pub error: String,
}

#[derive(Clone)]
pub struct AuditService {
    sink: Arc<dyn AuditSink>,
    signing_key: Option<Arc<[u8]>>,
    failures: broadcast::Sender<AuditFailure>,
}

impl AuditService {
    pub fn new(sink: Arc<dyn AuditSink>, signing_key: Option<String>) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            sink,
            signing_key: signing_key.map(|k| Arc::from(k.into_bytes().into_boxed_slice())),
            failures,
        }
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<AuditFailure> {
        self.failures.subscribe()
    }

    /// Dispatches the write and returns immediately. Awaiting the handle is optional.
    pub fn record(&self, entry: AuditEntry) -> JoinHandle<()> {
        let log = self.seal(entry);
        let this = self.clone();
        tokio::spawn(async move { this.write(log).await })
    }

    pub fn seal(&self, entry: AuditEntry) -> AuditLog {
        let mut log = AuditLog {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            action: entry.action,
            affected_table: entry.table,
            description: entry.description,
            previous_data: entry.previous_data,
            current_data: entry.current_data,
            user_agent: entry.user_agent,
            endpoint: entry.endpoint,
            client_ip: entry.client_ip,
            status: entry.status,
            processing_time_ms: entry.processing_time_ms,
            created_at: now(),
            digest: String::new(),
        };
        log.digest = content_digest(&Self::canonical(&log), self.signing_key.as_deref());
        log
    }

    pub fn verify_digest(&self, log: &AuditLog) -> bool {
        digest_matches(&Self::canonical(log), self.signing_key.as_deref(), &log.digest)
    }

    fn canonical(log: &AuditLog) -> Vec<u8> {
        serde_json::to_vec(&log.digest_payload()).unwrap_or_default()
    }

    async fn write(&self, log: AuditLog) {
        match self.sink.append(&log).await {
            Ok(()) => {
                tracing::debug!(action = %log.action, record_id = %log.id, "Audit record written");
            }
            Err(e) => {
                tracing::warn!(
                    action = %log.action,
                    record_id = %log.id,
                    user_id = ?log.user_id,
                    error = %e,
                    "Failed to write audit record"
                );
                let _ = self.failures.send(AuditFailure {
                    record_id: log.id,
                    action: log.action,
                    user_id: log.user_id,
                    error: e.to_string(),
                });
            }
        }
    }
}
