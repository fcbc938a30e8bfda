//! Audit records for security violations and successful mutations.
//!
//! The engine never decides where audit data goes. It hands an
//! [`AuditRecord`] to an [`AuditSink`]; the default sink forwards records to
//! `tracing` under the `sfiles::audit` target, which the binary can route to
//! a rolling file.

use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tracing target audit events are emitted on.
pub const AUDIT_TARGET: &str = "sfiles::audit";

/// Identity attached to a request by the external auth gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Authenticated user id, if any.
    pub user_id: Option<String>,
    /// Client network address, if known.
    pub client_addr: Option<String>,
}

impl Actor {
    /// An actor with no identity.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// An actor identified by user id only.
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: Some(id.into()),
            client_addr: None,
        }
    }

    /// Attach a client address.
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.client_addr = Some(addr.into());
        self
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user = self.user_id.as_deref().unwrap_or("anonymous");
        match &self.client_addr {
            Some(addr) => write!(f, "{}@{}", user, addr),
            None => write!(f, "{}", user),
        }
    }
}

/// Outcome classification of an audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// A mutation or download completed.
    Success,
    /// A request was rejected for trying to leave the root.
    Violation,
    /// Suspicious but not blocked.
    Warning,
}

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    /// Operation name, e.g. `create_folder` or `path_traversal`.
    pub action: String,
    pub outcome: AuditOutcome,
    pub details: Vec<(String, String)>,
}

impl AuditRecord {
    /// Start a record stamped with a fresh id and the current time.
    pub fn new(actor: &Actor, action: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.clone(),
            action: action.into(),
            outcome,
            details: Vec::new(),
        }
    }

    /// Add a detail field.
    pub fn detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.push((key.into(), value.to_string()));
        self
    }

    /// Look up a detail value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn details_string(&self) -> String {
        self.details
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Record an event. Must not fail the calling operation.
    fn record(&self, record: AuditRecord);
}

/// Emits audit records as tracing events on [`AUDIT_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        let details = record.details_string();
        let user = record.actor.user_id.as_deref().unwrap_or("-");
        let addr = record.actor.client_addr.as_deref().unwrap_or("-");

        match record.outcome {
            AuditOutcome::Success => tracing::info!(
                target: AUDIT_TARGET,
                id = %record.id,
                user = user,
                addr = addr,
                action = %record.action,
                details = %details,
                "audit"
            ),
            AuditOutcome::Violation => tracing::warn!(
                target: AUDIT_TARGET,
                id = %record.id,
                user = user,
                addr = addr,
                action = %record.action,
                details = %details,
                "security violation"
            ),
            AuditOutcome::Warning => tracing::warn!(
                target: AUDIT_TARGET,
                id = %record.id,
                user = user,
                addr = addr,
                action = %record.action,
                details = %details,
                "security warning"
            ),
        }
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all collected records.
    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.read() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Records with the given action.
    pub fn with_action(&self, action: &str) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.action == action)
            .collect()
    }

    /// Records with the given outcome.
    pub fn with_outcome(&self, outcome: AuditOutcome) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.outcome == outcome)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        match self.records.write() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _record: AuditRecord) {}
}
