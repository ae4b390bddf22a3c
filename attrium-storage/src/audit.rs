//! Audit sinks.
//!
//! Stores report every audited mutation to an injected [`AuditLog`].
//! Recording is fire-and-forget: a sink that cannot persist an entry must
//! not fail the mutation that produced it.

use attrium_types::AuditEntry;
use std::sync::Mutex;
use tracing::info;

/// Receives audit entries from the stores.
pub trait AuditLog: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Emits each entry as a structured `tracing` event on `attrium::audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, entry: AuditEntry) {
        let before = entry
            .before
            .as_ref()
            .map(|s| serde_json::Value::Object(s.clone()).to_string());
        let after = entry
            .after
            .as_ref()
            .map(|s| serde_json::Value::Object(s.clone()).to_string());
        info!(
            target: "attrium::audit",
            actor = %entry.actor,
            kind = %entry.subject_kind,
            subject = %entry.subject_id,
            action = %entry.action,
            before = before.as_deref().unwrap_or("null"),
            after = after.as_deref().unwrap_or("null"),
            "audit"
        );
    }
}

/// Keeps entries in memory. Used by tests and by callers that want to
/// inspect what a batch of mutations recorded.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry recorded so far, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        match self.entries.lock() {
            Ok(mut entries) => entries.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, entry: AuditEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

/// Discards every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditLog;

impl AuditLog for NoopAuditLog {
    fn record(&self, _entry: AuditEntry) {}
}
