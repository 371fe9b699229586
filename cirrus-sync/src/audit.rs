//! Sync audit logging, built on the shared cirrus-log audit logger.

use std::sync::Arc;

use cirrus_log::{AuditLogger, LogLevel};

use crate::events::{Action, EventSink};
use crate::model::EntityRef;

/// Audit logger for sync events.
pub struct SyncAuditLogger {
    inner: Arc<AuditLogger>,
}

impl SyncAuditLogger {
    pub fn new(inner: Arc<AuditLogger>) -> Self {
        Self { inner }
    }

    /// Create a noop audit logger (for testing)
    pub fn new_noop() -> Self {
        Self {
            inner: Arc::new(AuditLogger::new_noop()),
        }
    }

    /// Flush persisted entries.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

fn event_level(action: Action) -> LogLevel {
    match action {
        Action::SyncCreate | Action::SyncUpdate | Action::SyncDelete | Action::SetStatus => {
            LogLevel::Audit
        }
        Action::SyncStart | Action::SyncComplete => LogLevel::Info,
        Action::CloudSync | Action::CloudFullSync => LogLevel::Notice,
    }
}

impl EventSink for SyncAuditLogger {
    fn log_event(&self, job_id: &str, entity: &EntityRef, action: Action, detail: &str) {
        self.inner
            .record(event_level(action), format!("{entity}: {detail}"))
            .action(action.as_str())
            .correlation(job_id)
            .objects(vec![entity.id.clone()])
            .send();
    }

    fn log_action_audit(
        &self,
        job_id: &str,
        entity: &EntityRef,
        action: Action,
        detail: &str,
        success: bool,
    ) {
        let level = if success {
            LogLevel::Audit
        } else {
            LogLevel::Error
        };
        self.inner
            .record(level, format!("{entity}: {detail}"))
            .action(action.as_str())
            .success(success)
            .correlation(job_id)
            .objects(vec![entity.id.clone()])
            .send();
    }
}
