//! Audit logging
//!
//! Shared audit logger for all cirrus components. Non-blocking and
//! fault-tolerant: events always go to `tracing`, and are persisted through
//! a [`Batcher`] when storage is attached. A broken or missing store never
//! blocks or fails the caller.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::batcher::Batcher;
use crate::storage::LogManager;
use crate::{LogEntry, LogLevel};

/// Audit logger for one component.
pub struct AuditLogger {
    component: String,
    batcher: Mutex<Option<Batcher>>,
}

impl AuditLogger {
    /// Logger that only writes to `tracing`.
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            batcher: Mutex::new(None),
        }
    }

    /// Logger that also persists entries. Must be created inside a tokio
    /// runtime since it spawns the batch writer.
    pub fn with_storage(component: &str, storage: Arc<LogManager>) -> Self {
        Self {
            component: component.to_string(),
            batcher: Mutex::new(Some(Batcher::new(storage))),
        }
    }

    /// Create a noop audit logger (for testing)
    pub fn new_noop() -> Self {
        Self::new("")
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Start building an entry.
    pub fn record(&self, level: LogLevel, message: impl Into<String>) -> Record<'_> {
        Record {
            logger: self,
            entry: LogEntry::new(level, self.component.clone(), message),
        }
    }

    /// Log a plain event related to `object_ids`.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, object_ids: Vec<String>) {
        self.record(level, message).objects(object_ids).send();
    }

    /// Write `entry` to tracing and hand it to the batcher.
    pub fn emit(&self, entry: LogEntry) {
        trace_entry(&entry);

        let Ok(guard) = self.batcher.lock() else {
            debug!("Audit batcher lock poisoned, entry not persisted");
            return;
        };
        if let Some(batcher) = guard.as_ref() {
            batcher.submit(entry);
        }
    }

    /// Flush pending entries and detach storage. Later events are only
    /// traced.
    pub async fn shutdown(&self) {
        let batcher = match self.batcher.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(batcher) = batcher {
            batcher.shutdown().await;
        }
    }
}

fn trace_entry(entry: &LogEntry) {
    let component = entry.component.as_str();
    let objects = &entry.related_object_ids;
    let action = entry.action.as_deref().unwrap_or("");
    let correlation = entry.correlation_id.as_deref().unwrap_or("");
    let message = entry.message.as_str();

    match entry.level {
        LogLevel::Emergency | LogLevel::Alert | LogLevel::Critical | LogLevel::Error => {
            tracing::error!(target: "audit", component, action, correlation, objects = ?objects, success = ?entry.success, "{}", message)
        }
        LogLevel::Warn => {
            tracing::warn!(target: "audit", component, action, correlation, objects = ?objects, success = ?entry.success, "{}", message)
        }
        LogLevel::Notice | LogLevel::Audit | LogLevel::Info => {
            tracing::info!(target: "audit", component, action, correlation, objects = ?objects, success = ?entry.success, "{}", message)
        }
        LogLevel::Debug => {
            tracing::debug!(target: "audit", component, action, correlation, objects = ?objects, success = ?entry.success, "{}", message)
        }
    }
}

/// Builder returned by [`AuditLogger::record`].
#[must_use = "call send() to emit the entry"]
pub struct Record<'a> {
    logger: &'a AuditLogger,
    entry: LogEntry,
}

impl Record<'_> {
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.entry.action = Some(action.into());
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.entry.success = Some(success);
        self
    }

    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.entry.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn objects(mut self, object_ids: Vec<String>) -> Self {
        self.entry.related_object_ids = object_ids;
        self
    }

    pub fn send(self) {
        self.logger.emit(self.entry);
    }
}

/// Create a shared audit logger
pub fn create_audit_logger(component: &str, storage: Option<Arc<LogManager>>) -> Arc<AuditLogger> {
    Arc::new(match storage {
        Some(storage) => AuditLogger::with_storage(component, storage),
        None => AuditLogger::new(component),
    })
}
