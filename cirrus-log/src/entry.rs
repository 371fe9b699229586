//! Log entry types and their on-disk encoding.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

/// Severity of a log entry.
///
/// `Audit` marks operator-relevant state changes (rows added, removed,
/// provider status flips). It sits between `Notice` and `Info` in routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum LogLevel {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warn = 4,
    Notice = 5,
    Audit = 6,
    Info = 7,
    Debug = 8,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Emergency => "emergency",
            LogLevel::Alert => "alert",
            LogLevel::Critical => "critical",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Notice => "notice",
            LogLevel::Audit => "audit",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// ULID; empty until the entry is stamped.
    pub id: String,
    /// Nanoseconds since the Unix epoch; 0 until stamped.
    pub timestamp_ns: i64,
    pub message: String,
    pub level: LogLevel,
    pub component: String,
    /// Action name (`sync_start`, `cloud_sync`, ...), if any.
    #[serde(default)]
    pub action: Option<String>,
    /// Outcome for action audits; `None` for plain events.
    #[serde(default)]
    pub success: Option<bool>,
    /// Id of the job this entry belongs to (e.g. a sync pass).
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub related_object_ids: Vec<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            timestamp_ns: 0,
            message: message.into(),
            level,
            component: component.into(),
            action: None,
            success: None,
            correlation_id: None,
            related_object_ids: Vec::new(),
        }
    }

    /// Assign id and timestamp if they are not set yet.
    ///
    /// The ULID's millisecond part follows `timestamp_ns`, so time-range
    /// scans over the primary table stay correct. Entries stamped from the
    /// same generator within one millisecond keep their submission order.
    pub fn stamp(&mut self, generator: &mut Generator) {
        if !self.id.is_empty() {
            return;
        }
        if self.timestamp_ns == 0 {
            self.timestamp_ns = now_ns();
        }
        let at = UNIX_EPOCH + Duration::from_nanos(self.timestamp_ns.max(0) as u64);
        let ulid = generator
            .generate_from_datetime(at)
            .unwrap_or_else(|_| Ulid::from_datetime(at));
        self.id = ulid.to_string();
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("Failed to encode log entry")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("Failed to decode log entry")
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}
