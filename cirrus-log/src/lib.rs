//! cirrus-log: append-only audit log for cirrus components
//!
//! Sync passes record what they did (branch results, per-item failures,
//! provider status changes) through an [`AuditLogger`]. Every event is
//! mirrored to `tracing`; when a [`LogManager`] is attached the event is
//! also persisted to a redb database and can be queried back by object id
//! or by the correlation id of the pass that produced it.
//!
//! # Example
//! ```ignore
//! use cirrus_log::{create_audit_logger, LogLevel, LogManager};
//!
//! let storage = Arc::new(LogManager::new("/var/lib/cirrus/log")?);
//! let audit = create_audit_logger("sync", Some(storage));
//! audit
//!     .record(LogLevel::Audit, "zone synced")
//!     .correlation(job_id)
//!     .objects(vec![zone_id])
//!     .send();
//! ```

mod audit;
mod batcher;
pub mod entry;
pub mod storage;

pub use audit::{create_audit_logger, AuditLogger, Record};
pub use batcher::Batcher;
pub use entry::{LogEntry, LogLevel};
pub use storage::{LogManager, LogQuery};
