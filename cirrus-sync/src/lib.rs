//! cirrus-sync: mirrors a cloud provider's resource tree into the local
//! inventory.
//!
//! A pass walks the provider top-down (regions, zones, vpcs, storages,
//! hosts, VMs and their associations). For every parent it lists the
//! remote children, diffs them against the local rows by global id and
//! applies removals, updates and additions. Failures are scoped to the
//! branch they happened in; the walk keeps going with the siblings and
//! every outcome ends up in one [`SyncReport`].

pub mod aggregate;
pub mod audit;
pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod executor;
pub mod lock;
pub mod model;
pub mod provider;
pub mod resolve;
pub mod result;
pub mod scope;
pub mod store;
pub mod task;
pub mod walker;

pub use aggregate::{JobStatus, ResultAggregator, SyncEvent, SyncReport, SyncTotals};
pub use audit::SyncAuditLogger;
pub use config::{BranchPolicy, SyncConfig};
pub use error::{FailureKind, SyncError, TaskError};
pub use events::{Action, EventSink};
pub use executor::SyncExecutor;
pub use model::{Branch, EntityRef, ResourceKind, ResourceRow};
pub use provider::{CloudProvider, Inventory, InventoryProvider, ProviderError};
pub use result::SyncResult;
pub use scope::SyncRange;
pub use store::{DataStore, MemoryStore, SqliteStore};
pub use task::SyncEngine;
