//! Per-branch sync outcome.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Counters and errors of one branch sync.
///
/// `fatal` is set when the branch could not run at all (remote listing or
/// local listing failed). Item-level errors are collected in `errors` and
/// never abort the branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub added: u32,
    pub add_errors: u32,
    pub updated: u32,
    pub update_errors: u32,
    pub deleted: u32,
    pub delete_errors: u32,
    pub errors: Vec<SyncError>,
    pub fatal: Option<SyncError>,
}

impl SyncResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self) {
        self.added += 1;
    }

    pub fn add_error(&mut self, err: SyncError) {
        self.add_errors += 1;
        self.errors.push(err);
    }

    pub fn update(&mut self) {
        self.updated += 1;
    }

    pub fn update_error(&mut self, err: SyncError) {
        self.update_errors += 1;
        self.errors.push(err);
    }

    pub fn delete(&mut self) {
        self.deleted += 1;
    }

    pub fn delete_error(&mut self, err: SyncError) {
        self.delete_errors += 1;
        self.errors.push(err);
    }

    /// Item error that is not tied to one of the counters.
    pub fn item_error(&mut self, err: SyncError) {
        self.errors.push(err);
    }

    pub fn fail(&mut self, err: SyncError) {
        self.fatal = Some(err);
    }

    /// The branch could not run; its subtree should not be walked.
    pub fn is_error(&self) -> bool {
        self.fatal.is_some()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len() + usize::from(self.fatal.is_some())
    }

    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.deleted == 0 && self.error_count() == 0
    }

    /// `removed 1 failed 0 updated 2 failed 0 added 3 failed 1`
    pub fn summary(&self) -> String {
        format!(
            "removed {} failed {} updated {} failed {} added {} failed {}",
            self.deleted,
            self.delete_errors,
            self.updated,
            self.update_errors,
            self.added,
            self.add_errors
        )
    }
}
