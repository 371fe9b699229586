//! Sync error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Branch;
use crate::provider::ProviderError;
use crate::store::StoreError;

/// Step of a branch sync that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Listing the remote children failed.
    Fetch,
    /// Listing the local children failed.
    List,
    /// A kept association or field could not be resolved locally.
    Resolve,
    Insert,
    Update,
    Delete,
    /// The same global id appeared more than once remotely.
    Duplicate,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Fetch => "fetch",
            FailureKind::List => "list",
            FailureKind::Resolve => "resolve",
            FailureKind::Insert => "insert",
            FailureKind::Update => "update",
            FailureKind::Delete => "delete",
            FailureKind::Duplicate => "duplicate",
        };
        f.write_str(s)
    }
}

/// A failure scoped to a branch, and optionally to one item in it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{branch}: {kind}{}: {cause}", item_suffix(.item))]
pub struct SyncError {
    pub branch: Branch,
    pub kind: FailureKind,
    /// Global id or name of the failed item; `None` for branch-level errors.
    pub item: Option<String>,
    pub cause: String,
}

fn item_suffix(item: &Option<String>) -> String {
    match item {
        Some(item) => format!(" {item}"),
        None => String::new(),
    }
}

impl SyncError {
    pub fn branch(branch: &Branch, kind: FailureKind, cause: impl ToString) -> Self {
        Self {
            branch: branch.clone(),
            kind,
            item: None,
            cause: cause.to_string(),
        }
    }

    pub fn item(
        branch: &Branch,
        kind: FailureKind,
        item: impl Into<String>,
        cause: impl ToString,
    ) -> Self {
        Self {
            branch: branch.clone(),
            kind,
            item: Some(item.into()),
            cause: cause.to_string(),
        }
    }
}

/// Failures that end a whole pass.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("provider {0} is not registered")]
    UnknownProvider(String),

    #[error("provider probe failed: {0}")]
    Probe(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
