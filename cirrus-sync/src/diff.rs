//! Set comparison of local rows against remote descriptors.
//!
//! [`diff`] is pure: it never touches the store or the provider and runs in
//! O(n + m) by indexing the remote side on its global id.

use std::collections::HashMap;

use crate::model::ResourceRow;

/// Local side of a comparison.
pub trait LocalKeyed {
    /// The remote id this record mirrors, if it was ever synced.
    fn external_id(&self) -> Option<&str>;
}

/// Remote side of a comparison.
pub trait RemoteKeyed {
    fn global_id(&self) -> &str;
}

impl LocalKeyed for ResourceRow {
    fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }
}

/// Result of [`diff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition<L, R> {
    /// Local records whose external id no longer appears remotely.
    pub to_remove: Vec<L>,
    /// Remote records with no local counterpart, in remote order.
    pub to_add: Vec<R>,
    /// Matched pairs, in remote order.
    pub to_keep: Vec<(L, R)>,
    /// Local records without an external id. They were not created by a
    /// sync and are left alone.
    pub untracked: Vec<L>,
}

impl<L, R> Default for Partition<L, R> {
    fn default() -> Self {
        Self {
            to_remove: Vec::new(),
            to_add: Vec::new(),
            to_keep: Vec::new(),
            untracked: Vec::new(),
        }
    }
}

/// Partition `local` and `remote` by external id.
///
/// Every remote record ends up in exactly one of `to_add` or `to_keep`, and
/// every local record in exactly one of `to_remove`, `to_keep` or
/// `untracked`. If several remote records share a global id the first one
/// is matched and later ones land in `to_add`; callers that care dedupe
/// before diffing. If several local records share an external id the first
/// one is kept and the others are removed.
pub fn diff<L: LocalKeyed, R: RemoteKeyed>(local: Vec<L>, remote: Vec<R>) -> Partition<L, R> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(remote.len());
    for (i, r) in remote.iter().enumerate() {
        index.entry(r.global_id().to_string()).or_insert(i);
    }

    let mut matched: Vec<Option<L>> = std::iter::repeat_with(|| None).take(remote.len()).collect();
    let mut partition = Partition::default();

    for l in local {
        let slot = match l.external_id() {
            None => {
                partition.untracked.push(l);
                continue;
            }
            Some(ext) => index.get(ext).copied(),
        };
        match slot {
            Some(i) if matched[i].is_none() => matched[i] = Some(l),
            _ => partition.to_remove.push(l),
        }
    }

    for (r, l) in remote.into_iter().zip(matched) {
        match l {
            Some(l) => partition.to_keep.push((l, r)),
            None => partition.to_add.push(r),
        }
    }

    partition
}
