// Merge - last-writer-wins reconciliation of two documents
//
// Properties:
// - Idempotent: merge(D, D) == D
// - Union-complete: ids(merge(A, B)) == ids(A) ∪ ids(B)
// - Monotonic per item: a surviving copy is never older than both inputs
//
// Not commutative: same id, same timestamp, different content keeps the
// local copy. There is no causal history to break the tie.

use crate::document::{Document, Item};
use std::collections::{HashMap, HashSet};

/// Result of a merge with bookkeeping
#[derive(Clone, Debug)]
pub struct MergeOutcome {
    /// The merged document
    pub document: Document,
    /// Remote items that were unknown locally
    pub added: usize,
    /// Local items replaced by a strictly newer remote copy
    pub replaced: usize,
    /// Shared items where the local copy was kept
    pub unchanged: usize,
}

impl MergeOutcome {
    /// Check if the merge produced anything new for the local side
    pub fn changed(&self) -> bool {
        self.added > 0 || self.replaced > 0
    }
}

/// Merge `remote` into `local`, returning the merged document
pub fn merge(local: &Document, remote: &Document) -> Document {
    merge_with_result(local, remote).document
}

/// Merge `remote` into `local`, tracking what changed.
///
/// The output keeps the local document id. Local items stay in local order
/// (replaced in place); newly discovered items follow in remote order.
pub fn merge_with_result(local: &Document, remote: &Document) -> MergeOutcome {
    let local_index: HashMap<&str, usize> = local
        .items
        .iter()
        .enumerate()
        .map(|(i, item)| (item.id.as_str(), i))
        .collect();

    let mut items: Vec<Item> = local.items.clone();
    let mut appended: HashSet<&str> = HashSet::new();
    let mut added = 0;
    let mut replaced = 0;
    let mut unchanged = 0;

    for remote_item in &remote.items {
        match local_index.get(remote_item.id.as_str()) {
            None => {
                // A malformed remote list may repeat an id; first copy wins
                if appended.insert(remote_item.id.as_str()) {
                    items.push(remote_item.clone());
                    added += 1;
                }
            }
            Some(&i) => {
                if remote_item.updated_at > items[i].updated_at {
                    items[i] = remote_item.clone();
                    replaced += 1;
                } else {
                    unchanged += 1;
                }
            }
        }
    }

    MergeOutcome {
        document: Document {
            id: local.id.clone(),
            items,
        },
        added,
        replaced,
        unchanged,
    }
}
