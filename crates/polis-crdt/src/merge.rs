//! Join-semilattice merge.
//!
//! `merge` must be commutative, associative and idempotent. Collections are
//! grow-only maps keyed by unique id; entries present on both sides are
//! joined entry-wise.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use tracing::warn;

/// A replicated value with a join operation.
pub trait Merge {
    /// Join `other` into `self`. Returns true if `self` changed.
    fn merge(&mut self, other: &Self) -> bool;
}

/// Counts of what a merge changed locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Entries that were unknown before.
    pub added: usize,
    /// Known entries that moved forward.
    pub updated: usize,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0
    }

    pub fn absorb(&mut self, other: MergeReport) {
        self.added += other.added;
        self.updated += other.updated;
    }
}

/// Union two id-keyed maps, joining entries present on both sides.
pub fn merge_map<K, V>(local: &mut BTreeMap<K, V>, remote: &BTreeMap<K, V>) -> MergeReport
where
    K: Ord + Clone,
    V: Merge + Clone,
{
    let mut report = MergeReport::default();
    for (key, theirs) in remote {
        match local.get_mut(key) {
            Some(ours) => {
                if ours.merge(theirs) {
                    report.updated += 1;
                }
            }
            None => {
                local.insert(key.clone(), theirs.clone());
                report.added += 1;
            }
        }
    }
    report
}

impl<K, V> Merge for BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Merge + Clone,
{
    fn merge(&mut self, other: &Self) -> bool {
        !merge_map(self, other).is_empty()
    }
}

impl<T: Ord + Clone> Merge for BTreeSet<T> {
    fn merge(&mut self, other: &Self) -> bool {
        merge_set(self, other)
    }
}

impl Merge for String {
    fn merge(&mut self, other: &Self) -> bool {
        merge_immutable(self, other, "string")
    }
}

/// Grow-only set union.
pub fn merge_set<T: Ord + Clone>(local: &mut BTreeSet<T>, remote: &BTreeSet<T>) -> bool {
    let before = local.len();
    local.extend(remote.iter().cloned());
    local.len() != before
}

/// Join for entries that are immutable once written.
///
/// Two replicas should never hold different contents under the same id; if
/// they do, the smaller value wins on every replica so they still converge.
pub fn merge_immutable<T: Ord + Clone + Debug>(ours: &mut T, theirs: &T, what: &str) -> bool {
    if ours == theirs {
        return false;
    }
    warn!("conflicting contents for immutable {}; keeping canonical copy", what);
    if theirs < ours {
        *ours = theirs.clone();
        true
    } else {
        false
    }
}

/// Join two optional values by `Ord::max`; `Some` beats `None`.
pub fn merge_option_max<T: Ord + Clone>(ours: &mut Option<T>, theirs: &Option<T>) -> bool {
    let joined = match (ours.as_ref(), theirs.as_ref()) {
        (Some(a), Some(b)) if b > a => Some(b.clone()),
        (None, Some(b)) => Some(b.clone()),
        _ => return false,
    };
    *ours = joined;
    true
}

/// Join two optional values by `Ord::min`; `Some` beats `None`.
pub fn merge_option_min<T: Ord + Clone>(ours: &mut Option<T>, theirs: &Option<T>) -> bool {
    let joined = match (ours.as_ref(), theirs.as_ref()) {
        (Some(a), Some(b)) if b < a => Some(b.clone()),
        (None, Some(b)) => Some(b.clone()),
        _ => return false,
    };
    *ours = joined;
    true
}
