//! Balance and treasury fold.
//!
//! Balances are a pure function of the transaction set: deduplicate by id,
//! order by `(timestamp, id)`, then fold. Arrival order never matters.

use polis_crdt::{ChannelId, GlobalState, NodeId, Transaction, TxId, GENESIS_ACCOUNT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Why a transaction was left out of the fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The sender's balance did not cover the amount at that point.
    Overdraft,
    /// `tax` exceeds `amount`, or the amount does not fit the balance type.
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTransaction {
    pub id: TxId,
    pub reason: SkipReason,
}

/// Derived economic view. Never stored as authoritative state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerView {
    pub balances: BTreeMap<NodeId, i64>,
    pub treasuries: BTreeMap<ChannelId, u64>,
    pub applied: usize,
    pub skipped: Vec<SkippedTransaction>,
}

impl LedgerView {
    pub fn balance(&self, account: &str) -> i64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn treasury(&self, channel: &str) -> u64 {
        self.treasuries.get(channel).copied().unwrap_or(0)
    }

    /// Sum over every account and treasury. Zero when SP is conserved,
    /// since genesis allocations are debited from the genesis account.
    pub fn net_supply(&self) -> i128 {
        let accounts: i128 = self.balances.values().map(|b| *b as i128).sum();
        let treasuries: i128 = self.treasuries.values().map(|t| *t as i128).sum();
        accounts + treasuries
    }
}

/// Every transaction exactly once, in fold order, with its channel.
pub fn ordered_transactions(state: &GlobalState) -> Vec<(&ChannelId, &Transaction)> {
    let mut unique: BTreeMap<&str, (&ChannelId, &Transaction)> = BTreeMap::new();
    for (channel, tx) in state.transactions() {
        // Channels iterate in id order, so the first copy is canonical.
        unique.entry(tx.id.as_str()).or_insert((channel, tx));
    }
    let mut ordered: Vec<(&ChannelId, &Transaction)> = unique.into_values().collect();
    ordered.sort_by(|a, b| (a.1.timestamp, &a.1.id).cmp(&(b.1.timestamp, &b.1.id)));
    ordered
}

/// Fold the transaction log into balances and treasuries.
pub fn project(state: &GlobalState) -> LedgerView {
    let mut view = LedgerView::default();
    for (channel, tx) in ordered_transactions(state) {
        let (Ok(amount), Ok(tax)) = (i64::try_from(tx.amount), i64::try_from(tx.tax)) else {
            view.skip(tx, SkipReason::Malformed);
            continue;
        };
        if tax > amount {
            view.skip(tx, SkipReason::Malformed);
            continue;
        }

        let sender = view.balance(&tx.from);
        if tx.from != GENESIS_ACCOUNT && sender < amount {
            view.skip(tx, SkipReason::Overdraft);
            continue;
        }
        let Some(debited) = sender.checked_sub(amount) else {
            view.skip(tx, SkipReason::Malformed);
            continue;
        };
        view.balances.insert(tx.from.clone(), debited);

        let receiver = view.balance(&tx.to);
        view.balances.insert(tx.to.clone(), receiver.saturating_add(amount - tax));
        if tax > 0 {
            *view.treasuries.entry(channel.clone()).or_default() += tax as u64;
        }
        view.applied += 1;
    }
    debug!(
        "ledger projected: {} applied, {} skipped",
        view.applied,
        view.skipped.len()
    );
    view
}

impl LedgerView {
    fn skip(&mut self, tx: &Transaction, reason: SkipReason) {
        warn!("skipping transaction {} ({:?})", tx.id, reason);
        self.skipped.push(SkippedTransaction {
            id: tx.id.clone(),
            reason,
        });
    }
}

/// Hash identifying the transaction set. Transactions are immutable, so
/// their placement and ids are enough.
pub fn transactions_fingerprint(state: &GlobalState) -> String {
    let mut hasher = blake3::Hasher::new();
    for (channel, tx) in state.transactions() {
        hasher.update(channel.as_bytes());
        hasher.update(&[0]);
        hasher.update(tx.id.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

/// A projection cached against the transaction set it was computed from.
#[derive(Debug, Default)]
pub struct LedgerCache {
    fingerprint: Option<String>,
    view: LedgerView,
}

impl LedgerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current view, recomputed only when the transaction set changed.
    pub fn view(&mut self, state: &GlobalState) -> &LedgerView {
        let fingerprint = transactions_fingerprint(state);
        if self.fingerprint.as_deref() != Some(fingerprint.as_str()) {
            self.view = project(state);
            self.fingerprint = Some(fingerprint);
        }
        &self.view
    }

    /// Recompute if stale; returns true when a new view was produced.
    pub fn refresh(&mut self, state: &GlobalState) -> bool {
        let before = self.fingerprint.clone();
        self.view(state);
        before != self.fingerprint
    }

    pub fn invalidate(&mut self) {
        self.fingerprint = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polis_crdt::{GenesisNode, GenesisSpec, GENERAL_CHANNEL};

    fn genesis() -> GlobalState {
        GlobalState::genesis(&GenesisSpec {
            nodes: ["alice", "bob", "carol"]
                .iter()
                .map(|n| GenesisNode {
                    id: n.to_string(),
                    address: String::new(),
                    public_key: None,
                    reputation: 0,
                    balance: 100,
                })
                .collect(),
            created_at: 0,
        })
    }

    fn tx(id: &str, from: &str, to: &str, amount: u64, tax: u64, at: u64) -> Transaction {
        Transaction {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            amount,
            tax,
            timestamp: at,
            task_id: None,
        }
    }

    #[test]
    fn genesis_balances_and_conservation() {
        let mut state = genesis();
        state
            .add_transaction(GENERAL_CHANNEL, tx("t1", "alice", "bob", 40, 2, 5))
            .unwrap();
        let view = project(&state);
        assert_eq!(view.balance("alice"), 60);
        assert_eq!(view.balance("bob"), 138);
        assert_eq!(view.treasury(GENERAL_CHANNEL), 2);
        assert_eq!(view.balance(GENESIS_ACCOUNT), -300);
        assert_eq!(view.net_supply(), 0);
    }

    #[test]
    fn overdraft_is_skipped_and_reported() {
        let mut state = genesis();
        state
            .add_transaction(GENERAL_CHANNEL, tx("big", "carol", "bob", 500, 0, 5))
            .unwrap();
        let view = project(&state);
        assert_eq!(view.balance("carol"), 100);
        assert_eq!(
            view.skipped,
            vec![SkippedTransaction {
                id: "big".into(),
                reason: SkipReason::Overdraft
            }]
        );
        assert_eq!(view.net_supply(), 0);
    }

    #[test]
    fn order_is_by_timestamp_then_id() {
        let mut state = genesis();
        // carol can only afford the second payment after receiving the first.
        state
            .add_transaction(GENERAL_CHANNEL, tx("b", "carol", "alice", 150, 0, 10))
            .unwrap();
        state
            .add_transaction(GENERAL_CHANNEL, tx("a", "bob", "carol", 50, 0, 10))
            .unwrap();
        let view = project(&state);
        assert!(view.skipped.is_empty());
        assert_eq!(view.balance("carol"), 0);
    }

    #[test]
    fn cache_recomputes_only_on_new_transactions() {
        let mut state = genesis();
        let mut cache = LedgerCache::new();
        assert!(cache.refresh(&state));
        assert!(!cache.refresh(&state));
        state
            .add_transaction(GENERAL_CHANNEL, tx("t1", "alice", "bob", 10, 1, 5))
            .unwrap();
        assert!(cache.refresh(&state));
        assert_eq!(cache.view(&state).balance("bob"), 109);
    }
}
