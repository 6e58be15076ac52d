//! Network-wide parameters.
//!
//! The effective [`NetworkConfig`] is never stored directly. It is the fold of
//! every applied [`ConfigRecord`] over the defaults, ordered by
//! `(applied_at, id)`, so every replica derives the same values.

use crate::merge::{merge_immutable, Merge};
use crate::{CommandId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_TAX_RATE_BPS: u32 = 500;
pub const DEFAULT_VALIDATOR_SET_SIZE: u32 = 7;
pub const DEFAULT_VOTING_PERIOD_MS: u64 = 24 * 60 * 60 * 1000;
pub const GENESIS_PROTOCOL_VERSION: &str = "1.0.0";

/// Basis points in one whole.
pub const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Task reward tax, in basis points.
    pub tax_rate_bps: u32,
    /// Number of top-reputation nodes that form the validator set.
    pub validator_set_size: u32,
    /// Default voting window for new proposals.
    pub voting_period_ms: u64,
    pub protocol_version: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tax_rate_bps: DEFAULT_TAX_RATE_BPS,
            validator_set_size: DEFAULT_VALIDATOR_SET_SIZE,
            voting_period_ms: DEFAULT_VOTING_PERIOD_MS,
            protocol_version: GENESIS_PROTOCOL_VERSION.to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn apply(&mut self, update: &ConfigUpdate) {
        match update {
            ConfigUpdate::TaxRateBps(bps) => self.tax_rate_bps = (*bps).min(BPS_DENOMINATOR),
            ConfigUpdate::ValidatorSetSize(n) => self.validator_set_size = (*n).max(1),
            ConfigUpdate::VotingPeriodMs(ms) => self.voting_period_ms = *ms,
        }
    }
}

/// A single parameter change.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "snake_case")]
pub enum ConfigUpdate {
    TaxRateBps(u32),
    ValidatorSetSize(u32),
    VotingPeriodMs(u64),
}

/// An applied configuration change, keyed by the proposal or upgrade that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub applied_at: Timestamp,
    pub id: String,
    pub update: ConfigUpdate,
}

impl Merge for ConfigRecord {
    fn merge(&mut self, other: &Self) -> bool {
        merge_immutable(self, other, "config record")
    }
}

/// A completed protocol upgrade.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UpgradeRecord {
    pub applied_at: Timestamp,
    pub version: String,
    pub package_hash: String,
    pub command_id: CommandId,
}

impl Merge for UpgradeRecord {
    fn merge(&mut self, other: &Self) -> bool {
        merge_immutable(self, other, "upgrade record")
    }
}

/// Fold records over the defaults.
pub fn fold_config(
    records: &BTreeMap<String, ConfigRecord>,
    upgrades: &BTreeMap<String, UpgradeRecord>,
) -> NetworkConfig {
    let mut config = NetworkConfig::default();
    let mut ordered: Vec<&ConfigRecord> = records.values().collect();
    ordered.sort();
    for record in ordered {
        config.apply(&record.update);
    }
    if let Some(latest) = upgrades.values().max() {
        config.protocol_version = latest.version.clone();
    }
    config
}
