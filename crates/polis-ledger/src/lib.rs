//! Polis Ledger Projection
//!
//! Balances, channel treasuries and reputation are derived views, recomputed
//! by replaying replicated inputs in a fixed order. Two nodes holding the
//! same transaction and award sets always compute bit-identical values.

pub mod error;
pub mod projection;
pub mod reputation;
pub mod settlement;
pub mod tax;

pub use error::{Error, Result};
pub use projection::{
    ordered_transactions, project, transactions_fingerprint, LedgerCache, LedgerView,
    SkipReason, SkippedTransaction,
};
pub use reputation::{reputation_of, reputations};
pub use settlement::{complete_task, Settlement};
pub use tax::compute_tax;
