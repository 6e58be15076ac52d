//! Forward-only lifecycle states.
//!
//! Every evolving entity carries a status drawn from a fixed transition order.
//! Local operations follow an explicit transition table; merges take whichever
//! side is further along, so a status can never move backward no matter in
//! which order replicas exchange state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A status type with a fixed forward order.
pub trait ForwardOnly: Copy + Eq + fmt::Debug {
    /// Position in the transition order. Higher is further along.
    fn rank(&self) -> u8;

    /// Deterministic preference between distinct states of equal rank
    /// (e.g. two incomparable terminal states).
    fn precedence(&self) -> u8 {
        0
    }

    fn is_terminal(&self) -> bool;

    /// Whether a local operation may move from `self` to `next`.
    fn can_transition_to(&self, next: &Self) -> bool;

    /// Join of two states: the more advanced one.
    fn join(self, other: Self) -> Self {
        if (other.rank(), other.precedence()) > (self.rank(), self.precedence()) {
            other
        } else {
            self
        }
    }

    /// True when `other` lies strictly behind `self`.
    fn is_ahead_of(&self, other: &Self) -> bool {
        (self.rank(), self.precedence()) > (other.rank(), other.precedence())
    }
}

/// Task lifecycle: open → auction_open → claimed → in_progress → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    AuctionOpen,
    Claimed,
    InProgress,
    Completed,
    Failed,
}

impl ForwardOnly for TaskStatus {
    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Open => 0,
            TaskStatus::AuctionOpen => 1,
            TaskStatus::Claimed => 2,
            TaskStatus::InProgress => 3,
            TaskStatus::Completed | TaskStatus::Failed => 4,
        }
    }

    // A completed task may already have paid out; it wins over failed.
    fn precedence(&self) -> u8 {
        match self {
            TaskStatus::Completed => 1,
            _ => 0,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Open, AuctionOpen) | (Open, Claimed) => true,
            (AuctionOpen, Claimed) => true,
            (Claimed, InProgress) => true,
            (InProgress, Completed) => true,
            (Open | AuctionOpen | Claimed | InProgress, Failed) => true,
            _ => false,
        }
    }
}

/// Proposal lifecycle.
///
/// ```text
/// open ─┬─> closed                      (approved, nothing to apply)
///       ├─> executed                    (approved, self-executing)
///       ├─> rejected
///       └─> pending_ratification ─> ratified ─┬─> executed
///                                              └─> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Open,
    Closed,
    PendingRatification,
    Rejected,
    Ratified,
    Executed,
    Failed,
}

impl ForwardOnly for ProposalStatus {
    fn rank(&self) -> u8 {
        match self {
            ProposalStatus::Open => 0,
            ProposalStatus::Closed => 1,
            ProposalStatus::PendingRatification | ProposalStatus::Rejected => 2,
            ProposalStatus::Ratified => 3,
            ProposalStatus::Executed | ProposalStatus::Failed => 4,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            ProposalStatus::Rejected | ProposalStatus::Executed => 1,
            _ => 0,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Closed
                | ProposalStatus::Rejected
                | ProposalStatus::Executed
                | ProposalStatus::Failed
        )
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use ProposalStatus::*;
        match (self, next) {
            (Open, Closed | Rejected | PendingRatification | Executed | Failed) => true,
            (PendingRatification, Ratified) => true,
            (Ratified, Executed | Failed) => true,
            _ => false,
        }
    }
}

/// Channel lifecycle. Channels are archived, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Active,
    Archived,
}

impl ForwardOnly for ChannelStatus {
    fn rank(&self) -> u8 {
        match self {
            ChannelStatus::Active => 0,
            ChannelStatus::Archived => 1,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, ChannelStatus::Archived)
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        matches!((self, next), (ChannelStatus::Active, ChannelStatus::Archived))
    }
}

macro_rules! display_snake {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(text.trim_matches('"'))
            }
        }
    )*};
}

display_snake!(TaskStatus, ProposalStatus, ChannelStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_join_takes_more_advanced() {
        assert_eq!(
            TaskStatus::Open.join(TaskStatus::InProgress),
            TaskStatus::InProgress
        );
        assert_eq!(
            TaskStatus::Completed.join(TaskStatus::Claimed),
            TaskStatus::Completed
        );
    }

    #[test]
    fn completed_beats_failed_in_either_order() {
        assert_eq!(
            TaskStatus::Failed.join(TaskStatus::Completed),
            TaskStatus::Completed
        );
        assert_eq!(
            TaskStatus::Completed.join(TaskStatus::Failed),
            TaskStatus::Completed
        );
    }

    #[test]
    fn task_table_rejects_regressions() {
        assert!(TaskStatus::Open.can_transition_to(&TaskStatus::AuctionOpen));
        assert!(TaskStatus::InProgress.can_transition_to(&TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(&TaskStatus::Open));
        assert!(!TaskStatus::Claimed.can_transition_to(&TaskStatus::AuctionOpen));
        assert!(!TaskStatus::Failed.can_transition_to(&TaskStatus::Completed));
    }

    #[test]
    fn rejected_wins_same_rank_conflict() {
        assert_eq!(
            ProposalStatus::PendingRatification.join(ProposalStatus::Rejected),
            ProposalStatus::Rejected
        );
        assert_eq!(
            ProposalStatus::Rejected.join(ProposalStatus::PendingRatification),
            ProposalStatus::Rejected
        );
    }

    #[test]
    fn proposal_terminal_states() {
        assert!(ProposalStatus::Executed.is_terminal());
        assert!(ProposalStatus::Rejected.is_terminal());
        assert!(!ProposalStatus::PendingRatification.is_terminal());
        assert!(!ProposalStatus::Ratified.is_terminal());
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(TaskStatus::AuctionOpen.to_string(), "auction_open");
        assert_eq!(
            ProposalStatus::PendingRatification.to_string(),
            "pending_ratification"
        );
    }
}
