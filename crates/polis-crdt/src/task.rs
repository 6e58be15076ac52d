//! Tasks and their auction sub-object.

use crate::error::{Error, Result};
use crate::merge::{merge_map, merge_option_max, Merge};
use crate::status::{ForwardOnly, TaskStatus};
use crate::{NodeId, TaskId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A unit of work with an SP reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub reward: u64,
    pub creator: NodeId,
    pub status: TaskStatus,
    #[serde(default)]
    pub assignee: Option<NodeId>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub auction: Option<Auction>,
    pub created_at: Timestamp,
}

/// Fields fixed at creation.
type TaskIdentity<'a> = (Timestamp, &'a str, &'a str, u64, &'a str, &'a BTreeSet<String>);

impl Task {
    pub fn new(
        id: impl Into<TaskId>,
        title: impl Into<String>,
        reward: u64,
        creator: impl Into<NodeId>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            reward,
            creator: creator.into(),
            status: TaskStatus::Open,
            assignee: None,
            tags: BTreeSet::new(),
            auction: None,
            created_at,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn identity(&self) -> TaskIdentity<'_> {
        (
            self.created_at,
            &self.title,
            &self.description,
            self.reward,
            &self.creator,
            &self.tags,
        )
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(&next) {
            return Err(Error::InvalidTransition {
                entity: format!("task {}", self.id),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Put the task up for auction until `deadline`.
    pub fn open_auction(&mut self, deadline: Timestamp) -> Result<()> {
        self.transition(TaskStatus::AuctionOpen)?;
        self.auction = Some(Auction::new(deadline));
        Ok(())
    }

    /// Record (or replace) `bidder`'s bid.
    pub fn place_bid(&mut self, bidder: &str, amount: u64, now: Timestamp) -> Result<()> {
        if self.status != TaskStatus::AuctionOpen {
            return Err(self.bid_rejected(format!("task is {}", self.status)));
        }
        let task_id = self.id.clone();
        let auction = self
            .auction
            .as_mut()
            .ok_or_else(|| Error::BidRejected {
                task: task_id.clone(),
                reason: "no auction".into(),
            })?;
        if now > auction.deadline {
            return Err(Error::BidRejected {
                task: task_id,
                reason: "auction deadline passed".into(),
            });
        }
        auction.bids.insert(
            bidder.to_string(),
            Bid {
                amount,
                placed_at: now,
            },
        );
        Ok(())
    }

    /// Close the auction in favour of `bidder`, who becomes the assignee.
    pub fn select_bid(&mut self, bidder: &str) -> Result<()> {
        let has_bid = self
            .auction
            .as_ref()
            .is_some_and(|a| a.bids.contains_key(bidder));
        if !has_bid {
            return Err(self.bid_rejected(format!("no bid from {}", bidder)));
        }
        self.transition(TaskStatus::Claimed)?;
        if let Some(auction) = self.auction.as_mut() {
            auction.selected_bid = Some(bidder.to_string());
        }
        self.assignee = Some(bidder.to_string());
        Ok(())
    }

    /// Claim an open task directly, without an auction.
    pub fn claim(&mut self, node: &str) -> Result<()> {
        if self.status != TaskStatus::Open {
            return Err(Error::InvalidTransition {
                entity: format!("task {}", self.id),
                from: self.status.to_string(),
                to: TaskStatus::Claimed.to_string(),
            });
        }
        self.transition(TaskStatus::Claimed)?;
        self.assignee = Some(node.to_string());
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::InProgress)
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(TaskStatus::Completed)
    }

    pub fn fail(&mut self) -> Result<()> {
        self.transition(TaskStatus::Failed)
    }

    fn bid_rejected(&self, reason: String) -> Error {
        Error::BidRejected {
            task: self.id.clone(),
            reason,
        }
    }
}

impl Merge for Task {
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;

        if other.identity() < self.identity() {
            self.title = other.title.clone();
            self.description = other.description.clone();
            self.reward = other.reward;
            self.creator = other.creator.clone();
            self.tags = other.tags.clone();
            self.created_at = other.created_at;
            changed = true;
        }

        // Status and assignee move together: the more advanced side wins,
        // equal sides join the assignee.
        if other.status.is_ahead_of(&self.status) {
            self.status = other.status;
            self.assignee = other.assignee.clone();
            changed = true;
        } else if self.status.is_ahead_of(&other.status) {
            debug!(
                "task {}: discarding regression {} -> {}",
                self.id, self.status, other.status
            );
        } else {
            changed |= merge_option_max(&mut self.assignee, &other.assignee);
        }

        match (self.auction.as_mut(), other.auction.as_ref()) {
            (Some(ours), Some(theirs)) => changed |= ours.merge(theirs),
            (None, Some(theirs)) => {
                self.auction = Some(theirs.clone());
                changed = true;
            }
            _ => {}
        }
        changed
    }
}

/// Sealed-bid auction attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auction {
    pub bids: BTreeMap<NodeId, Bid>,
    pub deadline: Timestamp,
    #[serde(default)]
    pub selected_bid: Option<NodeId>,
}

impl Auction {
    pub fn new(deadline: Timestamp) -> Self {
        Self {
            bids: BTreeMap::new(),
            deadline,
            selected_bid: None,
        }
    }

    /// Lowest bid, ties broken by earliest placement then bidder id.
    pub fn best_bid(&self) -> Option<(&NodeId, &Bid)> {
        self.bids
            .iter()
            .min_by_key(|(bidder, bid)| (bid.amount, bid.placed_at, bidder.as_str()))
    }
}

impl Merge for Auction {
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = !merge_map(&mut self.bids, &other.bids).is_empty();
        if other.deadline > self.deadline {
            self.deadline = other.deadline;
            changed = true;
        }
        changed |= merge_option_max(&mut self.selected_bid, &other.selected_bid);
        changed
    }
}

/// A bid. A bidder's later bid replaces its earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bid {
    pub amount: u64,
    pub placed_at: Timestamp,
}

impl Merge for Bid {
    fn merge(&mut self, other: &Self) -> bool {
        if (other.placed_at, other.amount) > (self.placed_at, self.amount) {
            *self = *other;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new("t1", "Write docs", 50, "creator", 1_000)
    }

    #[test]
    fn auction_flow() {
        let mut t = task();
        t.open_auction(2_000).unwrap();
        t.place_bid("alice", 40, 1_100).unwrap();
        t.place_bid("bob", 30, 1_200).unwrap();
        assert_eq!(t.auction.as_ref().unwrap().best_bid().unwrap().0, "bob");

        t.select_bid("bob").unwrap();
        assert_eq!(t.status, TaskStatus::Claimed);
        assert_eq!(t.assignee.as_deref(), Some("bob"));
        assert!(t.place_bid("carol", 10, 1_300).is_err());
    }

    #[test]
    fn bid_after_deadline_rejected() {
        let mut t = task();
        t.open_auction(2_000).unwrap();
        assert!(matches!(
            t.place_bid("alice", 40, 2_001),
            Err(Error::BidRejected { .. })
        ));
    }

    #[test]
    fn local_regression_is_an_error() {
        let mut t = task();
        t.claim("alice").unwrap();
        t.start().unwrap();
        t.complete().unwrap();
        assert!(matches!(t.start(), Err(Error::InvalidTransition { .. })));
    }

    #[test]
    fn merge_keeps_most_advanced_status() {
        let open = task();
        let mut done = task();
        done.claim("alice").unwrap();
        done.start().unwrap();
        done.complete().unwrap();

        let mut a = open.clone();
        a.merge(&done);
        let mut b = done.clone();
        b.merge(&open);
        assert_eq!(a, b);
        assert_eq!(a.status, TaskStatus::Completed);
        assert_eq!(a.assignee.as_deref(), Some("alice"));
    }

    #[test]
    fn concurrent_bids_union() {
        let mut base = task();
        base.open_auction(5_000).unwrap();
        let mut a = base.clone();
        let mut b = base.clone();
        a.place_bid("alice", 20, 1_100).unwrap();
        b.place_bid("bob", 25, 1_150).unwrap();

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);
        assert_eq!(ab.auction.unwrap().bids.len(), 2);
    }

    #[test]
    fn rebid_last_write_wins() {
        let mut first = Bid { amount: 40, placed_at: 10 };
        let second = Bid { amount: 35, placed_at: 20 };
        assert!(first.merge(&second));
        assert_eq!(first.amount, 35);
    }
}
