//! Anti-entropy digests.
//!
//! Every replicated entry has a version hash: BLAKE3 over its collection tag,
//! key and serialized value. A [`StateDigest`] carries, per collection, the
//! entry count, a fingerprint over the sorted hashes and a SPORE HaveList of
//! those hashes. A peer holding the digest can compute exactly which of its
//! own entries the sender lacks (or holds in an older version) without
//! either side transmitting full state.

use crate::channel::Channel;
use crate::state::GlobalState;
use polis_spore::Spore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Nodes,
    Channels,
    Tasks,
    Proposals,
    Transactions,
    Awards,
    Ratifications,
    Commands,
    Config,
    Upgrades,
}

impl Collection {
    fn tag(&self) -> &'static str {
        match self {
            Collection::Nodes => "nodes",
            Collection::Channels => "channels",
            Collection::Tasks => "tasks",
            Collection::Proposals => "proposals",
            Collection::Transactions => "transactions",
            Collection::Awards => "awards",
            Collection::Ratifications => "ratifications",
            Collection::Commands => "commands",
            Collection::Config => "config",
            Collection::Upgrades => "upgrades",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDigest {
    pub count: usize,
    /// Hex BLAKE3 over the sorted entry hashes.
    pub fingerprint: String,
    pub have: Spore,
}

/// Compact per-collection version summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDigest {
    pub collections: BTreeMap<Collection, CollectionDigest>,
}

impl StateDigest {
    /// Collections whose contents differ from `other`.
    pub fn differing(&self, other: &StateDigest) -> Vec<Collection> {
        let empty = CollectionDigest::default();
        let mut out: Vec<Collection> = self
            .collections
            .keys()
            .chain(other.collections.keys())
            .copied()
            .collect();
        out.sort();
        out.dedup();
        out.retain(|c| {
            let ours = self.collections.get(c).unwrap_or(&empty);
            let theirs = other.collections.get(c).unwrap_or(&empty);
            ours.fingerprint != theirs.fingerprint
        });
        out
    }

    pub fn entry_count(&self) -> usize {
        self.collections.values().map(|c| c.count).sum()
    }
}

fn version_hash<T: Serialize>(collection: Collection, key: &str, value: &T) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(collection.tag().as_bytes());
    hasher.update(&[0]);
    hasher.update(key.as_bytes());
    hasher.update(&[0]);
    // Serialization of these types cannot fail: keys are strings and there
    // are no non-finite floats. Fall back to an empty body regardless.
    hasher.update(&serde_json::to_vec(value).unwrap_or_default());
    *hasher.finalize().as_bytes()
}

/// Where a versioned entry lives, so a delta can copy it out.
enum EntryRef<'a> {
    Node(&'a str),
    ChannelHeader(&'a Channel),
    Task(&'a Channel, &'a str),
    Proposal(&'a Channel, &'a str),
    Transaction(&'a Channel, &'a str),
    Award(&'a str),
    Ratification(&'a str, &'a str),
    Command(&'a str),
    Config(&'a str),
    Upgrade(&'a str),
}

struct Entry<'a> {
    collection: Collection,
    hash: [u8; 32],
    at: EntryRef<'a>,
}

fn entries(state: &GlobalState) -> Vec<Entry<'_>> {
    let mut out = Vec::new();
    for (id, node) in &state.nodes {
        out.push(Entry {
            collection: Collection::Nodes,
            hash: version_hash(Collection::Nodes, id, node),
            at: EntryRef::Node(id),
        });
    }
    for (cid, channel) in &state.channels {
        out.push(Entry {
            collection: Collection::Channels,
            hash: version_hash(Collection::Channels, cid, &channel.header()),
            at: EntryRef::ChannelHeader(channel),
        });
        for (id, task) in &channel.tasks {
            out.push(Entry {
                collection: Collection::Tasks,
                hash: version_hash(Collection::Tasks, &format!("{}/{}", cid, id), task),
                at: EntryRef::Task(channel, id),
            });
        }
        for (id, proposal) in &channel.proposals {
            out.push(Entry {
                collection: Collection::Proposals,
                hash: version_hash(Collection::Proposals, &format!("{}/{}", cid, id), proposal),
                at: EntryRef::Proposal(channel, id),
            });
        }
        for (id, tx) in &channel.transactions {
            out.push(Entry {
                collection: Collection::Transactions,
                hash: version_hash(Collection::Transactions, &format!("{}/{}", cid, id), tx),
                at: EntryRef::Transaction(channel, id),
            });
        }
    }
    for (id, award) in &state.awards {
        out.push(Entry {
            collection: Collection::Awards,
            hash: version_hash(Collection::Awards, id, award),
            at: EntryRef::Award(id),
        });
    }
    for (pid, votes) in &state.ratifications {
        for (vid, vote) in votes {
            out.push(Entry {
                collection: Collection::Ratifications,
                hash: version_hash(Collection::Ratifications, &format!("{}/{}", pid, vid), vote),
                at: EntryRef::Ratification(pid, vid),
            });
        }
    }
    for (id, cmd) in &state.commands {
        out.push(Entry {
            collection: Collection::Commands,
            hash: version_hash(Collection::Commands, id, cmd),
            at: EntryRef::Command(id),
        });
    }
    for (id, record) in &state.config_records {
        out.push(Entry {
            collection: Collection::Config,
            hash: version_hash(Collection::Config, id, record),
            at: EntryRef::Config(id),
        });
    }
    for (id, record) in &state.upgrades {
        out.push(Entry {
            collection: Collection::Upgrades,
            hash: version_hash(Collection::Upgrades, id, record),
            at: EntryRef::Upgrade(id),
        });
    }
    out
}

impl GlobalState {
    /// Per-collection version summary of this state.
    pub fn digest(&self) -> StateDigest {
        let mut grouped: BTreeMap<Collection, Vec<[u8; 32]>> = BTreeMap::new();
        for entry in entries(self) {
            grouped.entry(entry.collection).or_default().push(entry.hash);
        }
        let collections = grouped
            .into_iter()
            .map(|(collection, mut hashes)| {
                hashes.sort_unstable();
                let mut hasher = blake3::Hasher::new();
                for h in &hashes {
                    hasher.update(h);
                }
                let digest = CollectionDigest {
                    count: hashes.len(),
                    fingerprint: hasher.finalize().to_hex().to_string(),
                    have: Spore::from_hashes(hashes.iter()),
                };
                (collection, digest)
            })
            .collect();
        StateDigest { collections }
    }

    /// Entries of this state the holder of `remote` does not have.
    ///
    /// The result is a partial state meant to be merged on the other side.
    /// Entities inside a channel travel with the channel header so the
    /// receiver can place them.
    pub fn delta_for(&self, remote: &StateDigest) -> GlobalState {
        let ours = self.digest();
        let differing = ours.differing(remote);
        let mut delta = GlobalState::new();
        if differing.is_empty() {
            return delta;
        }

        let empty = CollectionDigest::default();
        for entry in entries(self) {
            if !differing.contains(&entry.collection) {
                continue;
            }
            let have = &remote.collections.get(&entry.collection).unwrap_or(&empty).have;
            if have.covers_hash(&entry.hash) {
                continue;
            }
            self.copy_entry(&entry.at, &mut delta);
        }
        trace!(
            "delta: {} collections differ, {} entries",
            differing.len(),
            delta.digest().entry_count()
        );
        delta
    }

    fn copy_entry(&self, at: &EntryRef<'_>, delta: &mut GlobalState) {
        fn slot<'d>(delta: &'d mut GlobalState, channel: &Channel) -> &'d mut Channel {
            delta
                .channels
                .entry(channel.id.clone())
                .or_insert_with(|| channel.header())
        }
        match at {
            EntryRef::Node(id) => {
                if let Some(n) = self.nodes.get(*id) {
                    delta.nodes.insert(n.id.clone(), n.clone());
                }
            }
            EntryRef::ChannelHeader(channel) => {
                slot(delta, channel);
            }
            EntryRef::Task(channel, id) => {
                if let Some(t) = channel.tasks.get(*id) {
                    slot(delta, channel).tasks.insert(t.id.clone(), t.clone());
                }
            }
            EntryRef::Proposal(channel, id) => {
                if let Some(p) = channel.proposals.get(*id) {
                    slot(delta, channel).proposals.insert(p.id.clone(), p.clone());
                }
            }
            EntryRef::Transaction(channel, id) => {
                if let Some(tx) = channel.transactions.get(*id) {
                    slot(delta, channel)
                        .transactions
                        .insert(tx.id.clone(), tx.clone());
                }
            }
            EntryRef::Award(id) => {
                if let Some(a) = self.awards.get(*id) {
                    delta.awards.insert(a.id.clone(), a.clone());
                }
            }
            EntryRef::Ratification(pid, vid) => {
                if let Some(v) = self.ratifications.get(*pid).and_then(|m| m.get(*vid)) {
                    delta
                        .ratifications
                        .entry(pid.to_string())
                        .or_default()
                        .insert(vid.to_string(), v.clone());
                }
            }
            EntryRef::Command(id) => {
                if let Some(c) = self.commands.get(*id) {
                    delta.commands.insert(c.command_id.clone(), c.clone());
                }
            }
            EntryRef::Config(id) => {
                if let Some(r) = self.config_records.get(*id) {
                    delta.config_records.insert(r.id.clone(), r.clone());
                }
            }
            EntryRef::Upgrade(id) => {
                if let Some(r) = self.upgrades.get(*id) {
                    delta.upgrades.insert(id.to_string(), r.clone());
                }
            }
        }
    }

    /// True when both states hold identical replicated contents.
    pub fn same_contents(&self, other: &GlobalState) -> bool {
        self.digest().differing(&other.digest()).is_empty()
    }
}
