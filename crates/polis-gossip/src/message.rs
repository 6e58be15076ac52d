//! Gossip wire messages.
//!
//! One exchange is three messages at most:
//!
//! ```text
//! A ── Digest(a) ──────────────────▶ B
//! A ◀── DigestReply(b, B \ a) ────── B     A merges what B had
//! A ── Delta(A \ b) ───────────────▶ B     B merges what A had
//! ```
//!
//! Every message is self-contained, so loss, duplication and reordering only
//! delay convergence.

use polis_crdt::{GlobalState, NodeId, StateDigest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipMessage {
    /// Opens an exchange with the sender's digest.
    Digest { from: NodeId, digest: StateDigest },
    /// Answers a digest with the responder's digest and the entries the
    /// initiator lacks.
    DigestReply {
        from: NodeId,
        digest: StateDigest,
        delta: GlobalState,
    },
    /// Entries the responder lacks.
    Delta { from: NodeId, delta: GlobalState },
}

impl GossipMessage {
    pub fn sender(&self) -> &NodeId {
        match self {
            GossipMessage::Digest { from, .. }
            | GossipMessage::DigestReply { from, .. }
            | GossipMessage::Delta { from, .. } => from,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GossipMessage::Digest { .. } => "digest",
            GossipMessage::DigestReply { .. } => "digest_reply",
            GossipMessage::Delta { .. } => "delta",
        }
    }

    /// Encode as a single JSON line (no trailing newline).
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_line(line: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}
