//! 256-bit position in the hash space.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A 256-bit unsigned integer, four little-endian u64 limbs.
///
/// Only the operations the digest algebra needs are provided: ordering,
/// conversion from BLAKE3 output, and a saturating successor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct U256 {
    limbs: [u64; 4],
}

impl U256 {
    pub const ZERO: U256 = U256 { limbs: [0; 4] };

    pub const MAX: U256 = U256 {
        limbs: [u64::MAX; 4],
    };

    pub const fn from_u64(n: u64) -> Self {
        U256 {
            limbs: [n, 0, 0, 0],
        }
    }

    /// Interpret 32 big-endian bytes (e.g. a BLAKE3 digest) as a position.
    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let offset = (3 - i) * 8;
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[offset..offset + 8]);
            *limb = u64::from_be_bytes(chunk);
        }
        U256 { limbs }
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (i, limb) in self.limbs.iter().enumerate() {
            let offset = (3 - i) * 8;
            bytes[offset..offset + 8].copy_from_slice(&limb.to_be_bytes());
        }
        bytes
    }

    /// `self + 1`, saturating at [`U256::MAX`].
    pub fn successor(&self) -> U256 {
        let mut limbs = self.limbs;
        for limb in limbs.iter_mut() {
            let (next, overflow) = limb.overflowing_add(1);
            *limb = next;
            if !overflow {
                return U256 { limbs };
            }
        }
        U256::MAX
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.limbs.iter().rev().cmp(other.limbs.iter().rev())
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<u64> for U256 {
    fn from(n: u64) -> Self {
        U256::from_u64(n)
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are enough to tell positions apart in logs.
        let bytes = self.to_be_bytes();
        write!(f, "U256(")?;
        for b in &bytes[..8] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}
