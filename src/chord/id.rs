use std::fmt;

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::ChordError;

/// Number of bits in the identifier space (SHA-256).
pub const KEY_SIZE: usize = 256;

/// A position on the circular identifier space. Both nodes and chunk keys are
/// hashed into the same space, so ownership is decided by ring arithmetic
/// alone.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; 32]);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl NodeId {
    pub fn new(id: [u8; 32]) -> Self {
        NodeId(id)
    }

    /// Hashes raw key bytes onto the ring. Chunk keys and node identities
    /// share this mapping.
    pub fn from_key(key: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key);
        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        NodeId(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChordError> {
        if bytes.len() != 32 {
            return Err(ChordError::InvalidNodeId(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(bytes);
        Ok(NodeId(id))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Fresh random identity for a booting node.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    /// Whether `self` lies in the half-open ring interval `(start, end]`,
    /// walking clockwise from `start`. `(a, a]` covers the full ring.
    pub fn in_interval(&self, start: &NodeId, end: &NodeId) -> bool {
        if start == end {
            return true;
        }
        if start < end {
            self > start && self <= end
        } else {
            self > start || self <= end
        }
    }

    /// Whether `self` lies strictly between `start` and `end` clockwise,
    /// both endpoints excluded. `(a, a)` covers the ring minus `a`.
    pub fn between(&self, start: &NodeId, end: &NodeId) -> bool {
        if start == end {
            return self != start;
        }
        if start < end {
            self > start && self < end
        } else {
            self > start || self < end
        }
    }

    /// Clockwise distance from `self` to `to`: `(to - self) mod 2^256`.
    pub fn distance_to(&self, to: &NodeId) -> [u8; 32] {
        let mut out = [0u8; 32];
        let mut borrow = 0u16;
        for i in (0..32).rev() {
            let lhs = to.0[i] as u16;
            let rhs = self.0[i] as u16 + borrow;
            if lhs >= rhs {
                out[i] = (lhs - rhs) as u8;
                borrow = 0;
            } else {
                out[i] = (lhs + 256 - rhs) as u8;
                borrow = 1;
            }
        }
        out
    }

    /// The k-th finger target, `(self + 2^k) mod 2^256`.
    pub fn finger_target(&self, k: usize) -> NodeId {
        assert!(k < KEY_SIZE);
        let mut out = self.0;
        let byte_idx = 31 - k / 8;
        let mut carry = 1u8 << (k % 8);
        let mut i = byte_idx as isize;
        while carry != 0 && i >= 0 {
            let (sum, overflow) = out[i as usize].overflowing_add(carry);
            out[i as usize] = sum;
            carry = if overflow { 1 } else { 0 };
            i -= 1;
        }
        NodeId(out)
    }
}
