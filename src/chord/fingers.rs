use crate::chord::id::{NodeId, KEY_SIZE};
use crate::chord::peers::PeerAddress;

/// Long-range routing pointers: one slot per bit of the identifier space,
/// slot `k` holding the owner of `me + 2^k`. Maintained by its own periodic
/// worker; the stabilizer only ever reads a snapshot.
#[derive(Debug)]
pub struct FingerTable {
    me: PeerAddress,
    entries: Vec<Option<PeerAddress>>,
}

impl FingerTable {
    pub fn new(me: PeerAddress) -> Self {
        Self {
            me,
            entries: vec![None; KEY_SIZE],
        }
    }

    pub fn update(&mut self, k: usize, peer: PeerAddress) {
        if k < self.entries.len() {
            self.entries[k] = Some(peer);
        }
    }

    /// Removes a dead peer from every slot it occupies.
    pub fn forget(&mut self, id: &NodeId) {
        for entry in self.entries.iter_mut() {
            if entry.as_ref().map(|p| p.id == *id).unwrap_or(false) {
                *entry = None;
            }
        }
    }

    /// The finger most closely preceding `target`, used to forward lookups.
    /// Slots pointing at ourselves are skipped.
    pub fn closest_preceding(&self, target: &NodeId) -> Option<PeerAddress> {
        for entry in self.entries.iter().rev() {
            if let Some(peer) = entry {
                if peer.id != self.me.id && peer.id.between(&self.me.id, target) {
                    return Some(peer.clone());
                }
            }
        }
        None
    }

    /// Deduplicated view of every known finger, for nearest-neighbor checks.
    pub fn snapshot(&self) -> Vec<PeerAddress> {
        let mut peers: Vec<PeerAddress> = Vec::new();
        for peer in self.entries.iter().flatten() {
            if !peers.iter().any(|p| p.id == peer.id) {
                peers.push(peer.clone());
            }
        }
        peers
    }
}
