use std::fmt;

use crate::chord::id::NodeId;

/// A peer's identity on the ring paired with the address its RPC endpoint
/// answers on. Equality is by ring identity only; the address is transport
/// plumbing and may change across reboots.
#[derive(Clone)]
pub struct PeerAddress {
    pub id: NodeId,
    pub addr: String,
}

impl PeerAddress {
    pub fn new(id: NodeId, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
        }
    }
}

impl PartialEq for PeerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerAddress {}

impl std::hash::Hash for PeerAddress {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// Non-empty, deduplicated list of peers kept in clockwise order from the
/// owning node. Used both for the successor list and for finger snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeList {
    peers: Vec<PeerAddress>,
}

impl NodeList {
    /// A list containing only the owner itself. The state a node boots with
    /// and falls back to when every peer is gone.
    pub fn solo(me: PeerAddress) -> Self {
        Self { peers: vec![me] }
    }

    /// Builds a list from arbitrary peers: deduplicates by identity and
    /// orders clockwise from `me`. An empty input collapses to `[me]`.
    pub fn from_peers(me: &PeerAddress, peers: Vec<PeerAddress>) -> Self {
        let mut list = Self::solo(me.clone());
        list.peers.clear();
        for peer in peers {
            list.append(&me.id, peer);
        }
        if list.peers.is_empty() {
            list.peers.push(me.clone());
        }
        list
    }

    /// The first entry that is not the owner; the owner itself when alone.
    /// Never panics: the list is non-empty by construction.
    pub fn nearest_successor(&self, me: &NodeId) -> PeerAddress {
        self.peers
            .iter()
            .find(|p| p.id != *me)
            .unwrap_or(&self.peers[0])
            .clone()
    }

    /// Drops the nearest successor. A list that would become empty collapses
    /// to `[me]` instead.
    pub fn kill_nearest(&self, me: &PeerAddress) -> NodeList {
        let mut peers = self.peers.clone();
        if let Some(pos) = peers.iter().position(|p| p.id != me.id) {
            peers.remove(pos);
        }
        if peers.is_empty() {
            peers.push(me.clone());
        }
        NodeList { peers }
    }

    /// Inserts `peer` keeping clockwise order from `me`; duplicates by
    /// identity are ignored.
    pub fn append(&mut self, me: &NodeId, peer: PeerAddress) {
        if self.peers.iter().any(|p| p.id == peer.id) {
            return;
        }
        let dist = me.distance_to(&peer.id);
        let pos = self
            .peers
            .iter()
            .position(|p| me.distance_to(&p.id) > dist)
            .unwrap_or(self.peers.len());
        self.peers.insert(pos, peer);
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.peers.iter().any(|p| p.id == *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerAddress> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// The element of `amongst ∪ {me}` that most closely precedes `target` on
/// the ring, i.e. the candidate with the smallest clockwise distance to the
/// target. This is what decides whether a chunk still belongs here.
pub fn nearest_neighbor<'a, I>(target: &NodeId, amongst: I, me: &PeerAddress) -> PeerAddress
where
    I: IntoIterator<Item = &'a PeerAddress>,
{
    let mut best = me.clone();
    let mut best_dist = best.id.distance_to(target);
    for candidate in amongst {
        let dist = candidate.id.distance_to(target);
        if dist < best_dist {
            best = candidate.clone();
            best_dist = dist;
        }
    }
    best
}
