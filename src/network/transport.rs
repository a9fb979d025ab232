//! The seams between the overlay core and the outside world. The stabilizer
//! talks to peers only through [`Transmitter`] and reports liveness interest
//! only through [`Watcher`], so the whole control loop runs against
//! in-memory doubles in tests.

use crate::chord::id::NodeId;
use crate::chord::peers::PeerAddress;
use crate::chord::state::{Key, Value};
use crate::error::NetworkError;

/// Per-peer remote calls. Implementations enforce the per-RPC deadlines; a
/// timeout surfaces as `PeerUnreachable` and is indistinguishable from a
/// dead peer.
#[tonic::async_trait]
pub trait Transmitter: Send {
    /// Short-deadline liveness probe. Any failure counts as dead.
    async fn check_living(&mut self) -> bool;

    /// The peer's current predecessor; `Ok(None)` means it has none.
    async fn your_predecessor(&mut self) -> Result<Option<PeerAddress>, NetworkError>;

    /// The peer's current successor; `Ok(None)` means it is alone.
    async fn your_successor(&mut self) -> Result<Option<PeerAddress>, NetworkError>;

    /// Fire-and-forget notification that `sender` believes it is this
    /// peer's predecessor.
    async fn am_i_predecessor(&mut self, sender: &PeerAddress);

    /// Ring lookup for the custodian of `target`. Long deadline; routed
    /// through the overlay.
    async fn find_node(&mut self, target: &NodeId) -> Result<Option<PeerAddress>, NetworkError>;

    /// Stores a chunk on the peer. Idempotent on the receiver.
    async fn set_chunk(&mut self, key: &Key, value: &Value) -> Result<(), NetworkError>;
}

/// Resolves a [`Transmitter`] for a peer. Failing to connect is equivalent
/// to the peer being unreachable.
#[tonic::async_trait]
pub trait Transport: Send + Sync {
    async fn transmitter(&self, peer: &PeerAddress)
        -> Result<Box<dyn Transmitter>, NetworkError>;
}

/// Supervision interest registry. Both operations are idempotent.
pub trait Watcher: Send + Sync {
    fn watch(&self, peer: &PeerAddress);
    fn unwatch(&self, peer: &PeerAddress);
}
