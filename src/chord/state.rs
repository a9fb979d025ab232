use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::chord::fingers::FingerTable;
use crate::chord::peers::{NodeList, PeerAddress};

/// Key of a stored chunk: opaque bytes, hashed onto the ring for routing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key(pub Vec<u8>);

/// Value of a stored chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Value(pub Vec<u8>);

/// The chunk store, shared between the stabilizer and the RPC server.
pub type SharedStorage = Arc<Mutex<HashMap<Key, Value>>>;

/// Finger table cell, written by the finger worker and read (snapshotted)
/// at the start of each stabilization step.
pub type SharedFingerTable = Arc<Mutex<FingerTable>>;

/// Handle that halts further scheduling of stabilization steps. Stopping is
/// one-way: an in-flight step runs to completion, no new step starts.
#[derive(Clone, Debug)]
pub struct StabilizerHandle {
    stopped: Arc<AtomicBool>,
}

impl StabilizerHandle {
    pub fn new() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for StabilizerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Which branch the last stabilization step took, and how migration went.
/// Kept on the state so operators and tests can observe the step outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// No step has run yet.
    Idle,
    /// No peers; the step was a no-op.
    Alone,
    /// The successor died and a spare from the list took over.
    RecoveredSuccessor,
    /// The successor died with no spare; rejoined through the predecessor.
    JoinedViaPredecessor,
    /// Nothing live to fall back to; the node reset itself and stopped.
    Bankrupt,
    /// The successor had no predecessor; we told it about ourselves.
    NotifiedSuccessor,
    /// The successor reported a closer node; the list narrowed to it.
    NarrowedSuccessor,
    /// Pointers confirmed; the list was extended and data migrated.
    Extended { migration: MigrationOutcome },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Every chunk that had to move was accepted; `moved` were shipped.
    Clean { moved: usize },
    /// At least one transfer failed; nothing was removed locally.
    Failed { attempted: usize },
}

/// One node's view of the ring. Pointer fields (`pred`, `succ_list`) are
/// replaced wholesale by the stabilizer; `fingers` and `data` are shared
/// cells mutated through their own locks.
#[derive(Clone)]
pub struct ChordState {
    pub me: PeerAddress,
    pub pred: Option<PeerAddress>,
    pub succ_list: NodeList,
    pub fingers: SharedFingerTable,
    pub data: SharedStorage,
    pub handle: StabilizerHandle,
    pub last_outcome: StepOutcome,
}

impl ChordState {
    /// The state a freshly booted node starts from: alone on its ring.
    pub fn bootstrap(me: PeerAddress) -> Self {
        Self {
            pred: None,
            succ_list: NodeList::solo(me.clone()),
            fingers: Arc::new(Mutex::new(FingerTable::new(me.clone()))),
            data: Arc::new(Mutex::new(HashMap::new())),
            handle: StabilizerHandle::new(),
            last_outcome: StepOutcome::Idle,
            me,
        }
    }

    /// Current immediate successor, ourselves when alone.
    pub fn successor(&self) -> PeerAddress {
        self.succ_list.nearest_successor(&self.me.id)
    }

    pub fn is_alone(&self) -> bool {
        self.successor().id == self.me.id
    }
}
