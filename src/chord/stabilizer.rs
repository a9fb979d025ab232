//! The stabilization control loop: one bounded round of pointer repair and
//! chunk migration per tick. Each branch of the decision tree is logged
//! under its historical strategy tag so operators can follow what a node
//! decided and why.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::chord::id::NodeId;
use crate::chord::peers::{nearest_neighbor, NodeList, PeerAddress};
use crate::chord::state::{ChordState, Key, MigrationOutcome, StepOutcome, Value};
use crate::chord::SUCCESSOR_EXTEND_HOPS;
use crate::error::ChordError;
use crate::network::transport::{Transmitter, Transport, Watcher};

pub struct Stabilizer {
    transport: Arc<dyn Transport>,
    watcher: Arc<dyn Watcher>,
}

impl Stabilizer {
    pub fn new(transport: Arc<dyn Transport>, watcher: Arc<dyn Watcher>) -> Self {
        Self { transport, watcher }
    }

    /// Executes one stabilization round. RPCs block (with per-call
    /// deadlines); the caller must not run two steps concurrently on the
    /// same state. Only a broken local invariant is an error; every remote
    /// failure resolves to a branch of the tree.
    pub async fn step(&self, s: ChordState) -> Result<ChordState, ChordError> {
        if s.succ_list.is_empty() {
            return Err(ChordError::InvariantViolation(
                "successor list must never be empty".into(),
            ));
        }

        let me = s.me.clone();
        let succ = s.succ_list.nearest_successor(&me.id);

        if succ.id == me.id {
            debug!("stabilize[Alone]: {} has no peers", me);
            let mut s = s;
            s.last_outcome = StepOutcome::Alone;
            return Ok(s);
        }

        match self.transport.transmitter(&succ).await {
            Err(e) => {
                debug!("stabilize: cannot reach successor {}: {}", succ, e);
                self.on_dead_successor(s, &succ).await
            }
            Ok(mut tx) => {
                if tx.check_living().await {
                    self.on_live_successor(s, &succ, tx.as_mut()).await
                } else {
                    self.on_dead_successor(s, &succ).await
                }
            }
        }
    }

    /// The successor failed its liveness probe. Fall back to a spare from
    /// the list, then to the predecessor, then give up.
    async fn on_dead_successor(
        &self,
        mut s: ChordState,
        succ: &PeerAddress,
    ) -> Result<ChordState, ChordError> {
        if s.succ_list.len() > 1 {
            info!(
                "stabilize[SuccDead]: successor {} unresponsive, promoting spare",
                succ
            );
            self.watcher.unwatch(succ);
            s.succ_list = s.succ_list.kill_nearest(&s.me);
            let next = s.succ_list.nearest_successor(&s.me.id);
            let (joined, found) = self.join_network(s, &next).await;
            s = joined;
            if found.is_none() {
                warn!(
                    "stabilize[SuccDead]: rejoin via {} failed, retrying next tick",
                    next
                );
            }
            s.last_outcome = StepOutcome::RecoveredSuccessor;
            return Ok(s);
        }

        let pred = match s.pred.clone() {
            Some(p) if p.id != s.me.id => p,
            _ => {
                warn!(
                    "stabilize[PreSuccDead]: successor {} dead and no predecessor to fall back to",
                    succ
                );
                return Ok(s);
            }
        };

        info!(
            "stabilize[PreSuccDead]: successor {} dead, rejoining via predecessor {}",
            succ, pred
        );
        self.watcher.unwatch(succ);
        let (joined, found) = self.join_network(s, &pred).await;
        s = joined;
        match found {
            Some(_) => {
                s.last_outcome = StepOutcome::JoinedViaPredecessor;
                Ok(s)
            }
            None => Ok(self.bankrupt(s)),
        }
    }

    /// The successor answered the probe; reconcile predecessor pointers.
    async fn on_live_successor(
        &self,
        mut s: ChordState,
        succ: &PeerAddress,
        tx: &mut dyn Transmitter,
    ) -> Result<ChordState, ChordError> {
        let reported = match tx.your_predecessor().await {
            Ok(p) => p,
            Err(e) => {
                // The probe passed but the structural query did not. Rather
                // than guess, leave the state alone; the next tick re-probes.
                warn!(
                    "stabilize: predecessor query to live successor {} failed: {}",
                    succ, e
                );
                return Ok(s);
            }
        };

        match reported {
            None => {
                debug!("stabilize[Right]: {} has no predecessor, notifying", succ);
                tx.am_i_predecessor(&s.me).await;
                s.last_outcome = StepOutcome::NotifiedSuccessor;
                Ok(s)
            }
            Some(x) if x.id.between(&s.me.id, &succ.id) => {
                // A closer successor exists. Notify the newcomer rather than
                // the old successor and narrow the list to it; extension on
                // the next tick grows the list back out.
                info!("stabilize[Gauche]: adopting closer successor {}", x);
                match self.transport.transmitter(&x).await {
                    Ok(mut xtx) => xtx.am_i_predecessor(&s.me).await,
                    Err(e) => warn!("stabilize[Gauche]: cannot notify {}: {}", x, e),
                }
                self.watcher.watch(&x);
                s.succ_list = NodeList::from_peers(&s.me, vec![x]);
                s.last_outcome = StepOutcome::NarrowedSuccessor;
                Ok(s)
            }
            Some(_) => {
                debug!("stabilize[Normal]: confirmed as predecessor of {}", succ);
                tx.am_i_predecessor(&s.me).await;
                s = self.increase_successor(s, succ).await;
                let migration = self.immigrate_data(&s).await;
                s.last_outcome = StepOutcome::Extended { migration };
                Ok(s)
            }
        }
    }

    /// Asks `via` for our rightful successor. On success the successor list
    /// collapses to the discovered node and any stale predecessor is
    /// dropped. Returns `None` when no live successor could be established.
    async fn join_network(
        &self,
        mut s: ChordState,
        via: &PeerAddress,
    ) -> (ChordState, Option<PeerAddress>) {
        let found = match self.transport.transmitter(via).await {
            Ok(mut tx) => match tx.find_node(&s.me.id).await {
                Ok(found) => found,
                Err(e) => {
                    debug!("join: lookup via {} failed: {}", via, e);
                    None
                }
            },
            Err(e) => {
                debug!("join: cannot reach {}: {}", via, e);
                None
            }
        };

        match found {
            Some(new_succ) if new_succ.id != s.me.id => {
                info!("join: successor {} found via {}", new_succ, via);
                self.watcher.watch(&new_succ);
                s.succ_list = NodeList::from_peers(&s.me, vec![new_succ.clone()]);
                s.pred = None;
                (s, Some(new_succ))
            }
            Some(_) => {
                // The ring routed our own id back to us: stand alone until
                // someone notifies us otherwise.
                info!("join: {} reports we own our own id, standing alone", via);
                s.succ_list = NodeList::solo(s.me.clone());
                s.pred = None;
                let me = s.me.clone();
                (s, Some(me))
            }
            None => (s, None),
        }
    }

    /// Self-reset: abandon all pointers and stop the tick loop. The node
    /// must be re-initialized externally after this.
    fn bankrupt(&self, mut s: ChordState) -> ChordState {
        error!(
            "stabilize[Bankrupt]: no live successor or predecessor, {} resetting",
            s.me
        );
        s.handle.stop();
        s.succ_list = NodeList::solo(s.me.clone());
        s.pred = None;
        s.last_outcome = StepOutcome::Bankrupt;
        s
    }

    /// Walks `your_successor` pointers from the confirmed successor, at most
    /// [`SUCCESSOR_EXTEND_HOPS`] RPCs, and installs the discovered nodes as
    /// the new successor list. Every member of the new list is watched. A
    /// walk that discovers nothing leaves the list alone, so spares learned
    /// on earlier ticks survive a flaky successor.
    async fn increase_successor(&self, mut s: ChordState, succ: &PeerAddress) -> ChordState {
        let me = s.me.clone();
        let mut collected: Vec<PeerAddress> = vec![succ.clone()];
        let mut last = succ.clone();

        for _ in 0..SUCCESSOR_EXTEND_HOPS {
            let next = match self.transport.transmitter(&last).await {
                Ok(mut tx) => tx.your_successor().await,
                Err(e) => Err(e),
            };
            match next {
                Ok(Some(next))
                    if next.id != me.id && !collected.iter().any(|p| p.id == next.id) =>
                {
                    collected.push(next.clone());
                    last = next;
                }
                Ok(Some(_)) => break, // wrapped the ring
                Ok(None) => break,
                Err(e) => {
                    debug!("stabilize: successor walk stopped at {}: {}", last, e);
                    break;
                }
            }
        }

        if collected.len() == 1 {
            warn!(
                "stabilize: successor walk from {} yielded no extension, keeping current list",
                succ
            );
            self.watcher.watch(succ);
            return s;
        }

        for peer in &collected {
            self.watcher.watch(peer);
        }
        s.succ_list = NodeList::from_peers(&s.me, collected);
        s
    }

    /// Ships every chunk this node is no longer the closest-preceding owner
    /// of to its rightful custodian. All-or-nothing on the local map: keys
    /// are removed only if every transfer succeeded, so a partial failure
    /// is retried wholesale on the next tick (receivers are idempotent).
    async fn immigrate_data(&self, s: &ChordState) -> MigrationOutcome {
        let me = &s.me;
        let succ = s.succ_list.nearest_successor(&me.id);
        let fingers = s.fingers.lock().await.snapshot();
        let snapshot: Vec<(Key, Value)> = s
            .data
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut to_move: Vec<(Key, Value)> = Vec::new();
        for (key, value) in snapshot {
            let kid = NodeId::from_key(&key.0);
            let known = s.succ_list.iter().chain(fingers.iter());
            let nn = nearest_neighbor(&kid, known, me);
            let claimed_by_succ = kid.in_interval(&me.id, &succ.id);
            let closer_owner_known = !kid.in_interval(&me.id, &nn.id);
            if claimed_by_succ || closer_owner_known {
                to_move.push((key, value));
            }
        }

        if to_move.is_empty() {
            return MigrationOutcome::Clean { moved: 0 };
        }
        debug!("stabilize: {} chunks to migrate", to_move.len());

        let attempted = to_move.len();
        let mut shipped: Vec<Key> = Vec::new();
        for (key, value) in &to_move {
            let kid = NodeId::from_key(&key.0);
            let recipient = match self.transport.transmitter(me).await {
                Ok(mut tx) => tx.find_node(&kid).await,
                Err(e) => Err(e),
            };
            let recipient = match recipient {
                Ok(Some(r)) if r.id != me.id => r,
                Ok(Some(_)) => continue, // routing says the chunk is ours after all
                Ok(None) | Err(_) => {
                    warn!("stabilize: no custodian found for chunk {}", kid);
                    return self.abort_migration(attempted);
                }
            };

            let sent = match self.transport.transmitter(&recipient).await {
                Ok(mut tx) => tx.set_chunk(key, value).await,
                Err(e) => Err(e),
            };
            match sent {
                Ok(()) => shipped.push(key.clone()),
                Err(e) => {
                    warn!("stabilize: chunk transfer to {} failed: {}", recipient, e);
                    return self.abort_migration(attempted);
                }
            }
        }

        let mut data = s.data.lock().await;
        for key in &shipped {
            data.remove(key);
        }
        info!("stabilize: migrated {} chunks", shipped.len());
        MigrationOutcome::Clean {
            moved: shipped.len(),
        }
    }

    fn abort_migration(&self, attempted: usize) -> MigrationOutcome {
        warn!("stabilize: migration incomplete, keeping all chunks for retry");
        MigrationOutcome::Failed { attempted }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::error::NetworkError;

    fn peer(n: u8) -> PeerAddress {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        PeerAddress::new(NodeId::new(bytes), format!("http://127.0.0.1:{}", 4000 + n as u16))
    }

    #[derive(Clone, Default)]
    struct PeerBehavior {
        alive: bool,
        reachable: bool,
        predecessor: Option<PeerAddress>,
        successor: Option<PeerAddress>,
        find_reply: Option<PeerAddress>,
        reject_chunks: bool,
        fail_successor_walk: bool,
    }

    impl PeerBehavior {
        fn live() -> Self {
            Self {
                alive: true,
                reachable: true,
                ..Default::default()
            }
        }

        fn dead() -> Self {
            Self::default()
        }
    }

    #[derive(Default)]
    struct MockNet {
        peers: StdMutex<HashMap<NodeId, PeerBehavior>>,
        calls: StdMutex<Vec<(NodeId, &'static str)>>,
        chunks: StdMutex<Vec<(NodeId, Key)>>,
    }

    impl MockNet {
        fn insert(&self, peer: &PeerAddress, behavior: PeerBehavior) {
            self.peers.lock().unwrap().insert(peer.id, behavior);
        }

        fn calls_to(&self, method: &str) -> Vec<NodeId> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, m)| *m == method)
                .map(|(id, _)| *id)
                .collect()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    struct MockTransport(Arc<MockNet>);

    struct MockTransmitter {
        net: Arc<MockNet>,
        peer: NodeId,
    }

    impl MockTransmitter {
        fn behavior(&self) -> PeerBehavior {
            self.net
                .peers
                .lock()
                .unwrap()
                .get(&self.peer)
                .cloned()
                .unwrap_or_default()
        }

        fn record(&self, method: &'static str) {
            self.net.calls.lock().unwrap().push((self.peer, method));
        }
    }

    #[tonic::async_trait]
    impl Transport for MockTransport {
        async fn transmitter(
            &self,
            peer: &PeerAddress,
        ) -> Result<Box<dyn Transmitter>, NetworkError> {
            let reachable = self
                .0
                .peers
                .lock()
                .unwrap()
                .get(&peer.id)
                .map(|b| b.reachable)
                .unwrap_or(false);
            if !reachable {
                return Err(NetworkError::PeerUnreachable(peer.addr.clone()));
            }
            Ok(Box::new(MockTransmitter {
                net: self.0.clone(),
                peer: peer.id,
            }))
        }
    }

    #[tonic::async_trait]
    impl Transmitter for MockTransmitter {
        async fn check_living(&mut self) -> bool {
            self.record("check_living");
            self.behavior().alive
        }

        async fn your_predecessor(&mut self) -> Result<Option<PeerAddress>, NetworkError> {
            self.record("your_predecessor");
            Ok(self.behavior().predecessor)
        }

        async fn your_successor(&mut self) -> Result<Option<PeerAddress>, NetworkError> {
            self.record("your_successor");
            let behavior = self.behavior();
            if behavior.fail_successor_walk {
                return Err(NetworkError::PeerUnreachable("successor query refused".into()));
            }
            Ok(behavior.successor)
        }

        async fn am_i_predecessor(&mut self, _sender: &PeerAddress) {
            self.record("am_i_predecessor");
        }

        async fn find_node(
            &mut self,
            _target: &NodeId,
        ) -> Result<Option<PeerAddress>, NetworkError> {
            self.record("find_node");
            Ok(self.behavior().find_reply)
        }

        async fn set_chunk(&mut self, key: &Key, _value: &Value) -> Result<(), NetworkError> {
            self.record("set_chunk");
            if self.behavior().reject_chunks {
                return Err(NetworkError::PeerUnreachable("chunk refused".into()));
            }
            self.net.chunks.lock().unwrap().push((self.peer, key.clone()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingWatcher {
        events: StdMutex<Vec<(bool, NodeId)>>,
    }

    impl RecordingWatcher {
        fn watched(&self, id: &NodeId) -> bool {
            self.events
                .lock()
                .unwrap()
                .iter()
                .any(|(w, i)| *w && i == id)
        }

        fn unwatched(&self, id: &NodeId) -> bool {
            self.events
                .lock()
                .unwrap()
                .iter()
                .any(|(w, i)| !*w && i == id)
        }
    }

    impl Watcher for RecordingWatcher {
        fn watch(&self, peer: &PeerAddress) {
            self.events.lock().unwrap().push((true, peer.id));
        }

        fn unwatch(&self, peer: &PeerAddress) {
            self.events.lock().unwrap().push((false, peer.id));
        }
    }

    struct Fixture {
        net: Arc<MockNet>,
        watcher: Arc<RecordingWatcher>,
        stabilizer: Stabilizer,
    }

    fn fixture() -> Fixture {
        let net = Arc::new(MockNet::default());
        let watcher = Arc::new(RecordingWatcher::default());
        let stabilizer = Stabilizer::new(
            Arc::new(MockTransport(net.clone())),
            watcher.clone(),
        );
        Fixture {
            net,
            watcher,
            stabilizer,
        }
    }

    fn state_with_successors(me: &PeerAddress, succs: Vec<PeerAddress>) -> ChordState {
        let mut s = ChordState::bootstrap(me.clone());
        s.succ_list = NodeList::from_peers(me, succs);
        s
    }

    // A node alone on its ring does nothing and talks to nobody.
    #[tokio::test]
    async fn alone_step_is_a_no_op() {
        let f = fixture();
        let me = peer(10);
        let s = ChordState::bootstrap(me.clone());

        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(out.last_outcome, StepOutcome::Alone);
        assert!(out.is_alone());
        assert!(out.pred.is_none());
        assert_eq!(f.net.total_calls(), 0);
    }

    // Two-node ring, successor already knows us as predecessor.
    #[tokio::test]
    async fn two_node_ring_notifies_and_extends() {
        let f = fixture();
        let (a, b) = (peer(10), peer(20));
        f.net.insert(&a, PeerBehavior::live());
        f.net.insert(&b, PeerBehavior {
            predecessor: Some(a.clone()),
            successor: Some(a.clone()),
            ..PeerBehavior::live()
        });

        let s = state_with_successors(&a, vec![b.clone()]);
        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(f.net.calls_to("am_i_predecessor"), vec![b.id]);
        assert_eq!(out.successor(), b);
        assert_eq!(out.succ_list.len(), 1);
        assert_eq!(
            out.last_outcome,
            StepOutcome::Extended {
                migration: MigrationOutcome::Clean { moved: 0 }
            }
        );
        assert!(f.watcher.watched(&b.id));
    }

    // The successor has no predecessor yet; notify it and stand pat.
    #[tokio::test]
    async fn successor_without_predecessor_is_notified() {
        let f = fixture();
        let (a, b) = (peer(10), peer(20));
        f.net.insert(&b, PeerBehavior::live());

        let s = state_with_successors(&a, vec![b.clone()]);
        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(f.net.calls_to("am_i_predecessor"), vec![b.id]);
        assert_eq!(out.last_outcome, StepOutcome::NotifiedSuccessor);
        assert_eq!(out.successor(), b);
        // No extension, no migration on this branch.
        assert!(f.net.calls_to("your_successor").is_empty());
    }

    // The successor reports a node between us and it. Note the
    // notification goes to the newcomer, not the old successor: the
    // newcomer has to learn who precedes it before anything else.
    #[tokio::test]
    async fn better_predecessor_narrows_list_and_is_notified() {
        let f = fixture();
        let (a, b, c) = (peer(10), peer(15), peer(20));
        f.net.insert(&b, PeerBehavior::live());
        f.net.insert(&c, PeerBehavior {
            predecessor: Some(b.clone()),
            ..PeerBehavior::live()
        });

        let s = state_with_successors(&a, vec![c.clone()]);
        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(out.successor(), b);
        assert_eq!(out.succ_list.len(), 1);
        assert_eq!(out.last_outcome, StepOutcome::NarrowedSuccessor);
        assert_eq!(f.net.calls_to("am_i_predecessor"), vec![b.id]);
        assert!(f.watcher.watched(&b.id));
    }

    // Dead successor with a spare in the list.
    #[tokio::test]
    async fn dead_successor_with_spare_recovers_through_it() {
        let f = fixture();
        let (a, b, c) = (peer(10), peer(20), peer(30));
        f.net.insert(&b, PeerBehavior::dead());
        f.net.insert(&c, PeerBehavior {
            find_reply: Some(c.clone()),
            ..PeerBehavior::live()
        });

        let s = state_with_successors(&a, vec![b.clone(), c.clone()]);
        let out = f.stabilizer.step(s).await.unwrap();

        assert!(f.watcher.unwatched(&b.id));
        assert_eq!(out.successor(), c);
        assert_eq!(out.last_outcome, StepOutcome::RecoveredSuccessor);
        assert!(f.watcher.watched(&c.id));
        assert_eq!(f.net.calls_to("find_node"), vec![c.id]);
    }

    // The spare is also unreachable; the killed list survives so
    // the next tick can keep probing.
    #[tokio::test]
    async fn dead_successor_with_dead_spare_keeps_trying() {
        let f = fixture();
        let (a, b, c) = (peer(10), peer(20), peer(30));
        f.net.insert(&b, PeerBehavior::dead());
        f.net.insert(&c, PeerBehavior::dead());

        let s = state_with_successors(&a, vec![b.clone(), c.clone()]);
        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(out.successor(), c);
        assert_eq!(out.succ_list.len(), 1);
        assert_eq!(out.last_outcome, StepOutcome::RecoveredSuccessor);
    }

    // Dead successor, no spare, live predecessor.
    #[tokio::test]
    async fn dead_successor_without_spare_joins_via_predecessor() {
        let f = fixture();
        let (a, b, p, s_new) = (peer(10), peer(20), peer(200), peer(40));
        f.net.insert(&b, PeerBehavior::dead());
        f.net.insert(&p, PeerBehavior {
            find_reply: Some(s_new.clone()),
            ..PeerBehavior::live()
        });

        let mut s = state_with_successors(&a, vec![b.clone()]);
        s.pred = Some(p.clone());
        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(out.successor(), s_new);
        assert!(out.pred.is_none(), "stale predecessor must be cleared");
        assert_eq!(out.last_outcome, StepOutcome::JoinedViaPredecessor);
        assert!(f.watcher.watched(&s_new.id));
        assert!(!out.handle.is_stopped());
    }

    // Everything is gone; the node bankrupts itself and stops ticking.
    #[tokio::test]
    async fn bankruptcy_resets_and_stops() {
        let f = fixture();
        let (a, b, p) = (peer(10), peer(20), peer(200));
        f.net.insert(&b, PeerBehavior::dead());
        f.net.insert(&p, PeerBehavior::dead());

        let mut s = state_with_successors(&a, vec![b.clone()]);
        s.pred = Some(p.clone());
        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(out.last_outcome, StepOutcome::Bankrupt);
        assert!(out.is_alone());
        assert!(out.pred.is_none());
        assert!(out.handle.is_stopped());
    }

    // Dead successor, no spare, no predecessor at all: nothing to do.
    #[tokio::test]
    async fn dead_successor_without_fallback_waits() {
        let f = fixture();
        let (a, b) = (peer(10), peer(20));
        f.net.insert(&b, PeerBehavior::dead());

        let s = state_with_successors(&a, vec![b.clone()]);
        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(out.successor(), b);
        assert!(!out.handle.is_stopped());
    }

    // With no peer-state change, consecutive steps agree.
    #[tokio::test]
    async fn steady_state_steps_are_idempotent() {
        let f = fixture();
        let (a, b) = (peer(10), peer(20));
        f.net.insert(&a, PeerBehavior::live());
        f.net.insert(&b, PeerBehavior {
            predecessor: Some(a.clone()),
            successor: Some(a.clone()),
            ..PeerBehavior::live()
        });

        let s = state_with_successors(&a, vec![b.clone()]);
        let once = f.stabilizer.step(s).await.unwrap();
        let twice = f.stabilizer.step(once.clone()).await.unwrap();

        assert_eq!(once.succ_list, twice.succ_list);
        assert_eq!(once.pred, twice.pred);
        assert_eq!(once.last_outcome, twice.last_outcome);
    }

    // Successor extension is bounded even on a long ring.
    #[tokio::test]
    async fn extension_stops_after_bounded_walk() {
        let f = fixture();
        let a = peer(10);
        let ring: Vec<PeerAddress> = (2..9).map(|n| peer(n * 10)).collect();
        f.net.insert(&a, PeerBehavior::live());
        for window in ring.windows(2) {
            f.net.insert(&window[0], PeerBehavior {
                predecessor: Some(a.clone()),
                successor: Some(window[1].clone()),
                ..PeerBehavior::live()
            });
        }
        f.net.insert(ring.last().unwrap(), PeerBehavior {
            successor: Some(a.clone()),
            ..PeerBehavior::live()
        });

        let s = state_with_successors(&a, vec![ring[0].clone()]);
        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(f.net.calls_to("your_successor").len(), SUCCESSOR_EXTEND_HOPS);
        assert_eq!(out.succ_list.len(), SUCCESSOR_EXTEND_HOPS + 1);
        // Every member of the new list must have been watched.
        for member in out.succ_list.iter() {
            assert!(f.watcher.watched(&member.id), "unwatched {}", member);
        }
    }

    // Extension truncates when the ring wraps back to us (two-node ring).
    #[tokio::test]
    async fn extension_truncates_on_self_loop() {
        let f = fixture();
        let (a, b) = (peer(10), peer(20));
        f.net.insert(&a, PeerBehavior::live());
        f.net.insert(&b, PeerBehavior {
            predecessor: Some(a.clone()),
            successor: Some(a.clone()),
            ..PeerBehavior::live()
        });

        let s = state_with_successors(&a, vec![b.clone()]);
        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(out.succ_list.len(), 1);
        assert_eq!(out.successor(), b);
    }

    // A walk whose first hop fails must not narrow the list: spares learned
    // on earlier ticks are exactly what the next recovery needs.
    #[tokio::test]
    async fn failed_extension_keeps_existing_spares() {
        let f = fixture();
        let (a, b, c) = (peer(10), peer(20), peer(30));
        f.net.insert(&a, PeerBehavior::live());
        f.net.insert(&b, PeerBehavior {
            predecessor: Some(a.clone()),
            fail_successor_walk: true,
            ..PeerBehavior::live()
        });

        let s = state_with_successors(&a, vec![b.clone(), c.clone()]);
        let out = f.stabilizer.step(s).await.unwrap();

        let ids: Vec<_> = out.succ_list.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![b.id, c.id]);
        assert_eq!(f.net.calls_to("your_successor").len(), 1);
        assert_eq!(
            out.last_outcome,
            StepOutcome::Extended {
                migration: MigrationOutcome::Clean { moved: 0 }
            }
        );
    }

    /// A key whose hash lands at a controllable spot, plus ids one step on
    /// either side of it. SHA-256 preimages can't be chosen, so the ring is
    /// built around whatever the hash turns out to be.
    fn key_with_neighbors() -> (Key, PeerAddress, PeerAddress) {
        let key = (0..1000)
            .map(|i| format!("chunk-{}", i))
            .find(|k| {
                let b = NodeId::from_key(k.as_bytes()).to_bytes()[31];
                (2..=250).contains(&b)
            })
            .expect("some candidate key lands clear of byte wrap");
        let kid = NodeId::from_key(key.as_bytes());

        let mut before = kid.to_bytes();
        before[31] -= 1;
        let mut after = kid.to_bytes();
        after[31] += 1;
        (
            Key(key.into_bytes()),
            PeerAddress::new(NodeId::new(before), "http://127.0.0.1:4501"),
            PeerAddress::new(NodeId::new(after), "http://127.0.0.1:4502"),
        )
    }

    // Chunks whose hash the successor now claims are shipped and removed.
    #[tokio::test]
    async fn migration_ships_chunks_claimed_by_successor() {
        let f = fixture();
        let (key, me, succ) = key_with_neighbors();
        f.net.insert(&me, PeerBehavior {
            find_reply: Some(succ.clone()),
            ..PeerBehavior::live()
        });
        f.net.insert(&succ, PeerBehavior {
            predecessor: Some(me.clone()),
            successor: Some(me.clone()),
            ..PeerBehavior::live()
        });

        let s = state_with_successors(&me, vec![succ.clone()]);
        s.data
            .lock()
            .await
            .insert(key.clone(), Value(b"payload".to_vec()));

        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(
            out.last_outcome,
            StepOutcome::Extended {
                migration: MigrationOutcome::Clean { moved: 1 }
            }
        );
        assert!(out.data.lock().await.is_empty());
        let delivered = f.net.chunks.lock().unwrap().clone();
        assert_eq!(delivered, vec![(succ.id, key)]);
    }

    // A failed transfer aborts the whole migration and keeps the data.
    #[tokio::test]
    async fn migration_failure_keeps_data_for_retry() {
        let f = fixture();
        let (key, me, succ) = key_with_neighbors();
        f.net.insert(&me, PeerBehavior {
            find_reply: Some(succ.clone()),
            ..PeerBehavior::live()
        });
        f.net.insert(&succ, PeerBehavior {
            predecessor: Some(me.clone()),
            successor: Some(me.clone()),
            reject_chunks: true,
            ..PeerBehavior::live()
        });

        let s = state_with_successors(&me, vec![succ.clone()]);
        s.data
            .lock()
            .await
            .insert(key.clone(), Value(b"payload".to_vec()));

        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(
            out.last_outcome,
            StepOutcome::Extended {
                migration: MigrationOutcome::Failed { attempted: 1 }
            }
        );
        assert_eq!(out.data.lock().await.len(), 1);
    }

    // Chunks this node still owns stay put.
    #[tokio::test]
    async fn migration_keeps_chunks_we_own() {
        let f = fixture();
        let (key, _, succ) = key_with_neighbors();
        // Place ourselves exactly on the chunk's hash: nobody precedes it
        // more closely, so the chunk is ours.
        let kid = NodeId::from_key(&key.0);
        let me = PeerAddress::new(kid, "http://127.0.0.1:4500");
        f.net.insert(&me, PeerBehavior::live());
        f.net.insert(&succ, PeerBehavior {
            predecessor: Some(me.clone()),
            successor: Some(me.clone()),
            ..PeerBehavior::live()
        });

        let s = state_with_successors(&me, vec![succ.clone()]);
        s.data
            .lock()
            .await
            .insert(key.clone(), Value(b"payload".to_vec()));

        let out = f.stabilizer.step(s).await.unwrap();

        assert_eq!(
            out.last_outcome,
            StepOutcome::Extended {
                migration: MigrationOutcome::Clean { moved: 0 }
            }
        );
        assert_eq!(out.data.lock().await.len(), 1);
        assert!(f.net.calls_to("set_chunk").is_empty());
    }

    // The NodeList constructors refuse to produce an empty list, so a step
    // on a list built from nothing degrades to the alone branch.
    #[tokio::test]
    async fn successor_list_built_from_nothing_means_alone() {
        let f = fixture();
        let me = peer(10);
        let mut s = ChordState::bootstrap(me.clone());
        s.succ_list = NodeList::from_peers(&me, vec![]);
        assert!(!s.succ_list.is_empty());
        let out = f.stabilizer.step(s).await.unwrap();
        assert_eq!(out.last_outcome, StepOutcome::Alone);
    }
}
