use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use log::{debug, info, warn};
use tokio::time::sleep;

use crate::chord::id::NodeId;
use crate::chord::peers::PeerAddress;
use crate::chord::state::{SharedFingerTable, StabilizerHandle};
use crate::chord::WATCH_SWEEP_INTERVAL;
use crate::network::transport::{Transport, Watcher};

/// Process-wide record of which peers this node cares about. The stabilizer
/// registers interest here; a background sweep heartbeats the registered
/// peers and drops the ones that stop answering.
#[derive(Default)]
pub struct SupervisionRegistry {
    watched: Mutex<HashMap<NodeId, PeerAddress>>,
}

impl SupervisionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn watched_peers(&self) -> Vec<PeerAddress> {
        self.watched.lock().unwrap().values().cloned().collect()
    }

    pub fn is_watched(&self, id: &NodeId) -> bool {
        self.watched.lock().unwrap().contains_key(id)
    }
}

impl Watcher for SupervisionRegistry {
    fn watch(&self, peer: &PeerAddress) {
        let mut watched = self.watched.lock().unwrap();
        if watched.insert(peer.id, peer.clone()).is_none() {
            debug!("watching {}", peer);
        }
    }

    fn unwatch(&self, peer: &PeerAddress) {
        let mut watched = self.watched.lock().unwrap();
        if watched.remove(&peer.id).is_some() {
            debug!("unwatching {}", peer);
        }
    }
}

/// Periodically heartbeats every watched peer. A peer that fails its probe
/// loses its watch entry and its finger slots; the stabilizer re-discovers
/// live topology on its own ticks.
pub async fn run_watch_sweep(
    registry: Arc<SupervisionRegistry>,
    transport: Arc<dyn Transport>,
    fingers: SharedFingerTable,
    handle: StabilizerHandle,
) {
    info!("starting supervision sweep");
    loop {
        sleep(WATCH_SWEEP_INTERVAL).await;
        if handle.is_stopped() {
            info!("supervision sweep stopped");
            return;
        }

        for peer in registry.watched_peers() {
            let alive = match transport.transmitter(&peer).await {
                Ok(mut tx) => tx.check_living().await,
                Err(_) => false,
            };
            if !alive {
                warn!("watched peer {} stopped answering", peer);
                registry.unwatch(&peer);
                fingers.lock().await.forget(&peer.id);
            }
        }
    }
}
