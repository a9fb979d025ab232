use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::{oneshot, Mutex};
use tokio::time::sleep;

use crate::chord::id::{NodeId, KEY_SIZE};
use crate::chord::peers::{NodeList, PeerAddress};
use crate::chord::stabilizer::Stabilizer;
use crate::chord::state::{ChordState, Key, Value};
use crate::chord::{FINGER_FIX_INTERVAL, STABILIZE_INTERVAL};
use crate::error::{CarillonError, ChordError, NetworkError};
use crate::network::grpc::client::{GrpcTransmitter, GrpcTransport};
use crate::network::grpc::thread::RpcServerTask;
use crate::network::grpc::PeerConfig;
use crate::network::transport::{Transport, Transmitter, Watcher};
use crate::network::watch::{run_watch_sweep, SupervisionRegistry};

/// The node's single state cell. Observers always see either the pre-step
/// or the post-step value; the stabilize worker is the only writer of the
/// pointer fields.
pub type SharedState = Arc<Mutex<ChordState>>;

/// One overlay node: state cell, RPC server, and the periodic workers that
/// keep its pointers honest.
pub struct OverlayPeer {
    state: SharedState,
    watcher: Arc<SupervisionRegistry>,
    bind_addr: SocketAddr,
}

impl OverlayPeer {
    pub fn new(config: PeerConfig) -> Result<Self, NetworkError> {
        let port = match config.port {
            Some(port) => port,
            None => random_port()?,
        };
        let bind_addr: SocketAddr = format!("{}:{}", config.host, port)
            .parse()
            .map_err(|e| NetworkError::InvalidAddress(format!("{}:{}: {}", config.host, port, e)))?;
        let me = PeerAddress::new(
            NodeId::random(),
            format!("http://{}:{}", config.host, port),
        );
        info!("node {} will listen on {}", me, bind_addr);

        Ok(Self {
            state: Arc::new(Mutex::new(ChordState::bootstrap(me))),
            watcher: SupervisionRegistry::new(),
            bind_addr,
        })
    }

    pub fn port(&self) -> u16 {
        self.bind_addr.port()
    }

    /// First node of a fresh overlay: alone, every finger pointing home.
    pub async fn create_network(&self) {
        let state = self.state.lock().await;
        let mut fingers = state.fingers.lock().await;
        for k in 0..KEY_SIZE {
            fingers.update(k, state.me.clone());
        }
        info!("created new overlay as {}", state.me);
    }

    /// Joins an existing overlay by asking `bootstrap_addr` for our
    /// rightful successor.
    pub async fn join(&self, bootstrap_addr: String) -> Result<(), CarillonError> {
        let me = { self.state.lock().await.me.clone() };

        let mut bootstrap = GrpcTransmitter::connect_addr(bootstrap_addr.clone())
            .await
            .map_err(|e| ChordError::JoinFailed(e.to_string()))?;
        let succ = bootstrap
            .find_node(&me.id)
            .await
            .map_err(|e| ChordError::JoinFailed(e.to_string()))?
            .ok_or_else(|| {
                ChordError::JoinFailed(format!("no successor found via {}", bootstrap_addr))
            })?;
        if succ.id == me.id {
            return Err(ChordError::JoinFailed(
                "bootstrap peer routed our own id back to us".into(),
            )
            .into());
        }

        let mut state = self.state.lock().await;
        state.succ_list = NodeList::from_peers(&me, vec![succ.clone()]);
        state.pred = None;
        self.watcher.watch(&succ);
        info!("joined overlay via {}, successor is {}", bootstrap_addr, succ);
        Ok(())
    }

    /// Serves RPCs and runs the maintenance workers until ctrl-c.
    pub async fn run(&self) -> Result<(), CarillonError> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let server = RpcServerTask::new(self.state.clone(), self.bind_addr, shutdown_rx, ready_tx);
        let server_task = tokio::spawn(server.run());
        if ready_rx.await.is_err() {
            return Err(NetworkError::Grpc("RPC server failed to start".into()).into());
        }

        let transport: Arc<dyn Transport> = Arc::new(GrpcTransport);
        let stabilizer = Arc::new(Stabilizer::new(transport.clone(), self.watcher.clone()));
        let (fingers, handle) = {
            let state = self.state.lock().await;
            (state.fingers.clone(), state.handle.clone())
        };

        tokio::spawn(run_stabilize_worker(self.state.clone(), stabilizer));
        tokio::spawn(run_finger_worker(self.state.clone(), transport.clone()));
        tokio::spawn(run_watch_sweep(
            self.watcher.clone(),
            transport,
            fingers,
            handle.clone(),
        ));

        tokio::signal::ctrl_c().await.map_err(NetworkError::Io)?;
        info!("shutdown requested");
        handle.stop();
        let _ = shutdown_tx.send(());
        match server_task.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(NetworkError::Grpc(format!("server task panicked: {}", e)).into()),
        }
    }

    /// Stores a chunk on whichever node the ring says owns it.
    pub async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), CarillonError> {
        let me = { self.state.lock().await.me.clone() };
        let kid = NodeId::from_key(&key);

        let mut local = GrpcTransmitter::connect(&me).await?;
        let owner = local
            .find_node(&kid)
            .await?
            .ok_or_else(|| ChordError::NoRoute(kid.to_string()))?;

        if owner.id == me.id {
            let state = self.state.lock().await;
            state.data.lock().await.insert(Key(key), Value(value));
            return Ok(());
        }
        let mut tx = GrpcTransmitter::connect(&owner).await?;
        tx.set_chunk(&Key(key), &Value(value)).await?;
        Ok(())
    }

    /// Fetches a chunk from its owner.
    pub async fn get(&self, key: Vec<u8>) -> Result<Option<Value>, CarillonError> {
        let me = { self.state.lock().await.me.clone() };
        let kid = NodeId::from_key(&key);

        let mut local = GrpcTransmitter::connect(&me).await?;
        let owner = local
            .find_node(&kid)
            .await?
            .ok_or_else(|| ChordError::NoRoute(kid.to_string()))?;

        if owner.id == me.id {
            let state = self.state.lock().await;
            let value = state.data.lock().await.get(&Key(key)).cloned();
            return Ok(value);
        }
        let mut tx = GrpcTransmitter::connect(&owner).await?;
        Ok(tx.get_chunk(&Key(key)).await?)
    }
}

fn random_port() -> Result<u16, NetworkError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Drives the stabilizer: snapshot, step, commit. One step at a time by
/// construction; a tick that finds the handle stopped ends the loop.
pub async fn run_stabilize_worker(cell: SharedState, stabilizer: Arc<Stabilizer>) {
    info!("starting stabilize worker");
    loop {
        sleep(STABILIZE_INTERVAL).await;

        let snapshot = { cell.lock().await.clone() };
        if snapshot.handle.is_stopped() {
            info!("stabilize worker stopped");
            return;
        }

        match stabilizer.step(snapshot.clone()).await {
            Ok(next) => {
                let mut current = cell.lock().await;
                current.succ_list = next.succ_list;
                current.last_outcome = next.last_outcome;
                // A notify that arrived while the step was running wins,
                // unless the step itself rewrote the predecessor.
                if next.pred != snapshot.pred {
                    current.pred = next.pred;
                }
                debug!("stabilized, successor now {}", current.successor());
            }
            Err(e) => {
                error!("stabilization aborted: {}", e);
                snapshot.handle.stop();
                return;
            }
        }
    }
}

/// Round-robin finger repair: resolve `me + 2^k` through the ring and
/// install the owner in slot `k`.
pub async fn run_finger_worker(cell: SharedState, transport: Arc<dyn Transport>) {
    info!("starting finger maintenance worker");
    let mut next_finger = 0;
    loop {
        sleep(FINGER_FIX_INTERVAL).await;

        let (me, fingers, handle, alone) = {
            let state = cell.lock().await;
            (
                state.me.clone(),
                state.fingers.clone(),
                state.handle.clone(),
                state.is_alone(),
            )
        };
        if handle.is_stopped() {
            info!("finger worker stopped");
            return;
        }
        if alone {
            continue;
        }

        let target = me.id.finger_target(next_finger);
        let owner = match transport.transmitter(&me).await {
            Ok(mut tx) => tx.find_node(&target).await.ok().flatten(),
            Err(_) => None,
        };
        match owner {
            Some(owner) => fingers.lock().await.update(next_finger, owner),
            None => debug!("no owner found for finger {}", next_finger),
        }
        next_finger = (next_finger + 1) % KEY_SIZE;
    }
}
