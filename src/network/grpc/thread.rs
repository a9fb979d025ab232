use std::net::SocketAddr;
use std::time::Duration;

use futures::FutureExt;
use log::{error, info};
use tokio::sync::oneshot;
use tonic::transport::Server;

use crate::error::NetworkError;
use crate::network::grpc::server::OverlayGrpcServer;
use crate::network::messages::overlay::overlay_node_server::OverlayNodeServer;
use crate::network::node::SharedState;

/// Owns the gRPC listener for one node. Signals readiness once the service
/// is registered and shuts down gracefully when told to.
pub struct RpcServerTask {
    state: SharedState,
    bind_addr: SocketAddr,
    shutdown_rx: Option<oneshot::Receiver<()>>,
    ready_tx: Option<oneshot::Sender<()>>,
}

impl RpcServerTask {
    pub fn new(
        state: SharedState,
        bind_addr: SocketAddr,
        shutdown_rx: oneshot::Receiver<()>,
        ready_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            state,
            bind_addr,
            shutdown_rx: Some(shutdown_rx),
            ready_tx: Some(ready_tx),
        }
    }

    pub async fn run(mut self) -> Result<(), NetworkError> {
        info!("starting overlay RPC server on {}", self.bind_addr);

        let service = OverlayGrpcServer::new(self.state.clone());
        let shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| NetworkError::Grpc("server task reused".into()))?;

        let server = Server::builder()
            .tcp_nodelay(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .add_service(OverlayNodeServer::new(service));

        if let Some(ready_tx) = self.ready_tx.take() {
            let _ = ready_tx.send(());
        }

        match server
            .serve_with_shutdown(self.bind_addr, shutdown_rx.map(|_| ()))
            .await
        {
            Ok(()) => {
                info!("overlay RPC server shut down gracefully");
                Ok(())
            }
            Err(e) => {
                error!("overlay RPC server failed: {}", e);
                Err(NetworkError::Grpc(e.to_string()))
            }
        }
    }
}
