use std::future::Future;
use std::time::Duration;

use log::warn;
use tokio::time::timeout;
use tonic::transport::{Channel, Endpoint};

use crate::chord::id::NodeId;
use crate::chord::peers::PeerAddress;
use crate::chord::state::{Key, Value};
use crate::chord::{
    CONNECT_TIMEOUT, FIND_NODE_HOP_BUDGET, FIND_NODE_TIMEOUT, LIVENESS_TIMEOUT,
    PREDECESSOR_TIMEOUT, SET_CHUNK_TIMEOUT, SUCCESSOR_TIMEOUT,
};
use crate::error::NetworkError;
use crate::network::messages::overlay::overlay_node_client::OverlayNodeClient;
use crate::network::messages::overlay::{
    CheckLivingRequest, FindNodeRequest, GetChunkRequest, NotifyRequest, PeerReply,
    PredecessorRequest, SetChunkRequest, SuccessorRequest,
};
use crate::network::transport::{Transmitter, Transport};

/// Awaits a unary call under a deadline. Expiry and transport failure both
/// collapse into errors the caller treats as "peer unreachable".
async fn with_deadline<T, F>(limit: Duration, call: F) -> Result<T, NetworkError>
where
    F: Future<Output = Result<tonic::Response<T>, tonic::Status>>,
{
    match timeout(limit, call).await {
        Ok(Ok(response)) => Ok(response.into_inner()),
        Ok(Err(status)) => Err(NetworkError::Grpc(status.to_string())),
        Err(_) => Err(NetworkError::Timeout(limit)),
    }
}

fn parse_peer_reply(reply: PeerReply) -> Result<Option<PeerAddress>, NetworkError> {
    if !reply.success {
        return Err(NetworkError::Grpc(reply.error));
    }
    match reply.peer {
        Some(info) => {
            let peer = PeerAddress::try_from(info)
                .map_err(|e| NetworkError::Grpc(e.to_string()))?;
            Ok(Some(peer))
        }
        None => Ok(None),
    }
}

/// [`Transmitter`] over a tonic channel to one peer. A fresh connection is
/// made per transmitter; peers churn too often to make pooling worthwhile.
pub struct GrpcTransmitter {
    client: OverlayNodeClient<Channel>,
    peer_addr: String,
}

impl GrpcTransmitter {
    pub async fn connect(peer: &PeerAddress) -> Result<Self, NetworkError> {
        Self::connect_addr(peer.addr.clone()).await
    }

    /// Connects by bare address, for bootstrap peers whose ring identity is
    /// not known yet.
    pub async fn connect_addr(addr: String) -> Result<Self, NetworkError> {
        let endpoint = Endpoint::from_shared(addr.clone())
            .map_err(|e| NetworkError::InvalidAddress(format!("{}: {}", addr, e)))?
            .connect_timeout(CONNECT_TIMEOUT);
        let channel = timeout(CONNECT_TIMEOUT, endpoint.connect())
            .await
            .map_err(|_| NetworkError::Timeout(CONNECT_TIMEOUT))?
            .map_err(|e| NetworkError::PeerUnreachable(format!("{}: {}", addr, e)))?;
        Ok(Self {
            client: OverlayNodeClient::new(channel),
            peer_addr: addr,
        })
    }

    /// Lookup with an explicit forwarding budget; the server decrements it
    /// at every hop.
    pub async fn find_node_with_budget(
        &mut self,
        target: &NodeId,
        hops_left: u32,
    ) -> Result<Option<PeerAddress>, NetworkError> {
        let reply = with_deadline(
            FIND_NODE_TIMEOUT,
            self.client.find_node(FindNodeRequest {
                target: target.to_bytes().to_vec(),
                hops_left,
            }),
        )
        .await?;
        parse_peer_reply(reply)
    }

    /// Local chunk read on the peer; not part of stabilization, used by the
    /// client-side get path.
    pub async fn get_chunk(&mut self, key: &Key) -> Result<Option<Value>, NetworkError> {
        let reply = with_deadline(
            SET_CHUNK_TIMEOUT,
            self.client.get_chunk(GetChunkRequest { key: key.0.clone() }),
        )
        .await?;
        if reply.found {
            Ok(Some(Value(reply.value)))
        } else {
            Ok(None)
        }
    }
}

#[tonic::async_trait]
impl Transmitter for GrpcTransmitter {
    async fn check_living(&mut self) -> bool {
        matches!(
            with_deadline(LIVENESS_TIMEOUT, self.client.check_living(CheckLivingRequest {}))
                .await,
            Ok(reply) if reply.alive
        )
    }

    async fn your_predecessor(&mut self) -> Result<Option<PeerAddress>, NetworkError> {
        let reply = with_deadline(
            PREDECESSOR_TIMEOUT,
            self.client.your_predecessor(PredecessorRequest {}),
        )
        .await?;
        parse_peer_reply(reply)
    }

    async fn your_successor(&mut self) -> Result<Option<PeerAddress>, NetworkError> {
        let reply = with_deadline(
            SUCCESSOR_TIMEOUT,
            self.client.your_successor(SuccessorRequest {}),
        )
        .await?;
        parse_peer_reply(reply)
    }

    async fn am_i_predecessor(&mut self, sender: &PeerAddress) {
        let result = with_deadline(
            LIVENESS_TIMEOUT,
            self.client.am_i_predecessor(NotifyRequest {
                sender: Some(sender.into()),
            }),
        )
        .await;
        if let Err(e) = result {
            warn!("notify to {} not delivered: {}", self.peer_addr, e);
        }
    }

    async fn find_node(&mut self, target: &NodeId) -> Result<Option<PeerAddress>, NetworkError> {
        self.find_node_with_budget(target, FIND_NODE_HOP_BUDGET).await
    }

    async fn set_chunk(&mut self, key: &Key, value: &Value) -> Result<(), NetworkError> {
        let reply = with_deadline(
            SET_CHUNK_TIMEOUT,
            self.client.set_chunk(SetChunkRequest {
                key: key.0.clone(),
                value: value.0.clone(),
            }),
        )
        .await?;
        if reply.success {
            Ok(())
        } else {
            Err(NetworkError::Grpc(reply.error))
        }
    }
}

/// The live [`Transport`]: resolves peers to gRPC transmitters.
#[derive(Clone, Copy, Debug, Default)]
pub struct GrpcTransport;

#[tonic::async_trait]
impl Transport for GrpcTransport {
    async fn transmitter(&self, peer: &PeerAddress) -> Result<Box<dyn Transmitter>, NetworkError> {
        Ok(Box::new(GrpcTransmitter::connect(peer).await?))
    }
}
