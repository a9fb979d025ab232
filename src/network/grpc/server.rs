use log::{debug, warn};
use tonic::{Request, Response, Status};

use crate::chord::finder::{self, RouteDecision};
use crate::chord::id::NodeId;
use crate::chord::peers::PeerAddress;
use crate::chord::state::{Key, Value};
use crate::network::grpc::client::GrpcTransmitter;
use crate::network::messages::overlay::overlay_node_server::OverlayNode;
use crate::network::messages::overlay::{
    CheckLivingRequest, CheckLivingResponse, FindNodeRequest, GetChunkRequest, GetChunkResponse,
    NotifyRequest, NotifyResponse, PeerReply, PredecessorRequest, SetChunkRequest,
    SetChunkResponse, SuccessorRequest,
};
use crate::network::node::SharedState;

fn peer_reply(peer: Option<&PeerAddress>) -> PeerReply {
    PeerReply {
        peer: peer.map(Into::into),
        success: true,
        error: String::new(),
    }
}

fn failed_reply(error: String) -> PeerReply {
    PeerReply {
        peer: None,
        success: false,
        error,
    }
}

/// The RPC surface this node answers on. Handlers take short locks on the
/// shared state; the only handler that goes back out to the network is the
/// forwarding leg of `find_node`, which runs with no lock held.
pub struct OverlayGrpcServer {
    state: SharedState,
}

impl OverlayGrpcServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl OverlayNode for OverlayGrpcServer {
    async fn check_living(
        &self,
        _request: Request<CheckLivingRequest>,
    ) -> Result<Response<CheckLivingResponse>, Status> {
        Ok(Response::new(CheckLivingResponse {
            alive: true,
            timestamp: chrono::Utc::now().timestamp(),
        }))
    }

    async fn your_predecessor(
        &self,
        _request: Request<PredecessorRequest>,
    ) -> Result<Response<PeerReply>, Status> {
        let state = self.state.lock().await;
        Ok(Response::new(peer_reply(state.pred.as_ref())))
    }

    async fn your_successor(
        &self,
        _request: Request<SuccessorRequest>,
    ) -> Result<Response<PeerReply>, Status> {
        let state = self.state.lock().await;
        let succ = state.successor();
        if succ.id == state.me.id {
            Ok(Response::new(peer_reply(None)))
        } else {
            Ok(Response::new(peer_reply(Some(&succ))))
        }
    }

    async fn am_i_predecessor(
        &self,
        request: Request<NotifyRequest>,
    ) -> Result<Response<NotifyResponse>, Status> {
        let sender = request
            .into_inner()
            .sender
            .ok_or_else(|| Status::invalid_argument("sender missing"))?;
        let sender = PeerAddress::try_from(sender)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let mut state = self.state.lock().await;
        let accepted = match &state.pred {
            None => true,
            Some(p) => p.id == sender.id || sender.id.between(&p.id, &state.me.id),
        };
        if accepted {
            debug!("accepting {} as predecessor", sender);
            state.pred = Some(sender);
        }
        Ok(Response::new(NotifyResponse { accepted }))
    }

    async fn find_node(
        &self,
        request: Request<FindNodeRequest>,
    ) -> Result<Response<PeerReply>, Status> {
        let request = request.into_inner();
        let target = NodeId::from_bytes(&request.target)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let next_hop = {
            let state = self.state.lock().await;
            let succ = state.successor();
            match finder::decide(&target, &state.me.id, &succ.id) {
                RouteDecision::SelfOwns => {
                    return Ok(Response::new(peer_reply(Some(&state.me))));
                }
                RouteDecision::SuccessorOwns => {
                    return Ok(Response::new(peer_reply(Some(&succ))));
                }
                RouteDecision::Forward => {
                    if request.hops_left == 0 {
                        // Budget exhausted; the successor is the best
                        // answer this node can give.
                        return Ok(Response::new(peer_reply(Some(&succ))));
                    }
                    state
                        .fingers
                        .lock()
                        .await
                        .closest_preceding(&target)
                        .unwrap_or(succ)
                }
            }
        };

        let forwarded = match GrpcTransmitter::connect(&next_hop).await {
            Ok(mut tx) => {
                tx.find_node_with_budget(&target, request.hops_left - 1)
                    .await
            }
            Err(e) => Err(e),
        };
        match forwarded {
            Ok(found) => Ok(Response::new(peer_reply(found.as_ref()))),
            Err(e) => {
                warn!("lookup forward via {} failed: {}", next_hop, e);
                Ok(Response::new(failed_reply(e.to_string())))
            }
        }
    }

    async fn set_chunk(
        &self,
        request: Request<SetChunkRequest>,
    ) -> Result<Response<SetChunkResponse>, Status> {
        let request = request.into_inner();
        let state = self.state.lock().await;
        state
            .data
            .lock()
            .await
            .insert(Key(request.key), Value(request.value));
        Ok(Response::new(SetChunkResponse {
            success: true,
            error: String::new(),
        }))
    }

    async fn get_chunk(
        &self,
        request: Request<GetChunkRequest>,
    ) -> Result<Response<GetChunkResponse>, Status> {
        let request = request.into_inner();
        let state = self.state.lock().await;
        let value = state.data.lock().await.get(&Key(request.key)).cloned();
        Ok(Response::new(match value {
            Some(value) => GetChunkResponse {
                found: true,
                value: value.0,
            },
            None => GetChunkResponse {
                found: false,
                value: Vec::new(),
            },
        }))
    }
}
