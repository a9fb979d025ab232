use crate::chord::id::NodeId;
use crate::chord::peers::PeerAddress;
use crate::error::ChordError;
use crate::network::messages::overlay::PeerInfo;

impl From<&PeerAddress> for PeerInfo {
    fn from(peer: &PeerAddress) -> Self {
        PeerInfo {
            node_id: peer.id.to_bytes().to_vec(),
            address: peer.addr.clone(),
        }
    }
}

impl TryFrom<PeerInfo> for PeerAddress {
    type Error = ChordError;

    fn try_from(info: PeerInfo) -> Result<Self, ChordError> {
        Ok(PeerAddress::new(
            NodeId::from_bytes(&info.node_id)?,
            info.address,
        ))
    }
}
