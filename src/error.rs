use thiserror::Error;

#[derive(Error, Debug)]
pub enum CarillonError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("overlay error: {0}")]
    Chord(#[from] ChordError),
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("gRPC error: {0}")]
    Grpc(String),

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the overlay protocol itself. Only `InvariantViolation`
/// is fatal to a stabilization step; everything else is recovered locally by
/// deferring to the next tick.
#[derive(Error, Debug)]
pub enum ChordError {
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("failed to join ring: {0}")]
    JoinFailed(String),

    #[error("node state invariant violated: {0}")]
    InvariantViolation(String),

    #[error("no route to {0}")]
    NoRoute(String),
}
