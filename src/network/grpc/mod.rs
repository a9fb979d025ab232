pub mod client;
pub mod server;
pub mod thread;

pub use client::{GrpcTransmitter, GrpcTransport};
pub use server::OverlayGrpcServer;
pub use thread::RpcServerTask;

/// Listening configuration for one overlay node.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub host: String,
    /// Listening port; a random free port when unset.
    pub port: Option<u16>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: None,
        }
    }
}
