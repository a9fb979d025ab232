pub mod grpc;
pub mod messages;
pub mod node;
pub mod transport;
pub mod watch;
