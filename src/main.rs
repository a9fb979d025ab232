use clap::{Parser, Subcommand};
use log::{error, info};

use carillon::error::CarillonError;
use carillon::network::grpc::PeerConfig;
use carillon::network::node::OverlayPeer;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "carillon")]
#[command(about = "A Chord overlay node with self-stabilizing ring maintenance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the first node of a fresh overlay
    #[command(name = "start-bootstrap")]
    StartBootstrap {
        /// Listening port (random if not specified)
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },
    /// Join an existing overlay through a bootstrap node
    #[command(name = "join")]
    Join {
        /// Listening port for this node (random if not specified)
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
        /// Port of the bootstrap node to connect to
        #[arg(short = 'b', long = "bootstrap-port")]
        bootstrap_port: u16,
        /// Bootstrap node host
        #[arg(short = 'n', long = "host", default_value = "127.0.0.1")]
        host: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), CarillonError> {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::StartBootstrap { port } => {
            let peer = OverlayPeer::new(PeerConfig {
                port,
                ..PeerConfig::default()
            })?;

            peer.create_network().await;
            info!("bootstrap node running on port {}", peer.port());
            info!(
                "other nodes can join with: carillon join -b {} -p <PORT>",
                peer.port()
            );

            if let Err(e) = peer.run().await {
                error!("bootstrap node failed: {}", e);
                return Err(e);
            }
            info!("bootstrap node shut down");
            Ok(())
        }
        Commands::Join {
            port,
            bootstrap_port,
            host,
        } => {
            let peer = OverlayPeer::new(PeerConfig {
                port,
                ..PeerConfig::default()
            })?;

            let bootstrap_addr = format!("http://{}:{}", host, bootstrap_port);
            info!("joining overlay through {}", bootstrap_addr);

            if let Err(e) = peer.join(bootstrap_addr).await {
                error!("failed to join overlay: {}", e);
                return Err(e);
            }
            info!("node running on port {}", peer.port());

            if let Err(e) = peer.run().await {
                error!("node failed: {}", e);
                return Err(e);
            }
            info!("node shut down");
            Ok(())
        }
    }
}
