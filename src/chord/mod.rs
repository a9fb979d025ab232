pub mod fingers;
pub mod finder;
pub mod id;
pub mod peers;
pub mod stabilizer;
pub mod state;

use std::time::Duration;

/// Maximum `your_successor` hops when extending the successor list.
pub const SUCCESSOR_EXTEND_HOPS: usize = 4;

/// Forwarding budget for a ring lookup before the answer is forced locally.
pub const FIND_NODE_HOP_BUDGET: u32 = 32;

// Worker cadences.
pub const STABILIZE_INTERVAL: Duration = Duration::from_secs(15);
pub const FINGER_FIX_INTERVAL: Duration = Duration::from_secs(10);
pub const WATCH_SWEEP_INTERVAL: Duration = Duration::from_secs(20);

// Per-RPC deadlines. A timeout is treated exactly like a dead peer.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);
pub const PREDECESSOR_TIMEOUT: Duration = Duration::from_secs(20);
pub const SUCCESSOR_TIMEOUT: Duration = Duration::from_secs(10);
pub const FIND_NODE_TIMEOUT: Duration = Duration::from_secs(50);
pub const SET_CHUNK_TIMEOUT: Duration = Duration::from_secs(10);
