//! The gossip overlay: transport, discovery, routing, dispatch, and peer
//! accounting.

pub mod dispatch;
pub mod node;
pub mod peers;
pub mod router;
pub mod swarm;

pub use dispatch::{DispatchError, Dispatcher};
pub use node::{Command, GossipHandle, GossipNode, NodeConfig};
pub use peers::{PeerRecord, PeerStatus, PeerTable};
pub use router::{DropReason, Router, Verdict};
pub use swarm::{infer_lan_address, NetworkError, SignalAck};
