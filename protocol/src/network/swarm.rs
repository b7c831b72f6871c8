//! # Transport & Behaviour
//!
//! libp2p swarm construction: TCP with a Noise handshake and yamux
//! multiplexing, gossipsub for the topic mesh, identify for address
//! exchange, Kademlia for rendezvous discovery, mDNS for the LAN, and a
//! request-response protocol for direct signal streams.
//!
//! Gossipsub message ids are the SHA-256 of the payload, so the mesh
//! itself suppresses byte-identical floods before our own
//! fingerprint-level dedup even runs.

use libp2p::{
    gossipsub, identify,
    identity::Keypair,
    kad::{self, store::MemoryStore},
    mdns, noise, request_response,
    swarm::Swarm,
    tcp, yamux, PeerId, StreamProtocol, SwarmBuilder,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

use crate::codec::Envelope;
use crate::config;

/// How long an idle connection is kept before the swarm reaps it.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from transport setup and use.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("transport setup failed: {0}")]
    Transport(String),

    #[error("behaviour setup failed: {0}")]
    Behaviour(String),

    #[error("subscribe failed for {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("gossip node is shutting down")]
    ChannelClosed,
}

/// Acknowledgement for a direct signal envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalAck {
    /// Whether the envelope survived dedup and validation.
    pub accepted: bool,
}

// ---------------------------------------------------------------------------
// Behaviour
// ---------------------------------------------------------------------------

/// The composed network behaviour of a P402 node.
#[derive(libp2p::swarm::NetworkBehaviour)]
pub struct P402Behaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub kademlia: kad::Behaviour<MemoryStore>,
    pub mdns: mdns::tokio::Behaviour,
    pub signal: request_response::json::Behaviour<Envelope, SignalAck>,
}

fn build_behaviour(key: &Keypair) -> Result<P402Behaviour, NetworkError> {
    let peer_id = PeerId::from(key.public());

    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .validation_mode(gossipsub::ValidationMode::Strict)
        .max_transmit_size(config::MAX_MESSAGE_SIZE)
        .message_id_fn(|message: &gossipsub::Message| {
            let mut hasher = Sha256::new();
            hasher.update(&message.data);
            gossipsub::MessageId::from(hasher.finalize().to_vec())
        })
        .build()
        .map_err(|e| NetworkError::Behaviour(format!("gossipsub config: {e}")))?;

    let gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(key.clone()),
        gossipsub_config,
    )
    .map_err(|e| NetworkError::Behaviour(format!("gossipsub: {e}")))?;

    let identify_config = identify::Config::new(config::IDENTIFY_PROTOCOL.to_string(), key.public())
        .with_agent_version(format!(
            "{}/{}",
            config::MDNS_SERVICE,
            config::PROTOCOL_VERSION
        ))
        .with_push_listen_addr_updates(true);
    let identify = identify::Behaviour::new(identify_config);

    let mut kad_config = kad::Config::default();
    kad_config.set_query_timeout(config::DHT_QUERY_TIMEOUT);
    let store = MemoryStore::new(peer_id);
    let kademlia = kad::Behaviour::with_config(peer_id, store, kad_config);

    let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), peer_id)
        .map_err(|e| NetworkError::Behaviour(format!("mdns: {e}")))?;

    let signal = request_response::json::Behaviour::new(
        [(
            StreamProtocol::new(config::SIGNAL_PROTOCOL),
            request_response::ProtocolSupport::Full,
        )],
        request_response::Config::default(),
    );

    Ok(P402Behaviour {
        gossipsub,
        identify,
        kademlia,
        mdns,
        signal,
    })
}

/// Build the swarm around an existing identity keypair. The caller still
/// needs to `listen_on` and subscribe.
pub fn build_swarm(identity: Keypair) -> Result<Swarm<P402Behaviour>, NetworkError> {
    let swarm = SwarmBuilder::with_existing_identity(identity)
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| NetworkError::Transport(format!("{e:?}")))?
        .with_behaviour(|key| {
            build_behaviour(key).map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                Box::new(e)
            })
        })
        .map_err(|e| NetworkError::Behaviour(format!("{e:?}")))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build();

    Ok(swarm)
}

/// Join and subscribe every protocol topic.
pub fn subscribe_all(swarm: &mut Swarm<P402Behaviour>) -> Result<(), NetworkError> {
    for topic in config::ALL_TOPICS {
        let ident = gossipsub::IdentTopic::new(topic);
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&ident)
            .map_err(|e| NetworkError::Subscribe {
                topic: topic.to_string(),
                reason: format!("{e:?}"),
            })?;
    }
    Ok(())
}

/// Best-effort LAN address inference for hosts where interface
/// enumeration is denied: the local endpoint of an outbound UDP socket.
/// No packet is sent; UDP connect only fixes the route.
pub fn infer_lan_address() -> Option<std::net::IpAddr> {
    let socket = std::net::UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    let addr = socket.local_addr().ok()?;
    if addr.ip().is_unspecified() {
        None
    } else {
        Some(addr.ip())
    }
}
