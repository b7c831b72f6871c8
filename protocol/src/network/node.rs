//! # Gossip Node
//!
//! The long-lived network task. Owns the swarm and drives everything that
//! touches it: subscription deliveries into the router, publish commands
//! out to the mesh, direct signal streams, and the three discovery
//! mechanisms (mDNS, DHT rendezvous with a routing-table crawl, and
//! bootstrap reconnection).
//!
//! Everything else in the process talks to the network through a cloned
//! [`GossipHandle`]; the swarm itself never leaves this task.

use futures::StreamExt;
use libp2p::{
    gossipsub, identify,
    identity::Keypair,
    kad,
    mdns,
    multiaddr::Protocol,
    request_response,
    swarm::{dial_opts::DialOpts, DialError, SwarmEvent},
    Multiaddr, PeerId, Swarm,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::codec::Envelope;
use crate::config;
use crate::network::dispatch::Dispatcher;
use crate::network::peers::PeerTable;
use crate::network::router::Router;
use crate::network::swarm::{
    build_swarm, infer_lan_address, subscribe_all, NetworkError, P402Behaviour,
    P402BehaviourEvent, SignalAck,
};

/// Commands the rest of the process sends into the network task.
#[derive(Debug)]
pub enum Command {
    /// Publish an envelope on its type's topic.
    Publish(Envelope),
    /// Send an envelope to one peer over a direct signal stream.
    Signal { peer: PeerId, envelope: Envelope },
    /// Dial an address (bootstrap entries, operator-supplied peers).
    Dial(Multiaddr),
}

/// Runtime knobs for the gossip node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// TCP port to listen on.
    pub listen_port: u16,
    /// Full multiaddrs (with peer ids) re-dialed whenever the node finds
    /// itself with zero connections.
    pub bootstrap: Vec<Multiaddr>,
    /// Cap on concurrent connections; excess inbound is closed on sight.
    pub max_connections: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_port: config::GOSSIP_PORT,
            bootstrap: Vec::new(),
            max_connections: config::MAX_CONNECTIONS as usize,
        }
    }
}

// ---------------------------------------------------------------------------
// GossipHandle
// ---------------------------------------------------------------------------

/// Cloneable handle into the network task.
#[derive(Clone)]
pub struct GossipHandle {
    commands: mpsc::Sender<Command>,
    local_peer: PeerId,
}

impl GossipHandle {
    /// Queue an envelope for publication on its topic.
    pub async fn publish(&self, envelope: Envelope) -> Result<(), NetworkError> {
        self.commands
            .send(Command::Publish(envelope))
            .await
            .map_err(|_| NetworkError::ChannelClosed)
    }

    /// Queue a direct signal to one peer.
    pub async fn signal(&self, peer: PeerId, envelope: Envelope) -> Result<(), NetworkError> {
        self.commands
            .send(Command::Signal { peer, envelope })
            .await
            .map_err(|_| NetworkError::ChannelClosed)
    }

    /// Queue a dial.
    pub async fn dial(&self, addr: Multiaddr) -> Result<(), NetworkError> {
        self.commands
            .send(Command::Dial(addr))
            .await
            .map_err(|_| NetworkError::ChannelClosed)
    }

    /// This node's transport peer id.
    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }
}

// ---------------------------------------------------------------------------
// GossipNode
// ---------------------------------------------------------------------------

/// The network task state. Constructed once, consumed by [`run`](Self::run).
pub struct GossipNode {
    swarm: Swarm<P402Behaviour>,
    config: NodeConfig,
    router: Arc<Router>,
    peers: Arc<PeerTable>,
    commands: mpsc::Receiver<Command>,
    /// Peers with at least one live connection.
    connected: HashSet<PeerId>,
    /// Kademlia key the rendezvous namespace hashes to.
    rendezvous_key: kad::RecordKey,
    local_peer: PeerId,
}

impl GossipNode {
    /// Build the swarm, join every topic, start listening, and return the
    /// node plus its handle and router.
    pub fn new(
        identity: Keypair,
        config: NodeConfig,
        peers: Arc<PeerTable>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<(Self, GossipHandle, Arc<Router>), NetworkError> {
        let local_peer = PeerId::from(identity.public());
        let mut swarm = build_swarm(identity)?;
        subscribe_all(&mut swarm)?;

        // Rendezvous advertisement and lookups both run against the DHT,
        // so this node must answer queries, not just pose them.
        swarm
            .behaviour_mut()
            .kademlia
            .set_mode(Some(kad::Mode::Server));

        let listen: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", config.listen_port)
            .parse()
            .expect("static multiaddr template");
        swarm
            .listen_on(listen)
            .map_err(|e| NetworkError::Transport(e.to_string()))?;

        // On hosts that deny interface enumeration the wildcard listen
        // address is all we would ever advertise; inject the routed LAN
        // address explicitly.
        if let Some(std::net::IpAddr::V4(ip)) = infer_lan_address() {
            let advertised: Multiaddr = format!("/ip4/{}/tcp/{}", ip, config.listen_port)
                .parse()
                .expect("derived multiaddr");
            info!(target: "gossip", %advertised, "advertising inferred LAN address");
            swarm.add_external_address(advertised);
        }

        let router = Arc::new(Router::new(
            local_peer.to_string(),
            Arc::clone(&peers),
            dispatcher,
        ));

        let (command_tx, command_rx) = mpsc::channel(256);
        let handle = GossipHandle {
            commands: command_tx,
            local_peer,
        };

        let node = Self {
            swarm,
            config,
            router: Arc::clone(&router),
            peers,
            commands: command_rx,
            connected: HashSet::new(),
            rendezvous_key: kad::RecordKey::new(&config::RENDEZVOUS),
            local_peer,
        };

        Ok((node, handle, router))
    }

    /// Drive the swarm until shutdown. Dial the bootstrap list once up
    /// front; afterwards the reconnection ticker only fires when the node
    /// is alone.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            target: "gossip",
            peer_id = %self.local_peer,
            port = self.config.listen_port,
            bootstrap = self.config.bootstrap.len(),
            "gossip node starting"
        );

        for addr in self.config.bootstrap.clone() {
            self.try_dial(addr);
        }

        // First discovery pass waits out the DHT warm-up; afterwards the
        // ticker re-advertises and sweeps on the configured cadence.
        let mut discovery = tokio::time::interval_at(
            tokio::time::Instant::now() + config::DHT_WARMUP,
            config::DISCOVERY_INTERVAL,
        );
        discovery.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut reconnect = tokio::time::interval(config::BOOTSTRAP_CHECK_INTERVAL);
        reconnect.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    self.on_swarm_event(event);
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.on_command(command),
                        None => break, // every handle dropped
                    }
                }
                _ = discovery.tick() => {
                    self.discovery_pass();
                }
                _ = reconnect.tick() => {
                    self.reconnect_pass();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(target: "gossip", "gossip node stopped");
    }

    // -----------------------------------------------------------------------
    // Swarm events
    // -----------------------------------------------------------------------

    fn on_swarm_event(&mut self, event: SwarmEvent<P402BehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(target: "gossip", %address, "listening");
            }

            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                if self.connected.len() >= self.config.max_connections
                    && !self.connected.contains(&peer_id)
                {
                    debug!(target: "gossip", %peer_id, "connection limit reached, closing");
                    self.swarm.close_connection(connection_id);
                    return;
                }
                self.connected.insert(peer_id);
                let (host, port) = split_host_port(endpoint.get_remote_address());
                self.peers
                    .observe_connected(&peer_id.to_string(), &host, port);
                debug!(
                    target: "gossip",
                    %peer_id,
                    connected = self.connected.len(),
                    "peer connected"
                );
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    self.connected.remove(&peer_id);
                    self.peers.observe_disconnected(&peer_id.to_string());
                    debug!(
                        target: "gossip",
                        %peer_id,
                        connected = self.connected.len(),
                        "peer disconnected"
                    );
                }
            }

            SwarmEvent::OutgoingConnectionError { error, peer_id, .. } => {
                // Stale discovery records (mDNS caches, old provider
                // entries) produce dials to our own identity; expected,
                // not actionable.
                if matches!(error, DialError::LocalPeerId { .. }) {
                    trace!(target: "gossip", "suppressed dial to self");
                } else {
                    debug!(target: "gossip", ?peer_id, %error, "dial failed");
                }
            }

            SwarmEvent::Behaviour(event) => self.on_behaviour_event(event),

            _ => {}
        }
    }

    fn on_behaviour_event(&mut self, event: P402BehaviourEvent) {
        match event {
            P402BehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            }) => {
                self.router
                    .process_incoming(&propagation_source.to_string(), &message.data);
            }

            P402BehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
                // Learned addresses feed the routing table; this is what
                // makes the closest-peers crawl productive.
                for addr in info.listen_addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr);
                }
            }

            P402BehaviourEvent::Kademlia(kad::Event::OutboundQueryProgressed {
                result, ..
            }) => self.on_kad_result(result),

            P402BehaviourEvent::Mdns(mdns::Event::Discovered(list)) => {
                for (peer_id, addr) in list {
                    if peer_id != self.local_peer && !self.connected.contains(&peer_id) {
                        debug!(target: "gossip", %peer_id, %addr, "mdns neighbour");
                        self.try_dial(addr);
                    }
                }
            }
            // Expired mDNS records carry no obligation; the connection,
            // if any, stays up on its own merits.
            P402BehaviourEvent::Mdns(mdns::Event::Expired(_)) => {}

            P402BehaviourEvent::Signal(request_response::Event::Message {
                peer, message, ..
            }) => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => {
                    let verdict = self.router.process_envelope(&peer.to_string(), request);
                    let accepted = matches!(
                        verdict,
                        crate::network::router::Verdict::Delivered(_)
                    );
                    let _ = self
                        .swarm
                        .behaviour_mut()
                        .signal
                        .send_response(channel, SignalAck { accepted });
                }
                request_response::Message::Response { response, .. } => {
                    trace!(target: "gossip", %peer, accepted = response.accepted, "signal ack");
                }
            },

            P402BehaviourEvent::Signal(request_response::Event::OutboundFailure {
                peer,
                error,
                ..
            }) => {
                debug!(target: "gossip", %peer, %error, "signal send failed");
            }

            _ => {}
        }
    }

    fn on_kad_result(&mut self, result: kad::QueryResult) {
        match result {
            kad::QueryResult::GetProviders(Ok(kad::GetProvidersOk::FoundProviders {
                providers,
                ..
            })) => {
                for peer_id in providers {
                    if peer_id != self.local_peer && !self.connected.contains(&peer_id) {
                        debug!(target: "gossip", %peer_id, "rendezvous provider found");
                        self.try_dial(DialOpts::peer_id(peer_id).build());
                    }
                }
            }
            kad::QueryResult::GetProviders(Err(e)) => {
                debug!(target: "gossip", error = %e, "provider lookup failed");
            }

            // The closest-peers query exists to refresh the routing
            // table; the crawl then dials every table entry we are not
            // yet connected to. This is what finds transitively-known
            // peers on hosts with no working mDNS.
            kad::QueryResult::GetClosestPeers(result) => {
                if let Err(e) = &result {
                    debug!(target: "gossip", error = %e, "closest-peers query failed");
                }
                self.crawl_routing_table();
            }

            kad::QueryResult::StartProviding(Err(e)) => {
                debug!(target: "gossip", error = %e, "rendezvous advertisement failed");
            }

            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Publish(envelope) => {
                // Mark before writing so a fast echo can't re-process it.
                self.router.mark_published(&envelope);

                let bytes = match envelope.serialize() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(target: "gossip", error = %e, "refusing to publish");
                        return;
                    }
                };
                let topic = gossipsub::IdentTopic::new(envelope.msg_type.topic());
                match self.swarm.behaviour_mut().gossipsub.publish(topic, bytes) {
                    Ok(_) => {
                        trace!(
                            target: "gossip",
                            msg_type = %envelope.msg_type,
                            id = %envelope.id,
                            "published"
                        );
                    }
                    Err(gossipsub::PublishError::InsufficientPeers) => {
                        // Normal while alone; the message is simply lost.
                        debug!(target: "gossip", msg_type = %envelope.msg_type, "no peers to publish to");
                    }
                    Err(e) => {
                        warn!(target: "gossip", error = %e, "publish failed");
                    }
                }
            }

            Command::Signal { peer, envelope } => {
                self.swarm
                    .behaviour_mut()
                    .signal
                    .send_request(&peer, envelope);
            }

            Command::Dial(addr) => self.try_dial(addr),
        }
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    /// One DHT pass: refresh our provider record (they expire), sweep the
    /// rendezvous namespace, and kick a routing-table crawl.
    fn discovery_pass(&mut self) {
        let kademlia = &mut self.swarm.behaviour_mut().kademlia;

        if let Err(e) = kademlia.start_providing(self.rendezvous_key.clone()) {
            debug!(target: "gossip", error = %e, "cannot advertise rendezvous yet");
        }
        kademlia.get_providers(self.rendezvous_key.clone());
        kademlia.get_closest_peers(self.local_peer);
    }

    /// Dial every routing-table entry with known addresses that we are
    /// not already connected to.
    fn crawl_routing_table(&mut self) {
        let candidates: Vec<PeerId> = self
            .swarm
            .behaviour_mut()
            .kademlia
            .kbuckets()
            .flat_map(|bucket| {
                bucket
                    .iter()
                    .filter(|entry| entry.node.value.iter().next().is_some())
                    .map(|entry| *entry.node.key.preimage())
                    .collect::<Vec<_>>()
            })
            .collect();

        for peer_id in candidates {
            if peer_id != self.local_peer && !self.connected.contains(&peer_id) {
                trace!(target: "gossip", %peer_id, "crawl dial");
                self.try_dial(DialOpts::peer_id(peer_id).build());
            }
        }
    }

    /// Re-dial the bootstrap list, but only when the node has fallen off
    /// the network entirely.
    fn reconnect_pass(&mut self) {
        if !self.connected.is_empty() || self.config.bootstrap.is_empty() {
            return;
        }
        info!(
            target: "gossip",
            entries = self.config.bootstrap.len(),
            "no peers, re-dialing bootstrap list"
        );
        for addr in self.config.bootstrap.clone() {
            self.try_dial(addr);
        }
    }

    /// Dial with the standard error posture: self-dials are silent,
    /// everything else is a debug line.
    fn try_dial(&mut self, opts: impl Into<DialOpts>) {
        match self.swarm.dial(opts.into()) {
            Ok(()) => {}
            Err(DialError::LocalPeerId { .. }) => {
                trace!(target: "gossip", "suppressed dial to self");
            }
            Err(DialError::DialPeerConditionFalse(_)) => {
                // Already connected or already dialing; the condition did
                // its job.
            }
            Err(e) => {
                debug!(target: "gossip", error = %e, "dial failed");
            }
        }
    }
}

/// Pull a printable host and port out of a multiaddr.
fn split_host_port(addr: &Multiaddr) -> (String, u16) {
    let mut host = String::new();
    let mut port = 0u16;
    for protocol in addr.iter() {
        match protocol {
            Protocol::Ip4(ip) => host = ip.to_string(),
            Protocol::Ip6(ip) => host = ip.to_string(),
            Protocol::Dns(name) | Protocol::Dns4(name) | Protocol::Dns6(name) => {
                host = name.to_string()
            }
            Protocol::Tcp(p) => port = p,
            _ => {}
        }
    }
    (host, port)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::payload::Ping;
    use crate::codec::MessageType;

    fn make_node(port: u16) -> (GossipNode, GossipHandle, Arc<Router>) {
        let identity = Keypair::generate_ed25519();
        let peers = Arc::new(PeerTable::new());
        let dispatcher = Arc::new(Dispatcher::new());
        GossipNode::new(
            identity,
            NodeConfig {
                listen_port: port,
                bootstrap: vec![],
                max_connections: 8,
            },
            peers,
            dispatcher,
        )
        .expect("node construction")
    }

    #[tokio::test]
    async fn node_constructs_and_exposes_identity() {
        let (node, handle, _router) = make_node(0);
        assert_eq!(handle.local_peer(), node.local_peer);
    }

    #[tokio::test]
    async fn publish_without_running_loop_buffers() {
        let (_node, handle, _router) = make_node(0);
        let env = Envelope::new(
            MessageType::Ping,
            "n1",
            &Ping {
                timestamp: 1,
                nonce: "x".to_string(),
            },
        );
        // The command channel has capacity; the send must not block or
        // error while the loop is not yet draining it.
        handle.publish(env).await.expect("buffered publish");
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (node, _handle, _router) = make_node(0);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(node.run(stop_rx));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("loop exits on shutdown")
            .expect("no panic");
    }

    #[test]
    fn split_host_port_reads_tcp_multiaddrs() {
        let addr: Multiaddr = "/ip4/192.168.1.7/tcp/4020".parse().unwrap();
        assert_eq!(split_host_port(&addr), ("192.168.1.7".to_string(), 4020));
    }
}
