//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::network::{Directory, NetworkMessage, NetworkStats, NetworkStatsSnapshot, SimNetwork, SimNetworkController};

use chorus_env::{Packet, Peer, PeerId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Salt for the network RNG stream.
const NETWORK_RNG_SALT: u64 = 0x9e3779b97f4a7c15;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,
    
    /// Base one-way latency for every link, in milliseconds
    pub latency_ms: u64,
    
    /// Maximum extra uniform delay per packet, in milliseconds
    pub jitter_ms: u64,
    
    /// Packet loss probability for every link
    pub loss_rate: f64,
    
    /// Per-node inbox size; packets to a full inbox are dropped
    pub inbox_capacity: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            latency_ms: 0,
            jitter_ms: 0,
            loss_rate: 0.0,
            inbox_capacity: 1000,
        }
    }
}

type Inboxes = Arc<Mutex<HashMap<PeerId, mpsc::Sender<(PeerId, Packet)>>>>;

/// The SimWorld - container for the entire simulated network.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,
    
    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,
    
    /// Network controller for fault injection
    pub controller: Arc<SimNetworkController>,
    
    stats: Arc<NetworkStats>,
    
    directory: Directory,
    
    inboxes: Inboxes,
    
    /// Central router sender (receives all outgoing packets)
    router_tx: mpsc::Sender<NetworkMessage>,
    
    /// Central router receiver, until the router task takes it
    router_rx: Option<mpsc::Receiver<NetworkMessage>>,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        let context = SimContext::shared(config.seed);
        
        let controller = SimNetworkController::new(context.rng(NETWORK_RNG_SALT));
        controller.set_default_latency(config.latency_ms);
        controller.set_jitter(config.jitter_ms);
        controller.set_default_loss(config.loss_rate);
        
        // Create central router channel
        let (router_tx, router_rx) = mpsc::channel::<NetworkMessage>(10000);
        
        Self {
            config,
            context,
            controller: Arc::new(controller),
            stats: Arc::new(NetworkStats::default()),
            directory: Arc::new(RwLock::new(BTreeMap::new())),
            inboxes: Arc::new(Mutex::new(HashMap::new())),
            router_tx,
            router_rx: Some(router_rx),
        }
    }
    
    /// Registers a node and returns its network interface.
    pub fn add_node(&self, address: PeerId, name: impl Into<String>) -> Arc<SimNetwork> {
        let (inbox_tx, inbox_rx) = mpsc::channel(self.config.inbox_capacity);
        
        self.inboxes.lock().unwrap().insert(address, inbox_tx);
        self.directory
            .write()
            .unwrap()
            .insert(address, Peer::new(address, name));
        
        Arc::new(SimNetwork::new(
            address,
            self.router_tx.clone(),
            inbox_rx,
            Arc::clone(&self.directory),
            Arc::clone(&self.stats),
        ))
    }
    
    /// Spawns the packet router. Must be called from inside the runtime.
    pub fn start(&mut self) {
        let Some(router_rx) = self.router_rx.take() else {
            return;
        };
        
        tokio::spawn(route_packets(
            router_rx,
            Arc::clone(&self.controller),
            Arc::clone(&self.inboxes),
            Arc::clone(&self.stats),
        ));
    }
    
    /// Returns the current traffic counters.
    pub fn stats(&self) -> NetworkStatsSnapshot {
        self.stats.snapshot()
    }
    
    /// Returns the current simulation time in milliseconds.
    pub fn time_ms(&self) -> u64 {
        self.context.time_ms()
    }
    
    /// Returns the number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.directory.read().unwrap().len()
    }
}

async fn route_packets(
    mut router_rx: mpsc::Receiver<NetworkMessage>,
    controller: Arc<SimNetworkController>,
    inboxes: Inboxes,
    stats: Arc<NetworkStats>,
) {
    while let Some(msg) = router_rx.recv().await {
        if !controller.is_link_up(msg.from, msg.to) || controller.should_drop(msg.from, msg.to) {
            trace!(from = %msg.from, to = %msg.to, "packet dropped");
            stats.record_dropped();
            continue;
        }
        
        let inbox = inboxes.lock().unwrap().get(&msg.to).cloned();
        let Some(inbox) = inbox else {
            stats.record_dropped();
            continue;
        };
        
        let latency = controller.sample_latency(msg.from, msg.to);
        if latency == 0 {
            deliver(&controller, &stats, &inbox, msg);
        } else {
            let controller = Arc::clone(&controller);
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(latency)).await;
                deliver(&controller, &stats, &inbox, msg);
            });
        }
    }
}

fn deliver(
    controller: &SimNetworkController,
    stats: &NetworkStats,
    inbox: &mpsc::Sender<(PeerId, Packet)>,
    msg: NetworkMessage,
) {
    // A node may have crashed while the packet was in flight
    if !controller.is_link_up(msg.from, msg.to) {
        stats.record_dropped();
        return;
    }
    
    match inbox.try_send((msg.from, msg.packet)) {
        Ok(()) => stats.record_delivered(),
        Err(_) => {
            trace!(to = %msg.to, "inbox full or closed");
            stats.record_dropped();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_env::{EnvError, NetworkController, NetworkTransport, PeerDiscovery};
    
    fn packet(body: &str) -> Packet {
        Packet::new("chorus", body.as_bytes().to_vec(), 0)
    }
    
    #[tokio::test(start_paused = true)]
    async fn test_sim_world_delivery() {
        let mut world = SimWorld::new(SimConfig::default());
        let a = world.add_node(PeerId(1), "master");
        let b = world.add_node(PeerId(2), "worker");
        world.start();
        
        a.send(PeerId(2), packet("hi")).await.unwrap();
        let (from, received) = b.recv().await.unwrap();
        
        assert_eq!(from, PeerId(1));
        assert_eq!(received.payload, b"hi".to_vec());
        assert_eq!(world.stats(), NetworkStatsSnapshot { sent: 1, delivered: 1, dropped: 0 });
    }
    
    #[tokio::test(start_paused = true)]
    async fn test_sim_world_latency_uses_virtual_clock() {
        let mut world = SimWorld::new(SimConfig {
            latency_ms: 250,
            ..Default::default()
        });
        let a = world.add_node(PeerId(1), "a");
        let b = world.add_node(PeerId(2), "b");
        world.start();
        
        a.send(PeerId(2), packet("late")).await.unwrap();
        b.recv().await.unwrap();
        assert!(world.time_ms() >= 250);
    }
    
    #[tokio::test(start_paused = true)]
    async fn test_sim_world_crash_drops() {
        let mut world = SimWorld::new(SimConfig::default());
        let a = world.add_node(PeerId(1), "a");
        let b = world.add_node(PeerId(2), "b");
        world.start();
        world.controller.crash(PeerId(2));
        
        a.send(PeerId(2), packet("lost")).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), b.recv()).await;
        
        assert!(received.is_err());
        assert_eq!(world.stats().dropped, 1);
    }
    
    #[tokio::test(start_paused = true)]
    async fn test_send_to_unknown_peer_is_refused() {
        let mut world = SimWorld::new(SimConfig::default());
        let a = world.add_node(PeerId(1), "a");
        world.start();
        
        let err = a.send(PeerId(77), packet("nobody")).await.unwrap_err();
        assert!(matches!(err, EnvError::NodeUnreachable(_)));
        assert_eq!(world.stats().sent, 0);
    }
    
    #[tokio::test(start_paused = true)]
    async fn test_discovery_excludes_self_in_order() {
        let world = SimWorld::new(SimConfig::default());
        let master = world.add_node(PeerId(1), "master");
        world.add_node(PeerId(11), "w11");
        world.add_node(PeerId(10), "w10");
        
        let peers = master.enumerate().await;
        let addresses: Vec<_> = peers.iter().map(|p| p.address).collect();
        assert_eq!(addresses, vec![PeerId(10), PeerId(11)]);
        assert_eq!(master.self_address(), PeerId(1));
        assert_eq!(world.node_count(), 3);
    }
    
    #[tokio::test(start_paused = true)]
    async fn test_broadcast_reaches_everyone_else() {
        let mut world = SimWorld::new(SimConfig::default());
        let a = world.add_node(PeerId(1), "a");
        let b = world.add_node(PeerId(2), "b");
        let c = world.add_node(PeerId(3), "c");
        world.start();
        
        assert_eq!(a.broadcast(packet("all")).await, 2);
        assert_eq!(b.recv().await.unwrap().0, PeerId(1));
        assert_eq!(c.recv().await.unwrap().0, PeerId(1));
    }
}
