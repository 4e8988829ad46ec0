//! Simulated network transport with fault injection.

use async_trait::async_trait;
use chorus_env::{EnvError, NetworkController, NetworkTransport, Packet, Peer, PeerDiscovery, PeerId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// Shared membership list used for peer discovery.
pub type Directory = Arc<RwLock<BTreeMap<PeerId, Peer>>>;

/// Internal message to the network router.
#[derive(Debug)]
pub struct NetworkMessage {
    pub from: PeerId,
    pub to: PeerId,
    pub packet: Packet,
}

/// Traffic counters.
#[derive(Debug, Default)]
pub struct NetworkStats {
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`NetworkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStatsSnapshot {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
}

impl NetworkStats {
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }
    
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }
    
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
    
    pub fn snapshot(&self) -> NetworkStatsSnapshot {
        NetworkStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Simulated network interface for a node.
pub struct SimNetwork {
    /// This node's address
    local_id: PeerId,
    
    /// Sender to central router
    tx: mpsc::Sender<NetworkMessage>,
    
    /// Receiver for incoming packets (behind tokio mutex for async)
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<(PeerId, Packet)>>>,
    
    /// Membership list shared by every node in the world
    directory: Directory,
    
    stats: Arc<NetworkStats>,
}

impl SimNetwork {
    /// Creates a new simulated network interface.
    pub fn new(
        local_id: PeerId,
        tx: mpsc::Sender<NetworkMessage>,
        rx: mpsc::Receiver<(PeerId, Packet)>,
        directory: Directory,
        stats: Arc<NetworkStats>,
    ) -> Self {
        Self {
            local_id,
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            directory,
            stats,
        }
    }
    
    fn known_peers(&self) -> Vec<Peer> {
        let directory = self.directory.read().unwrap();
        directory
            .values()
            .filter(|peer| peer.address != self.local_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NetworkTransport for SimNetwork {
    async fn send(&self, target: PeerId, packet: Packet) -> Result<(), EnvError> {
        if !self.directory.read().unwrap().contains_key(&target) {
            return Err(EnvError::unreachable(target));
        }
        
        let msg = NetworkMessage {
            from: self.local_id,
            to: target,
            packet,
        };
        
        self.stats.record_sent();
        self.tx.send(msg).await.map_err(|_| {
            EnvError::network("Channel closed")
        })
    }
    
    async fn recv(&self) -> Option<(PeerId, Packet)> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
    
    async fn broadcast(&self, packet: Packet) -> usize {
        let mut sent = 0;
        for peer in self.known_peers() {
            if self.send(peer.address, packet.clone()).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }
    
    fn local_id(&self) -> PeerId {
        self.local_id
    }
}

#[async_trait]
impl PeerDiscovery for SimNetwork {
    async fn enumerate(&self) -> Vec<Peer> {
        // BTreeMap iteration is already in address order
        self.known_peers()
    }
    
    fn self_address(&self) -> PeerId {
        self.local_id
    }
}

/// Network controller for fault injection.
pub struct SimNetworkController {
    /// Per-link latency in milliseconds
    link_latency: Mutex<HashMap<(PeerId, PeerId), u64>>,
    
    /// Per-link packet loss rate (0.0 - 1.0)
    link_loss: Mutex<HashMap<(PeerId, PeerId), f64>>,
    
    /// Latency for links without an override
    default_latency_ms: AtomicU64,
    
    /// Loss rate for links without an override, stored as f64 bits
    default_loss_bits: AtomicU64,
    
    /// Uniform extra delay in [0, jitter_ms]
    jitter_ms: AtomicU64,
    
    /// Active partitions (nodes that cannot communicate)
    partitions: Mutex<Vec<(Vec<PeerId>, Vec<PeerId>)>>,
    
    /// Nodes taken off the network
    crashed: Mutex<HashSet<PeerId>>,
    
    /// Seeded RNG for loss and jitter decisions
    rng: Mutex<ChaCha8Rng>,
}

impl SimNetworkController {
    /// Creates a new network controller.
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            link_latency: Mutex::new(HashMap::new()),
            link_loss: Mutex::new(HashMap::new()),
            default_latency_ms: AtomicU64::new(0),
            default_loss_bits: AtomicU64::new(0f64.to_bits()),
            jitter_ms: AtomicU64::new(0),
            partitions: Mutex::new(Vec::new()),
            crashed: Mutex::new(HashSet::new()),
            rng: Mutex::new(rng),
        }
    }
    
    /// Sets latency for a specific link.
    pub fn set_latency(&self, from: PeerId, to: PeerId, latency_ms: u64) {
        let mut latencies = self.link_latency.lock().unwrap();
        latencies.insert((from, to), latency_ms);
    }
    
    /// Sets packet loss rate for a link.
    pub fn set_loss(&self, from: PeerId, to: PeerId, loss_rate: f64) {
        let mut losses = self.link_loss.lock().unwrap();
        losses.insert((from, to), loss_rate.clamp(0.0, 1.0));
    }
    
    /// Sets the latency of every link without an override.
    pub fn set_default_latency(&self, latency_ms: u64) {
        self.default_latency_ms.store(latency_ms, Ordering::Relaxed);
    }
    
    /// Sets the loss rate of every link without an override.
    pub fn set_default_loss(&self, loss_rate: f64) {
        self.default_loss_bits.store(loss_rate.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
    
    /// Sets the maximum uniform jitter added to each delivery.
    pub fn set_jitter(&self, jitter_ms: u64) {
        self.jitter_ms.store(jitter_ms, Ordering::Relaxed);
    }
    
    /// Creates a network partition between two groups.
    pub fn partition_groups(&self, group_a: Vec<PeerId>, group_b: Vec<PeerId>) {
        let mut partitions = self.partitions.lock().unwrap();
        partitions.push((group_a, group_b));
    }
    
    /// Heals all active partitions.
    pub fn heal(&self) {
        let mut partitions = self.partitions.lock().unwrap();
        partitions.clear();
    }
    
    /// Checks if two nodes can communicate (not partitioned).
    pub fn can_communicate(&self, from: PeerId, to: PeerId) -> bool {
        let partitions = self.partitions.lock().unwrap();
        
        for (group_a, group_b) in partitions.iter() {
            let from_in_a = group_a.contains(&from);
            let from_in_b = group_b.contains(&from);
            let to_in_a = group_a.contains(&to);
            let to_in_b = group_b.contains(&to);
            
            // Partitioned if one is in A and other in B (or vice versa)
            if (from_in_a && to_in_b) || (from_in_b && to_in_a) {
                return false;
            }
        }
        
        true
    }
    
    /// Takes a node off the network.
    pub fn crash_node(&self, node: PeerId) {
        self.crashed.lock().unwrap().insert(node);
    }
    
    /// Brings a crashed node back.
    pub fn revive(&self, node: PeerId) {
        self.crashed.lock().unwrap().remove(&node);
    }
    
    pub fn is_crashed(&self, node: PeerId) -> bool {
        self.crashed.lock().unwrap().contains(&node)
    }
    
    /// True if a packet on this link would currently be routable.
    pub fn is_link_up(&self, from: PeerId, to: PeerId) -> bool {
        !self.is_crashed(from) && !self.is_crashed(to) && self.can_communicate(from, to)
    }
    
    /// Gets the base latency for a link.
    pub fn get_latency(&self, from: PeerId, to: PeerId) -> u64 {
        let latencies = self.link_latency.lock().unwrap();
        latencies
            .get(&(from, to))
            .copied()
            .unwrap_or_else(|| self.default_latency_ms.load(Ordering::Relaxed))
    }
    
    /// Gets the loss rate for a link.
    pub fn get_loss(&self, from: PeerId, to: PeerId) -> f64 {
        let losses = self.link_loss.lock().unwrap();
        losses
            .get(&(from, to))
            .copied()
            .unwrap_or_else(|| f64::from_bits(self.default_loss_bits.load(Ordering::Relaxed)))
    }
    
    /// Rolls the dice for one packet on a link.
    pub fn should_drop(&self, from: PeerId, to: PeerId) -> bool {
        let loss = self.get_loss(from, to);
        if loss <= 0.0 {
            return false;
        }
        self.rng.lock().unwrap().gen_bool(loss)
    }
    
    /// Latency for one packet: base latency plus sampled jitter.
    pub fn sample_latency(&self, from: PeerId, to: PeerId) -> u64 {
        let base = self.get_latency(from, to);
        let jitter = self.jitter_ms.load(Ordering::Relaxed);
        if jitter == 0 {
            return base;
        }
        base + self.rng.lock().unwrap().gen_range(0..=jitter)
    }
}

impl NetworkController for SimNetworkController {
    fn partition(&self, group_a: &[PeerId], group_b: &[PeerId]) {
        self.partition_groups(group_a.to_vec(), group_b.to_vec());
    }
    
    fn heal_all(&self) {
        self.heal();
    }
    
    fn set_link_latency(&self, from: PeerId, to: PeerId, latency_ms: u64) {
        self.set_latency(from, to, latency_ms);
    }
    
    fn set_link_loss(&self, from: PeerId, to: PeerId, loss_rate: f64) {
        self.set_loss(from, to, loss_rate);
    }
    
    fn crash(&self, node: PeerId) {
        self.crash_node(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    
    fn controller(seed: u64) -> SimNetworkController {
        SimNetworkController::new(ChaCha8Rng::seed_from_u64(seed))
    }
    
    #[test]
    fn test_network_controller_partition() {
        let controller = controller(1);
        
        let a = PeerId(1);
        let b = PeerId(2);
        let c = PeerId(3);
        
        // Initially all can communicate
        assert!(controller.can_communicate(a, b));
        assert!(controller.can_communicate(a, c));
        assert!(controller.can_communicate(b, c));
        
        // Partition: {a} vs {b, c}
        controller.partition(&[a], &[b, c]);
        
        // Now a cannot talk to b or c
        assert!(!controller.can_communicate(a, b));
        assert!(!controller.can_communicate(c, a));
        
        // But b and c can still talk
        assert!(controller.can_communicate(b, c));
        
        // Heal
        controller.heal_all();
        assert!(controller.can_communicate(a, b));
    }
    
    #[test]
    fn test_network_controller_latency() {
        let controller = controller(1);
        
        let a = PeerId(1);
        let b = PeerId(2);
        
        assert_eq!(controller.get_latency(a, b), 0);
        
        controller.set_link_latency(a, b, 100);
        assert_eq!(controller.get_latency(a, b), 100);
        
        // Reverse direction is separate
        assert_eq!(controller.get_latency(b, a), 0);
        
        controller.set_default_latency(20);
        assert_eq!(controller.get_latency(b, a), 20);
        assert_eq!(controller.get_latency(a, b), 100);
    }
    
    #[test]
    fn test_jitter_stays_in_range() {
        let controller = controller(9);
        controller.set_default_latency(50);
        controller.set_jitter(10);
        
        for _ in 0..200 {
            let latency = controller.sample_latency(PeerId(1), PeerId(2));
            assert!((50..=60).contains(&latency));
        }
    }
    
    #[test]
    fn test_loss_is_seeded() {
        let decisions = |seed| {
            let controller = controller(seed);
            controller.set_default_loss(0.5);
            (0..64).map(|_| controller.should_drop(PeerId(1), PeerId(2))).collect::<Vec<_>>()
        };
        
        assert_eq!(decisions(7), decisions(7));
        assert!(decisions(7).iter().any(|d| *d));
        assert!(decisions(7).iter().any(|d| !*d));
        
        // Lossless links never roll
        let controller = controller(7);
        assert!(!controller.should_drop(PeerId(1), PeerId(2)));
    }
    
    #[test]
    fn test_crash_takes_link_down() {
        let controller = controller(1);
        assert!(controller.is_link_up(PeerId(1), PeerId(2)));
        
        controller.crash(PeerId(2));
        assert!(!controller.is_link_up(PeerId(1), PeerId(2)));
        assert!(!controller.is_link_up(PeerId(2), PeerId(3)));
        
        controller.revive(PeerId(2));
        assert!(controller.is_link_up(PeerId(1), PeerId(2)));
    }
}
