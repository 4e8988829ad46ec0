//! Network transport abstraction for Chorus nodes.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{Packet, Peer, PeerId};

/// Abstraction for best-effort point-to-point messaging between nodes.
///
/// # Implementations
///
/// - **Production**: Wraps the host world's modem/rednet style channel
/// - **Simulation**: Channel-based with configurable latency/loss
///
/// # Packet Flow
///
/// ```text
/// Master                     Network                    Worker
///   |                           |                          |
///   |-- send(W, packet) ------->|                          |
///   |                           |-- [latency/loss] ------->|
///   |                           |                          |-- recv() -> packet
/// ```
///
/// Packets may be lost, delayed, or reordered relative to other peers.
/// A packet that does arrive is neither corrupted nor duplicated.
#[async_trait]
pub trait NetworkTransport: Send + Sync + 'static {
    /// Sends a packet to a target node.
    ///
    /// # Returns
    /// * `Ok(())` - Packet queued for delivery
    /// * `Err(EnvError::NetworkError)` - Immediate send failure (e.g., closed)
    /// * `Err(EnvError::NodeUnreachable)` - Target is not a known peer
    ///
    /// # Note
    /// Success does not guarantee delivery.
    async fn send(&self, target: PeerId, packet: Packet) -> Result<(), EnvError>;
    
    /// Receives the next packet addressed to this node.
    ///
    /// # Returns
    /// * `Some((sender, packet))` - A packet was received
    /// * `None` - The channel was closed (shutdown)
    ///
    /// # Blocking
    /// This method blocks until a packet arrives or the channel closes.
    async fn recv(&self) -> Option<(PeerId, Packet)>;
    
    /// Sends a packet to every known peer.
    ///
    /// # Returns
    /// Number of nodes the packet was sent to.
    async fn broadcast(&self, packet: Packet) -> usize;
    
    /// Returns this node's address.
    fn local_id(&self) -> PeerId;
}

/// Peer enumeration primitive.
#[async_trait]
pub trait PeerDiscovery: Send + Sync + 'static {
    /// Enumerates reachable peers, excluding this node.
    ///
    /// Implementations return peers in ascending address order so that the
    /// same physical arrangement yields the same order across restarts.
    async fn enumerate(&self) -> Vec<Peer>;
    
    /// Returns this node's own address.
    fn self_address(&self) -> PeerId;
}

/// Fault injection interface for simulated networks.
pub trait NetworkController: Send + Sync {
    /// Creates a network partition between two node sets.
    fn partition(&self, group_a: &[PeerId], group_b: &[PeerId]);
    
    /// Heals all partitions.
    fn heal_all(&self);
    
    /// Sets latency for a specific link.
    fn set_link_latency(&self, from: PeerId, to: PeerId, latency_ms: u64);
    
    /// Sets packet loss probability for a link (0.0 - 1.0).
    fn set_link_loss(&self, from: PeerId, to: PeerId, loss_rate: f64);
    
    /// Takes a node off the network; everything to or from it is dropped.
    fn crash(&self, node: PeerId);
}
