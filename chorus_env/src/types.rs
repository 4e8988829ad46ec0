//! Common types for the Chorus environment abstraction.

use serde::{Deserialize, Serialize};

/// Numeric address of a node on the transport.
///
/// Addresses are assigned by the environment (a computer id in the host
/// world, an index in simulation) and are stable for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u32);

impl PeerId {
    /// Returns the raw numeric address.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for PeerId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A discoverable remote node.
///
/// Discovered once at startup and immutable for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Transport address
    pub address: PeerId,
    
    /// Human-readable label (host name, node label)
    pub name: String,
}

impl Peer {
    /// Creates a new peer record.
    pub fn new(address: impl Into<PeerId>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

/// A topic-tagged packet carried by the transport.
///
/// This is a transport-layer wrapper - the payload is opaque bytes that
/// the receiving protocol decodes. The topic scopes receive filters so that
/// unrelated application traffic sharing the transport can be ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Application-level topic tag
    pub topic: String,
    
    /// The raw encoded message bytes
    pub payload: Vec<u8>,
    
    /// Timestamp when the packet was created (sender's clock)
    pub timestamp_ms: u64,
}

impl Packet {
    /// Creates a new packet from payload bytes.
    pub fn new(topic: impl Into<String>, payload: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp_ms,
        }
    }
    
    /// Returns true if the packet carries the given topic tag.
    pub fn has_topic(&self, topic: &str) -> bool {
        self.topic == topic
    }
    
    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_ordering_and_display() {
        let mut ids = vec![PeerId(12), PeerId(3), PeerId(7)];
        ids.sort();
        assert_eq!(ids, vec![PeerId(3), PeerId(7), PeerId(12)]);
        assert_eq!(PeerId(42).to_string(), "#42");
    }

    #[test]
    fn test_packet_topic() {
        let packet = Packet::new("chorus", b"{}".to_vec(), 10);
        assert!(packet.has_topic("chorus"));
        assert!(!packet.has_topic("chat"));
        assert_eq!(packet.size(), 2);
    }
}
