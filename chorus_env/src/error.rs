//! Error types for the Chorus environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Network send failed (buffer full, connection closed, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),
    
    /// Target node is unreachable (simulated partition or crash)
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }
    
    /// Creates an unreachable error.
    pub fn unreachable(node: impl std::fmt::Display) -> Self {
        Self::NodeUnreachable(node.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerId;

    #[test]
    fn test_error_messages() {
        assert_eq!(EnvError::network("closed").to_string(), "Network error: closed");
        assert_eq!(
            EnvError::unreachable(PeerId(11)).to_string(),
            "Node unreachable: #11"
        );
    }
}
