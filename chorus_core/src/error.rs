//! Error types for the Chorus protocol.

use chorus_env::EnvError;
use thiserror::Error;

use crate::protocol::TaskId;

/// Wire codec failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    
    #[error("malformed message on topic {topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    
    #[error("role {0:?} is declared more than once")]
    DuplicateRole(String),
    
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

/// Failure raised inside a task handler.
///
/// Never crosses the wire as an error: the worker folds it into the
/// `error` field of the result payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    
    #[error("{0}")]
    Failed(String),
    
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Errors returned to callers of `Dispatcher::dispatch`.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No ready worker holds the role; nothing was sent.
    #[error("worker not ready for role {role:?}")]
    NotReady { role: String },
    
    /// No matching result arrived in time. The task may or may not have run.
    #[error("task {task:?} (id {id}) to role {role:?} timed out after {after_ms}ms; outcome unknown")]
    Timeout {
        role: String,
        task: String,
        id: TaskId,
        after_ms: u64,
    },
    
    #[error("transport error: {0}")]
    Transport(#[from] EnvError),
    
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),
    
    /// The worker answered with an error-carrying result.
    #[error("role {role:?} failed task {task:?}: {message}")]
    Remote {
        role: String,
        task: String,
        message: String,
    },
    
    #[error("dispatcher has been shut down")]
    ShutDown,
}

impl DispatchError {
    /// True for outcomes where the worker may still have executed the task.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, DispatchError::Timeout { .. } | DispatchError::ShutDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_messages() {
        let err = DispatchError::NotReady { role: "beta".into() };
        assert_eq!(err.to_string(), "worker not ready for role \"beta\"");
        assert!(!err.is_ambiguous());
        
        let err = DispatchError::Timeout {
            role: "alpha".into(),
            task: "slow".into(),
            id: TaskId(3),
            after_ms: 2000,
        };
        assert!(err.to_string().contains("timed out after 2000ms"));
        assert!(err.is_ambiguous());
    }

    #[test]
    fn test_transport_error_converts() {
        let err: DispatchError = EnvError::network("closed").into();
        assert!(matches!(err, DispatchError::Transport(_)));
    }
}
