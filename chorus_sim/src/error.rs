//! Scenario failure types.

use chorus_core::{DispatchError, ProtocolError};
use chorus_env::{EnvError, PeerId};
use thiserror::Error;

/// Why a scenario did not pass.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// An assertion about protocol behaviour did not hold
    #[error("{0}")]
    Check(String),
    
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
    
    #[error("{scenario} needs at least {needed} roles, config has {found}")]
    TooFewRoles {
        scenario: &'static str,
        needed: usize,
        found: usize,
    },
    
    #[error("no worker at {0}")]
    UnknownWorker(PeerId),
    
    #[error("worker {0} panicked")]
    WorkerPanicked(PeerId),
    
    #[error("worker {0} did not stop")]
    WorkerHung(PeerId),
    
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    
    #[error(transparent)]
    Transport(#[from] EnvError),
}

impl From<String> for ScenarioError {
    fn from(reason: String) -> Self {
        ScenarioError::Check(reason)
    }
}
