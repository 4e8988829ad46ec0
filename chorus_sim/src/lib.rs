//! Chorus Deterministic Simulation Testing (DST) Harness
//!
//! Runs a master and its workers inside one process against a simulated
//! network, so every fault scenario replays exactly from a 64-bit seed.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: tokio's paused clock advances only when every task is idle
//! - **Network**: channels with configurable latency, jitter, loss and crashes
//! - **Randomness**: all entropy derived from a single seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ tokio current-thread runtime (paused virtual clock)  │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼────┐              ┌────▼────┐                       │
//! │  │ Master  │◄────────────►│ Worker  │     ...               │
//! │  │   #1    │   Router     │  #10    │                       │
//! │  └─────────┘  (faults)    └─────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use chorus_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::LossyLink);
//! assert!(result.passed);
//! ```

mod cluster;
mod context;
mod error;
mod network;
mod runner;
mod world;
pub mod scenarios;

pub use cluster::{SimCluster, WorkerNode, MASTER_ADDRESS};
pub use context::SimContext;
pub use error::ScenarioError;
pub use network::{NetworkMessage, NetworkStats, NetworkStatsSnapshot, SimNetwork, SimNetworkController};
pub use runner::{default_config, unservable_roles, ScenarioMetrics, ScenarioResult, ScenarioRunner, FIRST_WORKER};
pub use scenarios::ScenarioId;
pub use world::{SimConfig, SimWorld};
