//! Chorus Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing Chorus nodes
//! to run in both **Production** (tokio) and **Simulation** (paused clock)
//! environments.
//!
//! # Core Concept: The Reactor Pattern
//!
//! For Deterministic Simulation Testing (DST), we intercept all I/O:
//! - Time (`now()`, `sleep()`)
//! - Network (`send()`, `recv()`, `broadcast()`)
//! - Discovery (`enumerate()`, `self_address()`)
//!
//! By deriving all entropy from a single 64-bit seed, any protocol bug
//! becomes reproducible via its seed number.
//!
//! # Example
//!
//! ```ignore
//! use chorus_env::{NodeContext, NetworkTransport};
//!
//! async fn node_loop<Ctx: NodeContext, Net: NetworkTransport>(
//!     ctx: &Ctx,
//!     net: &Net,
//! ) {
//!     loop {
//!         tokio::select! {
//!             packet = net.recv() => handle_packet(packet),
//!             _ = ctx.sleep(Duration::from_millis(500)) => poll(),
//!         }
//!     }
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod tokio_impl;

pub use context::NodeContext;
pub use network::{NetworkTransport, NetworkController, PeerDiscovery};
pub use types::{PeerId, Peer, Packet};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
