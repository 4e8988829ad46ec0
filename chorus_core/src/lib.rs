//! Chorus Core - Role-Based Task Dispatch for Cooperating Nodes
//!
//! A master node discovers its peers, gives each one a role from an ordered
//! role list, and then dispatches named tasks to role holders over a lossy,
//! unordered point-to-point transport:
//!
//! ```text
//!   Master                                   Worker (peer i)
//!     |-- assign_role{role_i, modules} -------->|  load modules
//!     |<------------- role_ack{ok, loaded} -----|
//!     |                                         |
//!     |-- task{name, id, data} ---------------->|  run handler
//!     |<------------------- result{id, result} -|
//!     |                                         |
//!     |-- shutdown ---------------------------->|  exit loop
//! ```
//!
//! 1. **Assignment**: sequential, bounded retries per peer ([`Coordinator`])
//! 2. **Dispatch**: TaskID correlation with per-call deadlines ([`Dispatcher`])
//! 3. **Serving**: typed handler tables, explicit unknown-task replies ([`WorkerRuntime`])

pub mod builtin;
pub mod capability;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod worker;

// Re-export key types for convenience
pub use capability::{CapabilityModule, HandlerTable, LoadResult, ModuleLoader, StaticModuleLoader, TaskOutcome};
pub use config::{ChorusConfig, CoordinatorConfig, WorkerConfig};
pub use coordinator::{Coordinator, ReadinessReport, WorkerRecord, WorkerTable};
pub use dispatch::{Dispatcher, ResultRouter};
pub use error::{ConfigError, DispatchError, HandlerError, ProtocolError};
pub use protocol::{Message, Payload, TaskId};
pub use registry::{RoleRegistry, RoleSpec};
pub use worker::{StopReason, WorkerRuntime, WorkerSummary};
