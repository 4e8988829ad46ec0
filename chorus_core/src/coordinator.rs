//! Master coordinator: peer discovery and role assignment.
//!
//! Assignment is sequential. Each peer gets `assign_attempts` tries of
//! `attempt_window` each, so an unresponsive peer delays the ones after it
//! by at most `assign_attempts × attempt_window`.

use std::sync::Arc;

use chorus_env::{NetworkTransport, NodeContext, Peer, PeerDiscovery};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::dispatch::Dispatcher;
use crate::protocol::{recv_message, Message};
use crate::registry::{RoleRegistry, RoleSpec};

/// Assignment outcome for one role slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerRecord {
    pub role: String,
    pub peer: Peer,
    /// True only after a `role_ack` with `ok = true`
    pub ready: bool,
    pub loaded: Vec<String>,
    pub failed: Vec<String>,
    /// Attempts used before an ack arrived (or all of them)
    pub attempts: u32,
}

/// One record per role slot that had a peer, in role order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerTable {
    records: Vec<WorkerRecord>,
}

impl WorkerTable {
    pub fn get(&self, role: &str) -> Option<&WorkerRecord> {
        self.records.iter().find(|r| r.role == role)
    }
    
    pub fn records(&self) -> &[WorkerRecord] {
        &self.records
    }
    
    pub fn ready(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.records.iter().filter(|r| r.ready)
    }
    
    pub fn ready_count(&self) -> usize {
        self.ready().count()
    }
    
    pub fn len(&self) -> usize {
        self.records.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Readiness summary after bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    /// Roles with a ready worker
    pub ready: usize,
    /// Roles in the registry
    pub total: usize,
    /// Roles that had no peer to assign to
    pub unassigned_roles: Vec<String>,
}

impl ReadinessReport {
    pub fn all_ready(&self) -> bool {
        self.ready == self.total
    }
}

/// The master node before it starts serving dispatch calls.
pub struct Coordinator<Ctx, Net>
where
    Ctx: NodeContext,
    Net: NetworkTransport + PeerDiscovery,
{
    context: Arc<Ctx>,
    network: Arc<Net>,
    config: CoordinatorConfig,
    registry: RoleRegistry,
    workers: WorkerTable,
}

impl<Ctx, Net> Coordinator<Ctx, Net>
where
    Ctx: NodeContext,
    Net: NetworkTransport + PeerDiscovery,
{
    pub fn new(
        context: Arc<Ctx>,
        network: Arc<Net>,
        registry: RoleRegistry,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            context,
            network,
            config,
            registry,
            workers: WorkerTable::default(),
        }
    }
    
    pub fn workers(&self) -> &WorkerTable {
        &self.workers
    }
    
    /// Enumerates peers, excluding self, in ascending address order.
    pub async fn discover_peers(&self) -> Vec<Peer> {
        let me = self.network.self_address();
        let mut peers: Vec<Peer> = self
            .network
            .enumerate()
            .await
            .into_iter()
            .filter(|peer| peer.address != me)
            .collect();
        peers.sort_by_key(|peer| peer.address);
        peers.dedup_by_key(|peer| peer.address);
        
        debug!(count = peers.len(), "discovered peers");
        peers
    }
    
    /// Offers role *i* to peer *i*, one pair at a time.
    ///
    /// Surplus peers are ignored and surplus roles stay unassigned. Never
    /// fails: an unresponsive peer just yields a record with `ready = false`.
    pub async fn assign_roles(&mut self, peers: &[Peer]) -> &WorkerTable {
        let mut records = Vec::with_capacity(peers.len().min(self.registry.len()));
        
        for (peer, role) in peers.iter().zip(self.registry.roles()) {
            let record = self.assign_one(peer, role).await;
            if record.ready {
                info!(role = %record.role, peer = %peer.address, loaded = ?record.loaded, "worker ready");
            } else {
                warn!(role = %record.role, peer = %peer.address, attempts = record.attempts, "worker not ready");
            }
            records.push(record);
        }
        
        if peers.len() > self.registry.len() {
            debug!(surplus = peers.len() - self.registry.len(), "peers without a role");
        }
        
        self.workers = WorkerTable { records };
        &self.workers
    }
    
    async fn assign_one(&self, peer: &Peer, role: &RoleSpec) -> WorkerRecord {
        let topic = self.config.topic.as_str();
        let mut record = WorkerRecord {
            role: role.name.clone(),
            peer: peer.clone(),
            ready: false,
            loaded: Vec::new(),
            failed: Vec::new(),
            attempts: 0,
        };
        let assign = Message::AssignRole {
            role: role.name.clone(),
            modules: role.modules.clone(),
        };
        
        for attempt in 1..=self.config.assign_attempts {
            record.attempts = attempt;
            debug!(role = %role.name, peer = %peer.address, attempt, "sending assign_role");
            
            match assign.encode(topic, self.context.now_ms()) {
                Ok(packet) => {
                    if let Err(err) = self.network.send(peer.address, packet).await {
                        warn!(peer = %peer.address, error = %err, "assign_role send failed");
                    }
                }
                Err(err) => {
                    warn!(error = %err, "failed to encode assign_role");
                    return record;
                }
            }
            
            let mut window = self.context.sleep(self.config.attempt_window);
            loop {
                tokio::select! {
                    _ = &mut window => break,
                    received = recv_message(&*self.network, topic) => match received {
                        Some((sender, Message::RoleAck { role: acked, ok, loaded, failed }))
                            if sender == peer.address && acked == role.name =>
                        {
                            record.ready = ok;
                            record.loaded = loaded;
                            record.failed = failed;
                            return record;
                        }
                        Some((sender, other)) => {
                            debug!(%sender, kind = other.kind(), "discarding message during assignment");
                        }
                        None => {
                            warn!("transport closed during role assignment");
                            return record;
                        }
                    },
                }
            }
        }
        
        record
    }
    
    /// Current readiness, against the registry.
    pub fn readiness(&self) -> ReadinessReport {
        let unassigned_roles = self
            .registry
            .names()
            .filter(|name| self.workers.get(name).is_none())
            .map(str::to_string)
            .collect();
        
        ReadinessReport {
            ready: self.workers.ready_count(),
            total: self.registry.len(),
            unassigned_roles,
        }
    }
    
    /// Discovers peers and assigns roles.
    pub async fn bootstrap(&mut self) -> ReadinessReport {
        let started = self.context.now();
        let peers = self.discover_peers().await;
        self.assign_roles(&peers).await;
        
        let report = self.readiness();
        info!(
            ready = report.ready,
            total = report.total,
            unassigned = ?report.unassigned_roles,
            elapsed_ms = self.context.now().saturating_sub(started).as_millis() as u64,
            "role assignment complete"
        );
        report
    }
    
    /// Freezes the worker table and starts routing results.
    pub fn start(self) -> Dispatcher<Ctx, Net> {
        Dispatcher::start(self.context, self.network, self.config, self.workers)
    }
}
