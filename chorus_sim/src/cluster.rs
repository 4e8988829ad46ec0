//! A master plus worker nodes wired into one SimWorld.

use crate::context::SimContext;
use crate::network::{NetworkStatsSnapshot, SimNetwork};
use crate::world::{SimConfig, SimWorld};

use chorus_core::{ChorusConfig, Coordinator, StaticModuleLoader, WorkerRuntime, WorkerSummary};
use chorus_env::PeerId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Address the master node always takes.
pub const MASTER_ADDRESS: PeerId = PeerId(1);

/// A spawned worker runtime.
pub struct WorkerNode {
    pub address: PeerId,
    pub network: Arc<SimNetwork>,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<WorkerSummary>,
}

impl WorkerNode {
    /// Raises the local stop signal.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
    
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
    
    /// Waits for the worker loop to exit.
    pub async fn join(self) -> Option<WorkerSummary> {
        self.handle.await.ok()
    }
}

/// Simulated deployment: one master, any number of workers and silent peers.
pub struct SimCluster {
    pub world: SimWorld,
    pub config: ChorusConfig,
    loader: Arc<StaticModuleLoader>,
    master: Arc<SimNetwork>,
    workers: BTreeMap<PeerId, WorkerNode>,
    silent: BTreeMap<PeerId, Arc<SimNetwork>>,
}

impl SimCluster {
    /// Builds the world and starts its router. Call inside the runtime.
    pub fn new(sim: SimConfig, config: ChorusConfig) -> Self {
        let mut world = SimWorld::new(sim);
        let master = world.add_node(MASTER_ADDRESS, "master");
        world.start();
        
        Self {
            world,
            config,
            loader: Arc::new(StaticModuleLoader::with_builtins()),
            master,
            workers: BTreeMap::new(),
            silent: BTreeMap::new(),
        }
    }
    
    /// Replaces the module loader used by workers spawned afterwards.
    pub fn with_loader(mut self, loader: StaticModuleLoader) -> Self {
        self.loader = Arc::new(loader);
        self
    }
    
    pub fn context(&self) -> Arc<SimContext> {
        Arc::clone(&self.world.context)
    }
    
    pub fn master(&self) -> &Arc<SimNetwork> {
        &self.master
    }
    
    /// Adds a node running a worker runtime.
    pub fn spawn_worker(&mut self, address: u32) -> PeerId {
        let address = PeerId(address);
        let network = self.world.add_node(address, format!("worker-{}", address.as_u32()));
        let runtime = WorkerRuntime::new(
            self.context(),
            Arc::clone(&network),
            self.loader.clone(),
            self.config.worker_config(),
        );
        
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(runtime.run_until(stop_rx));
        
        self.workers.insert(address, WorkerNode { address, network, stop_tx, handle });
        address
    }
    
    /// Adds a discoverable node that never reads its inbox.
    pub fn add_silent_peer(&mut self, address: u32) -> PeerId {
        let address = PeerId(address);
        let network = self.world.add_node(address, format!("silent-{}", address.as_u32()));
        self.silent.insert(address, network);
        address
    }
    
    /// A coordinator for the master node, using the cluster's configuration.
    pub fn coordinator(&self) -> Coordinator<SimContext, SimNetwork> {
        Coordinator::new(
            self.context(),
            Arc::clone(&self.master),
            self.config.roles.clone(),
            self.config.coordinator_config(),
        )
    }
    
    pub fn worker(&self, address: PeerId) -> Option<&WorkerNode> {
        self.workers.get(&address)
    }
    
    pub fn take_worker(&mut self, address: PeerId) -> Option<WorkerNode> {
        self.workers.remove(&address)
    }
    
    pub fn stats(&self) -> NetworkStatsSnapshot {
        self.world.stats()
    }
    
    /// Stops every remaining worker locally and collects their summaries.
    pub async fn stop_all(&mut self) -> Vec<WorkerSummary> {
        let workers = std::mem::take(&mut self.workers);
        let mut summaries = Vec::with_capacity(workers.len());
        for (_, worker) in workers {
            worker.stop();
            if let Some(summary) = worker.join().await {
                summaries.push(summary);
            }
        }
        summaries
    }
}
