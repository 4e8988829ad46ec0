//! Scenario runner - executes fault scenarios on virtual time.

use crate::cluster::SimCluster;
use crate::error::ScenarioError;
use crate::network::NetworkStatsSnapshot;
use crate::scenarios::ScenarioId;
use crate::world::SimConfig;

use chorus_core::builtin::DIAGNOSTICS;
use chorus_core::protocol::{recv_message, remote_error};
use chorus_core::{
    ChorusConfig, DispatchError, Message, ModuleLoader, Payload, RoleSpec, StopReason, TaskId, WorkerSummary,
};
use chorus_env::{NetworkTransport, NodeContext, PeerId};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Worker *i* listens on `FIRST_WORKER + i`.
pub const FIRST_WORKER: u32 = 10;

/// Dispatch rounds per ready role in the lossy scenario.
const LOSSY_ROUNDS: usize = 25;

/// Upper bound on waiting for a worker loop to exit.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Role list used when no configuration is supplied.
pub fn default_config() -> ChorusConfig {
    ChorusConfig {
        roles: ["alpha", "beta"]
            .into_iter()
            .map(|name| RoleSpec::new(name, [DIAGNOSTICS]))
            .collect(),
        ..ChorusConfig::default()
    }
}

/// Roles for which `loader` provides none of the listed modules.
///
/// Workers given such a role ack with `ok = false` and are never ready, so
/// every scenario that needs them fails.
pub fn unservable_roles(config: &ChorusConfig, loader: &dyn ModuleLoader) -> Vec<String> {
    config
        .roles
        .roles()
        .iter()
        .filter(|role| !role.modules.iter().any(|module| loader.load(module).is_some()))
        .map(|role| role.name.clone())
        .collect()
}

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,
    
    /// Seed used
    pub seed: u64,
    
    /// Whether scenario passed all assertions
    pub passed: bool,
    
    /// Virtual time at the end of the run
    pub virtual_time_ms: u64,
    
    /// Failure message if any
    pub failure_reason: Option<String>,
    
    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Transport counters
    pub packets: NetworkStatsSnapshot,
    
    /// Roles with a ready worker after bootstrap
    pub ready_workers: usize,
    
    pub dispatched: u64,
    pub completed: u64,
    pub timed_out: u64,
    
    /// Calls refused locally (worker not ready)
    pub rejected: u64,
    
    /// Results carrying an error field
    pub remote_errors: u64,
}

impl ScenarioMetrics {
    fn record(&mut self, outcome: &Result<Payload, DispatchError>) {
        self.dispatched += 1;
        match outcome {
            Ok(result) if remote_error(result).is_some() => self.remote_errors += 1,
            Ok(_) => self.completed += 1,
            Err(DispatchError::Timeout { .. }) => self.timed_out += 1,
            Err(DispatchError::NotReady { .. }) => self.rejected += 1,
            Err(DispatchError::Remote { .. }) => self.remote_errors += 1,
            Err(_) => {}
        }
    }
}

fn ensure(condition: bool, reason: impl FnOnce() -> String) -> Result<(), ScenarioError> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::Check(reason()))
    }
}

fn worker_address(index: usize) -> PeerId {
    PeerId(FIRST_WORKER + index as u32)
}

async fn join_worker(cluster: &mut SimCluster, address: PeerId) -> Result<WorkerSummary, ScenarioError> {
    let worker = cluster
        .take_worker(address)
        .ok_or(ScenarioError::UnknownWorker(address))?;
    match tokio::time::timeout(JOIN_TIMEOUT, worker.join()).await {
        Ok(Some(summary)) => Ok(summary),
        Ok(None) => Err(ScenarioError::WorkerPanicked(address)),
        Err(_) => Err(ScenarioError::WorkerHung(address)),
    }
}

/// Runs fault scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,
    
    /// Protocol configuration (topic, retry budget, roles)
    config: ChorusConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner with the default two-role setup.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: default_config(),
        }
    }
    
    /// Uses the given protocol configuration.
    pub fn with_config(mut self, config: ChorusConfig) -> Self {
        self.config = config;
        self
    }
    
    pub fn config(&self) -> &ChorusConfig {
        &self.config
    }
    
    /// Runs a scenario on a fresh paused-clock runtime and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build();
        
        let result = match runtime {
            Ok(runtime) => runtime.block_on(self.run_async(scenario)),
            Err(err) => self.finish(scenario, Err(err.into()), 0, ScenarioMetrics::default()),
        };
        
        if result.passed {
            info!("✓ {} passed at t={}ms", scenario.name(), result.virtual_time_ms);
        } else {
            warn!(
                "✗ {} failed: {}",
                scenario.name(),
                result.failure_reason.as_deref().unwrap_or("unknown")
            );
        }
        result
    }
    
    /// Runs a scenario on the current runtime, which must have a paused clock.
    pub async fn run_async(&self, scenario: ScenarioId) -> ScenarioResult {
        let mut metrics = ScenarioMetrics::default();
        
        if self.config.roles.len() < scenario.min_roles() {
            let reason = ScenarioError::TooFewRoles {
                scenario: scenario.name(),
                needed: scenario.min_roles(),
                found: self.config.roles.len(),
            };
            return self.finish(scenario, Err(reason), 0, metrics);
        }
        
        let mut cluster = SimCluster::new(self.sim_config(scenario), self.config.clone());
        let verdict = match scenario {
            ScenarioId::Nominal => self.run_nominal(&mut cluster, &mut metrics).await,
            ScenarioId::SilentPeer => self.run_silent_peer(&mut cluster, &mut metrics).await,
            ScenarioId::CrashedWorker => self.run_crashed_worker(&mut cluster, &mut metrics).await,
            ScenarioId::ShutdownDrain => self.run_shutdown_drain(&mut cluster, &mut metrics).await,
            ScenarioId::LossyLink => self.run_lossy_link(&mut cluster, &mut metrics).await,
            ScenarioId::SurplusPeers => self.run_surplus_peers(&mut cluster, &mut metrics).await,
            ScenarioId::ScarcePeers => self.run_scarce_peers(&mut cluster, &mut metrics).await,
        };
        
        metrics.packets = cluster.stats();
        let virtual_time_ms = cluster.world.time_ms();
        cluster.stop_all().await;
        
        self.finish(scenario, verdict, virtual_time_ms, metrics)
    }
    
    fn finish(
        &self,
        scenario: ScenarioId,
        verdict: Result<(), ScenarioError>,
        virtual_time_ms: u64,
        metrics: ScenarioMetrics,
    ) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: verdict.is_ok(),
            virtual_time_ms,
            failure_reason: verdict.err().map(|err| err.to_string()),
            metrics,
        }
    }
    
    fn sim_config(&self, scenario: ScenarioId) -> SimConfig {
        match scenario {
            ScenarioId::LossyLink => SimConfig {
                seed: self.seed,
                latency_ms: 5,
                jitter_ms: 20,
                loss_rate: 0.2,
                ..SimConfig::default()
            },
            _ => SimConfig {
                seed: self.seed,
                ..SimConfig::default()
            },
        }
    }
    
    fn role_names(&self) -> Vec<String> {
        self.config.roles.names().map(str::to_string).collect()
    }
    
    fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.config.default_task_timeout_ms)
    }
    
    /// DST-001
    async fn run_nominal(&self, cluster: &mut SimCluster, metrics: &mut ScenarioMetrics) -> Result<(), ScenarioError> {
        info!("DST-001: Nominal - full assignment and task round-trips");
        let roles = self.role_names();
        let timeout = self.task_timeout();
        for index in 0..roles.len() {
            cluster.spawn_worker(worker_address(index).as_u32());
        }
        
        let mut coordinator = cluster.coordinator();
        let report = coordinator.bootstrap().await;
        metrics.ready_workers = report.ready;
        ensure(report.all_ready(), || format!("only {}/{} roles ready", report.ready, report.total))?;
        let dispatcher = coordinator.start();
        
        for role in &roles {
            let outcome = dispatcher.dispatch(role, "ping", Payload::new(), timeout).await;
            metrics.record(&outcome);
            let result = outcome.map_err(|e| format!("ping to {role} failed: {e}"))?;
            ensure(result.get("pong") == Some(&json!(true)), || {
                format!("unexpected ping reply from {role}: {result:?}")
            })?;
        }
        
        let first = &roles[0];
        let mut data = Payload::new();
        data.insert("text".into(), json!("how are you?"));
        let outcome = dispatcher.dispatch(first, "echo", data.clone(), timeout).await;
        metrics.record(&outcome);
        ensure(outcome.as_ref().ok() == Some(&data), || format!("echo did not round-trip: {outcome:?}"))?;
        
        let outcome = dispatcher.dispatch(first, "no_such_task", Payload::new(), timeout).await;
        metrics.record(&outcome);
        let unknown = outcome.map_err(|e| format!("unknown task got no reply: {e}"))?;
        ensure(
            remote_error(&unknown).map_or(false, |m| m.starts_with("unknown task")),
            || format!("unknown task reply lacks error: {unknown:?}"),
        )?;
        
        let outcome = dispatcher.dispatch_checked(first, "fail", Payload::new(), timeout).await;
        metrics.record(&outcome);
        ensure(matches!(outcome, Err(DispatchError::Remote { .. })), || {
            format!("handler failure not reported: {outcome:?}")
        })?;
        
        // Concurrent callers, one per role
        let handles: Vec<_> = roles
            .iter()
            .enumerate()
            .map(|(seq, role)| {
                let dispatcher = dispatcher.clone();
                let role = role.clone();
                tokio::spawn(async move {
                    let mut data = Payload::new();
                    data.insert("seq".into(), json!(seq));
                    dispatcher.dispatch(&role, "echo", data, timeout).await
                })
            })
            .collect();
        for (seq, handle) in handles.into_iter().enumerate() {
            let outcome = handle.await.map_err(|e| format!("dispatch task panicked: {e}"))?;
            metrics.record(&outcome);
            let result = outcome.map_err(|e| format!("concurrent echo {seq} failed: {e}"))?;
            ensure(result.get("seq") == Some(&json!(seq)), || {
                format!("concurrent echo {seq} received {result:?}")
            })?;
        }
        
        let notified = dispatcher.shutdown().await;
        ensure(notified == roles.len(), || format!("shutdown reached {notified}/{} workers", roles.len()))?;
        for index in 0..roles.len() {
            let summary = join_worker(cluster, worker_address(index)).await?;
            ensure(summary.stopped_by == StopReason::ShutdownMessage, || {
                format!("worker {} stopped by {:?}", summary.address, summary.stopped_by)
            })?;
        }
        
        info!("✓ Nominal complete: {} tasks dispatched", metrics.dispatched);
        Ok(())
    }
    
    /// DST-002
    async fn run_silent_peer(&self, cluster: &mut SimCluster, metrics: &mut ScenarioMetrics) -> Result<(), ScenarioError> {
        info!("DST-002: SilentPeer - unresponsive peer during assignment");
        let roles = self.role_names();
        let silent_index = 1;
        for index in 0..roles.len() {
            let address = worker_address(index).as_u32();
            if index == silent_index {
                cluster.add_silent_peer(address);
            } else {
                cluster.spawn_worker(address);
            }
        }
        
        let config = self.config.coordinator_config();
        let mut coordinator = cluster.coordinator();
        let started = cluster.world.time_ms();
        let report = coordinator.bootstrap().await;
        let elapsed = cluster.world.time_ms() - started;
        metrics.ready_workers = report.ready;
        
        let silent_role = &roles[silent_index];
        let record = coordinator
            .workers()
            .get(silent_role)
            .ok_or_else(|| format!("no record for {silent_role}"))?;
        ensure(!record.ready, || format!("{silent_role} should not be ready"))?;
        ensure(record.attempts == config.assign_attempts, || {
            format!("used {} attempts, expected {}", record.attempts, config.assign_attempts)
        })?;
        
        let budget_ms = config.attempt_window.as_millis() as u64 * u64::from(config.assign_attempts);
        ensure(elapsed >= budget_ms, || format!("assignment took {elapsed}ms, budget is {budget_ms}ms"))?;
        ensure(report.ready == roles.len() - 1, || {
            format!("other roles affected: {}/{} ready", report.ready, report.total)
        })?;
        debug!("silent peer cost {}ms of assignment time", elapsed);
        
        let dispatcher = coordinator.start();
        let sent_before = cluster.stats().sent;
        let outcome = dispatcher.dispatch(silent_role, "ping", Payload::new(), self.task_timeout()).await;
        metrics.record(&outcome);
        ensure(matches!(outcome, Err(DispatchError::NotReady { .. })), || {
            format!("dispatch to silent role returned {outcome:?}")
        })?;
        ensure(cluster.stats().sent == sent_before, || "not-ready dispatch touched the transport".into())?;
        
        let outcome = dispatcher.dispatch(&roles[0], "ping", Payload::new(), self.task_timeout()).await;
        metrics.record(&outcome);
        outcome.map_err(|e| format!("healthy role failed: {e}"))?;
        
        dispatcher.shutdown().await;
        info!("✓ SilentPeer complete: {} marked not ready after {}ms", silent_role, elapsed);
        Ok(())
    }
    
    /// DST-003
    async fn run_crashed_worker(&self, cluster: &mut SimCluster, metrics: &mut ScenarioMetrics) -> Result<(), ScenarioError> {
        info!("DST-003: CrashedWorker - worker dies after acking");
        let roles = self.role_names();
        for index in 0..roles.len() {
            cluster.spawn_worker(worker_address(index).as_u32());
        }
        
        let mut coordinator = cluster.coordinator();
        let report = coordinator.bootstrap().await;
        metrics.ready_workers = report.ready;
        ensure(report.all_ready(), || format!("only {}/{} roles ready", report.ready, report.total))?;
        let dispatcher = coordinator.start();
        
        cluster.world.controller.crash_node(worker_address(0));
        info!("  ⚡ Crashed worker {}", worker_address(0));
        
        let deadline = Duration::from_secs(2);
        let context = cluster.context();
        let started = context.now();
        let outcome = dispatcher.dispatch(&roles[0], "slow", Payload::new(), deadline).await;
        let elapsed = context.now() - started;
        metrics.record(&outcome);
        
        ensure(matches!(outcome, Err(DispatchError::Timeout { .. })), || {
            format!("expected timeout, got {outcome:?}")
        })?;
        ensure(elapsed >= deadline && elapsed < deadline + Duration::from_millis(100), || {
            format!("timed out after {}ms, deadline {}ms", elapsed.as_millis(), deadline.as_millis())
        })?;
        ensure(dispatcher.pending_calls() == 0, || "timed-out call left a waiter behind".into())?;
        
        if let Some(other) = roles.get(1) {
            let outcome = dispatcher.dispatch(other, "ping", Payload::new(), self.task_timeout()).await;
            metrics.record(&outcome);
            outcome.map_err(|e| format!("surviving role {other} failed: {e}"))?;
        }
        
        dispatcher.shutdown().await;
        info!("✓ CrashedWorker complete: timeout after {}ms", elapsed.as_millis());
        Ok(())
    }
    
    /// DST-004
    async fn run_shutdown_drain(&self, cluster: &mut SimCluster, metrics: &mut ScenarioMetrics) -> Result<(), ScenarioError> {
        info!("DST-004: ShutdownDrain - serving loop exits on shutdown");
        let roles = self.role_names();
        for index in 0..roles.len() {
            cluster.spawn_worker(worker_address(index).as_u32());
        }
        
        let mut coordinator = cluster.coordinator();
        let report = coordinator.bootstrap().await;
        metrics.ready_workers = report.ready;
        ensure(report.all_ready(), || format!("only {}/{} roles ready", report.ready, report.total))?;
        let dispatcher = coordinator.start();
        
        let outcome = dispatcher.dispatch(&roles[0], "ping", Payload::new(), self.task_timeout()).await;
        metrics.record(&outcome);
        outcome.map_err(|e| format!("ping before shutdown failed: {e}"))?;
        
        let notified = dispatcher.shutdown().await;
        ensure(notified == roles.len(), || format!("shutdown reached {notified}/{} workers", roles.len()))?;
        
        let target = worker_address(0);
        let summary = join_worker(cluster, target).await?;
        ensure(summary.stopped_by == StopReason::ShutdownMessage, || {
            format!("worker stopped by {:?}", summary.stopped_by)
        })?;
        ensure(summary.tasks_served == 1, || format!("worker served {} tasks", summary.tasks_served))?;
        
        // A task sent after shutdown is never answered
        let topic = self.config.topic.as_str();
        let context = cluster.context();
        let task = Message::Task {
            name: "ping".into(),
            id: TaskId(u64::MAX),
            data: Payload::new(),
        };
        let packet = task.encode(topic, context.now_ms())?;
        cluster
            .master()
            .send(target, packet)
            .await
            .map_err(|e| format!("raw send failed: {e}"))?;
        let reply = tokio::time::timeout(Duration::from_secs(2), recv_message(&**cluster.master(), topic)).await;
        ensure(reply.is_err(), || format!("stopped worker replied: {reply:?}"))?;
        
        let outcome = dispatcher.dispatch(&roles[0], "ping", Payload::new(), self.task_timeout()).await;
        metrics.record(&outcome);
        ensure(matches!(outcome, Err(DispatchError::ShutDown)), || {
            format!("dispatch after shutdown returned {outcome:?}")
        })?;
        
        info!("✓ ShutdownDrain complete");
        Ok(())
    }
    
    /// DST-005
    async fn run_lossy_link(&self, cluster: &mut SimCluster, metrics: &mut ScenarioMetrics) -> Result<(), ScenarioError> {
        info!("DST-005: LossyLink - {}% loss with jitter", (cluster.world.config.loss_rate * 100.0) as u32);
        let roles = self.role_names();
        for index in 0..roles.len() {
            cluster.spawn_worker(worker_address(index).as_u32());
        }
        
        let mut coordinator = cluster.coordinator();
        let report = coordinator.bootstrap().await;
        metrics.ready_workers = report.ready;
        ensure(report.ready >= 1, || "no worker survived assignment".into())?;
        let dispatcher = coordinator.start();
        
        let ready_roles: Vec<String> = dispatcher.workers().ready().map(|r| r.role.clone()).collect();
        let deadline = Duration::from_millis(500);
        let mut mismatches = 0;
        
        for seq in 0..LOSSY_ROUNDS {
            for role in &ready_roles {
                let mut data = Payload::new();
                data.insert("seq".into(), json!(seq));
                let outcome = dispatcher.dispatch(role, "echo", data, deadline).await;
                metrics.record(&outcome);
                match &outcome {
                    Ok(result) if result.get("seq") != Some(&json!(seq)) => {
                        warn!("  ✗ {} round {} received {:?}", role, seq, result);
                        mismatches += 1;
                    }
                    Ok(_) | Err(DispatchError::Timeout { .. }) => {}
                    Err(other) => return Err(format!("unexpected dispatch error: {other}").into()),
                }
            }
        }
        
        let packets = cluster.stats();
        ensure(mismatches == 0, || format!("{mismatches} results matched the wrong task"))?;
        ensure(metrics.completed > 0, || "no task completed".into())?;
        ensure(packets.dropped > 0, || "lossy link dropped nothing".into())?;
        ensure(dispatcher.pending_calls() == 0, || "waiters leaked".into())?;
        
        dispatcher.shutdown().await;
        info!(
            "✓ LossyLink complete: {}/{} completed, {} timed out, {} packets dropped",
            metrics.completed, metrics.dispatched, metrics.timed_out, packets.dropped
        );
        Ok(())
    }
    
    /// DST-006
    async fn run_surplus_peers(&self, cluster: &mut SimCluster, metrics: &mut ScenarioMetrics) -> Result<(), ScenarioError> {
        info!("DST-006: SurplusPeers - more peers than roles");
        let roles = self.role_names();
        let total = roles.len() + 2;
        for index in 0..total {
            cluster.spawn_worker(worker_address(index).as_u32());
        }
        
        let mut coordinator = cluster.coordinator();
        let report = coordinator.bootstrap().await;
        metrics.ready_workers = report.ready;
        ensure(report.all_ready(), || format!("only {}/{} roles ready", report.ready, report.total))?;
        
        let records = coordinator.workers().records();
        ensure(records.len() == roles.len(), || format!("{} records for {} roles", records.len(), roles.len()))?;
        for (index, record) in records.iter().enumerate() {
            ensure(record.role == roles[index], || format!("record {index} holds {}", record.role))?;
            ensure(record.peer.address == worker_address(index), || {
                format!("role {} went to {}", record.role, record.peer.address)
            })?;
        }
        
        for index in roles.len()..total {
            let address = worker_address(index);
            if let Some(worker) = cluster.worker(address) {
                worker.stop();
            }
            let summary = join_worker(cluster, address).await?;
            ensure(summary.role.is_none(), || format!("surplus peer {address} got role {:?}", summary.role))?;
            ensure(summary.stopped_by == StopReason::LocalSignal, || {
                format!("surplus peer stopped by {:?}", summary.stopped_by)
            })?;
        }
        
        let dispatcher = coordinator.start();
        let notified = dispatcher.shutdown().await;
        ensure(notified == roles.len(), || format!("shutdown reached {notified} workers"))?;
        
        info!("✓ SurplusPeers complete: {} peers idle", total - roles.len());
        Ok(())
    }
    
    /// DST-007
    async fn run_scarce_peers(&self, cluster: &mut SimCluster, metrics: &mut ScenarioMetrics) -> Result<(), ScenarioError> {
        info!("DST-007: ScarcePeers - fewer peers than roles");
        let roles = self.role_names();
        let present = roles.len() - 1;
        for index in 0..present {
            cluster.spawn_worker(worker_address(index).as_u32());
        }
        
        let mut coordinator = cluster.coordinator();
        let report = coordinator.bootstrap().await;
        metrics.ready_workers = report.ready;
        
        let missing = roles[present].clone();
        ensure(report.unassigned_roles == vec![missing.clone()], || {
            format!("unassigned roles: {:?}", report.unassigned_roles)
        })?;
        ensure(coordinator.workers().len() == present, || {
            format!("{} records for {present} peers", coordinator.workers().len())
        })?;
        ensure(report.ready == present, || format!("{}/{present} peers ready", report.ready))?;
        
        let dispatcher = coordinator.start();
        let sent_before = cluster.stats().sent;
        let outcome = dispatcher.dispatch(&missing, "ping", Payload::new(), self.task_timeout()).await;
        metrics.record(&outcome);
        ensure(matches!(outcome, Err(DispatchError::NotReady { .. })), || {
            format!("dispatch to unassigned role returned {outcome:?}")
        })?;
        ensure(cluster.stats().sent == sent_before, || "unassigned dispatch touched the transport".into())?;
        
        dispatcher.shutdown().await;
        info!("✓ ScarcePeers complete: {} never assigned", missing);
        Ok(())
    }
}
