//! Worker runtime: AwaitingRole → Serving → Stopped.
//!
//! [`WorkerMachine`] holds the state transitions and is driven one message at
//! a time; [`WorkerRuntime`] wires it to a transport and a context.

use std::sync::Arc;

use chorus_env::{NetworkTransport, NodeContext, PeerId};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::capability::{load_modules, HandlerTable, ModuleLoader};
use crate::config::WorkerConfig;
use crate::protocol::{recv_message, stop_signalled, Message};

/// Serving-state data for an assigned role.
#[derive(Debug)]
pub struct ServingState {
    pub role: String,
    pub handlers: HandlerTable,
    /// The ack sent on assignment, replayed for duplicate assignments
    pub ack: Message,
    pub tasks_served: u64,
}

#[derive(Debug)]
pub enum WorkerState {
    AwaitingRole,
    Serving(ServingState),
    /// Terminal; remembers what was served
    Stopped {
        role: Option<String>,
        tasks_served: u64,
    },
}

impl WorkerState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerState::AwaitingRole => "awaiting_role",
            WorkerState::Serving(_) => "serving",
            WorkerState::Stopped { .. } => "stopped",
        }
    }
}

/// What the runtime should do after a message was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Send this message back to the given peer
    Reply(PeerId, Message),
    /// Nothing to send
    Idle,
    /// Leave the receive loop
    Stop,
}

/// The worker state machine.
pub struct WorkerMachine {
    loader: Arc<dyn ModuleLoader>,
    state: WorkerState,
}

impl WorkerMachine {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            state: WorkerState::AwaitingRole,
        }
    }
    
    pub fn state(&self) -> &WorkerState {
        &self.state
    }
    
    /// Role served (or last served, once stopped).
    pub fn role(&self) -> Option<&str> {
        match &self.state {
            WorkerState::AwaitingRole => None,
            WorkerState::Serving(serving) => Some(serving.role.as_str()),
            WorkerState::Stopped { role, .. } => role.as_deref(),
        }
    }
    
    pub fn tasks_served(&self) -> u64 {
        match &self.state {
            WorkerState::AwaitingRole => 0,
            WorkerState::Serving(serving) => serving.tasks_served,
            WorkerState::Stopped { tasks_served, .. } => *tasks_served,
        }
    }
    
    /// Applies one received message.
    pub fn handle(&mut self, sender: PeerId, message: Message) -> Step {
        match &mut self.state {
            WorkerState::AwaitingRole => match message {
                Message::AssignRole { role, modules } => {
                    let (handlers, loaded) = load_modules(self.loader.as_ref(), &modules);
                    info!(
                        role = %role,
                        loaded = ?loaded.succeeded,
                        failed = ?loaded.failed,
                        "role assigned by {}", sender
                    );
                    
                    let ack = Message::RoleAck {
                        role: role.clone(),
                        ok: loaded.ok(),
                        loaded: loaded.succeeded,
                        failed: loaded.failed,
                    };
                    self.state = WorkerState::Serving(ServingState {
                        role,
                        handlers,
                        ack: ack.clone(),
                        tasks_served: 0,
                    });
                    Step::Reply(sender, ack)
                }
                other => {
                    debug!(kind = other.kind(), %sender, "ignoring message while awaiting role");
                    Step::Idle
                }
            },
            
            WorkerState::Serving(serving) => match message {
                Message::Task { name, id, data } => {
                    let outcome = serving.handlers.invoke(&name, &data);
                    if !outcome.is_completed() {
                        debug!(task = %name, %id, ?outcome, "task did not complete");
                    }
                    serving.tasks_served += 1;
                    Step::Reply(sender, Message::TaskResult { id, result: outcome.into_payload() })
                }
                Message::Shutdown => {
                    info!(role = %serving.role, tasks = serving.tasks_served, "shutdown received");
                    let role = Some(serving.role.clone());
                    let tasks_served = serving.tasks_served;
                    self.state = WorkerState::Stopped { role, tasks_served };
                    Step::Stop
                }
                Message::AssignRole { role, .. } if role == serving.role => {
                    // Our earlier ack was probably lost; answer the retry.
                    debug!(role = %role, %sender, "repeating role ack");
                    Step::Reply(sender, serving.ack.clone())
                }
                other => {
                    debug!(kind = other.kind(), %sender, "ignoring message while serving");
                    Step::Idle
                }
            },
            
            WorkerState::Stopped { .. } => Step::Stop,
        }
    }
}

/// Why a worker's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ShutdownMessage,
    LocalSignal,
    TransportClosed,
}

/// Returned when a worker's loop exits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub address: PeerId,
    pub role: Option<String>,
    pub tasks_served: u64,
    pub stopped_by: StopReason,
}

/// A worker node bound to its environment.
pub struct WorkerRuntime<Ctx, Net>
where
    Ctx: NodeContext,
    Net: NetworkTransport,
{
    context: Arc<Ctx>,
    network: Arc<Net>,
    config: WorkerConfig,
    machine: WorkerMachine,
}

impl<Ctx, Net> WorkerRuntime<Ctx, Net>
where
    Ctx: NodeContext,
    Net: NetworkTransport,
{
    pub fn new(
        context: Arc<Ctx>,
        network: Arc<Net>,
        loader: Arc<dyn ModuleLoader>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            context,
            network,
            config,
            machine: WorkerMachine::new(loader),
        }
    }
    
    pub fn address(&self) -> PeerId {
        self.network.local_id()
    }
    
    pub fn machine(&self) -> &WorkerMachine {
        &self.machine
    }
    
    /// Runs until a `shutdown` message arrives or the transport closes.
    pub async fn run(self) -> WorkerSummary {
        let (_stop_tx, stop_rx) = watch::channel(false);
        self.run_until(stop_rx).await
    }
    
    /// Like [`run`](Self::run), but also exits when `stop` becomes true.
    pub async fn run_until(mut self, mut stop: watch::Receiver<bool>) -> WorkerSummary {
        let address = self.address();
        let topic = self.config.topic.clone();
        info!(%address, "worker awaiting role");
        
        let stopped_by = loop {
            let awaiting = matches!(self.machine.state(), WorkerState::AwaitingRole);
            
            let received = tokio::select! {
                biased;
                _ = stop_signalled(&mut stop) => break StopReason::LocalSignal,
                received = recv_message(&*self.network, &topic) => received,
                _ = self.context.sleep(self.config.poll_interval), if awaiting => {
                    trace!(%address, "still awaiting role");
                    continue;
                }
            };
            
            let Some((sender, message)) = received else {
                break StopReason::TransportClosed;
            };
            
            match self.machine.handle(sender, message) {
                Step::Reply(target, reply) => self.reply(target, &reply).await,
                Step::Idle => {}
                Step::Stop => break StopReason::ShutdownMessage,
            }
        };
        
        info!(%address, role = ?self.machine.role(), ?stopped_by, "worker stopped");
        WorkerSummary {
            address,
            role: self.machine.role().map(str::to_string),
            tasks_served: self.machine.tasks_served(),
            stopped_by,
        }
    }
    
    async fn reply(&self, target: PeerId, message: &Message) {
        let packet = match message.encode(&self.config.topic, self.context.now_ms()) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(error = %err, "failed to encode reply");
                return;
            }
        };
        if let Err(err) = self.network.send(target, packet).await {
            warn!(%target, kind = message.kind(), error = %err, "failed to send reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::DIAGNOSTICS;
    use crate::capability::StaticModuleLoader;
    use crate::protocol::{remote_error, Payload, TaskId};
    use serde_json::json;

    const MASTER: PeerId = PeerId(1);

    fn machine() -> WorkerMachine {
        WorkerMachine::new(Arc::new(StaticModuleLoader::with_builtins()))
    }

    fn assign(role: &str, modules: &[&str]) -> Message {
        Message::AssignRole {
            role: role.into(),
            modules: modules.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn task(name: &str, id: u64) -> Message {
        Message::Task { name: name.into(), id: TaskId(id), data: Payload::new() }
    }

    #[test]
    fn test_ignores_everything_but_assignment_while_awaiting() {
        let mut worker = machine();
        assert_eq!(worker.handle(MASTER, task("ping", 1)), Step::Idle);
        assert_eq!(worker.handle(MASTER, Message::Shutdown), Step::Idle);
        assert_eq!(worker.state().name(), "awaiting_role");
    }

    #[test]
    fn test_assignment_acks_with_load_result() {
        let mut worker = machine();
        let step = worker.handle(MASTER, assign("alpha", &[DIAGNOSTICS, "markov"]));
        
        assert_eq!(
            step,
            Step::Reply(
                MASTER,
                Message::RoleAck {
                    role: "alpha".into(),
                    ok: true,
                    loaded: vec![DIAGNOSTICS.into()],
                    failed: vec!["markov".into()],
                }
            )
        );
        assert_eq!(worker.role(), Some("alpha"));
    }

    #[test]
    fn test_assignment_with_nothing_loaded_still_serves() {
        let mut worker = machine();
        let step = worker.handle(MASTER, assign("beta", &["markov"]));
        let Step::Reply(_, Message::RoleAck { ok, .. }) = step else {
            panic!("expected ack");
        };
        assert!(!ok);
        assert_eq!(worker.state().name(), "serving");
        
        // Every task is unknown, but still answered
        let Step::Reply(_, Message::TaskResult { id, result }) = worker.handle(MASTER, task("ping", 4)) else {
            panic!("expected result");
        };
        assert_eq!(id, TaskId(4));
        assert_eq!(remote_error(&result), Some("unknown task: ping"));
    }

    #[test]
    fn test_serving_answers_tasks_with_same_id() {
        let mut worker = machine();
        worker.handle(MASTER, assign("alpha", &[DIAGNOSTICS]));
        
        let step = worker.handle(PeerId(9), task("ping", 41));
        let Step::Reply(target, Message::TaskResult { id, result }) = step else {
            panic!("expected result");
        };
        assert_eq!(target, PeerId(9));
        assert_eq!(id, TaskId(41));
        assert_eq!(result["pong"], json!(true));
        
        let Step::Reply(_, Message::TaskResult { id, result }) = worker.handle(MASTER, task("nope", 42)) else {
            panic!("expected result");
        };
        assert_eq!(id, TaskId(42));
        assert_eq!(remote_error(&result), Some("unknown task: nope"));
        
        let Step::Reply(_, Message::TaskResult { result, .. }) = worker.handle(MASTER, task("fail", 43)) else {
            panic!("expected result");
        };
        assert_eq!(remote_error(&result), Some("requested failure"));
        assert_eq!(worker.tasks_served(), 3);
    }

    #[test]
    fn test_duplicate_assignment_repeats_ack() {
        let mut worker = machine();
        let first = worker.handle(MASTER, assign("alpha", &[DIAGNOSTICS]));
        let again = worker.handle(MASTER, assign("alpha", &[DIAGNOSTICS]));
        assert_eq!(first, again);
        
        // A different role is not a re-assignment
        assert_eq!(worker.handle(MASTER, assign("beta", &[DIAGNOSTICS])), Step::Idle);
        assert_eq!(worker.role(), Some("alpha"));
    }

    #[test]
    fn test_shutdown_is_terminal() {
        let mut worker = machine();
        worker.handle(MASTER, assign("alpha", &[DIAGNOSTICS]));
        worker.handle(MASTER, task("ping", 1));
        
        assert_eq!(worker.handle(MASTER, Message::Shutdown), Step::Stop);
        assert_eq!(worker.state().name(), "stopped");
        assert_eq!(worker.handle(MASTER, task("ping", 2)), Step::Stop);
        assert_eq!(worker.role(), Some("alpha"));
        assert_eq!(worker.tasks_served(), 1);
    }
}
