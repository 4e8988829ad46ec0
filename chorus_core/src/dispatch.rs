//! Task dispatch and result correlation.
//!
//! After assignment the master runs exactly one receive loop. It hands every
//! `result` to the caller waiting on that TaskID through a oneshot channel,
//! so any number of concurrent `dispatch` calls can be in flight. Results
//! nobody is waiting for (late, duplicated, or unknown ids) are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use chorus_env::{NetworkTransport, NodeContext};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::coordinator::WorkerTable;
use crate::error::DispatchError;
use crate::protocol::{recv_message, remote_error, stop_signalled, Message, Payload, TaskId};

/// Routes task results back to awaiting callers.
///
/// Waiters whose caller went away (timed out, cancelled, or aborted) are
/// removed by the caller's guard, and any stragglers are pruned on the next
/// `register`, so the map only holds calls that are still being awaited.
#[derive(Debug, Default)]
pub struct ResultRouter {
    pending: StdMutex<HashMap<TaskId, oneshot::Sender<Payload>>>,
}

impl ResultRouter {
    pub fn new() -> Self {
        Self::default()
    }
    
    fn pending(&self) -> MutexGuard<'_, HashMap<TaskId, oneshot::Sender<Payload>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
    
    /// Registers interest in a task result.
    pub fn register(&self, id: TaskId) -> oneshot::Receiver<Payload> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending();
        pending.retain(|_, waiter| !waiter.is_closed());
        pending.insert(id, tx);
        rx
    }
    
    /// Delivers a result to its waiter. Returns false if nobody was waiting.
    pub fn resolve(&self, id: TaskId, result: Payload) -> bool {
        match self.pending().remove(&id) {
            Some(waiter) => waiter.send(result).is_ok(),
            None => false,
        }
    }
    
    /// Forgets a waiter.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.pending().remove(&id).is_some()
    }
    
    /// Drops every waiter; their receivers observe a closed channel.
    pub fn close(&self) -> usize {
        let mut pending = self.pending();
        let dropped = pending.len();
        pending.clear();
        dropped
    }
    
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

/// Deregisters a call when its `dispatch` future finishes or is dropped.
struct PendingCall<'a> {
    router: &'a ResultRouter,
    id: TaskId,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if self.router.cancel(self.id) {
            debug!(id = %self.id, "pending call abandoned");
        }
    }
}

struct DispatcherInner<Ctx, Net> {
    context: Arc<Ctx>,
    network: Arc<Net>,
    config: CoordinatorConfig,
    workers: WorkerTable,
    router: Arc<ResultRouter>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

/// Cloneable handle used by the application to run tasks on workers.
pub struct Dispatcher<Ctx, Net>
where
    Ctx: NodeContext,
    Net: NetworkTransport,
{
    inner: Arc<DispatcherInner<Ctx, Net>>,
}

impl<Ctx, Net> Clone for Dispatcher<Ctx, Net>
where
    Ctx: NodeContext,
    Net: NetworkTransport,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Ctx, Net> Dispatcher<Ctx, Net>
where
    Ctx: NodeContext,
    Net: NetworkTransport,
{
    /// Spawns the result routing loop and returns the handle.
    pub fn start(
        context: Arc<Ctx>,
        network: Arc<Net>,
        config: CoordinatorConfig,
        workers: WorkerTable,
    ) -> Self {
        let router = Arc::new(ResultRouter::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        
        context.spawn(
            "result-router",
            route_results(Arc::clone(&network), Arc::clone(&router), config.topic.clone(), stop_rx),
        );
        
        Self {
            inner: Arc::new(DispatcherInner {
                context,
                network,
                config,
                workers,
                router,
                next_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
                stop_tx,
            }),
        }
    }
    
    pub fn workers(&self) -> &WorkerTable {
        &self.inner.workers
    }
    
    pub fn is_ready(&self, role: &str) -> bool {
        self.inner.workers.get(role).map_or(false, |r| r.ready)
    }
    
    /// Number of calls currently waiting for a result.
    pub fn pending_calls(&self) -> usize {
        self.inner.router.pending_count()
    }
    
    /// Sends `task` to the worker holding `role` and waits for its result.
    ///
    /// Fails fast with [`DispatchError::NotReady`] (no traffic) when the role
    /// has no ready worker. A [`DispatchError::Timeout`] means the outcome is
    /// unknown: the task or its result may have been lost.
    pub async fn dispatch(
        &self,
        role: &str,
        task: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, DispatchError> {
        let inner = &self.inner;
        if inner.shut_down.load(Ordering::SeqCst) {
            return Err(DispatchError::ShutDown);
        }
        
        let target = match inner.workers.get(role) {
            Some(record) if record.ready => record.peer.address,
            _ => return Err(DispatchError::NotReady { role: role.to_string() }),
        };
        
        let id = TaskId(inner.next_id.fetch_add(1, Ordering::SeqCst));
        let message = Message::Task {
            name: task.to_string(),
            id,
            data: payload,
        };
        let packet = message.encode(&inner.config.topic, inner.context.now_ms())?;
        
        let waiter = inner.router.register(id);
        let _pending = PendingCall { router: &inner.router, id };
        debug!(%role, %task, %id, %target, "dispatching task");
        inner.network.send(target, packet).await?;
        
        let deadline = inner.context.sleep(timeout);
        tokio::select! {
            result = waiter => match result {
                Ok(result) => Ok(result),
                // Router closed underneath us
                Err(_) => Err(DispatchError::ShutDown),
            },
            _ = deadline => {
                warn!(%role, %task, %id, timeout_ms = timeout.as_millis() as u64, "task timed out");
                Err(DispatchError::Timeout {
                    role: role.to_string(),
                    task: task.to_string(),
                    id,
                    after_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
    
    /// [`dispatch`](Self::dispatch) with the configured default timeout.
    pub async fn dispatch_default(
        &self,
        role: &str,
        task: &str,
        payload: Payload,
    ) -> Result<Payload, DispatchError> {
        let timeout = self.inner.config.default_task_timeout;
        self.dispatch(role, task, payload, timeout).await
    }
    
    /// Like [`dispatch`](Self::dispatch), but an error-carrying result
    /// becomes [`DispatchError::Remote`].
    pub async fn dispatch_checked(
        &self,
        role: &str,
        task: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, DispatchError> {
        let result = self.dispatch(role, task, payload, timeout).await?;
        match remote_error(&result) {
            Some(message) => Err(DispatchError::Remote {
                role: role.to_string(),
                task: task.to_string(),
                message: message.to_string(),
            }),
            None => Ok(result),
        }
    }
    
    /// Sends `shutdown` to every ready worker and stops routing results.
    ///
    /// Returns the number of workers notified. Idempotent.
    pub async fn shutdown(&self) -> usize {
        let inner = &self.inner;
        if inner.shut_down.swap(true, Ordering::SeqCst) {
            return 0;
        }
        
        let mut notified = 0;
        for record in inner.workers.ready() {
            let packet = match Message::Shutdown.encode(&inner.config.topic, inner.context.now_ms()) {
                Ok(packet) => packet,
                Err(err) => {
                    warn!(error = %err, "failed to encode shutdown");
                    break;
                }
            };
            match inner.network.send(record.peer.address, packet).await {
                Ok(()) => notified += 1,
                Err(err) => warn!(role = %record.role, peer = %record.peer.address, error = %err, "shutdown send failed"),
            }
        }
        
        let _ = inner.stop_tx.send(true);
        info!(notified, "shutdown broadcast to workers");
        notified
    }
}

async fn route_results<Net: NetworkTransport>(
    network: Arc<Net>,
    router: Arc<ResultRouter>,
    topic: String,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop_signalled(&mut stop) => break,
            received = recv_message(&*network, &topic) => match received {
                Some((sender, Message::TaskResult { id, result })) => {
                    if !router.resolve(id, result) {
                        debug!(%sender, %id, "discarding result with no waiting caller");
                    }
                }
                Some((sender, other)) => {
                    debug!(%sender, kind = other.kind(), "ignoring message while dispatching");
                }
                None => {
                    debug!("transport closed");
                    break;
                }
            },
        }
    }
    
    let abandoned = router.close();
    if abandoned > 0 {
        debug!(abandoned, "result router stopped with calls in flight");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(n: i64) -> Payload {
        let mut p = Payload::new();
        p.insert("n".into(), json!(n));
        p
    }

    #[tokio::test]
    async fn test_router_delivers_to_matching_id() {
        let router = ResultRouter::new();
        let first = router.register(TaskId(1));
        let second = router.register(TaskId(2));
        
        assert!(router.resolve(TaskId(2), payload(2)));
        assert!(router.resolve(TaskId(1), payload(1)));
        
        assert_eq!(first.await.unwrap(), payload(1));
        assert_eq!(second.await.unwrap(), payload(2));
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_router_duplicate_result_is_ignored() {
        let router = ResultRouter::new();
        let waiter = router.register(TaskId(5));
        let other = router.register(TaskId(6));
        
        assert!(router.resolve(TaskId(5), payload(5)));
        assert!(!router.resolve(TaskId(5), payload(5)));
        assert!(!router.resolve(TaskId(99), payload(0)));
        
        assert_eq!(waiter.await.unwrap(), payload(5));
        // The unrelated waiter is untouched
        assert_eq!(router.pending_count(), 1);
        drop(other);
    }

    #[tokio::test]
    async fn test_router_cancel_and_close() {
        let router = ResultRouter::new();
        let _cancelled = router.register(TaskId(1));
        let open = router.register(TaskId(2));
        
        assert!(router.cancel(TaskId(1)));
        assert!(!router.cancel(TaskId(1)));
        assert!(!router.resolve(TaskId(1), payload(1)));
        
        assert_eq!(router.close(), 1);
        assert!(open.await.is_err());
    }

    #[tokio::test]
    async fn test_register_prunes_abandoned_waiters() {
        let router = ResultRouter::new();
        drop(router.register(TaskId(1)));
        drop(router.register(TaskId(2)));
        let live = router.register(TaskId(3));
        
        assert_eq!(router.pending_count(), 1);
        assert!(router.resolve(TaskId(3), payload(3)));
        assert_eq!(live.await.unwrap(), payload(3));
    }

    #[test]
    fn test_pending_call_guard_deregisters_on_drop() {
        let router = ResultRouter::new();
        let _waiter = router.register(TaskId(8));
        {
            let _pending = PendingCall { router: &router, id: TaskId(8) };
            assert_eq!(router.pending_count(), 1);
        }
        assert_eq!(router.pending_count(), 0);
        
        // Already resolved: the guard is a no-op
        let _waiter = router.register(TaskId(9));
        let pending = PendingCall { router: &router, id: TaskId(9) };
        assert!(router.resolve(TaskId(9), payload(9)));
        drop(pending);
        assert_eq!(router.pending_count(), 0);
    }
}
