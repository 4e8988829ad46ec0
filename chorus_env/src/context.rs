//! Core environment context trait for Chorus nodes.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the coordinator and worker
/// runtimes can run in both production (tokio) and simulation (paused
/// virtual clock) environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` - paused tokio clock + `ChaCha8Rng(seed)`
///
/// # Determinism
///
/// For DST, all methods that would normally introduce non-determinism
/// (time, scheduling) are controlled by the implementation.
#[async_trait]
pub trait NodeContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for deadlines and packet timestamps.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;
    
    /// Suspends execution for the given duration.
    ///
    /// This is the cancellable deadline timer used by every bounded wait:
    /// callers race it against `recv()` inside `tokio::select!`.
    async fn sleep(&self, duration: Duration);
    
    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
    
    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
    
    /// Returns `now()` in whole milliseconds, for packet timestamps.
    fn now_ms(&self) -> u64 {
        self.now().as_millis() as u64
    }
}
