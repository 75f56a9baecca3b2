use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::error;
use tokio::task::JoinHandle;

/// A cooperatively-cancellable periodic loop (§5: "loops poll a liveness flag
/// between ticks so `stop()` takes effect within one period").
pub struct PeriodicTask {
    alive: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawns `tick` on a fresh interval of `period`, stopping as soon as
    /// `stop()` is called and the current sleep elapses.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let alive = Arc::new(AtomicBool::new(true));
        let alive_clone = alive.clone();
        let handle = tokio::spawn(async move {
            while alive_clone.load(Ordering::Relaxed) {
                tick().await;
                tokio::time::sleep(period).await;
            }
        });
        PeriodicTask { alive, handle }
    }

    /// Signals the loop to stop after its current sleep and detaches the
    /// handle; callers that need to wait for actual termination should keep
    /// the `JoinHandle` themselves via `spawn` instead.
    pub fn stop(&self) {
        self.alive.store(false, Ordering::Relaxed);
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// An abortable, at-most-one-at-a-time unit of work (§4.5, §9: "Preemption of
/// a running task"). Used by the Follower to model its single active task.
pub struct Preemptible {
    current: Option<JoinHandle<()>>,
}

impl Preemptible {
    pub fn new() -> Self {
        Preemptible { current: None }
    }

    /// Aborts whatever is currently running (best-effort, bounded by the
    /// caller awaiting the handle's abort) and starts `fut` in its place.
    pub async fn preempt<Fut>(&mut self, fut: Fut)
    where
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if let Some(handle) = self.current.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("preempted task ended abnormally: {e}");
                }
            }
        }
        self.current = Some(tokio::spawn(fut));
    }
}

impl Default for Preemptible {
    fn default() -> Self {
        Self::new()
    }
}
