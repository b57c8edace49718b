use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Result of [`WorkerPool::try_spawn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Spawned,
    /// Nothing was spawned; the caller decides whether to retry later.
    AtCapacity { active: usize, cap: usize },
}

/// Caps how many autonomous workflow runs execute at once.
///
/// Each spawned task holds a semaphore permit for its lifetime. Spawning never
/// waits: at capacity the request is reported back instead.
pub struct WorkerPool {
    cap: usize,
    semaphore: Arc<Semaphore>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            semaphore: Arc::new(Semaphore::new(cap)),
            handles: Vec::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Workers currently holding a slot.
    pub fn active(&self) -> usize {
        self.cap - self.semaphore.available_permits()
    }

    pub fn try_spawn<F>(&mut self, label: impl Into<String>, fut: F) -> SpawnOutcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let label = label.into();
        let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
            let outcome = SpawnOutcome::AtCapacity {
                active: self.active(),
                cap: self.cap,
            };
            tracing::info!(worker = %label, cap = self.cap, "worker pool at capacity; deferring");
            return outcome;
        };

        tracing::debug!(worker = %label, "spawning worker");
        let handle = tokio::spawn(async move {
            let _permit = permit;
            fut.await;
        });
        self.handles.push((label, handle));
        SpawnOutcome::Spawned
    }

    /// Wait for every spawned worker. Returns the labels of workers that
    /// panicked or were cancelled.
    pub async fn join_all(&mut self) -> Vec<String> {
        let mut failed = Vec::new();
        for (label, handle) in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(worker = %label, error = %e, "worker did not finish cleanly");
                failed.push(label);
            }
        }
        failed
    }
}
