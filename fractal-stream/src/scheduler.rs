//! Bounded-parallelism compute pool.
//!
//! A semaphore gates how many CPU-bound closures may run at once, and the
//! actual execution happens on Tokio's blocking pool so async tasks never
//! get stuck behind synchronous user code.

use std::sync::Arc;

use tokio::sync::Semaphore;

/// Shared scheduler for the synchronous payloads of `map`, `flatMap` and
/// `sketch` on [`crate`]-level local datasets, and for `observe_on` hops.
#[derive(Clone)]
pub struct ComputePool {
    semaphore: Arc<Semaphore>,
}

impl ComputePool {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Size the pool to the number of available CPUs, matching
    /// `computePoolSize`'s documented default.
    pub fn cpu_bound() -> Self {
        let n = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(n)
    }

    pub fn capacity(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run a synchronous closure on the blocking pool, gated by this
    /// scheduler's permit count. Panics inside `f` propagate as a panic
    /// in the awaiting task, matching the behavior of a plain `tokio::task`.
    pub async fn run<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("compute pool semaphore is never closed");
        let result = tokio::task::spawn_blocking(f)
            .await
            .expect("compute pool worker task panicked");
        drop(permit);
        result
    }

    /// Spawn a fire-and-forget async task gated by this scheduler, used by
    /// `observe_on` to re-dispatch stream item delivery off the caller's
    /// thread.
    pub fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("compute pool semaphore is never closed");
            fut.await;
        });
    }
}

impl Default for ComputePool {
    fn default() -> Self {
        Self::cpu_bound()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_executes_closure_and_returns_value() {
        let pool = ComputePool::new(2);
        let result = pool.run(|| 2 + 2).await;
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn bounded_pool_serializes_excess_work() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let pool = ComputePool::new(1);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
