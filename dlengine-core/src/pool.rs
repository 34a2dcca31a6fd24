//! Resizable Worker Pools
//!
//! The engine owns two process-wide pools whose sizes are decided by the
//! sizing policy.  A [`ThreadPool`] records its target size and starts its
//! workers (a multi-threaded Tokio runtime) on first use.  Resizing updates
//! the target in place: the handle stays the same and the next use starts
//! workers at the new size.  Workers started at the old size are retired,
//! not stopped; they keep running the tasks spawned through the pool and
//! are shut down once those tasks have finished.
//!
//! # Performance-First Design:
//! - Lazy start: sizing a pool never spawns threads
//! - `resize` to the current size is a no-op, so repeated init is free
//! - Lock-free size reads; the mutex only guards worker start/retire

use crate::error::{EngineError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// One generation of started workers and the tasks spawned on them.
#[derive(Debug)]
struct Workers {
    runtime: Runtime,
    tasks: TaskTracker,
}

impl Workers {
    fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    fn shutdown(self) {
        // Dropping a runtime from async context panics; shut down instead.
        self.runtime.shutdown_background();
    }
}

#[derive(Debug, Default)]
struct PoolState {
    active: Option<Workers>,
    retired: Vec<Workers>,
}

impl PoolState {
    /// Shut down retired generations with no task left.
    fn reap(&mut self, pool: &str) {
        let before = self.retired.len();
        let (idle, busy): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.retired).into_iter().partition(Workers::is_idle);
        self.retired = busy;
        for workers in idle {
            workers.shutdown();
        }
        if self.retired.len() != before {
            debug!(pool, draining = self.retired.len(), "Reaped retired pool workers");
        }
    }
}

/// A named worker pool with a resizable thread count.
#[derive(Debug)]
pub struct ThreadPool {
    name: String,
    size: AtomicUsize,
    resizes: AtomicUsize,
    state: Mutex<PoolState>,
}

impl ThreadPool {
    /// Create a pool of `size` threads (at least 1).  No thread is started.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let name = name.into();
        debug!(pool = %name, size, "Creating ThreadPool (deferred start)");
        Self {
            name,
            size: AtomicUsize::new(size.max(1)),
            resizes: AtomicUsize::new(0),
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current target thread count.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Number of effective resizes since creation.
    pub fn resize_count(&self) -> usize {
        self.resizes.load(Ordering::Acquire)
    }

    /// Returns `true` once workers at the current size have been started.
    pub fn is_started(&self) -> bool {
        self.lock_state().active.is_some()
    }

    /// Older worker generations still finishing tasks spawned before a
    /// resize.
    pub fn draining(&self) -> usize {
        let mut state = self.lock_state();
        state.reap(&self.name);
        state.retired.len()
    }

    /// Change the pool size.
    ///
    /// Returns `Ok(false)` without touching the workers when `new_size`
    /// already matches.  A size of zero is rejected.  Tasks spawned through
    /// the pool before the resize run to completion.
    pub fn resize(&self, new_size: usize) -> Result<bool> {
        if new_size == 0 {
            return Err(EngineError::InvalidTopology(format!(
                "thread pool '{}' can't be resized to 0 threads",
                self.name
            )));
        }

        let mut state = self.lock_state();
        let old_size = self.size();
        if old_size == new_size {
            debug!(pool = %self.name, size = new_size, "Pool already at requested size");
            return Ok(false);
        }

        self.size.store(new_size, Ordering::Release);
        self.resizes.fetch_add(1, Ordering::AcqRel);
        if let Some(workers) = state.active.take() {
            state.retired.push(workers);
        }
        state.reap(&self.name);
        info!(
            pool = %self.name,
            old_size,
            new_size,
            draining = state.retired.len(),
            "Resized thread pool"
        );
        Ok(true)
    }

    /// Handle to the pool's current workers, starting them if needed.
    ///
    /// Work spawned directly on the handle is not tracked and is cancelled
    /// if its workers are retired; use [`spawn`](Self::spawn) or
    /// [`spawn_blocking`](Self::spawn_blocking) for work that must survive a
    /// resize.
    pub fn handle(&self) -> Result<Handle> {
        let mut state = self.lock_state();
        Ok(self.active(&mut state)?.runtime.handle().clone())
    }

    /// Run a future on the pool.
    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let mut state = self.lock_state();
        let workers = self.active(&mut state)?;
        Ok(workers.runtime.spawn(workers.tasks.track_future(future)))
    }

    /// Run a blocking closure on the pool's blocking threads.
    pub fn spawn_blocking<F, R>(&self, f: F) -> Result<JoinHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut state = self.lock_state();
        let workers = self.active(&mut state)?;
        let token = workers.tasks.token();
        Ok(workers.runtime.spawn_blocking(move || {
            let _token = token;
            f()
        }))
    }

    fn active<'a>(&self, state: &'a mut PoolState) -> Result<&'a Workers> {
        state.reap(&self.name);
        if state.active.is_none() {
            let size = self.size();
            let runtime = Builder::new_multi_thread()
                .worker_threads(size)
                .max_blocking_threads(size)
                .thread_name(format!("dl-{}", self.name))
                .enable_all()
                .build()
                .map_err(|e| EngineError::PoolStart {
                    pool: self.name.clone(),
                    reason: e.to_string(),
                })?;
            info!(pool = %self.name, size, "Started thread pool workers");
            state.active = Some(Workers {
                runtime,
                tasks: TaskTracker::new(),
            });
        }
        state.active.as_ref().ok_or_else(|| EngineError::PoolStart {
            pool: self.name.clone(),
            reason: "workers missing after start".to_string(),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let generations = state.active.take().into_iter().chain(state.retired.drain(..));
        for workers in generations {
            workers.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_lazy() {
        let pool = ThreadPool::new("test", 4);
        assert_eq!(pool.size(), 4);
        assert_eq!(pool.name(), "test");
        assert!(!pool.is_started());
    }

    #[test]
    fn test_zero_size_clamped() {
        let pool = ThreadPool::new("test", 0);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_resize_same_size_is_noop() {
        let pool = ThreadPool::new("test", 3);
        assert!(!pool.resize(3).unwrap());
        assert_eq!(pool.resize_count(), 0);
    }

    #[test]
    fn test_resize_changes_size() {
        let pool = ThreadPool::new("test", 3);
        assert!(pool.resize(5).unwrap());
        assert_eq!(pool.size(), 5);
        assert_eq!(pool.resize_count(), 1);
    }

    #[test]
    fn test_resize_to_zero_rejected() {
        let pool = ThreadPool::new("test", 2);
        assert!(matches!(
            pool.resize(0),
            Err(EngineError::InvalidTopology(_))
        ));
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_spawn_runs_on_workers() {
        let pool = ThreadPool::new("test", 2);
        let task = pool.spawn(async { 40 + 2 }).unwrap();
        assert!(pool.is_started());
        let handle = pool.handle().unwrap();
        assert_eq!(handle.block_on(task).unwrap(), 42);
    }

    #[test]
    fn test_resize_restarts_workers_at_new_size() {
        let pool = ThreadPool::new("test", 1);
        pool.handle().unwrap();
        assert!(pool.is_started());

        pool.resize(2).unwrap();
        assert!(!pool.is_started());
        assert_eq!(pool.draining(), 0);

        let task = pool.spawn_blocking(|| std::thread::current().name().map(str::to_owned)).unwrap();
        let name = pool.handle().unwrap().block_on(task).unwrap();
        assert_eq!(name.as_deref(), Some("dl-test"));
    }

    #[tokio::test]
    async fn test_resize_lets_running_tasks_finish() {
        let pool = ThreadPool::new("test", 1);
        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let task = pool
            .spawn(async move {
                wait.await.ok();
                42
            })
            .unwrap();

        assert!(pool.resize(3).unwrap());
        assert_eq!(pool.draining(), 1);

        release.send(()).unwrap();
        assert_eq!(task.await.unwrap(), 42);
        assert_eq!(pool.draining(), 0);
    }

    #[tokio::test]
    async fn test_resize_lets_blocking_tasks_finish() {
        let pool = ThreadPool::new("test", 1);
        let (release, wait) = std::sync::mpsc::channel::<()>();
        let task = pool
            .spawn_blocking(move || {
                wait.recv().ok();
                7
            })
            .unwrap();

        pool.resize(2).unwrap();
        assert_eq!(pool.draining(), 1);

        release.send(()).unwrap();
        assert_eq!(task.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_drop_inside_async_context() {
        let pool = ThreadPool::new("test", 1);
        let task = pool.spawn(async { 7 }).unwrap();
        assert_eq!(task.await.unwrap(), 7);
        drop(pool);
    }
}
