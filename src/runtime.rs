//! Host event loop: the scheduler side of the bridge.
//!
//! `EventLoop::run` is driven on a tokio runtime and spawns every submitted task there.
//! Foreign threads reach the loop through a cloneable [`LoopHandle`]; all access to the
//! loop's state goes through [`LoopHandle::lock`], which hands out a scoped
//! [`RuntimeGuard`]. Dropping the guard releases the lock on every exit path.
//!
//! The lock is reentrant: code running under a guard (an event callback, say) may call
//! back into its own handle on the same thread. Other threads wait for the guard.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::SubmitError;

/// A deferred computation executed by the host event loop.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Box a future into a [`Task`].
pub fn task<F>(fut: F) -> Task
where
    F: Future<Output = ()> + Send + 'static,
{
    Box::pin(fut)
}

struct LoopState {
    /// `None` once the loop has been closed.
    queue: Option<mpsc::UnboundedSender<Task>>,
    submitted: u64,
}

struct Shared {
    state: ReentrantMutex<RefCell<LoopState>>,
    /// Observes the queue without keeping it open; read without taking the lock.
    watch: mpsc::WeakUnboundedSender<Task>,
}

/// Cloneable, refcounted handle to a host event loop.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("closed", &self.is_closed())
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl LoopHandle {
    /// Acquire exclusive access to the loop state.
    ///
    /// Re-entering from the thread that already holds a guard succeeds immediately.
    pub fn lock(&self) -> RuntimeGuard<'_> {
        RuntimeGuard {
            state: self.shared.state.lock(),
        }
    }

    /// Stop accepting tasks. `EventLoop::run` returns once in-flight tasks finish.
    pub fn close(&self) {
        let guard = self.lock();
        let queue = guard.state.borrow_mut().queue.take();
        drop(queue);
    }

    /// True once the loop was closed or its receiving side is gone. Never blocks.
    pub fn is_closed(&self) -> bool {
        self.shared
            .watch
            .upgrade()
            .is_none_or(|queue| queue.is_closed())
    }

    /// Number of live handles to this loop, including this one.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }
}

/// Exclusive access to the host loop, released on drop.
pub struct RuntimeGuard<'a> {
    state: ReentrantMutexGuard<'a, RefCell<LoopState>>,
}

impl RuntimeGuard<'_> {
    /// Queue a task on the loop without waiting for it.
    pub fn submit(&mut self, task: Task) -> Result<(), SubmitError> {
        // A rejected task is dropped after the borrow ends, so its destructor may
        // use the handle too.
        let queue = self.state.borrow().queue.clone();
        let queue = queue.ok_or(SubmitError::Closed)?;
        queue.send(task).map_err(|_| SubmitError::Closed)?;
        self.state.borrow_mut().submitted += 1;
        Ok(())
    }

    /// Total tasks accepted by the loop so far.
    pub fn submitted(&self) -> u64 {
        self.state.borrow().submitted
    }
}

/// Outcome of a finished [`EventLoop::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub completed: u64,
    pub panicked: u64,
}

/// Receiving side of the host loop.
pub struct EventLoop {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl EventLoop {
    pub fn new() -> (EventLoop, LoopHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = LoopHandle {
            shared: Arc::new(Shared {
                watch: tx.downgrade(),
                state: ReentrantMutex::new(RefCell::new(LoopState {
                    queue: Some(tx),
                    submitted: 0,
                })),
            }),
        };
        (EventLoop { rx }, handle)
    }

    /// Drive the loop: spawn submitted tasks onto the current tokio runtime.
    ///
    /// Returns once the loop is closed (explicitly or by dropping every handle)
    /// and all spawned tasks have finished.
    pub async fn run(mut self) -> LoopSummary {
        let mut tasks = JoinSet::new();
        let mut summary = LoopSummary::default();

        loop {
            tokio::select! {
                next = self.rx.recv() => match next {
                    Some(task) => {
                        tasks.spawn(task);
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    record(&mut summary, joined);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            record(&mut summary, joined);
        }
        tracing::debug!(
            completed = summary.completed,
            panicked = summary.panicked,
            "event loop finished"
        );
        summary
    }
}

fn record(summary: &mut LoopSummary, joined: Result<(), tokio::task::JoinError>) {
    match joined {
        Ok(()) => summary.completed += 1,
        Err(err) if err.is_panic() => {
            tracing::warn!("event task panicked");
            summary.panicked += 1;
        }
        Err(err) => tracing::debug!(error = %err, "event task cancelled"),
    }
}
