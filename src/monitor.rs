//! Public control surface: register a callback, start and stop monitoring.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::MonitorConfig;
use crate::dispatch::{CallbackSlot, DispatchReport, DispatchStats, Dispatcher};
use crate::error::{MonitorError, MonitorResult};
use crate::runtime::{LoopHandle, Task};
use crate::watcher::WatcherThread;
use crate::watcher::event::NormalizedEvent;

/// Absolute path of the directory being watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget(PathBuf);

impl WatchTarget {
    /// Resolve `path` to an absolute directory path.
    pub fn new(path: &Path) -> MonitorResult<Self> {
        let resolved = std::fs::canonicalize(path).map_err(|source| MonitorError::InvalidTarget {
            path: path.to_path_buf(),
            source,
        })?;
        if !resolved.is_dir() {
            return Err(MonitorError::NotADirectory { path: resolved });
        }
        Ok(Self(resolved))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

/// One active monitoring session.
struct Session {
    target: WatchTarget,
    loop_handle: LoopHandle,
    watcher: WatcherThread,
}

/// Watches one directory tree at a time and turns every change into a task
/// submitted to a host event loop.
///
/// ```no_run
/// use dirmon::{DirectoryMonitor, EventLoop, task};
///
/// # async fn demo() -> anyhow::Result<()> {
/// let (event_loop, handle) = EventLoop::new();
/// let driver = tokio::spawn(event_loop.run());
///
/// let mut monitor = DirectoryMonitor::new();
/// monitor.set_callback(|event| {
///     Ok(task(async move { println!("{} {}", event.kind, event.path.display()) }))
/// });
/// monitor.start("/tmp", handle)?;
/// // ...
/// monitor.stop()?;
/// driver.await?;
/// # Ok(())
/// # }
/// ```
pub struct DirectoryMonitor {
    config: MonitorConfig,
    callback: Arc<CallbackSlot>,
    stats: Arc<DispatchStats>,
    session: Option<Session>,
}

impl Default for DirectoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryMonitor {
    pub fn new() -> Self {
        Self::with_config(MonitorConfig::default())
    }

    pub fn with_config(config: MonitorConfig) -> Self {
        Self {
            config,
            callback: Arc::new(CallbackSlot::default()),
            stats: Arc::new(DispatchStats::default()),
            session: None,
        }
    }

    /// Register the callback, replacing any previous one. Valid while monitoring.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(NormalizedEvent) -> anyhow::Result<Task> + Send + Sync + 'static,
    {
        self.callback.replace(Some(Arc::new(callback)));
    }

    /// Remove the callback; events arriving afterwards are dropped.
    pub fn clear_callback(&self) {
        self.callback.replace(None);
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_set()
    }

    /// Start monitoring `path` recursively, submitting tasks to `loop_handle`.
    ///
    /// Fails with [`MonitorError::AlreadyMonitoring`] if a session is active; the
    /// active session is left untouched. Any other failure leaves the monitor idle.
    pub fn start(&mut self, path: impl AsRef<Path>, loop_handle: LoopHandle) -> MonitorResult<()> {
        if let Some(session) = &self.session {
            return Err(MonitorError::AlreadyMonitoring {
                path: session.target.as_path().to_path_buf(),
            });
        }

        let target = WatchTarget::new(path.as_ref())?;
        tracing::info!(path = %target.as_path().display(), "monitoring directory");

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.callback),
            loop_handle.clone(),
            Arc::clone(&self.stats),
        );
        let watcher = WatcherThread::spawn(target.as_path(), &self.config, move |batch| {
            dispatcher.dispatch_batch(batch);
        })?;

        self.session = Some(Session {
            target,
            loop_handle,
            watcher,
        });
        Ok(())
    }

    /// Stop monitoring and wait for the watcher thread to exit. No-op when idle.
    ///
    /// Once this returns, no further callback invocation happens for the session
    /// and its loop handle has been released.
    pub fn stop(&mut self) -> MonitorResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let Session {
            target,
            loop_handle,
            watcher,
        } = session;

        let result = watcher.stop();
        drop(loop_handle);
        tracing::info!(path = %target.as_path().display(), "stopped monitoring");
        result
    }

    pub fn is_monitoring(&self) -> bool {
        self.session.is_some()
    }

    pub fn target(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.target.as_path())
    }

    /// Totals across all sessions of this monitor.
    pub fn counts(&self) -> DispatchReport {
        self.stats.snapshot()
    }
}

impl Drop for DirectoryMonitor {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(error = %err, "failed to stop monitoring on drop");
        }
    }
}
