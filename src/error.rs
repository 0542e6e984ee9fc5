//! Error types for directory monitoring.
//!
//! Lifecycle errors propagate to the caller of `start`/`stop`. Dispatch errors are
//! diagnosed on the watcher thread and never leave it.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for lifecycle operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors returned by `DirectoryMonitor` lifecycle operations
#[derive(Error, Debug)]
pub enum MonitorError {
    /// `start` called while a session is already active
    #[error("already monitoring {path}; call stop() first")]
    AlreadyMonitoring { path: PathBuf },

    /// Watch target exists but is not a directory
    #[error("not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Watch target could not be resolved to an absolute path
    #[error("invalid watch target {path}: {source}")]
    InvalidTarget {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The OS refused to spawn the watcher thread
    #[error("failed to create monitoring thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// The native watch stream could not be created
    #[error("failed to create watch stream for {path}: {source}")]
    Stream {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The watcher thread did not report readiness in time
    #[error("watcher thread did not become ready within {timeout:?}")]
    StartTimeout { timeout: Duration },

    /// The watcher thread panicked
    #[error("watcher thread panicked")]
    WatcherPanicked,
}

/// The host event loop no longer accepts tasks
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("event loop is closed")]
    Closed,
}

/// Per-event failure inside the dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no callback registered, event dropped")]
    MissingCallback,

    #[error("callback failed: {0:#}")]
    Callback(anyhow::Error),

    #[error("callback panicked: {0}")]
    CallbackPanicked(String),

    #[error("task submission failed: {0}")]
    Submit(#[from] SubmitError),
}
