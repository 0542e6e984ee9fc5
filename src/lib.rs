//! Recursive directory monitoring bridged onto an async event loop.
//!
//! A [`DirectoryMonitor`] runs the native watch stream on a dedicated thread. Every
//! change is classified into a [`NormalizedEvent`], handed to the registered callback
//! under the host loop's lock, and the task it returns is queued on the [`EventLoop`]
//! without waiting for it to finish.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod output;
pub mod runtime;
pub mod watcher;

pub use config::MonitorConfig;
pub use dispatch::{DispatchReport, EventCallback};
pub use error::{DispatchError, MonitorError, MonitorResult, SubmitError};
pub use monitor::{DirectoryMonitor, WatchTarget};
pub use runtime::{EventLoop, LoopHandle, LoopSummary, RuntimeGuard, Task, task};
pub use watcher::event::{EventKind, NormalizedEvent, RawEvent, classify};
