pub mod event;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{RecursiveMode, Watcher};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};

use event::RawEvent;

/// Messages consumed by the watcher thread's run loop.
enum LoopMessage {
    Fs(notify::Result<notify::Event>),
    Stop,
}

/// Asks a watcher thread's run loop to return. Safe to call from any thread, any number of times.
#[derive(Clone)]
pub struct StopHandle {
    tx: Sender<LoopMessage>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        // The loop already exited if the receiver is gone.
        let _ = self.tx.send(LoopMessage::Stop);
    }
}

/// A dedicated thread owning the native watch stream and its run loop.
pub struct WatcherThread {
    handle: JoinHandle<()>,
    stop: StopHandle,
}

impl WatcherThread {
    /// Spawn the watcher thread for `target` and wait until its stream is running.
    ///
    /// `on_batch` is called on the watcher thread, serially, once per coalesced batch.
    /// Creation failures on the thread are returned here rather than ending the thread silently.
    pub fn spawn<F>(target: &Path, config: &MonitorConfig, on_batch: F) -> MonitorResult<Self>
    where
        F: FnMut(Vec<RawEvent>) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<LoopMessage>();
        let (ready_tx, ready_rx) = mpsc::channel::<MonitorResult<()>>();

        let stream_tx = tx.clone();
        let root = target.to_path_buf();
        let latency = config.latency();
        let handle = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run(root, latency, stream_tx, rx, ready_tx, on_batch))
            .map_err(MonitorError::ThreadSpawn)?;

        let stop = StopHandle { tx };
        let timeout = config.start_timeout();
        match ready_rx.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(Self { handle, stop }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(RecvTimeoutError::Timeout) => {
                // Leave the thread detached; it exits on its own once the stream comes up.
                stop.request_stop();
                tracing::warn!(?timeout, "watcher thread not ready, abandoning it");
                Err(MonitorError::StartTimeout { timeout })
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(MonitorError::WatcherPanicked)
            }
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Request stop and wait for the thread to exit.
    ///
    /// The pending batch, if any, is delivered before the thread exits.
    pub fn stop(self) -> MonitorResult<()> {
        self.stop.request_stop();
        self.handle.join().map_err(|_| MonitorError::WatcherPanicked)
    }
}

/// Body of the watcher thread. Blocks for the whole session.
fn run<F>(
    root: PathBuf,
    latency: Duration,
    stream_tx: Sender<LoopMessage>,
    rx: Receiver<LoopMessage>,
    ready_tx: Sender<MonitorResult<()>>,
    mut on_batch: F,
) where
    F: FnMut(Vec<RawEvent>),
{
    let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = stream_tx.send(LoopMessage::Fs(res));
    })
    .and_then(|mut watcher| {
        watcher.watch(&root, RecursiveMode::Recursive)?;
        Ok(watcher)
    });

    let _watcher = match watcher {
        Ok(watcher) => watcher,
        Err(source) => {
            let _ = ready_tx.send(Err(MonitorError::Stream { path: root, source }));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));
    tracing::debug!(root = %root.display(), ?latency, "watch stream started");

    run_loop(&rx, latency, &mut on_batch);

    tracing::debug!(root = %root.display(), "watch stream stopped");
}

/// Coalesce incoming events into batches: the first event of a batch arms a
/// deadline `latency` away, and the batch is delivered when it passes.
fn run_loop<F>(rx: &Receiver<LoopMessage>, latency: Duration, on_batch: &mut F)
where
    F: FnMut(Vec<RawEvent>),
{
    let mut pending: Vec<RawEvent> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let next = match deadline {
            Some(at) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match next {
            Ok(LoopMessage::Fs(Ok(event))) => {
                pending.extend(RawEvent::from_notify(&event));
                if deadline.is_none() && !pending.is_empty() {
                    deadline = Some(Instant::now() + latency);
                }
            }
            Ok(LoopMessage::Fs(Err(err))) => {
                tracing::warn!(error = %err, "watch stream error");
            }
            Ok(LoopMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                deadline = None;
                on_batch(std::mem::take(&mut pending));
            }
        }
    }

    if !pending.is_empty() {
        on_batch(pending);
    }
}
