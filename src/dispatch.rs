//! Delivery sink run on the watcher thread for every batch of raw events.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::DispatchError;
use crate::runtime::{LoopHandle, Task};
use crate::watcher::event::{NormalizedEvent, RawEvent};

/// User logic turning a normalized event into a task for the host loop.
///
/// Implemented for every `Fn(NormalizedEvent) -> anyhow::Result<Task>`.
pub trait EventCallback: Send + Sync + 'static {
    fn call(&self, event: NormalizedEvent) -> anyhow::Result<Task>;
}

impl<F> EventCallback for F
where
    F: Fn(NormalizedEvent) -> anyhow::Result<Task> + Send + Sync + 'static,
{
    fn call(&self, event: NormalizedEvent) -> anyhow::Result<Task> {
        self(event)
    }
}

/// Holds the currently registered callback.
///
/// Replacement swaps the whole `Arc`; readers clone it out, so a delivery in
/// flight keeps the callback it started with.
#[derive(Default)]
pub struct CallbackSlot {
    current: RwLock<Option<Arc<dyn EventCallback>>>,
}

impl CallbackSlot {
    pub fn replace(&self, callback: Option<Arc<dyn EventCallback>>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    pub fn load(&self) -> Option<Arc<dyn EventCallback>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_set(&self) -> bool {
        self.load().is_some()
    }
}

/// Outcome of one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: u64,
    pub dropped: u64,
    pub failed: u64,
}

/// Running totals across batches, shared with the monitor.
#[derive(Debug, Default)]
pub struct DispatchStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl DispatchStats {
    fn add(&self, report: DispatchReport) {
        self.delivered.fetch_add(report.delivered, Ordering::Relaxed);
        self.dropped.fetch_add(report.dropped, Ordering::Relaxed);
        self.failed.fetch_add(report.failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchReport {
        DispatchReport {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct Dispatcher {
    callback: Arc<CallbackSlot>,
    loop_handle: LoopHandle,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(
        callback: Arc<CallbackSlot>,
        loop_handle: LoopHandle,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            callback,
            loop_handle,
            stats,
        }
    }

    /// Deliver a batch in order. Never fails: every per-event error is logged and counted.
    pub fn dispatch_batch(&self, batch: Vec<RawEvent>) -> DispatchReport {
        let mut report = DispatchReport::default();
        for raw in batch {
            let path = raw.path.clone();
            match self.dispatch_one(raw) {
                Ok(()) => report.delivered += 1,
                Err(DispatchError::MissingCallback) => {
                    tracing::warn!(path = %path.display(), "no callback registered, event dropped");
                    report.dropped += 1;
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "event not delivered");
                    report.failed += 1;
                }
            }
        }
        self.stats.add(report);
        report
    }

    fn dispatch_one(&self, raw: RawEvent) -> Result<(), DispatchError> {
        tracing::debug!(path = %raw.path.display(), flags = raw.flags, "event detected");
        let event = raw.normalize();
        tracing::debug!(kind = %event.kind, "determined event type");

        let callback = self.callback.load().ok_or(DispatchError::MissingCallback)?;

        // The callback runs under the guard and may re-enter its own loop handle.
        let mut runtime = self.loop_handle.lock();
        let task = invoke(callback.as_ref(), event)?;
        runtime.submit(task)?;
        Ok(())
    }
}

fn invoke(callback: &dyn EventCallback, event: NormalizedEvent) -> Result<Task, DispatchError> {
    match catch_unwind(AssertUnwindSafe(|| callback.call(event))) {
        Ok(Ok(task)) => Ok(task),
        Ok(Err(err)) => Err(DispatchError::Callback(err)),
        Err(payload) => Err(DispatchError::CallbackPanicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{EventLoop, task};
    use crate::watcher::event::{EventKind, flags};
    use std::sync::Mutex;

    fn dispatcher(slot: &Arc<CallbackSlot>, handle: &LoopHandle) -> Dispatcher {
        Dispatcher::new(Arc::clone(slot), handle.clone(), Arc::new(DispatchStats::default()))
    }

    fn recording_callback(seen: &Arc<Mutex<Vec<NormalizedEvent>>>) -> Arc<dyn EventCallback> {
        let seen = Arc::clone(seen);
        Arc::new(move |event: NormalizedEvent| -> anyhow::Result<Task> {
            let seen = Arc::clone(&seen);
            Ok(task(async move {
                seen.lock().unwrap().push(event);
            }))
        })
    }

    #[tokio::test]
    async fn test_batch_delivered_as_tasks() {
        let (event_loop, handle) = EventLoop::new();
        let slot = Arc::new(CallbackSlot::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        slot.replace(Some(recording_callback(&seen)));

        let d = dispatcher(&slot, &handle);
        let report = d.dispatch_batch(vec![
            RawEvent::new("/w/a", flags::ITEM_CREATED),
            RawEvent::new("/w/b", flags::ITEM_MODIFIED | flags::ITEM_RENAMED),
            RawEvent::new("/w/c", 0),
        ]);
        assert_eq!(report, DispatchReport { delivered: 3, dropped: 0, failed: 0 });
        assert_eq!(handle.lock().submitted(), 3);

        drop(d);
        drop(handle);
        // Tasks are spawned concurrently, so only the set is checked here.
        let summary = event_loop.run().await;
        assert_eq!(summary.completed, 3);

        let mut kinds: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.path.clone(), e.kind))
            .collect();
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                (std::path::PathBuf::from("/w/a"), EventKind::Created),
                (std::path::PathBuf::from("/w/b"), EventKind::Modified),
                (std::path::PathBuf::from("/w/c"), EventKind::Unknown),
            ]
        );
    }

    #[test]
    fn test_callback_invoked_in_delivery_order() {
        let (_event_loop, handle) = EventLoop::new();
        let slot = Arc::new(CallbackSlot::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::clone(&order);
        slot.replace(Some(Arc::new(move |event: NormalizedEvent| -> anyhow::Result<Task> {
            calls.lock().unwrap().push(event.path);
            Ok(task(async {}))
        })));

        dispatcher(&slot, &handle).dispatch_batch(vec![
            RawEvent::new("/w/1", flags::ITEM_CREATED),
            RawEvent::new("/w/2", flags::ITEM_REMOVED),
            RawEvent::new("/w/3", flags::ITEM_RENAMED),
        ]);
        let order = order.lock().unwrap();
        assert_eq!(
            *order,
            vec![
                std::path::PathBuf::from("/w/1"),
                std::path::PathBuf::from("/w/2"),
                std::path::PathBuf::from("/w/3"),
            ]
        );
    }

    #[test]
    fn test_missing_callback_drops_event() {
        let (_event_loop, handle) = EventLoop::new();
        let slot = Arc::new(CallbackSlot::default());
        let stats = Arc::new(DispatchStats::default());
        let d = Dispatcher::new(Arc::clone(&slot), handle.clone(), Arc::clone(&stats));

        let report = d.dispatch_batch(vec![RawEvent::new("/w/a", flags::ITEM_CREATED)]);
        assert_eq!(report.dropped, 1);
        assert_eq!(stats.snapshot().dropped, 1);
        assert_eq!(handle.lock().submitted(), 0);
    }

    #[test]
    fn test_failing_callback_does_not_abort_batch() {
        let (_event_loop, handle) = EventLoop::new();
        let slot = Arc::new(CallbackSlot::default());
        slot.replace(Some(Arc::new(|event: NormalizedEvent| -> anyhow::Result<Task> {
            match event.kind {
                EventKind::Deleted => anyhow::bail!("refusing {}", event.path.display()),
                EventKind::Renamed => panic!("callback bug"),
                _ => Ok(task(async {})),
            }
        })));

        let report = dispatcher(&slot, &handle).dispatch_batch(vec![
            RawEvent::new("/w/a", flags::ITEM_REMOVED),
            RawEvent::new("/w/b", flags::ITEM_RENAMED),
            RawEvent::new("/w/c", flags::ITEM_MODIFIED),
        ]);
        assert_eq!(report, DispatchReport { delivered: 1, dropped: 0, failed: 2 });
        assert_eq!(handle.lock().submitted(), 1);
    }

    #[test]
    fn test_closed_loop_is_reported_per_event() {
        let (event_loop, handle) = EventLoop::new();
        drop(event_loop);
        let slot = Arc::new(CallbackSlot::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        slot.replace(Some(recording_callback(&seen)));

        let report = dispatcher(&slot, &handle).dispatch_batch(vec![
            RawEvent::new("/w/a", flags::ITEM_CREATED),
            RawEvent::new("/w/b", flags::ITEM_CREATED),
        ]);
        assert_eq!(report.failed, 2);
    }

    #[test]
    fn test_replaced_callback_used_for_next_batch() {
        let (_event_loop, handle) = EventLoop::new();
        let slot = Arc::new(CallbackSlot::default());
        let tags = Arc::new(Mutex::new(Vec::new()));

        let make = |tag: &'static str| -> Arc<dyn EventCallback> {
            let tags = Arc::clone(&tags);
            Arc::new(move |_event: NormalizedEvent| -> anyhow::Result<Task> {
                tags.lock().unwrap().push(tag);
                Ok(task(async {}))
            })
        };

        let d = dispatcher(&slot, &handle);
        slot.replace(Some(make("old")));
        d.dispatch_batch(vec![RawEvent::new("/w/a", flags::ITEM_CREATED)]);
        slot.replace(Some(make("new")));
        d.dispatch_batch(vec![RawEvent::new("/w/b", flags::ITEM_CREATED)]);

        assert_eq!(*tags.lock().unwrap(), vec!["old", "new"]);
    }

    #[test]
    fn test_runtime_lock_released_after_each_event() {
        let (_event_loop, handle) = EventLoop::new();
        let slot = Arc::new(CallbackSlot::default());
        slot.replace(Some(Arc::new(move |_event: NormalizedEvent| -> anyhow::Result<Task> {
            anyhow::bail!("always fails")
        })));

        dispatcher(&slot, &handle)
            .dispatch_batch(vec![RawEvent::new("/w/a", flags::ITEM_CREATED)]);
        // Another thread would block forever if the failing path leaked the guard.
        let other = handle.clone();
        let submitted = std::thread::spawn(move || other.lock().submitted())
            .join()
            .unwrap();
        assert_eq!(submitted, 0);
    }

    #[test]
    fn test_callback_may_use_its_own_loop_handle() {
        let (_event_loop, handle) = EventLoop::new();
        let slot = Arc::new(CallbackSlot::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (inner, record) = (handle.clone(), Arc::clone(&seen));
        slot.replace(Some(Arc::new(move |_event: NormalizedEvent| -> anyhow::Result<Task> {
            let closed = inner.is_closed();
            let submitted = inner.lock().submitted();
            record.lock().unwrap().push((closed, submitted, format!("{inner:?}")));
            Ok(task(async {}))
        })));

        let d = dispatcher(&slot, &handle);
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let report = d.dispatch_batch(vec![
                RawEvent::new("/w/a", flags::ITEM_CREATED),
                RawEvent::new("/w/b", flags::ITEM_MODIFIED),
            ]);
            let _ = tx.send(report);
        });

        let report = rx
            .recv_timeout(std::time::Duration::from_secs(3))
            .expect("dispatch blocked while the callback used its loop handle");
        assert_eq!(report, DispatchReport { delivered: 2, dropped: 0, failed: 0 });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!((seen[0].0, seen[0].1), (false, 0));
        assert_eq!((seen[1].0, seen[1].1), (false, 1));
        assert!(seen[1].2.contains("closed: false"));
    }

    #[test]
    fn test_callback_closing_its_loop_fails_only_that_event() {
        let (_event_loop, handle) = EventLoop::new();
        let slot = Arc::new(CallbackSlot::default());
        let inner = handle.clone();
        slot.replace(Some(Arc::new(move |event: NormalizedEvent| -> anyhow::Result<Task> {
            if event.kind == EventKind::Deleted {
                inner.close();
            }
            Ok(task(async {}))
        })));

        let report = dispatcher(&slot, &handle).dispatch_batch(vec![
            RawEvent::new("/w/a", flags::ITEM_CREATED),
            RawEvent::new("/w/b", flags::ITEM_REMOVED),
            RawEvent::new("/w/c", flags::ITEM_CREATED),
        ]);
        assert_eq!(report, DispatchReport { delivered: 1, dropped: 0, failed: 2 });
        assert!(handle.is_closed());
    }
}
