//! Update scheduler
//!
//! Coalesces rapid update requests per layer and guarantees that at most one
//! apply runs per layer at any time.
//!
//! The first request for an idle layer opens a debounce window. Requests
//! arriving inside the window replace the pending snapshot, so only the
//! latest one is applied. Requests arriving while an apply is in flight are
//! held and get a fresh window once it completes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::core::{LayerId, Snapshot};

/// Future returned by an apply function.
pub type ApplyFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Callback that applies a snapshot to a layer.
pub type ApplyFn = Arc<dyn Fn(LayerId, Snapshot) -> ApplyFuture + Send + Sync>;

struct PendingUpdate {
    snapshot: Snapshot,
    apply: ApplyFn,
    /// Requests folded into this one.
    coalesced: usize,
}

struct LayerSlot {
    debounce: Duration,
    pending: Option<PendingUpdate>,
    timer: Option<JoinHandle<()>>,
    in_flight: bool,
    /// Replaced on cancel; timers from another epoch do nothing.
    epoch: u64,
}

impl LayerSlot {
    fn new(debounce: Duration, epoch: u64) -> Self {
        Self {
            debounce,
            pending: None,
            timer: None,
            in_flight: false,
            epoch,
        }
    }
}

type Slots = Arc<Mutex<HashMap<LayerId, LayerSlot>>>;

/// Per-layer debounce and mutual exclusion.
///
/// Timer handles live in the scheduler, keyed by layer id, and are aborted
/// on [`cancel`](Self::cancel). Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct UpdateScheduler {
    slots: Slots,
    default_debounce: Duration,
    /// Epochs are unique across slots, so a timer that outlived its slot
    /// never matches a later one for the same layer.
    epochs: Arc<AtomicU64>,
}

impl UpdateScheduler {
    /// Create a scheduler using `default_debounce` for unconfigured layers.
    pub fn new(default_debounce: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            default_debounce,
            epochs: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed)
    }

    /// Set the debounce window of one layer.
    ///
    /// Takes effect for the next window that opens.
    pub fn set_debounce(&self, layer_id: &LayerId, debounce: Duration) {
        let mut slots = self.slots.lock();
        slots
            .entry(layer_id.clone())
            .or_insert_with(|| LayerSlot::new(debounce, self.next_epoch()))
            .debounce = debounce;
    }

    /// Request that `snapshot` be applied to `layer_id` through `apply`.
    pub fn schedule(&self, layer_id: LayerId, snapshot: Snapshot, apply: ApplyFn) {
        let mut slots = self.slots.lock();
        let slot = slots
            .entry(layer_id.clone())
            .or_insert_with(|| LayerSlot::new(self.default_debounce, self.next_epoch()));

        match &mut slot.pending {
            Some(pending) => {
                trace!(
                    layer = %layer_id,
                    sequence = snapshot.sequence(),
                    "replacing pending snapshot"
                );
                pending.snapshot = snapshot;
                pending.apply = apply;
                pending.coalesced += 1;
            }
            None => {
                slot.pending = Some(PendingUpdate {
                    snapshot,
                    apply,
                    coalesced: 0,
                });
            }
        }

        if slot.timer.is_none() && !slot.in_flight {
            arm(&self.slots, layer_id, slot);
        }
    }

    /// Drop pending work for a layer.
    ///
    /// Aborts the debounce timer and discards the pending snapshot. An apply
    /// already in flight runs to completion. Returns `true` if anything was
    /// pending or in flight.
    pub fn cancel(&self, layer_id: &LayerId) -> bool {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(layer_id) else {
            return false;
        };

        let had_work = slot.pending.is_some() || slot.in_flight;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.pending = None;
        slot.epoch = self.next_epoch();

        if !slot.in_flight {
            slots.remove(layer_id);
        }
        if had_work {
            debug!(layer = %layer_id, "cancelled scheduled update");
        }
        had_work
    }

    /// Whether a snapshot is waiting for its window to close.
    pub fn is_pending(&self, layer_id: &LayerId) -> bool {
        self.slots
            .lock()
            .get(layer_id)
            .is_some_and(|slot| slot.pending.is_some())
    }

    /// Whether an apply is running for the layer.
    pub fn is_in_flight(&self, layer_id: &LayerId) -> bool {
        self.slots
            .lock()
            .get(layer_id)
            .is_some_and(|slot| slot.in_flight)
    }
}

/// Open a debounce window for `slot`.
fn arm(slots: &Slots, layer_id: LayerId, slot: &mut LayerSlot) {
    let epoch = slot.epoch;
    let debounce = slot.debounce;
    let slots = Arc::clone(slots);
    slot.timer = Some(tokio::spawn(async move {
        tokio::time::sleep(debounce).await;
        fire(slots, layer_id, epoch).await;
    }));
}

/// Window closed: run the pending apply, then re-arm if more work arrived.
async fn fire(slots: Slots, layer_id: LayerId, epoch: u64) {
    let pending = {
        let mut guard = slots.lock();
        let Some(slot) = guard.get_mut(&layer_id) else {
            return;
        };
        if slot.epoch != epoch {
            return;
        }
        slot.timer = None;
        if slot.in_flight {
            return;
        }
        let Some(pending) = slot.pending.take() else {
            return;
        };
        slot.in_flight = true;
        pending
    };

    if pending.coalesced > 0 {
        debug!(
            layer = %layer_id,
            coalesced = pending.coalesced,
            sequence = pending.snapshot.sequence(),
            "applying coalesced snapshot"
        );
    }

    (pending.apply)(layer_id.clone(), pending.snapshot).await;

    let mut guard = slots.lock();
    let Some(slot) = guard.get_mut(&layer_id) else {
        return;
    };
    slot.in_flight = false;
    if slot.pending.is_some() {
        if slot.timer.is_none() {
            arm(&slots, layer_id, slot);
        }
    } else if slot.epoch != epoch {
        guard.remove(&layer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        applied: Arc<Mutex<Vec<u64>>>,
        running: Arc<AtomicUsize>,
        max_running: Arc<AtomicUsize>,
    }

    fn recording_apply(work: Duration) -> (ApplyFn, Recorder) {
        let recorder = Recorder {
            applied: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
        };
        let applied = recorder.applied.clone();
        let running = recorder.running.clone();
        let max_running = recorder.max_running.clone();

        let apply: ApplyFn = Arc::new(move |_layer: LayerId, snapshot: Snapshot| {
            let applied = applied.clone();
            let running = running.clone();
            let max_running = max_running.clone();
            Box::pin(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(work).await;
                applied.lock().push(snapshot.sequence());
                running.fetch_sub(1, Ordering::SeqCst);
            }) as ApplyFuture
        });
        (apply, recorder)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_requests_within_window_apply_once() {
        let scheduler = UpdateScheduler::new(ms(500));
        let layer = LayerId::new("subscribers");
        let (apply, recorder) = recording_apply(ms(0));

        let first = Snapshot::new(Vec::new());
        let second = Snapshot::new(Vec::new());

        scheduler.schedule(layer.clone(), first, apply.clone());
        tokio::time::sleep(ms(100)).await;
        scheduler.schedule(layer.clone(), second.clone(), apply.clone());
        assert!(scheduler.is_pending(&layer));

        tokio::time::sleep(ms(1000)).await;
        assert_eq!(*recorder.applied.lock(), vec![second.sequence()]);
        assert!(!scheduler.is_pending(&layer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_not_extended_by_later_requests() {
        let scheduler = UpdateScheduler::new(ms(500));
        let layer = LayerId::new("vehicles");
        let (apply, recorder) = recording_apply(ms(0));

        scheduler.schedule(layer.clone(), Snapshot::new(Vec::new()), apply.clone());
        tokio::time::sleep(ms(400)).await;
        scheduler.schedule(layer.clone(), Snapshot::new(Vec::new()), apply.clone());

        // Window opened at t=0 closes at t=500 despite the request at t=400.
        tokio::time::sleep(ms(150)).await;
        assert_eq!(recorder.applied.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_in_flight_per_layer() {
        let scheduler = UpdateScheduler::new(ms(500));
        let layer = LayerId::new("subscribers");
        let (apply, recorder) = recording_apply(ms(2000));

        let a = Snapshot::new(Vec::new());
        let b = Snapshot::new(Vec::new());
        let c = Snapshot::new(Vec::new());

        scheduler.schedule(layer.clone(), a.clone(), apply.clone());
        tokio::time::sleep(ms(600)).await;
        assert!(scheduler.is_in_flight(&layer));

        scheduler.schedule(layer.clone(), b, apply.clone());
        tokio::time::sleep(ms(100)).await;
        scheduler.schedule(layer.clone(), c.clone(), apply.clone());

        tokio::time::sleep(ms(10_000)).await;
        assert_eq!(*recorder.applied.lock(), vec![a.sequence(), c.sequence()]);
        assert_eq!(recorder.max_running.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_in_flight(&layer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_layers_are_independent() {
        let scheduler = UpdateScheduler::new(ms(500));
        let (apply, recorder) = recording_apply(ms(1000));

        scheduler.schedule(LayerId::new("a"), Snapshot::new(Vec::new()), apply.clone());
        scheduler.schedule(LayerId::new("b"), Snapshot::new(Vec::new()), apply.clone());

        tokio::time::sleep(ms(3000)).await;
        assert_eq!(recorder.applied.lock().len(), 2);
        assert_eq!(recorder.max_running.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_window_closes() {
        let scheduler = UpdateScheduler::new(ms(500));
        let layer = LayerId::new("outages");
        let (apply, recorder) = recording_apply(ms(0));

        scheduler.schedule(layer.clone(), Snapshot::new(Vec::new()), apply);
        assert!(scheduler.cancel(&layer));
        assert!(!scheduler.is_pending(&layer));

        tokio::time::sleep(ms(2000)).await;
        assert!(recorder.applied.lock().is_empty());
        assert!(!scheduler.cancel(&layer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_in_flight_drops_queued_request() {
        let scheduler = UpdateScheduler::new(ms(100));
        let layer = LayerId::new("outages");
        let (apply, recorder) = recording_apply(ms(1000));

        let first = Snapshot::new(Vec::new());
        scheduler.schedule(layer.clone(), first.clone(), apply.clone());
        tokio::time::sleep(ms(200)).await;
        scheduler.schedule(layer.clone(), Snapshot::new(Vec::new()), apply.clone());

        assert!(scheduler.cancel(&layer));
        assert!(scheduler.is_in_flight(&layer));

        tokio::time::sleep(ms(5000)).await;
        assert_eq!(*recorder.applied.lock(), vec![first.sequence()]);
        assert!(!scheduler.is_in_flight(&layer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_after_cancel_gets_fresh_epoch() {
        let scheduler = UpdateScheduler::new(ms(500));
        let layer = LayerId::new("outages");
        let (apply, recorder) = recording_apply(ms(0));

        scheduler.schedule(layer.clone(), Snapshot::new(Vec::new()), apply.clone());
        let cancelled = scheduler.slots.lock()[&layer].epoch;
        assert!(scheduler.cancel(&layer));

        tokio::time::sleep(ms(300)).await;
        let second = Snapshot::new(Vec::new());
        scheduler.schedule(layer.clone(), second.clone(), apply);
        assert_ne!(scheduler.slots.lock()[&layer].epoch, cancelled);

        tokio::time::sleep(ms(400)).await;
        assert!(recorder.applied.lock().is_empty());
        tokio::time::sleep(ms(200)).await;
        assert_eq!(*recorder.applied.lock(), vec![second.sequence()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_debounce() {
        let scheduler = UpdateScheduler::new(ms(500));
        let layer = LayerId::new("vehicles");
        scheduler.set_debounce(&layer, ms(50));
        let (apply, recorder) = recording_apply(ms(0));

        scheduler.schedule(layer.clone(), Snapshot::new(Vec::new()), apply);
        tokio::time::sleep(ms(60)).await;
        assert_eq!(recorder.applied.lock().len(), 1);
    }
}
