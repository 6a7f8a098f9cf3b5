use super::clock::Clock;
use super::store::CounterStore;
use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Background task that periodically deletes expired counters.
///
/// Started lazily, at most once per `Sweeper`. The task only holds a weak
/// reference to the store and exits on its own once the store is dropped,
/// so it never keeps the store (or the process) alive.
#[derive(Debug)]
pub struct Sweeper {
    period: Duration,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
    pub fn new(period: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            period,
            started: AtomicBool::new(false),
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the sweep task unless it already runs. Returns true only for the call that spawned it.
    ///
    /// Outside a tokio runtime nothing is spawned and a later call may try again.
    pub fn ensure_started(&self, store: &Arc<dyn CounterStore>, clock: &Arc<dyn Clock>) -> bool {
        if self.started.load(Ordering::Acquire) {
            return false;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No tokio runtime available, deferring counter sweeper start");
            return false;
        };

        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let store = Arc::downgrade(store);
        let clock = clock.clone();
        let shutdown = self.shutdown.subscribe();
        let handle = runtime.spawn(sweep_loop(store, clock, self.period, shutdown));

        if let Ok(mut slot) = self.handle.lock() {
            // A concurrent shutdown may have run before the handle was stored
            if *self.shutdown.borrow() {
                handle.abort();
                return false;
            }
            *slot = Some(handle);
        }

        info!(
            interval_secs = self.period.as_secs_f64(),
            "Started counter sweeper"
        );
        true
    }

    /// Whether the sweep task has been started and has not finished
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the sweep task. It is never restarted afterwards.
    pub fn shutdown(&self) {
        self.started.store(true, Ordering::Release);
        self.shutdown.send_replace(true);

        if let Ok(mut slot) = self.handle.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
                debug!("Stopped counter sweeper");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn sweep_loop(
    store: Weak<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    // Shutdown may already be signalled; `changed()` would not report it
    if *shutdown.borrow_and_update() {
        return;
    }

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let Some(store) = store.upgrade() else {
            debug!("Counter store dropped, stopping sweeper");
            break;
        };

        let removed = store.sweep(clock.now_ms());
        if removed > 0 {
            counter!("admission_swept_entries_total").increment(removed as u64);
            debug!(removed, remaining = store.len(), "Swept expired counters");
        }
    }
}
