//! Timer-driven background refresh
//!
//! One Poller owns at most one spawned loop. The loop ends when `stop` is
//! called or when the parent cancellation token fires. A refresh that is
//! already running when either happens is allowed to finish.

use nudge_api::Result;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Poller {
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl Poller {
    /// A zero interval falls back to [`DEFAULT_POLL_INTERVAL`].
    pub fn new(interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            interval
        };
        Self {
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Spawns the tick loop. The first tick fires one interval from now.
    ///
    /// Does nothing while a loop started earlier is still alive. Must be
    /// called from within a tokio runtime.
    pub fn start<F, Fut>(&self, parent: &CancellationToken, refresh: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut running = self.lock();
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() && !current.cancel.is_cancelled() {
                debug!("[Poller] start ignored, already running");
                return;
            }
        }

        let cancel = parent.child_token();
        let interval = self.interval;
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = loop_cancel.cancelled() => {
                        info!("[Poller] Stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        debug!("[Poller] Tick");
                        if let Err(e) = refresh().await {
                            warn!(error = %e, kind = e.kind(), "[Poller] Refresh failed");
                        }
                    }
                }
            }
        });

        info!("[Poller] Started with interval {:?}", interval);
        *running = Some(Running { cancel, handle });
    }

    /// Cancels the loop. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(running) = self.lock().take() {
            running.cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|r| !r.handle.is_finished() && !r.cancel.is_cancelled())
            .unwrap_or(false)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}
