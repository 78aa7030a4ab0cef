//! Lifecycle sweeper: periodic expiry and retention purge.
//!
//! Each cycle runs two independent steps. A failing step is logged and
//! retried on the next cycle; it never stops the loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveTime, Utc, Weekday};
use rconq_core::Clock;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cache::PendingCache;
use crate::store::CommandStore;

/// Most recent business day before `now`, at 00:00 UTC.
///
/// Monday and Sunday go back to Friday; every other day goes back one day.
pub fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_back = match now.weekday() {
        Weekday::Sun => 2,
        Weekday::Mon => 3,
        _ => 1,
    };
    let day = now.date_naive() - Days::new(days_back);
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Outcome of one sweeper cycle. A failed step reports `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: Option<u64>,
    pub purged: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweeperStats {
    pub cycles: u64,
    pub expired_total: u64,
    pub purged_total: u64,
    pub failed_steps: u64,
}

pub struct LifecycleSweeper {
    store: Arc<dyn CommandStore>,
    cache: Arc<PendingCache>,
    clock: Arc<dyn Clock>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl LifecycleSweeper {
    pub fn new(store: Arc<dyn CommandStore>, cache: Arc<PendingCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache,
            clock,
            stats: Arc::new(Mutex::new(SweeperStats::default())),
        }
    }

    pub fn stats(&self) -> SweeperStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run one expire + purge cycle.
    pub async fn run_once(&self) -> SweepReport {
        let now = self.clock.now();

        let expired = match self.store.expire_overdue(now).await {
            Ok(n) => {
                if n > 0 {
                    self.cache.clear();
                    info!(expired = n, "expired commands");
                }
                Some(n)
            }
            Err(err) => {
                error!(error = %err, "error expiring commands");
                None
            }
        };

        let cutoff = retention_cutoff(now);
        let purged = match self.store.purge_before(cutoff).await {
            Ok(n) => {
                if n > 0 {
                    info!(purged = n, cutoff = %cutoff, "purged old commands");
                }
                Some(n)
            }
            Err(err) => {
                error!(error = %err, cutoff = %cutoff, "error purging old commands");
                None
            }
        };

        let report = SweepReport { expired, purged };
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.cycles += 1;
        stats.expired_total += expired.unwrap_or(0);
        stats.purged_total += purged.unwrap_or(0);
        stats.failed_steps += u64::from(expired.is_none()) + u64::from(purged.is_none());
        report
    }

    /// Run a cycle now and then every `interval` until shut down.
    pub fn spawn(self, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let stats = self.stats.clone();

        let join = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "cleanup job started");
            // The first tick completes immediately.
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
            info!("cleanup job stopped");
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
            stats,
        }
    }
}

pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    /// Stop the loop and wait for an in-flight cycle to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                error!(error = %err, "cleanup job panicked");
            }
        }
    }

    pub fn stats(&self) -> SweeperStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}
