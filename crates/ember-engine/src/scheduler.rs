//! The block-production scheduler: fixed-interval timer, concurrency guard,
//! and timeout watchdog.
//!
//! One [`Scheduler`] instance drives cycles sequentially. The guard is a
//! single atomic flag: a tick arriving while a cycle is in flight is skipped
//! outright (logged, not an error), and an admin-triggered
//! [`run_cycle_once`](Scheduler::run_cycle_once) respects the same flag.
//!
//! The watchdog bounds how long a stuck cycle can block future ticks. When
//! it fires, it force-clears the guard and moves on. It does not cancel the
//! underlying storage work, which may still commit later. That is safe for
//! numbering because the block number is claimed inside the commit
//! transaction itself; the late commit either takes the next number or
//! fails cleanly. The late result is reaped into the health monitor when it
//! eventually lands.
//!
//! Cycle errors never escape the timer loop: they are logged, folded into
//! the health monitor, and the next tick proceeds as scheduled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use ember_core::error::{CycleError, CyclePhase, StorageError};
use ember_core::reward::plan_block;
use ember_core::traits::LedgerStore;
use ember_core::types::Block;

use crate::config::EngineConfig;
use crate::health::{HealthMonitor, HealthReport};

/// How a single production cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A block was minted and all rewards committed.
    Committed(Block),
    /// The persisted pause flag was set; nothing was produced.
    SkippedPaused,
    /// No participant had nonzero boosted hashrate; no block row created.
    SkippedEmpty,
    /// Another cycle already held the guard; this invocation did nothing.
    SkippedBusy,
    /// The watchdog fired before the cycle finished. The underlying work
    /// was not cancelled and may still commit; its result is recorded in
    /// the health monitor when it lands.
    TimedOut,
}

/// Singleton driver of block production.
///
/// Cheap to clone; all state is shared behind `Arc`s. `start` spawns the
/// ticker task, `stop` cancels it without aborting an in-flight cycle.
pub struct Scheduler<S> {
    store: Arc<S>,
    health: Arc<HealthMonitor>,
    config: EngineConfig,
    guard: Arc<AtomicBool>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<S> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            health: Arc::clone(&self.health),
            config: self.config.clone(),
            guard: Arc::clone(&self.guard),
            ticker: Arc::clone(&self.ticker),
        }
    }
}

impl<S: LedgerStore + 'static> Scheduler<S> {
    pub fn new(store: Arc<S>, health: Arc<HealthMonitor>, config: EngineConfig) -> Self {
        Self {
            store,
            health,
            config,
            guard: Arc::new(AtomicBool::new(false)),
            ticker: Arc::new(Mutex::new(None)),
        }
    }

    /// Reconcile startup state and begin ticking.
    ///
    /// Reads the last persisted block number (the durable resume point),
    /// runs a full hashrate reconciliation pass, then spawns the interval
    /// loop. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), StorageError> {
        let last = self.store.last_block_number()?;
        let corrected = self.store.reconcile_hashrate()?;
        info!(
            last_block = last,
            reconciled = corrected,
            interval_secs = self.config.cycle_interval.as_secs(),
            "block scheduler starting"
        );

        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            warn!("scheduler already started; ignoring");
            return Ok(());
        }

        let this = self.clone();
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.cycle_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; consume it so the first
            // block lands one full interval after startup.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = this.run_cycle_once().await {
                    error!(error = %e, "block production cycle failed");
                }
            }
        }));
        Ok(())
    }

    /// Cancel the ticker. An in-flight cycle is not aborted; it finishes
    /// (or times out) on its own and still reports to the health monitor.
    pub fn stop(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
            info!("block scheduler stopped");
        }
    }

    /// Run one guarded production cycle.
    ///
    /// Used by the ticker and by the admin layer; both go through the same
    /// guard, so a manual invocation during a live cycle is a busy skip.
    /// Health bookkeeping happens here: any completed outcome counts as a
    /// success, storage errors count as failures, busy skips and watchdog
    /// timeouts touch nothing.
    pub async fn run_cycle_once(&self) -> Result<CycleOutcome, CycleError> {
        if self.guard.swap(true, Ordering::SeqCst) {
            debug!("production cycle already in flight; skipping tick");
            return Ok(CycleOutcome::SkippedBusy);
        }

        let store = Arc::clone(&self.store);
        let block_reward = self.config.block_reward;
        let mut cycle = tokio::task::spawn_blocking(move || execute_cycle(&*store, block_reward));

        match tokio::time::timeout(self.config.cycle_timeout, &mut cycle).await {
            Ok(joined) => {
                self.guard.store(false, Ordering::SeqCst);
                let result = match joined {
                    Ok(result) => result,
                    Err(join_err) => Err(CycleError::Panicked(join_err.to_string())),
                };
                match result {
                    Ok(outcome) => {
                        self.health.record_success(Utc::now());
                        Ok(outcome)
                    }
                    Err(e) => {
                        self.health.record_failure();
                        Err(e)
                    }
                }
            }
            Err(_elapsed) => {
                // Liveness valve: free the guard so future ticks can run.
                // The cycle itself keeps going; a reaper records how it ends.
                self.guard.store(false, Ordering::SeqCst);
                warn!(
                    timeout_secs = self.config.cycle_timeout.as_secs(),
                    "cycle watchdog fired; guard force-cleared, underlying work not cancelled"
                );
                let health = Arc::clone(&self.health);
                tokio::spawn(async move {
                    match cycle.await {
                        Ok(Ok(outcome)) => {
                            warn!(?outcome, "timed-out cycle completed after watchdog");
                            health.record_success(Utc::now());
                        }
                        Ok(Err(e)) => {
                            error!(error = %e, "timed-out cycle failed after watchdog");
                            health.record_failure();
                        }
                        Err(join_err) => {
                            error!(error = %join_err, "timed-out cycle panicked");
                            health.record_failure();
                        }
                    }
                });
                Ok(CycleOutcome::TimedOut)
            }
        }
    }

    /// On-demand drift correction, also run once at startup.
    ///
    /// Safe concurrently with a production cycle; it only corrects cached
    /// hashrate and takes no part in reward math.
    pub fn reconcile_hashrate(&self) -> Result<u64, StorageError> {
        let corrected = self.store.reconcile_hashrate()?;
        if corrected > 0 {
            info!(corrected, "hashrate reconciliation corrected cached totals");
        }
        Ok(corrected)
    }

    /// Current health report for external checks.
    pub fn health(&self) -> HealthReport {
        self.health.report()
    }
}

/// One unguarded production cycle: pause check, snapshot, reward math,
/// transactional commit. Runs on a blocking thread.
fn execute_cycle<S: LedgerStore>(store: &S, block_reward: f64) -> Result<CycleOutcome, CycleError> {
    let last = store
        .last_block_number()
        .map_err(|e| CycleError::storage(CyclePhase::Sequence, None, e))?;
    let attempted = Some(last + 1);

    if store
        .mining_paused()
        .map_err(|e| CycleError::storage(CyclePhase::PauseCheck, attempted, e))?
    {
        debug!("mining paused; skipping block production");
        return Ok(CycleOutcome::SkippedPaused);
    }

    let snapshot = store
        .snapshot_active_miners(Utc::now())
        .map_err(|e| CycleError::storage(CyclePhase::Snapshot, attempted, e))?;

    let Some(plan) = plan_block(&snapshot, block_reward) else {
        debug!("no active hashrate on the network; no block this cycle");
        return Ok(CycleOutcome::SkippedEmpty);
    };

    // Fresh "now" for the commit: the transaction's logical clock governs
    // boost expiry, not the snapshot's.
    let block = store
        .commit_block(&plan, Utc::now())
        .map_err(|e| CycleError::storage(CyclePhase::Commit, attempted, e))?;

    info!(
        number = block.number,
        miners = block.miner_count,
        total_hashrate = block.total_hashrate,
        distributed = plan.distributed_total(),
        "minted block"
    );
    Ok(CycleOutcome::Committed(block))
}
