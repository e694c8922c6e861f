//! Passive health monitor for the block scheduler.
//!
//! The scheduler reports every cycle outcome here; external health checks
//! read the derived status via [`HealthMonitor::report`]. The monitor never
//! acts on what it sees: crossing the alert threshold logs at `error`
//! level but does not stop the scheduler.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::error;

use ember_core::constants::{DEGRADED_FAILURE_THRESHOLD, STALENESS_WINDOW_SECS};

/// Derived health status.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Snapshot of the monitor's state, shaped for the admin layer.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

struct HealthState {
    last_success_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

/// Tracks the last successful cycle and the consecutive-failure streak.
///
/// Status is `Degraded` once the streak reaches
/// [`DEGRADED_FAILURE_THRESHOLD`] or no cycle has succeeded within the
/// staleness window. Before the first success, staleness is measured from
/// monitor creation so a freshly started engine is not born degraded.
pub struct HealthMonitor {
    alert_threshold: u32,
    started_at: DateTime<Utc>,
    state: Mutex<HealthState>,
}

impl HealthMonitor {
    pub fn new(alert_threshold: u32) -> Self {
        Self::new_at(alert_threshold, Utc::now())
    }

    /// Construct with an explicit start instant, for staleness tests.
    pub fn new_at(alert_threshold: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            alert_threshold,
            started_at,
            state: Mutex::new(HealthState {
                last_success_at: None,
                consecutive_failures: 0,
            }),
        }
    }

    /// Record a successful cycle: resets the streak, refreshes the timestamp.
    pub fn record_success(&self, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.last_success_at = Some(at);
        state.consecutive_failures = 0;
    }

    /// Record a failed cycle. Returns the new streak length.
    pub fn record_failure(&self) -> u32 {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        let streak = state.consecutive_failures;
        drop(state);

        if streak == self.alert_threshold {
            error!(
                consecutive_failures = streak,
                "block production failure streak reached alert threshold"
            );
        }
        streak
    }

    /// Current report, evaluated at wall-clock now.
    pub fn report(&self) -> HealthReport {
        self.report_at(Utc::now())
    }

    /// Report evaluated at an explicit instant, for staleness tests.
    pub fn report_at(&self, now: DateTime<Utc>) -> HealthReport {
        let state = self.state.lock();
        let freshness_anchor = state.last_success_at.unwrap_or(self.started_at);
        let stale = now - freshness_anchor > TimeDelta::seconds(STALENESS_WINDOW_SECS);

        let status = if state.consecutive_failures >= DEGRADED_FAILURE_THRESHOLD || stale {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            last_success_at: state.last_success_at,
            consecutive_failures: state.consecutive_failures,
        }
    }
}
