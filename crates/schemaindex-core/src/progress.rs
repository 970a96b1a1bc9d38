//! Progress and lag estimation.
//!
//! The sync loop samples `(local checkpoint, head checkpoint)` on a fixed
//! wall-clock interval. The first sample only sets a baseline; every later
//! sample yields a [`ProgressReport`] with a rate derived from the checkpoint
//! delta since the previous sample.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

/// One progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Checkpoint of the last committed transaction.
    pub current: u64,
    /// Latest checkpoint known to the ledger.
    pub head: u64,
    /// `current / head` as a percentage, capped at 100.
    pub percent: f64,
    /// Checkpoints ingested per second since the previous sample.
    pub rate: f64,
    /// Estimated seconds until `current` reaches `head`; `None` while the
    /// rate is zero.
    pub eta_secs: Option<f64>,
}

impl ProgressReport {
    pub fn lag(&self) -> u64 {
        self.head.saturating_sub(self.current)
    }

    /// Returns `true` if the report is within 0.1 % of the head.
    pub fn is_caught_up(&self) -> bool {
        self.percent >= 99.9
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    local: u64,
}

/// Interval-driven progress estimator.
#[derive(Debug)]
pub struct ProgressEstimator {
    interval: Duration,
    previous: Option<Sample>,
    last_report: Option<ProgressReport>,
}

impl ProgressEstimator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            previous: None,
            last_report: None,
        }
    }

    /// Returns `true` if a sample should be taken at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.previous {
            None => true,
            Some(prev) => now.saturating_duration_since(prev.at) >= self.interval,
        }
    }

    /// Record a sample. Returns a report for every sample after the baseline.
    pub fn sample(&mut self, local: u64, head: u64, now: Instant) -> Option<ProgressReport> {
        let current = Sample { at: now, local };
        let Some(prev) = self.previous.replace(current) else {
            info!(checkpoint = local, head, "progress baseline recorded");
            return None;
        };

        let elapsed = now.saturating_duration_since(prev.at).as_secs_f64();
        let rate = if elapsed > 0.0 {
            local.saturating_sub(prev.local) as f64 / elapsed
        } else {
            0.0
        };
        let remaining = head.saturating_sub(local);
        let eta_secs = (rate > 0.0).then(|| remaining as f64 / rate);
        let percent = if head == 0 {
            100.0
        } else {
            (local as f64 / head as f64 * 100.0).min(100.0)
        };

        let report = ProgressReport {
            current: local,
            head,
            percent,
            rate,
            eta_secs,
        };
        info!(
            current = report.current,
            head = report.head,
            percent = format_args!("{:.2}", report.percent),
            rate = format_args!("{:.2}", report.rate),
            eta_secs = ?report.eta_secs.map(|s| s.round() as u64),
            "sync progress"
        );
        self.last_report = Some(report.clone());
        Some(report)
    }

    /// The most recent report, if any.
    pub fn last_report(&self) -> Option<&ProgressReport> {
        self.last_report.as_ref()
    }
}
