//! Progress Reporter - Throughput and ETA for a running batch

use chrono::{DateTime, Utc};
use mailblast_common::config::{DispatchConfig, TierThresholds};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Discrete throughput band shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTier {
    Idle,
    Slow,
    Moderate,
    Fast,
    Excellent,
}

impl PerformanceTier {
    pub fn from_throughput(per_sec: f64, thresholds: &TierThresholds) -> Self {
        if per_sec <= 0.0 {
            PerformanceTier::Idle
        } else if per_sec >= thresholds.excellent {
            PerformanceTier::Excellent
        } else if per_sec >= thresholds.fast {
            PerformanceTier::Fast
        } else if per_sec >= thresholds.moderate {
            PerformanceTier::Moderate
        } else {
            PerformanceTier::Slow
        }
    }
}

/// Snapshot of a run in progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub current_throughput_per_sec: f64,
    pub peak_throughput_per_sec: f64,
    /// `None` while throughput is zero
    pub estimated_ms_remaining: Option<u64>,
    pub tier: PerformanceTier,
    pub started_at: DateTime<Utc>,
    pub finished: bool,
}

impl RunProgress {
    /// Snapshot of a run that has not completed any job yet
    pub fn initial(total_jobs: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            total_jobs,
            completed_jobs: 0,
            succeeded_jobs: 0,
            failed_jobs: 0,
            current_throughput_per_sec: 0.0,
            peak_throughput_per_sec: 0.0,
            estimated_ms_remaining: if total_jobs == 0 { Some(0) } else { None },
            tier: PerformanceTier::Idle,
            started_at,
            finished: false,
        }
    }
}

/// Turns the outcome stream into rate-limited progress snapshots
pub struct ProgressTracker {
    total: usize,
    completed: usize,
    succeeded: usize,
    failed: usize,
    /// `(instant, cumulative completed)`; the front sample is the window baseline
    samples: VecDeque<(Instant, usize)>,
    window: Duration,
    publish_interval: Duration,
    last_published: Option<Instant>,
    current: f64,
    peak: f64,
    thresholds: TierThresholds,
    started_at: DateTime<Utc>,
}

impl ProgressTracker {
    pub fn new(total: usize, config: &DispatchConfig, now: Instant, started_at: DateTime<Utc>) -> Self {
        let mut samples = VecDeque::new();
        samples.push_back((now, 0));

        Self {
            total,
            completed: 0,
            succeeded: 0,
            failed: 0,
            samples,
            window: Duration::from_millis(config.throughput_window_ms.max(1)),
            publish_interval: Duration::from_millis(config.progress_interval_ms),
            last_published: None,
            current: 0.0,
            peak: 0.0,
            thresholds: config.tiers,
            started_at,
        }
    }

    /// Account for one terminal outcome.
    ///
    /// Returns a snapshot when one is due: at most one per publish interval,
    /// and always for the final job.
    pub fn record(&mut self, success: bool, now: Instant) -> Option<RunProgress> {
        self.completed += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }

        self.samples.push_back((now, self.completed));
        while self.samples.len() > 1 && self.samples[1].0 + self.window <= now {
            self.samples.pop_front();
        }

        self.current = match self.samples.front() {
            Some((since, baseline)) if now > *since => {
                let elapsed = (now - *since).as_secs_f64();
                (self.completed - baseline) as f64 / elapsed
            }
            _ => 0.0,
        };
        self.peak = self.peak.max(self.current);

        let due = match self.last_published {
            None => true,
            Some(last) => now.duration_since(last) >= self.publish_interval,
        };
        if due || self.completed >= self.total {
            self.last_published = Some(now);
            Some(self.snapshot())
        } else {
            None
        }
    }

    /// Current state, regardless of the publish interval
    pub fn snapshot(&self) -> RunProgress {
        let remaining = self.total.saturating_sub(self.completed);
        let estimated_ms_remaining = if remaining == 0 {
            Some(0)
        } else if self.current > 0.0 {
            Some((remaining as f64 / self.current * 1000.0).max(0.0).round() as u64)
        } else {
            None
        };

        RunProgress {
            total_jobs: self.total,
            completed_jobs: self.completed,
            succeeded_jobs: self.succeeded,
            failed_jobs: self.failed,
            current_throughput_per_sec: round2(self.current),
            peak_throughput_per_sec: round2(self.peak),
            estimated_ms_remaining,
            tier: PerformanceTier::from_throughput(self.current, &self.thresholds),
            started_at: self.started_at,
            finished: false,
        }
    }

    /// Final snapshot once the run is over
    pub fn finish(&self) -> RunProgress {
        RunProgress {
            finished: true,
            ..self.snapshot()
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(total: usize, start: Instant) -> ProgressTracker {
        ProgressTracker::new(total, &DispatchConfig::default(), start, Utc::now())
    }

    #[tokio::test(start_paused = true)]
    async fn test_throughput_and_eta() {
        let start = Instant::now();
        let mut tracker = tracker(20, start);

        // Ten completions over two seconds: 5 per second
        for i in 1..=10u64 {
            tracker.record(true, start + Duration::from_millis(200 * i));
        }
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.completed_jobs, 10);
        assert_eq!(snapshot.current_throughput_per_sec, 5.0);
        assert_eq!(snapshot.estimated_ms_remaining, Some(2_000));
        assert_eq!(snapshot.tier, PerformanceTier::Fast);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_is_rate_limited() {
        let start = Instant::now();
        let mut tracker = tracker(100, start);

        let mut published = 0;
        for i in 1..=50u64 {
            if tracker.record(true, start + Duration::from_millis(20 * i)).is_some() {
                published += 1;
            }
        }
        // 1 second of outcomes at a 500ms interval
        assert!(published <= 3, "published {} snapshots", published);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_outcome_always_published() {
        let start = Instant::now();
        let mut tracker = tracker(2, start);

        assert!(tracker.record(true, start + Duration::from_millis(10)).is_some());
        let last = tracker
            .record(false, start + Duration::from_millis(20))
            .expect("final snapshot");
        assert_eq!(last.completed_jobs, 2);
        assert_eq!(last.failed_jobs, 1);
        assert_eq!(last.estimated_ms_remaining, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peak_is_monotonic_and_no_division_by_zero() {
        let start = Instant::now();
        let mut tracker = tracker(10, start);

        // Completion at the very start instant: zero elapsed time
        tracker.record(true, start);
        assert_eq!(tracker.snapshot().current_throughput_per_sec, 0.0);
        assert_eq!(tracker.snapshot().estimated_ms_remaining, None);

        let mut peak = 0.0;
        for (i, gap) in [100u64, 100, 2_000, 4_000, 8_000].iter().enumerate() {
            let at = start + Duration::from_millis(gap * (i as u64 + 1));
            tracker.record(true, at);
            let snapshot = tracker.snapshot();
            assert!(snapshot.peak_throughput_per_sec >= peak);
            assert!(snapshot.current_throughput_per_sec <= snapshot.peak_throughput_per_sec);
            peak = snapshot.peak_throughput_per_sec;
        }
    }

    #[test]
    fn test_tiers() {
        let thresholds = TierThresholds::default();
        assert_eq!(PerformanceTier::from_throughput(0.0, &thresholds), PerformanceTier::Idle);
        assert_eq!(PerformanceTier::from_throughput(0.5, &thresholds), PerformanceTier::Slow);
        assert_eq!(PerformanceTier::from_throughput(1.0, &thresholds), PerformanceTier::Moderate);
        assert_eq!(PerformanceTier::from_throughput(7.0, &thresholds), PerformanceTier::Fast);
        assert_eq!(PerformanceTier::from_throughput(25.0, &thresholds), PerformanceTier::Excellent);
    }
}
