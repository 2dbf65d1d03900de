//! Prometheus metrics for the dispatch engine

use crate::dispatch::DeliveryOutcome;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Dispatch metrics, registered in their own registry
pub struct DispatchMetrics {
    registry: Registry,
    outcomes: IntCounterVec,
    send_attempts: IntCounter,
    runs: IntCounterVec,
    inflight_sends: IntGauge,
    send_duration: Histogram,
}

impl DispatchMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let outcomes = IntCounterVec::new(
            Opts::new("mailblast_outcomes_total", "Terminal delivery outcomes"),
            &["status", "error_kind"],
        )?;
        let send_attempts = IntCounter::new(
            "mailblast_send_attempts_total",
            "SMTP send attempts, including retries",
        )?;
        let runs = IntCounterVec::new(
            Opts::new("mailblast_runs_total", "Dispatch runs by lifecycle state"),
            &["state"],
        )?;
        let inflight_sends = IntGauge::new(
            "mailblast_inflight_sends",
            "SMTP sends currently in flight",
        )?;
        let send_duration = Histogram::with_opts(
            HistogramOpts::new(
                "mailblast_send_duration_seconds",
                "Duration of a single SMTP send attempt",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;

        registry.register(Box::new(outcomes.clone()))?;
        registry.register(Box::new(send_attempts.clone()))?;
        registry.register(Box::new(runs.clone()))?;
        registry.register(Box::new(inflight_sends.clone()))?;
        registry.register(Box::new(send_duration.clone()))?;

        Ok(Self {
            registry,
            outcomes,
            send_attempts,
            runs,
            inflight_sends,
            send_duration,
        })
    }

    pub fn observe_outcome(&self, outcome: &DeliveryOutcome) {
        let kind = outcome.error_kind.map(|k| k.as_str()).unwrap_or("none");
        self.outcomes
            .with_label_values(&[outcome.status.as_str(), kind])
            .inc();
    }

    /// Record the start of a send attempt; the guard tracks in-flight count and duration
    pub fn attempt_started(&self) -> AttemptGuard<'_> {
        self.send_attempts.inc();
        self.inflight_sends.inc();
        AttemptGuard {
            metrics: self,
            timer: Some(self.send_duration.start_timer()),
        }
    }

    pub fn run_state(&self, state: &str) {
        self.runs.with_label_values(&[state]).inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Open send attempt
pub struct AttemptGuard<'a> {
    metrics: &'a DispatchMetrics,
    timer: Option<prometheus::HistogramTimer>,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.metrics.inflight_sends.dec();
        if let Some(timer) = self.timer.take() {
            timer.observe_duration();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_metrics() {
        let metrics = DispatchMetrics::new().unwrap();
        metrics.run_state("started");
        {
            let _attempt = metrics.attempt_started();
            assert_eq!(metrics.inflight_sends.get(), 1);
        }
        assert_eq!(metrics.inflight_sends.get(), 0);
        assert_eq!(metrics.send_attempts.get(), 1);

        let text = metrics.render();
        assert!(text.contains("mailblast_runs_total{state=\"started\"} 1"));
        assert!(text.contains("mailblast_send_attempts_total 1"));
        assert!(text.contains("mailblast_send_duration_seconds_count 1"));
    }
}
