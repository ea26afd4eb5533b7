//! Recording helpers over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`super::init_metrics`] has run, so library
//! users that never export metrics pay nothing beyond an `OnceLock` read.

use super::prometheus::{
    CACHE_LOOKUPS_TOTAL, PROMPT_CALLS_TOTAL, PROMPT_LATENCY, TEMPLATE_ATTEMPTS_TOTAL,
    TEMPLATE_OUTCOMES_TOTAL,
};

/// Outcome of one cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    /// The caller waited on a call already in flight for the same key.
    Join,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Join => "join",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one model call.
    ///
    /// # Arguments
    ///
    /// * `variant` - Model variant label (`CHAT`, `COMPLETION`, `EMBEDDING`)
    /// * `success` - Whether the call returned a result
    /// * `latency_secs` - Wall-clock duration of the call
    pub fn record_prompt_call(&self, variant: &str, success: bool, latency_secs: f64) {
        let status = if success { "success" } else { "failure" };

        if let Some(calls) = PROMPT_CALLS_TOTAL.get() {
            calls.with_label_values(&[variant, status]).inc();
        }
        if let Some(latency) = PROMPT_LATENCY.get() {
            latency.with_label_values(&[variant]).observe(latency_secs);
        }

        tracing::trace!(variant, status, latency_secs, "Recorded prompt call metric");
    }

    pub fn record_cache_lookup(&self, outcome: CacheOutcome) {
        if let Some(lookups) = CACHE_LOOKUPS_TOTAL.get() {
            lookups.with_label_values(&[outcome.as_str()]).inc();
        }
    }

    pub fn record_template_attempt(&self, kind: &str) {
        if let Some(attempts) = TEMPLATE_ATTEMPTS_TOTAL.get() {
            attempts.with_label_values(&[kind]).inc();
        }
    }

    pub fn record_template_outcome(&self, status: &str) {
        if let Some(outcomes) = TEMPLATE_OUTCOMES_TOTAL.get() {
            outcomes.with_label_values(&[status]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_recording_is_visible_in_export() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();
        collector.record_cache_lookup(CacheOutcome::Join);
        collector.record_template_outcome("skipped");
        collector.record_template_attempt("PROMPT_TEMPLATE");
        collector.record_prompt_call("COMPLETION", false, 0.2);

        let text = export_metrics();
        assert!(text.contains("promptforge_cache_lookups_total{outcome=\"join\"}"));
        assert!(text.contains("promptforge_template_outcomes_total{status=\"skipped\"}"));
        assert!(text.contains("promptforge_prompt_latency_seconds"));
    }

    #[test]
    fn test_recording_before_init_does_not_panic() {
        MetricsCollector::new().record_template_outcome("succeeded");
    }
}
