//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by promptforge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{CounterVec, Encoder, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all promptforge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total model calls, labeled by model variant and status.
pub static PROMPT_CALLS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Model call latency in seconds, labeled by model variant.
pub static PROMPT_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Cache lookups, labeled by outcome (hit, miss, join).
pub static CACHE_LOOKUPS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Finished templates, labeled by status (succeeded, failed, skipped).
pub static TEMPLATE_OUTCOMES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Template execution attempts, labeled by template kind.
pub static TEMPLATE_ATTEMPTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric definition is rejected.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let prompt_calls_total = CounterVec::new(
        Opts::new("promptforge_prompt_calls_total", "Total model calls"),
        &["variant", "status"],
    )?;

    let prompt_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "promptforge_prompt_latency_seconds",
            "Model call latency in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["variant"],
    )?;

    let cache_lookups_total = CounterVec::new(
        Opts::new("promptforge_cache_lookups_total", "Prompt cache lookups"),
        &["outcome"],
    )?;

    let template_outcomes_total = CounterVec::new(
        Opts::new("promptforge_template_outcomes_total", "Finished templates"),
        &["status"],
    )?;

    let template_attempts_total = CounterVec::new(
        Opts::new("promptforge_template_attempts_total", "Template execution attempts"),
        &["kind"],
    )?;

    registry.register(Box::new(prompt_calls_total.clone()))?;
    registry.register(Box::new(prompt_latency.clone()))?;
    registry.register(Box::new(cache_lookups_total.clone()))?;
    registry.register(Box::new(template_outcomes_total.clone()))?;
    registry.register(Box::new(template_attempts_total.clone()))?;

    // A concurrent initializer may win the race; its registry is kept.
    let _ = REGISTRY.set(registry);
    let _ = PROMPT_CALLS_TOTAL.set(prompt_calls_total);
    let _ = PROMPT_LATENCY.set(prompt_latency);
    let _ = CACHE_LOOKUPS_TOTAL.set(cache_lookups_total);
    let _ = TEMPLATE_OUTCOMES_TOTAL.set(template_outcomes_total);
    let _ = TEMPLATE_ATTEMPTS_TOTAL.set(template_attempts_total);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_recording() {
        init_metrics().unwrap();
        if let Some(calls) = PROMPT_CALLS_TOTAL.get() {
            calls.with_label_values(&["CHAT", "success"]).inc();
        }
        let text = export_metrics();
        assert!(!text.starts_with("# Error"));
        assert!(text.contains("promptforge_prompt_calls_total"));
    }
}
