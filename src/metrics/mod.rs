//! Metrics module for Prometheus-based monitoring.
//!
//! Covers model calls, cache lookups and template outcomes.
//!
//! # Example
//!
//! ```ignore
//! use promptforge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! MetricsCollector::new().record_template_outcome("succeeded");
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{CacheOutcome, MetricsCollector};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    CACHE_LOOKUPS_TOTAL, PROMPT_CALLS_TOTAL, PROMPT_LATENCY, REGISTRY, TEMPLATE_ATTEMPTS_TOTAL,
    TEMPLATE_OUTCOMES_TOTAL,
};
