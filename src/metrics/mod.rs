//! Metrics collection and exposition.

pub mod collector;
pub mod prometheus;

pub use collector::{MetricsCollector, MetricsSnapshot};
pub use prometheus::PrometheusExporter;
