//! In-process counters exposed on the health endpoint.

pub mod metrics;

pub use metrics::{GatewayMetrics, MetricsSnapshot};
