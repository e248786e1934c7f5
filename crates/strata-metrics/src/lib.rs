//! strata-metrics — rolling metric series consumed by triggers and the planner.

pub mod monitor;

pub use monitor::{
    InMemoryMonitor, Metric, MetricSample, MetricsSource, Monitor, planning_metrics,
};
