//! Candidate scores.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Predicted cost and performance of one blueprint.
///
/// All fields stay finite: unbounded predictions are capped at
/// `f64::MAX` so recorded runs survive a JSON round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub provisioning_cost_per_hour: f64,
    pub variable_cost_per_hour: f64,
    pub query_p50_latency_s: f64,
    pub query_p95_latency_s: f64,
    pub txn_p90_latency_s: f64,
    pub transition_time_s: f64,
    pub transition_cost: f64,
    /// Named intermediate values, for humans.
    #[serde(default)]
    pub debug: BTreeMap<String, f64>,
}

impl Score {
    pub fn hourly_cost(&self) -> f64 {
        self.provisioning_cost_per_hour + self.variable_cost_per_hour
    }
}

/// Replace non-finite values with `f64::MAX`.
pub fn finite_or_max(value: f64) -> f64 {
    if value.is_finite() { value } else { f64::MAX }
}
