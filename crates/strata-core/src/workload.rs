//! Workload descriptors handed to the planner and the router.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::Engine;

/// Opaque query descriptor produced by the SQL front end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryRep {
    /// Stable identifier of the normalized query text.
    pub fingerprint: String,
    /// Referenced table names. May include names that are not schema
    /// tables (CTE aliases and the like).
    pub tables: Vec<String>,
    /// DML or transaction-boundary statement.
    #[serde(default)]
    pub transactional: bool,
}

impl QueryRep {
    pub fn read_only(fingerprint: &str, tables: &[&str]) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            tables: tables.iter().map(|t| t.to_string()).collect(),
            transactional: false,
        }
    }

    pub fn transactional(fingerprint: &str, tables: &[&str]) -> Self {
        Self {
            transactional: true,
            ..Self::read_only(fingerprint, tables)
        }
    }
}

/// A recurring query with externally attached predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTemplate {
    pub query: QueryRep,
    /// Expected executions per hour.
    pub arrivals_per_hour: f64,
    /// Latency in seconds measured at the base provisioning of each engine.
    #[serde(default)]
    pub predicted_latency_s: BTreeMap<Engine, f64>,
    /// Data scanned in MB when run on each engine.
    #[serde(default)]
    pub predicted_scan_mb: BTreeMap<Engine, f64>,
}

impl QueryTemplate {
    pub fn new(query: QueryRep, arrivals_per_hour: f64) -> Self {
        Self {
            query,
            arrivals_per_hour,
            predicted_latency_s: BTreeMap::new(),
            predicted_scan_mb: BTreeMap::new(),
        }
    }

    pub fn with_latency(mut self, engine: Engine, seconds: f64) -> Self {
        self.predicted_latency_s.insert(engine, seconds);
        self
    }

    pub fn with_scan_mb(mut self, engine: Engine, mb: f64) -> Self {
        self.predicted_scan_mb.insert(engine, mb);
        self
    }
}

/// Everything the planner knows about the upcoming workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub templates: Vec<QueryTemplate>,
    /// Transactions per second hitting the OLTP engine.
    #[serde(default)]
    pub txn_arrivals_per_s: f64,
    /// Mean transaction service time at the base OLTP provisioning.
    #[serde(default)]
    pub txn_service_time_s: f64,
    #[serde(default)]
    pub table_sizes_mb: BTreeMap<String, f64>,
}

impl Workload {
    /// Read-only templates, the ones routed across engines.
    pub fn analytical(&self) -> impl Iterator<Item = &QueryTemplate> {
        self.templates.iter().filter(|t| !t.query.transactional)
    }

    pub fn transactional(&self) -> impl Iterator<Item = &QueryTemplate> {
        self.templates.iter().filter(|t| t.query.transactional)
    }

    /// Number of templates referencing each table.
    pub fn table_reference_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for template in &self.templates {
            for table in &template.query.tables {
                *counts.entry(table.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn table_size_mb(&self, table: &str) -> f64 {
        self.table_sizes_mb.get(table).copied().unwrap_or(0.0)
    }
}

/// Live metric values the scorer and comparators need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanningMetrics {
    pub query_p95_latency_s: f64,
    pub txn_p90_latency_s: f64,
    pub variable_cost_per_hour: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_counts() {
        let workload = Workload {
            templates: vec![
                QueryTemplate::new(QueryRep::read_only("q1", &["a", "b"]), 10.0),
                QueryTemplate::new(QueryRep::read_only("q2", &["a"]), 5.0),
                QueryTemplate::new(QueryRep::transactional("t1", &["b"]), 100.0),
            ],
            ..Workload::default()
        };
        let counts = workload.table_reference_counts();
        assert_eq!(counts["a"], 2);
        assert_eq!(counts["b"], 2);
        assert_eq!(workload.analytical().count(), 2);
        assert_eq!(workload.transactional().count(), 1);
    }
}
