//! Structural candidate filters and the watchdog.
//!
//! Filters are cheap checks applied before scoring. A failing candidate
//! is dropped without error. The watchdog runs last and vetoes
//! configurations an operator has declared known-bad; vetoes are logged
//! and reported so they show up in the system event stream.

use std::collections::HashSet;

use tracing::warn;

use strata_core::config::WatchdogRule;
use strata_core::{Blueprint, Engine, EngineSet, Workload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Every table has at least one location.
    Placement,
    /// Every read-only query's tables share an engine.
    JointLocation,
    /// Tables written by transactions keep a copy on OLTP.
    TransactionalPlacement,
    /// No table sits on an engine with zero nodes.
    Capacity,
}

impl Filter {
    pub const ALL: [Filter; 4] = [
        Filter::Placement,
        Filter::JointLocation,
        Filter::TransactionalPlacement,
        Filter::Capacity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Filter::Placement => "placement",
            Filter::JointLocation => "joint_location",
            Filter::TransactionalPlacement => "transactional_placement",
            Filter::Capacity => "capacity",
        }
    }

    pub fn is_valid(self, bp: &Blueprint, workload: &Workload) -> bool {
        match self {
            Filter::Placement => bp.tables().iter().all(|t| !t.locations.is_empty()),
            Filter::JointLocation => workload.analytical().all(|template| {
                let common = template
                    .query
                    .tables
                    .iter()
                    .filter_map(|name| bp.table_locations(name))
                    .fold(EngineSet::all(), EngineSet::intersection);
                !common.is_empty()
            }),
            Filter::TransactionalPlacement => {
                let written: HashSet<&str> = workload
                    .transactional()
                    .flat_map(|t| t.query.tables.iter().map(String::as_str))
                    .collect();
                bp.tables()
                    .iter()
                    .filter(|t| t.transactional || written.contains(t.name.as_str()))
                    .all(|t| t.locations.contains(Engine::Oltp))
            }
            Filter::Capacity => bp
                .tables()
                .iter()
                .all(|t| t.locations.iter().all(|e| bp.engine_has_capacity(e))),
        }
    }
}

/// Safety net for specific known-bad blueprints.
#[derive(Debug, Clone, Default)]
pub struct Watchdog {
    rules: Vec<WatchdogRule>,
}

impl Watchdog {
    pub fn new(rules: Vec<WatchdogRule>) -> Self {
        Self { rules }
    }

    /// Reason for vetoing `bp`, if any rule fires.
    pub fn check(&self, bp: &Blueprint) -> Option<String> {
        self.rules.iter().find_map(|rule| match rule {
            WatchdogRule::ForbidEngine { table, engine } => bp
                .table_locations(table)
                .filter(|locs| locs.contains(*engine))
                .map(|_| format!("table {table} must not be placed on {engine}")),
            WatchdogRule::Anchor { table, engine } => bp
                .table_locations(table)
                .filter(|locs| !locs.contains(*engine))
                .map(|_| format!("table {table} must stay on {engine}")),
        })
    }
}

/// Outcome of running a candidate through the filter chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Pruned(&'static str),
    Vetoed(String),
}

#[derive(Debug, Clone)]
pub struct FilterChain {
    filters: Vec<Filter>,
    watchdog: Watchdog,
}

impl FilterChain {
    pub fn new(watchdog: Watchdog) -> Self {
        Self {
            filters: Filter::ALL.to_vec(),
            watchdog,
        }
    }

    pub fn check(&self, bp: &Blueprint, workload: &Workload) -> Verdict {
        if let Some(failed) = self.filters.iter().find(|f| !f.is_valid(bp, workload)) {
            return Verdict::Pruned(failed.name());
        }
        match self.watchdog.check(bp) {
            Some(reason) => {
                warn!(schema = bp.schema_name(), %reason, "watchdog vetoed candidate");
                Verdict::Vetoed(reason)
            }
            None => Verdict::Pass,
        }
    }
}
