//! Candidate scoring.
//!
//! # Components
//!
//! - **Planning router**: sends each analytical template to the engine
//!   with the lowest predicted latency among those holding all its tables
//! - **Latency rescaling**: adjusts base-provisioning predictions to the
//!   candidate's resources
//! - **Transactional tail**: M/M/1 quantile of OLTP response time
//! - **Transition estimate**: time and money to move data and reprovision

use std::collections::BTreeMap;

use strata_core::config::ScoringConfig;
use strata_core::score::finite_or_max;
use strata_core::{Blueprint, Engine, EngineSet, QueryTemplate, Score, Workload};

/// Utilization clamp for the queueing model.
const UTILIZATION_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Score `candidate` as a successor of `current` under `workload`.
    pub fn score(&self, candidate: &Blueprint, current: &Blueprint, workload: &Workload) -> Score {
        let mut debug = BTreeMap::new();

        let mut samples = Vec::new();
        let mut variable_cost = 0.0;
        let mut routed = [0.0_f64; 3];
        for template in workload.analytical() {
            let (engine, latency) = match self.planned_route(candidate, template) {
                Some((engine, latency)) => (Some(engine), latency),
                None => (None, f64::INFINITY),
            };
            samples.push((latency, template.arrivals_per_hour));
            if let Some(engine) = engine {
                routed[engine.index()] += template.arrivals_per_hour;
                if engine == Engine::Serverless {
                    let scanned = template
                        .predicted_scan_mb
                        .get(&Engine::Serverless)
                        .copied()
                        .unwrap_or(0.0);
                    variable_cost +=
                        scanned * self.config.serverless_usd_per_mb * template.arrivals_per_hour;
                }
            }
        }
        for engine in Engine::ALL {
            debug.insert(format!("routed_per_hour.{engine}"), routed[engine.index()]);
        }

        let txn_p90 = self.txn_tail_latency(candidate, workload, &mut debug);
        let (transition_time, transition_cost) =
            self.transition_estimate(current, candidate, workload, &mut debug);

        Score {
            provisioning_cost_per_hour: finite_or_max(candidate.provisioning_cost()),
            variable_cost_per_hour: finite_or_max(variable_cost),
            query_p50_latency_s: finite_or_max(weighted_lower_quantile(&mut samples.clone(), 0.5)),
            query_p95_latency_s: finite_or_max(weighted_lower_quantile(&mut samples, 0.95)),
            txn_p90_latency_s: finite_or_max(txn_p90),
            transition_time_s: finite_or_max(transition_time),
            transition_cost: finite_or_max(transition_cost),
            debug: debug.into_iter().map(|(k, v)| (k, finite_or_max(v))).collect(),
        }
    }

    /// Engine the planning router sends `template` to, with its predicted
    /// latency. `None` when no engine with capacity holds every
    /// referenced table.
    ///
    /// A missing prediction counts as unbounded; ties go to the earlier
    /// engine.
    pub fn planned_route(&self, candidate: &Blueprint, template: &QueryTemplate) -> Option<(Engine, f64)> {
        let valid = template
            .query
            .tables
            .iter()
            .filter_map(|name| candidate.table_locations(name))
            .fold(EngineSet::all(), EngineSet::intersection);
        let mut best: Option<(Engine, f64)> = None;
        for engine in valid.iter().filter(|e| candidate.engine_has_capacity(*e)) {
            let base = template
                .predicted_latency_s
                .get(&engine)
                .copied()
                .unwrap_or(f64::INFINITY);
            let latency = self.rescaled_latency(candidate, engine, base);
            if best.is_none_or(|(_, l)| latency < l) {
                best = Some((engine, latency));
            }
        }
        best
    }

    /// `m·γ·α·(base_rv / cand_rv) + m·(1−γ)`. Serverless is not rescaled.
    pub fn rescaled_latency(&self, candidate: &Blueprint, engine: Engine, predicted: f64) -> f64 {
        let Some(scaling) = self.config.scaling(engine) else {
            return predicted;
        };
        let candidate_rv = candidate
            .provisioning(engine)
            .map(|p| p.resource_value())
            .unwrap_or(0.0);
        if candidate_rv <= 0.0 {
            return f64::INFINITY;
        }
        let base_rv = scaling.base.resource_value();
        predicted * scaling.gamma * scaling.alpha * (base_rv / candidate_rv)
            + predicted * (1.0 - scaling.gamma)
    }

    fn txn_tail_latency(
        &self,
        candidate: &Blueprint,
        workload: &Workload,
        debug: &mut BTreeMap<String, f64>,
    ) -> f64 {
        let arrivals = workload.txn_arrivals_per_s;
        if arrivals <= 0.0 {
            return 0.0;
        }
        let service = self.rescaled_latency(candidate, Engine::Oltp, workload.txn_service_time_s);
        if !service.is_finite() {
            return f64::INFINITY;
        }
        let utilization = (arrivals * service).clamp(UTILIZATION_EPSILON, 1.0 - UTILIZATION_EPSILON);
        debug.insert("txn_utilization".into(), utilization);
        debug.insert(
            "txn_expected_wait_s".into(),
            expected_wait(service, utilization, self.config.txn_alpha),
        );
        service + mm1_wait_quantile(service, utilization, self.config.txn_quantile)
    }

    /// Seconds and USD to move from `current` to `candidate`.
    fn transition_estimate(
        &self,
        current: &Blueprint,
        candidate: &Blueprint,
        workload: &Workload,
        debug: &mut BTreeMap<String, f64>,
    ) -> (f64, f64) {
        let diff = current.diff(candidate);
        let mut seconds = 0.0;
        let mut moved_mb = 0.0;
        for change in &diff.table_changes {
            let size = workload.table_size_mb(&change.name);
            for engine in change.added.iter() {
                let rate = self.config.load_rate_mb_per_s.get(engine);
                seconds += if rate > 0.0 { size / rate } else { f64::INFINITY };
                moved_mb += size;
            }
        }
        for change in &diff.provisioning_changes {
            seconds += self.config.provisioning_change_s.get(change.engine);
        }
        debug.insert("moved_mb".into(), moved_mb);
        (seconds, moved_mb * self.config.movement_usd_per_mb)
    }
}

/// Coarse expected queueing delay: `s·u/(1−u)·α`.
pub fn expected_wait(service_s: f64, utilization: f64, alpha: f64) -> f64 {
    service_s * utilization / (1.0 - utilization) * alpha
}

/// `q`-quantile of M/M/1 waiting time, floored at zero.
pub fn mm1_wait_quantile(service_s: f64, utilization: f64, q: f64) -> f64 {
    let wait = -service_s / (1.0 - utilization) * ((1.0 - q) / utilization).ln();
    wait.max(0.0)
}

/// Smallest value whose cumulative weight reaches `q` of the total.
/// Zero when there is no weight at all.
pub fn weighted_lower_quantile(samples: &mut [(f64, f64)], q: f64) -> f64 {
    let total: f64 = samples.iter().map(|(_, w)| w.max(0.0)).sum();
    if samples.is_empty() || total <= 0.0 {
        return 0.0;
    }
    samples.sort_by(|a, b| a.0.total_cmp(&b.0));
    let target = q * total;
    let mut cumulative = 0.0;
    for (value, weight) in samples.iter() {
        cumulative += weight.max(0.0);
        if cumulative >= target {
            return *value;
        }
    }
    samples[samples.len() - 1].0
}
