//! Blueprint comparators and the acceptance decision.
//!
//! A comparator splits candidates into feasible and infeasible by latency
//! ceilings, then orders them by an objective. `Ceiling` minimizes hourly
//! cost. `BenefitHorizon` amortizes the transition over a fixed horizon
//! and charges the current blueprint a penalty while it runs close to its
//! ceilings.

use std::cmp::Ordering;

use strata_core::config::{ComparatorConfig, ComparatorKind};
use strata_core::{Blueprint, PlanningMetrics, Score};

use crate::recording::PlanDecision;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ceilings {
    pub query_p95_s: f64,
    pub txn_p90_s: f64,
}

impl Ceilings {
    fn admit(&self, query_p95: f64, txn_p90: f64) -> bool {
        query_p95 <= self.query_p95_s && (txn_p90.is_nan() || txn_p90 <= self.txn_p90_s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparator {
    Ceiling(Ceilings),
    BenefitHorizon {
        ceilings: Ceilings,
        horizon_s: f64,
        penalty_threshold: f64,
        penalty_power: f64,
    },
}

/// Per-run values every comparison needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparisonContext {
    pub current_hourly_cost: f64,
    /// Multiplier on the cost of staying on the current blueprint.
    pub penalty: f64,
    /// The current blueprint meets the ceilings, both predicted and observed.
    pub current_feasible: bool,
}

impl Comparator {
    pub fn from_config(config: &ComparatorConfig) -> Self {
        let ceilings = Ceilings {
            query_p95_s: config.query_p95_ceiling_s,
            txn_p90_s: config.txn_p90_ceiling_s,
        };
        match config.kind {
            ComparatorKind::Ceiling => Comparator::Ceiling(ceilings),
            ComparatorKind::BenefitHorizon => Comparator::BenefitHorizon {
                ceilings,
                horizon_s: config.benefit_horizon_s,
                penalty_threshold: config.penalty_threshold,
                penalty_power: config.penalty_power,
            },
        }
    }

    pub fn ceilings(&self) -> &Ceilings {
        match self {
            Comparator::Ceiling(ceilings) | Comparator::BenefitHorizon { ceilings, .. } => ceilings,
        }
    }

    pub fn is_feasible(&self, score: &Score) -> bool {
        let within = self
            .ceilings()
            .admit(score.query_p95_latency_s, score.txn_p90_latency_s);
        match self {
            Comparator::Ceiling(_) => within,
            Comparator::BenefitHorizon { horizon_s, .. } => {
                within && score.transition_time_s <= *horizon_s
            }
        }
    }

    pub fn context(&self, current: &Score, metrics: &PlanningMetrics) -> ComparisonContext {
        let ceilings = self.ceilings();
        let observed_ok = ceilings.admit(metrics.query_p95_latency_s, metrics.txn_p90_latency_s);
        let penalty = match self {
            Comparator::Ceiling(_) => 1.0,
            Comparator::BenefitHorizon {
                penalty_threshold,
                penalty_power,
                ..
            } => {
                let deviation = ratio(metrics.query_p95_latency_s, ceilings.query_p95_s)
                    .max(ratio(metrics.txn_p90_latency_s, ceilings.txn_p90_s));
                if *penalty_threshold > 0.0 {
                    (deviation / penalty_threshold).max(1.0).powf(*penalty_power)
                } else {
                    1.0
                }
            }
        };
        ComparisonContext {
            current_hourly_cost: current.hourly_cost(),
            penalty,
            current_feasible: self.is_feasible(current) && observed_ok,
        }
    }

    /// Lower is better.
    pub fn objective(&self, score: &Score, ctx: &ComparisonContext) -> f64 {
        match self {
            Comparator::Ceiling(_) => score.hourly_cost(),
            Comparator::BenefitHorizon { horizon_s, .. } => {
                let horizon_h = horizon_s / 3600.0;
                let transition_h = score.transition_time_s / 3600.0;
                transition_h * ctx.current_hourly_cost * ctx.penalty
                    + score.transition_cost
                    + (horizon_h - transition_h) * score.hourly_cost()
            }
        }
    }

    /// Objective of keeping the current blueprint.
    pub fn current_objective(&self, ctx: &ComparisonContext) -> f64 {
        match self {
            Comparator::Ceiling(_) => ctx.current_hourly_cost,
            Comparator::BenefitHorizon { horizon_s, .. } => {
                horizon_s / 3600.0 * ctx.current_hourly_cost * ctx.penalty
            }
        }
    }

    /// Total order: feasible first, then objective, transition time, p95.
    pub fn compare(&self, a: &Score, b: &Score, ctx: &ComparisonContext) -> Ordering {
        self.is_feasible(b)
            .cmp(&self.is_feasible(a))
            .then_with(|| self.objective(a, ctx).total_cmp(&self.objective(b, ctx)))
            .then_with(|| a.transition_time_s.total_cmp(&b.transition_time_s))
            .then_with(|| a.query_p95_latency_s.total_cmp(&b.query_p95_latency_s))
    }

    /// Accept `best` over `current` or explain why not.
    pub fn decide(
        &self,
        current: &Blueprint,
        best: Option<(Blueprint, Score)>,
        ctx: &ComparisonContext,
        margin: f64,
    ) -> PlanDecision {
        let Some((blueprint, score)) = best else {
            return PlanDecision::Skipped {
                rationale: "no candidate passed the filters".into(),
            };
        };
        if blueprint == *current {
            return PlanDecision::Skipped {
                rationale: "current blueprint is already the best candidate".into(),
            };
        }
        if !self.is_feasible(&score) {
            return PlanDecision::Skipped {
                rationale: format!(
                    "best candidate is infeasible (query p95 {:.3}s, txn p90 {:.4}s, transition {:.0}s)",
                    score.query_p95_latency_s, score.txn_p90_latency_s, score.transition_time_s
                ),
            };
        }
        if !ctx.current_feasible {
            return PlanDecision::Accepted {
                rationale: format!(
                    "current blueprint violates its ceilings; candidate costs {:.4} USD/h",
                    score.hourly_cost()
                ),
                blueprint,
                score,
            };
        }

        let current_objective = self.current_objective(ctx);
        let best_objective = self.objective(&score, ctx);
        if best_objective < current_objective * (1.0 - margin) {
            let gain = if current_objective > 0.0 {
                (current_objective - best_objective) / current_objective * 100.0
            } else {
                0.0
            };
            PlanDecision::Accepted {
                rationale: format!(
                    "objective {best_objective:.4} improves on {current_objective:.4} by {gain:.1}%"
                ),
                blueprint,
                score,
            }
        } else {
            PlanDecision::Skipped {
                rationale: format!(
                    "best objective {best_objective:.4} does not beat {current_objective:.4} by the {:.1}% margin",
                    margin * 100.0
                ),
            }
        }
    }
}

fn ratio(value: f64, ceiling: f64) -> f64 {
    if ceiling > 0.0 { value / ceiling } else { 0.0 }
}
