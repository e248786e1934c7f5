//! Candidate search strategies.
//!
//! Every strategy feeds candidates through one `Explorer`, which filters,
//! scores and memoizes them by digest and keeps the best so far. The
//! exploration order is deterministic for a given snapshot and seed.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use strata_core::config::{PlannerConfig, SearchStrategyKind};
use strata_core::{Blueprint, Score, Workload};

use crate::comparator::{Comparator, ComparisonContext};
use crate::enumeration::{enumerate_placements, provisioning_grid};
use crate::error::PlannerResult;
use crate::filters::{FilterChain, Verdict};
use crate::recording::{ExploredCandidate, Veto, blueprint_digest};
use crate::scoring::Scorer;

/// Filters, scores and ranks candidates for one planning run.
pub struct Explorer<'a> {
    current: &'a Blueprint,
    workload: &'a Workload,
    filters: &'a FilterChain,
    scorer: &'a Scorer,
    comparator: &'a Comparator,
    ctx: ComparisonContext,
    seen: HashMap<String, Option<Score>>,
    explored: Vec<ExploredCandidate>,
    vetoes: Vec<Veto>,
    pruned: usize,
    best: Option<(Blueprint, Score)>,
}

/// What an exploration produced.
pub struct Exploration {
    pub explored: Vec<ExploredCandidate>,
    pub vetoes: Vec<Veto>,
    pub pruned: usize,
    pub best: Option<(Blueprint, Score)>,
}

impl<'a> Explorer<'a> {
    pub fn new(
        current: &'a Blueprint,
        workload: &'a Workload,
        filters: &'a FilterChain,
        scorer: &'a Scorer,
        comparator: &'a Comparator,
        ctx: ComparisonContext,
    ) -> Self {
        Self {
            current,
            workload,
            filters,
            scorer,
            comparator,
            ctx,
            seen: HashMap::new(),
            explored: Vec::new(),
            vetoes: Vec::new(),
            pruned: 0,
            best: None,
        }
    }

    /// Filter and score a candidate. `None` if it was pruned or vetoed.
    /// Repeated candidates are answered from memory and not re-recorded.
    pub fn consider(&mut self, candidate: Blueprint) -> PlannerResult<Option<Score>> {
        let digest = blueprint_digest(&candidate)?;
        if let Some(known) = self.seen.get(&digest) {
            return Ok(known.clone());
        }

        let result = match self.filters.check(&candidate, self.workload) {
            Verdict::Pruned(filter) => {
                trace!(%digest, filter, "candidate pruned");
                self.pruned += 1;
                None
            }
            Verdict::Vetoed(reason) => {
                self.vetoes.push(Veto {
                    digest: digest.clone(),
                    reason,
                });
                None
            }
            Verdict::Pass => {
                let score = self.scorer.score(&candidate, self.current, self.workload);
                self.explored.push(ExploredCandidate {
                    digest: digest.clone(),
                    hourly_cost: score.hourly_cost(),
                    query_p95_latency_s: score.query_p95_latency_s,
                    txn_p90_latency_s: score.txn_p90_latency_s,
                    transition_time_s: score.transition_time_s,
                    feasible: self.comparator.is_feasible(&score),
                });
                let improves = self
                    .best
                    .as_ref()
                    .is_none_or(|(_, best)| self.compare(&score, best) == Ordering::Less);
                if improves {
                    self.best = Some((candidate, score.clone()));
                }
                Some(score)
            }
        };
        self.seen.insert(digest, result.clone());
        Ok(result)
    }

    pub fn compare(&self, a: &Score, b: &Score) -> Ordering {
        self.comparator.compare(a, b, &self.ctx)
    }

    pub fn workload(&self) -> &Workload {
        self.workload
    }

    pub fn finish(self) -> Exploration {
        Exploration {
            explored: self.explored,
            vetoes: self.vetoes,
            pruned: self.pruned,
            best: self.best,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Every placement within reach crossed with every provisioning.
    Neighborhood,
    /// A seeded uniform sample of the neighborhood.
    SampledNeighborhood { sample_size: usize },
    /// Table-at-a-time beam search, then provisioning.
    Beam { width: usize },
}

impl SearchStrategy {
    pub fn from_config(config: &PlannerConfig) -> Self {
        match config.strategy {
            SearchStrategyKind::Neighborhood => SearchStrategy::Neighborhood,
            SearchStrategyKind::SampledNeighborhood => SearchStrategy::SampledNeighborhood {
                sample_size: config.sample_size,
            },
            SearchStrategyKind::Beam => SearchStrategy::Beam {
                width: config.beam_width.max(1),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SearchStrategy::Neighborhood => "neighborhood",
            SearchStrategy::SampledNeighborhood { .. } => "sampled_neighborhood",
            SearchStrategy::Beam { .. } => "beam",
        }
    }

    pub fn search(
        &self,
        explorer: &mut Explorer<'_>,
        current: &Blueprint,
        config: &PlannerConfig,
        seed: u64,
    ) -> PlannerResult<()> {
        let grid = provisioning_grid(current.provisioning_map(), config.max_provisioning_steps);
        match *self {
            SearchStrategy::Neighborhood => {
                let placements = enumerate_placements(&current.placement(), config.max_table_moves);
                for placement in &placements {
                    let base = current.with_placement(placement)?;
                    for provisioning in &grid {
                        explorer.consider(base.with_provisioning_map(provisioning.clone()))?;
                    }
                }
            }
            SearchStrategy::SampledNeighborhood { sample_size } => {
                let placements = enumerate_placements(&current.placement(), config.max_table_moves);
                let total = placements.len() * grid.len();
                for index in reservoir_sample(total, sample_size, seed) {
                    let base = current.with_placement(&placements[index / grid.len()])?;
                    explorer.consider(base.with_provisioning_map(grid[index % grid.len()].clone()))?;
                }
            }
            SearchStrategy::Beam { width } => {
                let beam = beam_placements(explorer, current, width, config.max_table_moves)?;
                for member in &beam {
                    for provisioning in &grid {
                        explorer.consider(member.with_provisioning_map(provisioning.clone()))?;
                    }
                }
            }
        }
        debug!(
            strategy = self.name(),
            schema = current.schema_name(),
            grid = grid.len(),
            "candidate search finished"
        );
        Ok(())
    }
}

/// Table order: most referenced first, ties by name.
fn table_order(current: &Blueprint, workload: &Workload) -> Vec<String> {
    let counts = workload.table_reference_counts();
    let mut names: Vec<String> = current.tables().iter().map(|t| t.name.clone()).collect();
    names.sort_by(|a, b| {
        let ca = counts.get(a).copied().unwrap_or(0);
        let cb = counts.get(b).copied().unwrap_or(0);
        cb.cmp(&ca).then_with(|| a.cmp(b))
    });
    names
}

fn beam_placements(
    explorer: &mut Explorer<'_>,
    current: &Blueprint,
    width: usize,
    max_moves: usize,
) -> PlannerResult<Vec<Blueprint>> {
    let mut beam = vec![current.clone()];
    for table in table_order(current, explorer.workload()) {
        let mut step: Vec<(Blueprint, Score)> = Vec::new();
        let mut seen = HashSet::new();
        for member in &beam {
            let Some(locations) = member.table_locations(&table) else {
                continue;
            };
            for option in locations.within_distance(max_moves) {
                let candidate = member.with_table_locations(&table, option)?;
                if !seen.insert(blueprint_digest(&candidate)?) {
                    continue;
                }
                if let Some(score) = explorer.consider(candidate.clone())? {
                    step.push((candidate, score));
                }
            }
        }
        if step.is_empty() {
            trace!(%table, "beam step produced no candidates; keeping beam");
            continue;
        }
        step.sort_by(|a, b| explorer.compare(&a.1, &b.1));
        step.truncate(width);
        beam = step.into_iter().map(|(bp, _)| bp).collect();
    }
    Ok(beam)
}

/// Sorted sample of `k` indices from `0..n` (Algorithm R).
fn reservoir_sample(n: usize, k: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut reservoir: Vec<usize> = (0..n.min(k)).collect();
    for i in k..n {
        let j = rng.gen_range(0..=i);
        if j < k {
            reservoir[j] = i;
        }
    }
    reservoir.sort_unstable();
    reservoir
}
