//! Routing policies.
//!
//! A closed set of variants behind one `engine_for` dispatch. Policies
//! only choose among engines location routing left open; the router
//! rejects any answer outside that set.

use std::sync::Arc;

use tracing::debug;

use strata_core::{Engine, EngineSet, PolicyRef, QueryRep};

use crate::cache::{CachedDecisions, PolicyAssetLoader, PolicyCache};
use crate::forest::DecisionForest;

/// Rotates through [`Engine::ALL`], skipping engines outside the
/// candidate set.
#[derive(Debug, Clone, Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next engine in rotation that is in `valid`.
    pub fn next_in(&mut self, valid: EngineSet) -> Option<Engine> {
        for _ in 0..Engine::ALL.len() {
            let engine = Engine::ALL[self.cursor % Engine::ALL.len()];
            self.cursor = (self.cursor + 1) % Engine::ALL.len();
            if valid.contains(engine) {
                return Some(engine);
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
pub enum Policy {
    AlwaysOne(Engine),
    RoundRobin(RoundRobin),
    RuleBased,
    Cached {
        asset: String,
        decisions: Option<Arc<CachedDecisions>>,
    },
    LearnedForest {
        asset: String,
        forest: Option<Arc<DecisionForest>>,
    },
}

impl Policy {
    pub fn from_ref(policy: &PolicyRef) -> Self {
        match policy {
            PolicyRef::AlwaysOne { engine } => Policy::AlwaysOne(*engine),
            PolicyRef::RoundRobin => Policy::RoundRobin(RoundRobin::new()),
            PolicyRef::RuleBased => Policy::RuleBased,
            PolicyRef::Cached { asset } => Policy::Cached {
                asset: asset.clone(),
                decisions: None,
            },
            PolicyRef::LearnedForest { asset } => Policy::LearnedForest {
                asset: asset.clone(),
                forest: None,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Policy::AlwaysOne(_) => "always_one",
            Policy::RoundRobin(_) => "round_robin",
            Policy::RuleBased => "rule_based",
            Policy::Cached { .. } => "cached",
            Policy::LearnedForest { .. } => "learned_forest",
        }
    }

    /// Fetch this policy's asset if it has one and it is not loaded yet.
    ///
    /// A failed fetch leaves the policy unloaded and an unloaded policy
    /// declines every query. The cache logs the failure once and keeps
    /// answering from its negative entry until the retry window closes.
    pub async fn ensure_loaded(&mut self, cache: &PolicyCache, loader: &dyn PolicyAssetLoader) {
        match self {
            Policy::Cached {
                asset,
                decisions: decisions @ None,
            } => match cache.cached_decisions(asset, loader).await {
                Ok(loaded) => *decisions = Some(loaded),
                Err(e) => debug!(asset = %asset, error = %e, "cached routing policy unavailable"),
            },
            Policy::LearnedForest {
                asset,
                forest: forest @ None,
            } => match cache.forest(asset, loader).await {
                Ok(loaded) => *forest = Some(loaded),
                Err(e) => debug!(asset = %asset, error = %e, "routing forest unavailable"),
            },
            _ => {}
        }
    }

    /// Choose an engine from `valid`, or decline with `None`.
    pub fn engine_for(&mut self, query: &QueryRep, valid: EngineSet) -> Option<Engine> {
        match self {
            Policy::AlwaysOne(engine) => Some(*engine),
            Policy::RoundRobin(rr) => rr.next_in(valid),
            Policy::RuleBased => valid.first(),
            Policy::Cached { decisions, .. } => decisions
                .as_ref()
                .and_then(|d| d.get(&query.fingerprint).copied()),
            Policy::LearnedForest { forest, .. } => {
                let forest = forest.as_ref()?;
                forest
                    .ranked_engines(query)
                    .into_iter()
                    .find(|e| valid.contains(*e))
                    .or_else(|| valid.first())
            }
        }
    }
}
