//! Replayable planning runs.
//!
//! A `PlanningSnapshot` captures every input of one run. Re-running the
//! planner on the same snapshot must reproduce the same `PlanningOutcome`
//! byte for byte; the SHA-256 of the outcome's JSON is stored alongside
//! the recording so divergence is cheap to detect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use strata_core::{Blueprint, PlanningMetrics, Score, StrataConfig, Workload};

use crate::error::PlannerResult;

/// Everything a planning run reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningSnapshot {
    pub schema_name: String,
    pub current: Blueprint,
    pub workload: Workload,
    pub metrics: PlanningMetrics,
    pub config: StrataConfig,
    /// Seed for sampled search.
    pub seed: u64,
}

/// One candidate that passed the filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploredCandidate {
    pub digest: String,
    pub hourly_cost: f64,
    pub query_p95_latency_s: f64,
    pub txn_p90_latency_s: f64,
    pub transition_time_s: f64,
    pub feasible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Veto {
    pub digest: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PlanDecision {
    Accepted {
        blueprint: Blueprint,
        score: Score,
        rationale: String,
    },
    Skipped {
        rationale: String,
    },
}

impl PlanDecision {
    pub fn rationale(&self) -> &str {
        match self {
            PlanDecision::Accepted { rationale, .. } | PlanDecision::Skipped { rationale } => {
                rationale
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningOutcome {
    pub current_score: Score,
    /// In exploration order.
    pub explored: Vec<ExploredCandidate>,
    pub vetoes: Vec<Veto>,
    /// Candidates dropped by structural filters.
    pub pruned: usize,
    pub decision: PlanDecision,
}

impl PlanningOutcome {
    /// SHA-256 of the canonical JSON encoding, hex.
    pub fn digest(&self) -> PlannerResult<String> {
        Ok(sha256_hex(&serde_json::to_vec(self)?))
    }

    pub fn accepted(&self) -> Option<&Blueprint> {
        match &self.decision {
            PlanDecision::Accepted { blueprint, .. } => Some(blueprint),
            PlanDecision::Skipped { .. } => None,
        }
    }
}

/// A stored run: inputs, outputs, and the outcome digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedRun {
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    pub snapshot: PlanningSnapshot,
    pub outcome: PlanningOutcome,
    pub outcome_digest: String,
}

/// Stable identity of a blueprint: SHA-256 of its JSON, hex.
pub fn blueprint_digest(bp: &Blueprint) -> PlannerResult<String> {
    Ok(sha256_hex(&bp.to_json()?))
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
