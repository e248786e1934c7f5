//! strata.toml configuration.
//!
//! One `StrataConfig` is parsed at startup and threaded by reference into
//! every component that needs it. Every section and field has a default,
//! so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::provisioning::Provisioning;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub planner: PlannerConfig,
    pub scoring: ScoringConfig,
    pub comparator: ComparatorConfig,
    pub triggers: TriggerConfig,
    pub watchdog: WatchdogConfig,
    pub transition: TransitionConfig,
    pub daemon: DaemonConfig,
}

impl StrataConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: StrataConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Planner ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategyKind {
    Neighborhood,
    SampledNeighborhood,
    Beam,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub strategy: SearchStrategyKind,
    pub beam_width: usize,
    /// Candidates kept by the sampled neighborhood strategy.
    pub sample_size: usize,
    /// Maximum (table, engine) membership flips per candidate.
    pub max_table_moves: usize,
    /// Maximum instance-class and node-count steps from the current provisioning.
    pub max_provisioning_steps: u32,
    /// Fractional improvement a candidate needs over the current blueprint.
    pub acceptance_margin: f64,
    pub seed: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            strategy: SearchStrategyKind::Beam,
            beam_width: 10,
            sample_size: 256,
            max_table_moves: 2,
            max_provisioning_steps: 1,
            acceptance_margin: 0.05,
            seed: 42,
        }
    }
}

// ── Scoring ────────────────────────────────────────────────────────

/// Latency rescaling constants for one provisioned engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineScaling {
    /// Share of latency that scales with resources.
    pub gamma: f64,
    pub alpha: f64,
    /// Provisioning the latency predictions were measured at.
    pub base: Provisioning,
}

/// A per-engine scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineRates {
    pub oltp: f64,
    pub warehouse: f64,
    pub serverless: f64,
}

impl EngineRates {
    pub fn get(&self, engine: Engine) -> f64 {
        match engine {
            Engine::Oltp => self.oltp,
            Engine::Warehouse => self.warehouse,
            Engine::Serverless => self.serverless,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub oltp: EngineScaling,
    pub warehouse: EngineScaling,
    /// Multiplier on the coarse expected-wait estimate.
    pub txn_alpha: f64,
    /// Quantile reported as the transactional tail latency.
    pub txn_quantile: f64,
    pub serverless_usd_per_mb: f64,
    /// Bulk load throughput when a table is copied onto an engine.
    pub load_rate_mb_per_s: EngineRates,
    /// Time to apply a provisioning change.
    pub provisioning_change_s: EngineRates,
    pub movement_usd_per_mb: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            oltp: EngineScaling {
                gamma: 0.6,
                alpha: 1.0,
                base: Provisioning::new("db.r6g.xlarge", 1),
            },
            warehouse: EngineScaling {
                gamma: 0.75,
                alpha: 1.0,
                base: Provisioning::new("dc2.large", 2),
            },
            txn_alpha: 1.0,
            txn_quantile: 0.9,
            // 5 USD per TB scanned.
            serverless_usd_per_mb: 5.0 / 1_000_000.0,
            load_rate_mb_per_s: EngineRates {
                oltp: 20.0,
                warehouse: 50.0,
                serverless: 100.0,
            },
            provisioning_change_s: EngineRates {
                oltp: 600.0,
                warehouse: 900.0,
                serverless: 0.0,
            },
            movement_usd_per_mb: 0.000_02,
        }
    }
}

impl ScoringConfig {
    /// Scaling constants for provisioned engines; `None` for serverless.
    pub fn scaling(&self, engine: Engine) -> Option<&EngineScaling> {
        match engine {
            Engine::Oltp => Some(&self.oltp),
            Engine::Warehouse => Some(&self.warehouse),
            Engine::Serverless => None,
        }
    }
}

// ── Comparator ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparatorKind {
    Ceiling,
    BenefitHorizon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparatorConfig {
    pub kind: ComparatorKind,
    pub query_p95_ceiling_s: f64,
    pub txn_p90_ceiling_s: f64,
    pub benefit_horizon_s: f64,
    pub penalty_threshold: f64,
    pub penalty_power: f64,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            kind: ComparatorKind::Ceiling,
            query_p95_ceiling_s: 30.0,
            txn_p90_ceiling_s: 0.030,
            benefit_horizon_s: 24.0 * 3600.0,
            penalty_threshold: 0.8,
            penalty_power: 2.0,
        }
    }
}

// ── Triggers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecasterKind {
    Constant,
    LinearRegression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElapsedTimeConfig {
    pub enabled: bool,
    pub planning_window_s: u64,
    pub multiplier: f64,
}

impl Default for ElapsedTimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            planning_window_s: 3600,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UtilizationConfig {
    pub enabled: bool,
    pub lo: f64,
    pub hi: f64,
    pub sustained_epochs: usize,
    /// Seconds after a replan before samples are considered again.
    pub observe_delay_s: u64,
}

impl Default for UtilizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lo: 20.0,
            hi: 80.0,
            sustained_epochs: 3,
            observe_delay_s: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableCostConfig {
    pub enabled: bool,
    /// Allowed relative deviation from the planned variable cost.
    pub threshold_frac: f64,
    pub observe_delay_s: u64,
}

impl Default for VariableCostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_frac: 0.2,
            observe_delay_s: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyTriggerConfig {
    pub enabled: bool,
    pub sustained_epochs: usize,
    pub lookahead_epochs: usize,
    pub observe_delay_s: u64,
}

impl Default for LatencyTriggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sustained_epochs: 3,
            lookahead_epochs: 5,
            observe_delay_s: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecentChangeConfig {
    pub enabled: bool,
    pub delay_s: u64,
}

impl Default for RecentChangeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_s: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub elapsed_time: ElapsedTimeConfig,
    pub utilization: UtilizationConfig,
    pub variable_cost: VariableCostConfig,
    pub query_latency: LatencyTriggerConfig,
    pub txn_latency: LatencyTriggerConfig,
    pub recent_change: RecentChangeConfig,
    pub forecaster: ForecasterKind,
    /// Trailing epochs the linear-regression forecaster fits over.
    pub forecast_window: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            elapsed_time: ElapsedTimeConfig::default(),
            utilization: UtilizationConfig::default(),
            variable_cost: VariableCostConfig::default(),
            query_latency: LatencyTriggerConfig::default(),
            txn_latency: LatencyTriggerConfig::default(),
            recent_change: RecentChangeConfig::default(),
            forecaster: ForecasterKind::LinearRegression,
            forecast_window: 10,
        }
    }
}

// ── Watchdog ───────────────────────────────────────────────────────

/// A known-bad configuration the watchdog vetoes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum WatchdogRule {
    /// `table` must never be placed on `engine`.
    ForbidEngine { table: String, engine: Engine },
    /// `table` must always keep a copy on `engine`.
    Anchor { table: String, engine: Engine },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub rules: Vec<WatchdogRule>,
}

// ── Transition / daemon ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    /// How long to wait for every worker to confirm a new blueprint.
    pub ack_timeout_s: u64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self { ack_timeout_s: 300 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub schema_name: String,
    pub data_dir: PathBuf,
    /// Seconds between trigger evaluations.
    pub tick_s: u64,
    /// JSON workload file read by the file workload provider.
    pub workload_path: Option<PathBuf>,
    /// Blueprint JSON loaded when the store has no blueprint yet.
    pub bootstrap_blueprint: Option<PathBuf>,
    /// JSON metric samples read into the monitor on every tick.
    pub metrics_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            schema_name: "default".to_string(),
            data_dir: PathBuf::from("/var/lib/strata"),
            tick_s: 60,
            workload_path: None,
            bootstrap_blueprint: None,
            metrics_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = StrataConfig::parse("").unwrap();
        assert_eq!(config, StrataConfig::default());
        assert_eq!(config.planner.strategy, SearchStrategyKind::Beam);
    }

    #[test]
    fn parses_partial_sections() {
        let toml = r#"
[planner]
strategy = "sampled_neighborhood"
seed = 7

[comparator]
kind = "benefit_horizon"
query_p95_ceiling_s = 12.5

[triggers.utilization]
lo = 10.0
sustained_epochs = 5

[triggers.txn_latency]
observe_delay_s = 120

[[watchdog.rules]]
rule = "forbid_engine"
table = "telemetry"
engine = "oltp"

[[watchdog.rules]]
rule = "anchor"
table = "embeddings"
engine = "oltp"

[daemon]
schema_name = "shop"
"#;
        let config = StrataConfig::parse(toml).unwrap();
        assert_eq!(config.planner.strategy, SearchStrategyKind::SampledNeighborhood);
        assert_eq!(config.planner.seed, 7);
        assert_eq!(config.planner.beam_width, 10);
        assert_eq!(config.comparator.kind, ComparatorKind::BenefitHorizon);
        assert_eq!(config.comparator.query_p95_ceiling_s, 12.5);
        assert_eq!(config.triggers.utilization.lo, 10.0);
        assert_eq!(config.triggers.utilization.hi, 80.0);
        assert_eq!(config.triggers.utilization.sustained_epochs, 5);
        assert_eq!(config.triggers.utilization.observe_delay_s, 600);
        assert_eq!(config.triggers.txn_latency.observe_delay_s, 120);
        assert_eq!(config.triggers.query_latency.observe_delay_s, 600);
        assert_eq!(config.watchdog.rules.len(), 2);
        assert_eq!(
            config.watchdog.rules[0],
            WatchdogRule::ForbidEngine {
                table: "telemetry".into(),
                engine: Engine::Oltp
            }
        );
        assert_eq!(config.daemon.schema_name, "shop");
    }

    #[test]
    fn toml_round_trip() {
        let mut config = StrataConfig::default();
        config.watchdog.rules.push(WatchdogRule::Anchor {
            table: "t".into(),
            engine: Engine::Warehouse,
        });
        let text = config.to_toml_string().unwrap();
        assert_eq!(StrataConfig::parse(&text).unwrap(), config);
    }

    #[test]
    fn from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(
            &path,
            "[daemon]\ntick_s = 5\nmetrics_path = \"/tmp/strata-metrics.json\"\n",
        )
        .unwrap();
        let config = StrataConfig::from_file(&path).unwrap();
        assert_eq!(config.daemon.tick_s, 5);
        assert_eq!(
            config.daemon.metrics_path.as_deref(),
            Some(Path::new("/tmp/strata-metrics.json"))
        );
    }
}
