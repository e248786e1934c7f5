//! Blueprints: immutable snapshots of table placement, provisioning, and
//! routing policy.
//!
//! A blueprint is never edited in place. Every `with_*` method returns a
//! new value, so a published `Arc<Blueprint>` can be read by any number of
//! workers without locking.
//!
//! # Components
//!
//! - **`PolicyRef` / `RoutingPolicySpec`**: which routing policies a
//!   router built from this blueprint should consult
//! - **`Blueprint`**: the snapshot itself plus validation and JSON codec
//! - **`BlueprintDiff`**: table and provisioning changes between two
//!   blueprints

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, EngineSet};
use crate::error::{BlueprintError, BlueprintResult};
use crate::provisioning::Provisioning;
use crate::table::Table;

/// Per-table locations, aligned with [`Blueprint::tables`].
pub type Placement = Vec<EngineSet>;

/// Reference to a routing policy. Assets are loaded by name on first use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyRef {
    AlwaysOne { engine: Engine },
    RoundRobin,
    RuleBased,
    Cached { asset: String },
    LearnedForest { asset: String },
}

/// Indefinite policies may decline to decide; the definite policy always
/// answers when the candidate set is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicySpec {
    #[serde(default)]
    pub indefinite: Vec<PolicyRef>,
    pub definite: PolicyRef,
}

impl Default for RoutingPolicySpec {
    fn default() -> Self {
        Self {
            indefinite: Vec::new(),
            definite: PolicyRef::RuleBased,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    schema_name: String,
    tables: Vec<Table>,
    provisioning: BTreeMap<Engine, Provisioning>,
    #[serde(default)]
    routing_policy: RoutingPolicySpec,
}

impl Blueprint {
    /// Build and validate a blueprint.
    pub fn new(
        schema_name: &str,
        tables: Vec<Table>,
        provisioning: BTreeMap<Engine, Provisioning>,
        routing_policy: RoutingPolicySpec,
    ) -> BlueprintResult<Self> {
        let bp = Self::unvalidated(schema_name, tables, provisioning, routing_policy);
        bp.validate()?;
        Ok(bp)
    }

    /// Build without validation. Used for search candidates, which the
    /// planner's filters judge instead.
    pub fn unvalidated(
        schema_name: &str,
        tables: Vec<Table>,
        provisioning: BTreeMap<Engine, Provisioning>,
        routing_policy: RoutingPolicySpec,
    ) -> Self {
        Self {
            schema_name: schema_name.to_string(),
            tables,
            provisioning,
            routing_policy,
        }
    }

    /// Check the structural invariants.
    pub fn validate(&self) -> BlueprintResult<()> {
        let mut names = HashSet::new();
        for table in &self.tables {
            if !names.insert(table.name.as_str()) {
                return Err(BlueprintError::DuplicateTable(table.name.clone()));
            }
        }
        for table in &self.tables {
            if table.locations.is_empty() {
                return Err(BlueprintError::EmptyLocations(table.name.clone()));
            }
            if table.transactional && !table.locations.contains(Engine::Oltp) {
                return Err(BlueprintError::TransactionalOffOltp(table.name.clone()));
            }
            for engine in table.locations.iter() {
                if !self.engine_has_capacity(engine) {
                    return Err(BlueprintError::NoCapacity {
                        table: table.name.clone(),
                        engine,
                    });
                }
            }
            if let Some(dep) = table.dependencies.iter().find(|d| !names.contains(d.as_str())) {
                return Err(BlueprintError::UnknownTable(dep.clone()));
            }
        }
        Ok(())
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_locations(&self, name: &str) -> Option<EngineSet> {
        self.table(name).map(|t| t.locations)
    }

    /// Table name to location bit-set, as consumed by the router.
    pub fn location_bitmap(&self) -> BTreeMap<String, EngineSet> {
        self.tables
            .iter()
            .map(|t| (t.name.clone(), t.locations))
            .collect()
    }

    /// Current placement in table order.
    pub fn placement(&self) -> Placement {
        self.tables.iter().map(|t| t.locations).collect()
    }

    pub fn provisioning(&self, engine: Engine) -> Option<&Provisioning> {
        self.provisioning.get(&engine)
    }

    pub fn provisioning_map(&self) -> &BTreeMap<Engine, Provisioning> {
        &self.provisioning
    }

    pub fn engine_has_capacity(&self, engine: Engine) -> bool {
        self.provisioning(engine).is_some_and(Provisioning::has_capacity)
    }

    pub fn routing_policy(&self) -> &RoutingPolicySpec {
        &self.routing_policy
    }

    /// Union of every table's locations.
    pub fn engines_in_use(&self) -> EngineSet {
        self.tables
            .iter()
            .fold(EngineSet::empty(), |acc, t| acc.union(t.locations))
    }

    /// Total provisioned hourly cost.
    pub fn provisioning_cost(&self) -> f64 {
        self.provisioning.values().map(Provisioning::hourly_cost).sum()
    }

    /// Names of tables that are not derived from any other table.
    ///
    /// Walks each table's dependency chain so a derived table whose
    /// sources are themselves derived still resolves to the true bases.
    pub fn base_table_names(&self) -> Vec<String> {
        let mut bases = Vec::new();
        let mut visited = HashSet::new();
        for table in &self.tables {
            self.collect_bases(&table.name, &mut visited, &mut bases);
        }
        bases
    }

    fn collect_bases(&self, name: &str, visited: &mut HashSet<String>, out: &mut Vec<String>) {
        if !visited.insert(name.to_string()) {
            return;
        }
        let Some(table) = self.table(name) else {
            return;
        };
        if table.is_base() {
            out.push(table.name.clone());
            return;
        }
        for dep in &table.dependencies {
            self.collect_bases(dep, visited, out);
        }
    }

    /// New blueprint with every table's locations replaced.
    pub fn with_placement(&self, placement: &[EngineSet]) -> BlueprintResult<Self> {
        if placement.len() != self.tables.len() {
            return Err(BlueprintError::PlacementShape {
                expected: self.tables.len(),
                got: placement.len(),
            });
        }
        let mut next = self.clone();
        for (table, locations) in next.tables.iter_mut().zip(placement) {
            table.locations = *locations;
        }
        Ok(next)
    }

    /// New blueprint with one table's locations replaced.
    pub fn with_table_locations(&self, name: &str, locations: EngineSet) -> BlueprintResult<Self> {
        let mut next = self.clone();
        let table = next
            .tables
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| BlueprintError::UnknownTable(name.to_string()))?;
        table.locations = locations;
        Ok(next)
    }

    pub fn with_provisioning(&self, engine: Engine, provisioning: Provisioning) -> Self {
        let mut next = self.clone();
        next.provisioning.insert(engine, provisioning);
        next
    }

    /// New blueprint with every engine's provisioning replaced.
    pub fn with_provisioning_map(&self, provisioning: BTreeMap<Engine, Provisioning>) -> Self {
        let mut next = self.clone();
        next.provisioning = provisioning;
        next
    }

    pub fn with_routing_policy(&self, routing_policy: RoutingPolicySpec) -> Self {
        let mut next = self.clone();
        next.routing_policy = routing_policy;
        next
    }

    /// Serialize to the persisted JSON layout.
    pub fn to_json(&self) -> BlueprintResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and validate a persisted blueprint.
    pub fn from_json(bytes: &[u8]) -> BlueprintResult<Self> {
        let bp: Blueprint = serde_json::from_slice(bytes)?;
        bp.validate()?;
        Ok(bp)
    }

    /// Differences needed to move from `self` to `next`.
    pub fn diff(&self, next: &Blueprint) -> BlueprintDiff {
        let mut table_changes = Vec::new();
        for table in &next.tables {
            let before = self.table_locations(&table.name).unwrap_or_default();
            if before != table.locations {
                table_changes.push(TableDiff {
                    name: table.name.clone(),
                    added: table.locations.difference(before),
                    removed: before.difference(table.locations),
                });
            }
        }
        for table in &self.tables {
            if next.table(&table.name).is_none() {
                table_changes.push(TableDiff {
                    name: table.name.clone(),
                    added: EngineSet::empty(),
                    removed: table.locations,
                });
            }
        }

        let provisioning_changes = Engine::ALL
            .into_iter()
            .filter_map(|engine| {
                let before = self.provisioning(engine).cloned();
                let after = next.provisioning(engine).cloned();
                (before != after).then_some(ProvisioningDiff {
                    engine,
                    before,
                    after,
                })
            })
            .collect();

        BlueprintDiff {
            table_changes,
            provisioning_changes,
        }
    }
}

/// Location change of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDiff {
    pub name: String,
    pub added: EngineSet,
    pub removed: EngineSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningDiff {
    pub engine: Engine,
    pub before: Option<Provisioning>,
    pub after: Option<Provisioning>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintDiff {
    pub table_changes: Vec<TableDiff>,
    pub provisioning_changes: Vec<ProvisioningDiff>,
}

impl BlueprintDiff {
    pub fn is_empty(&self) -> bool {
        self.table_changes.is_empty() && self.provisioning_changes.is_empty()
    }

    pub fn changes_provisioning(&self) -> bool {
        !self.provisioning_changes.is_empty()
    }
}
