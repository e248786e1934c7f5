//! Schema tables and their engine locations.

use serde::{Deserialize, Serialize};

use crate::engine::EngineSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub is_primary: bool,
}

impl Column {
    pub fn new(name: &str, data_type: &str, is_primary: bool) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_primary,
        }
    }
}

/// A table in a blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    /// Engines holding a copy of this table. Must be non-empty.
    pub locations: EngineSet,
    /// Tables this one is derived from.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Set when the table is written by transactions; such tables must
    /// live on the OLTP engine.
    #[serde(default)]
    pub transactional: bool,
}

impl Table {
    pub fn new(name: &str, locations: EngineSet) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            locations,
            dependencies: Vec::new(),
            transactional: false,
        }
    }

    pub fn transactional(mut self) -> Self {
        self.transactional = true;
        self
    }

    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    pub fn depends_on(mut self, table: &str) -> Self {
        self.dependencies.push(table.to_string());
        self
    }

    /// Base tables have no dependencies.
    pub fn is_base(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_primary)
    }
}
