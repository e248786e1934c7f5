//! Engine provisioning and the static instance catalog.
//!
//! # Components
//!
//! - **`InstanceClass`**: hardware shape and hourly price of one node
//! - **`INSTANCE_CATALOG`**: every class the planner may choose, per engine,
//!   ordered from smallest to largest
//! - **`Provisioning`**: an instance class plus a node count; exposes the
//!   monotonic resource value used to rescale latency predictions

use serde::{Deserialize, Serialize};

use crate::engine::Engine;

/// Shape and price of one instance class.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceClass {
    pub name: &'static str,
    pub engine: Engine,
    pub vcpus: u32,
    pub memory_mib: u32,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub usd_per_hour: f64,
}

impl InstanceClass {
    /// Capacity of a single node: `sqrt(vcpus * memory_mib)`.
    pub fn resource_value(&self) -> f64 {
        (f64::from(self.vcpus) * f64::from(self.memory_mib)).sqrt()
    }
}

/// Class name used for the serverless engine.
pub const SERVERLESS_CLASS: &str = "serverless";

/// All known instance classes, grouped by engine, smallest first.
pub const INSTANCE_CATALOG: &[InstanceClass] = &[
    InstanceClass {
        name: "db.r6g.large",
        engine: Engine::Oltp,
        vcpus: 2,
        memory_mib: 16_384,
        min_nodes: 1,
        max_nodes: 16,
        usd_per_hour: 0.26,
    },
    InstanceClass {
        name: "db.r6g.xlarge",
        engine: Engine::Oltp,
        vcpus: 4,
        memory_mib: 32_768,
        min_nodes: 1,
        max_nodes: 16,
        usd_per_hour: 0.519,
    },
    InstanceClass {
        name: "db.r6g.2xlarge",
        engine: Engine::Oltp,
        vcpus: 8,
        memory_mib: 65_536,
        min_nodes: 1,
        max_nodes: 16,
        usd_per_hour: 1.038,
    },
    InstanceClass {
        name: "db.r6g.4xlarge",
        engine: Engine::Oltp,
        vcpus: 16,
        memory_mib: 131_072,
        min_nodes: 1,
        max_nodes: 16,
        usd_per_hour: 2.076,
    },
    InstanceClass {
        name: "dc2.large",
        engine: Engine::Warehouse,
        vcpus: 2,
        memory_mib: 15_360,
        min_nodes: 1,
        max_nodes: 32,
        usd_per_hour: 0.25,
    },
    InstanceClass {
        name: "ra3.xlplus",
        engine: Engine::Warehouse,
        vcpus: 4,
        memory_mib: 32_768,
        min_nodes: 1,
        max_nodes: 16,
        usd_per_hour: 1.086,
    },
    InstanceClass {
        name: "ra3.4xlarge",
        engine: Engine::Warehouse,
        vcpus: 12,
        memory_mib: 98_304,
        min_nodes: 2,
        max_nodes: 32,
        usd_per_hour: 3.26,
    },
    InstanceClass {
        name: "ra3.16xlarge",
        engine: Engine::Warehouse,
        vcpus: 48,
        memory_mib: 393_216,
        min_nodes: 2,
        max_nodes: 64,
        usd_per_hour: 13.04,
    },
    // Billed per byte scanned, never per node.
    InstanceClass {
        name: SERVERLESS_CLASS,
        engine: Engine::Serverless,
        vcpus: 0,
        memory_mib: 0,
        min_nodes: 1,
        max_nodes: 1,
        usd_per_hour: 0.0,
    },
];

/// Instance classes for one engine, smallest first.
pub fn instance_classes(engine: Engine) -> Vec<&'static InstanceClass> {
    INSTANCE_CATALOG
        .iter()
        .filter(|c| c.engine == engine)
        .collect()
}

pub fn lookup_instance_class(name: &str) -> Option<&'static InstanceClass> {
    INSTANCE_CATALOG.iter().find(|c| c.name == name)
}

/// Instance class and node count allocated to one engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provisioning {
    pub instance_class: String,
    pub num_nodes: u32,
}

impl Provisioning {
    pub fn new(instance_class: &str, num_nodes: u32) -> Self {
        Self {
            instance_class: instance_class.to_string(),
            num_nodes,
        }
    }

    pub fn serverless() -> Self {
        Self::new(SERVERLESS_CLASS, 1)
    }

    pub fn class(&self) -> Option<&'static InstanceClass> {
        lookup_instance_class(&self.instance_class)
    }

    pub fn has_capacity(&self) -> bool {
        self.num_nodes > 0
    }

    /// Monotonic capacity metric. Zero for zero nodes or an unknown class.
    pub fn resource_value(&self) -> f64 {
        self.class()
            .map(|c| c.resource_value() * f64::from(self.num_nodes))
            .unwrap_or(0.0)
    }

    /// Provisioned cost per hour in USD.
    pub fn hourly_cost(&self) -> f64 {
        self.class()
            .map(|c| c.usd_per_hour * f64::from(self.num_nodes))
            .unwrap_or(0.0)
    }
}

impl std::fmt::Display for Provisioning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.num_nodes, self.instance_class)
    }
}
