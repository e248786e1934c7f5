//! Engines and engine sets.
//!
//! Every backing engine owns one bit of a `u8` mask, so table locations
//! and routing candidates are plain bit-sets. Set algebra (union,
//! intersection, single-bit tests) is a single machine instruction and
//! the whole power set of engines fits in eight values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the backing engines queries and tables are spread across.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Row store serving transactions and point lookups.
    Oltp,
    /// Provisioned analytical warehouse.
    Warehouse,
    /// Pay-per-scan serverless query engine.
    Serverless,
}

impl Engine {
    /// Fixed engine order used wherever a deterministic order is needed.
    pub const ALL: [Engine; 3] = [Engine::Oltp, Engine::Warehouse, Engine::Serverless];

    /// The bit this engine occupies in an [`EngineSet`].
    pub const fn bit(self) -> u8 {
        match self {
            Engine::Oltp => 0b001,
            Engine::Warehouse => 0b010,
            Engine::Serverless => 0b100,
        }
    }

    /// Position of this engine in [`Engine::ALL`].
    pub const fn index(self) -> usize {
        match self {
            Engine::Oltp => 0,
            Engine::Warehouse => 1,
            Engine::Serverless => 2,
        }
    }

    pub fn from_bit(bit: u8) -> Option<Engine> {
        Engine::ALL.into_iter().find(|e| e.bit() == bit)
    }

    pub fn name(self) -> &'static str {
        match self {
            Engine::Oltp => "oltp",
            Engine::Warehouse => "warehouse",
            Engine::Serverless => "serverless",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of engines stored as a bitmask.
///
/// Serialized as an ordered list of engine names so persisted blueprints
/// stay readable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Vec<Engine>", into = "Vec<Engine>")]
pub struct EngineSet(u8);

const ALL_BITS: u8 = 0b111;

impl EngineSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(ALL_BITS)
    }

    pub const fn only(engine: Engine) -> Self {
        Self(engine.bit())
    }

    /// Build a set from a raw mask; bits outside the engine range are dropped.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & ALL_BITS)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, engine: Engine) -> bool {
        self.0 & engine.bit() != 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn union(self, other: EngineSet) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: EngineSet) -> Self {
        Self(self.0 & other.0)
    }

    /// Engines in `self` that are not in `other`.
    pub const fn difference(self, other: EngineSet) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn with(self, engine: Engine) -> Self {
        Self(self.0 | engine.bit())
    }

    pub const fn without(self, engine: Engine) -> Self {
        Self(self.0 & !engine.bit())
    }

    /// Flip the membership of one engine.
    pub const fn toggled(self, engine: Engine) -> Self {
        Self(self.0 ^ engine.bit())
    }

    /// The engine if exactly one bit is set.
    pub fn single(self) -> Option<Engine> {
        if self.0.count_ones() == 1 {
            Engine::from_bit(self.0)
        } else {
            None
        }
    }

    /// The lowest set bit, in [`Engine::ALL`] order.
    pub fn first(self) -> Option<Engine> {
        self.iter().next()
    }

    /// Members in [`Engine::ALL`] order.
    pub fn iter(self) -> impl Iterator<Item = Engine> {
        Engine::ALL.into_iter().filter(move |e| self.contains(*e))
    }

    /// Every non-empty set reachable from `self` by adding or removing up
    /// to `distance` engines, including `self` when it is non-empty.
    ///
    /// Breadth-first walk over the engine lattice; results are ordered by
    /// distance, then by the order engines were flipped.
    pub fn within_distance(self, distance: usize) -> Vec<EngineSet> {
        let mut seen = vec![self];
        let mut frontier = vec![self];
        for _ in 0..distance {
            let mut next = Vec::new();
            for set in frontier {
                for engine in Engine::ALL {
                    let flipped = set.toggled(engine);
                    if !seen.contains(&flipped) {
                        seen.push(flipped);
                        next.push(flipped);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        seen.retain(|s| !s.is_empty());
        seen
    }
}

impl From<Engine> for EngineSet {
    fn from(engine: Engine) -> Self {
        Self::only(engine)
    }
}

impl From<Vec<Engine>> for EngineSet {
    fn from(engines: Vec<Engine>) -> Self {
        engines.into_iter().collect()
    }
}

impl From<EngineSet> for Vec<Engine> {
    fn from(set: EngineSet) -> Self {
        set.iter().collect()
    }
}

impl FromIterator<Engine> for EngineSet {
    fn from_iter<I: IntoIterator<Item = Engine>>(iter: I) -> Self {
        iter.into_iter().fold(EngineSet::empty(), EngineSet::with)
    }
}

impl fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for EngineSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Engine::name).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}
