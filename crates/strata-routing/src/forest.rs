//! Decision-forest routing model.
//!
//! Models are trained offline and stored as JSON assets. Each tree votes
//! for engines at its leaf; votes are summed across trees and engines
//! are ranked by total vote.

use serde::{Deserialize, Serialize};

use strata_core::{Engine, QueryRep};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    /// Go `left` when `features[feature] <= threshold`, else `right`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Votes in [`Engine::ALL`] order.
    Leaf { votes: [f64; 3] },
}

/// Nodes stored flat; the root is node 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Leaf votes for a feature vector, or `None` for a malformed tree.
    pub fn predict(&self, features: &[f64]) -> Option<[f64; 3]> {
        let mut idx = 0;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes.
        for _ in 0..self.nodes.len() {
            match self.nodes.get(idx)? {
                TreeNode::Leaf { votes } => return Some(*votes),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = features.get(*feature).copied().unwrap_or(0.0);
                    idx = if value <= *threshold { *left } else { *right };
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionForest {
    /// Schema tables in feature order.
    pub table_order: Vec<String>,
    pub trees: Vec<DecisionTree>,
}

impl DecisionForest {
    /// Feature vector: referenced table count, then one indicator per table.
    pub fn features(&self, query: &QueryRep) -> Vec<f64> {
        let mut features = Vec::with_capacity(self.table_order.len() + 1);
        features.push(query.tables.len() as f64);
        features.extend(self.table_order.iter().map(|t| {
            if query.tables.contains(t) { 1.0 } else { 0.0 }
        }));
        features
    }

    /// Engines ordered by total vote, best first. Ties keep engine order.
    pub fn ranked_engines(&self, query: &QueryRep) -> Vec<Engine> {
        let features = self.features(query);
        let mut totals = [0.0f64; 3];
        for votes in self.trees.iter().filter_map(|t| t.predict(&features)) {
            for (total, vote) in totals.iter_mut().zip(votes) {
                *total += vote;
            }
        }
        let mut ranked = Engine::ALL.to_vec();
        ranked.sort_by(|a, b| totals[b.index()].total_cmp(&totals[a.index()]));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One split on "uses the `events` table": yes goes to serverless.
    fn events_forest() -> DecisionForest {
        DecisionForest {
            table_order: vec!["orders".into(), "events".into()],
            trees: vec![DecisionTree {
                nodes: vec![
                    TreeNode::Split {
                        feature: 2,
                        threshold: 0.5,
                        left: 1,
                        right: 2,
                    },
                    TreeNode::Leaf {
                        votes: [0.1, 0.8, 0.1],
                    },
                    TreeNode::Leaf {
                        votes: [0.0, 0.3, 0.7],
                    },
                ],
            }],
        }
    }

    #[test]
    fn ranks_by_votes() {
        let forest = events_forest();
        let on_events = QueryRep::read_only("q", &["events"]);
        assert_eq!(
            forest.ranked_engines(&on_events),
            vec![Engine::Serverless, Engine::Warehouse, Engine::Oltp]
        );
        let on_orders = QueryRep::read_only("q", &["orders"]);
        assert_eq!(forest.ranked_engines(&on_orders)[0], Engine::Warehouse);
    }

    #[test]
    fn malformed_tree_is_ignored() {
        let cyclic = DecisionTree {
            nodes: vec![TreeNode::Split {
                feature: 0,
                threshold: 0.0,
                left: 0,
                right: 0,
            }],
        };
        assert!(cyclic.predict(&[1.0]).is_none());
        let dangling = DecisionTree {
            nodes: vec![TreeNode::Split {
                feature: 0,
                threshold: 0.0,
                left: 7,
                right: 7,
            }],
        };
        assert!(dangling.predict(&[1.0]).is_none());
    }

    #[test]
    fn empty_forest_keeps_engine_order() {
        let forest = DecisionForest {
            table_order: vec![],
            trees: vec![],
        };
        assert_eq!(
            forest.ranked_engines(&QueryRep::read_only("q", &["x"])),
            Engine::ALL.to_vec()
        );
    }
}
