//! Location routing: narrow a query to the engines holding all its tables.

use std::collections::BTreeMap;

use strata_core::{Engine, EngineSet, QueryRep};

use crate::error::{RoutingError, RoutingResult};

/// Intersect the locations of every table the query references.
///
/// Names missing from `bitmap` (CTE aliases, table functions) do not
/// constrain the result. Returns the narrowed set and, when exactly one
/// engine remains, that engine.
pub fn location_routing(
    query: &QueryRep,
    bitmap: &BTreeMap<String, EngineSet>,
) -> RoutingResult<(EngineSet, Option<Engine>)> {
    let valid = query
        .tables
        .iter()
        .filter_map(|t| bitmap.get(t))
        .fold(EngineSet::all(), |acc, locations| acc.intersection(*locations));

    if valid.is_empty() {
        return Err(RoutingError::NoCommonEngine {
            tables: query.tables.clone(),
        });
    }
    Ok((valid, valid.single()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(entries: &[(&str, EngineSet)]) -> BTreeMap<String, EngineSet> {
        entries.iter().map(|(n, s)| (n.to_string(), *s)).collect()
    }

    #[test]
    fn single_location_short_circuits() {
        let map = bitmap(&[("t1", EngineSet::only(Engine::Oltp))]);
        let query = QueryRep::read_only("q", &["t1"]);
        assert_eq!(
            location_routing(&query, &map).unwrap(),
            (EngineSet::only(Engine::Oltp), Some(Engine::Oltp))
        );
    }

    #[test]
    fn ambiguous_set_is_left_to_policies() {
        let ws = EngineSet::from(vec![Engine::Warehouse, Engine::Serverless]);
        let map = bitmap(&[("t1", EngineSet::all()), ("t2", ws)]);
        let query = QueryRep::read_only("q", &["t1", "t2"]);
        assert_eq!(location_routing(&query, &map).unwrap(), (ws, None));
    }

    #[test]
    fn disjoint_tables_fail() {
        let map = bitmap(&[
            ("a", EngineSet::only(Engine::Oltp)),
            ("b", EngineSet::only(Engine::Serverless)),
        ]);
        let query = QueryRep::read_only("q", &["a", "b"]);
        let err = location_routing(&query, &map).unwrap_err();
        assert!(matches!(err, RoutingError::NoCommonEngine { tables } if tables == ["a", "b"]));
    }

    #[test]
    fn unknown_names_are_unconstrained() {
        let map = bitmap(&[("a", EngineSet::only(Engine::Warehouse))]);
        let query = QueryRep::read_only("q", &["a", "recent_cte"]);
        assert_eq!(
            location_routing(&query, &map).unwrap().1,
            Some(Engine::Warehouse)
        );
        let only_cte = QueryRep::read_only("q", &["recent_cte"]);
        assert_eq!(location_routing(&only_cte, &map).unwrap(), (EngineSet::all(), None));
    }
}
