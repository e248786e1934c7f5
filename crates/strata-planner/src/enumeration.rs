//! Distance-bounded enumeration of placements and provisionings.
//!
//! Each (table, engine) membership is a switch. A placement at distance
//! `d` flips at most `d` switches of the current one. Placements that
//! leave a table with no location are still produced here; the placement
//! filter removes them.

use std::collections::BTreeMap;

use strata_core::provisioning::instance_classes;
use strata_core::{Engine, EngineSet, Placement, Provisioning};

/// Every placement within `max_moves` switch flips of `current`,
/// starting with `current` itself.
pub fn enumerate_placements(current: &[EngineSet], max_moves: usize) -> Vec<Placement> {
    let switches: Vec<(usize, Engine)> = (0..current.len())
        .flat_map(|t| Engine::ALL.into_iter().map(move |e| (t, e)))
        .collect();
    let mut placement = current.to_vec();
    let mut out = Vec::new();
    flip_from(0, max_moves, &switches, &mut placement, &mut out);
    out
}

fn flip_from(
    start: usize,
    remaining: usize,
    switches: &[(usize, Engine)],
    placement: &mut Placement,
    out: &mut Vec<Placement>,
) {
    out.push(placement.clone());
    if remaining == 0 {
        return;
    }
    for (i, &(table, engine)) in switches.iter().enumerate().skip(start) {
        placement[table] = placement[table].toggled(engine);
        flip_from(i + 1, remaining - 1, switches, placement, out);
        placement[table] = placement[table].toggled(engine);
    }
}

/// Provisionings within `steps` instance-class and node-count steps of
/// `base`, starting with `base`. Includes the zero-node configuration
/// when it is within reach. Serverless has nothing to provision.
pub fn enumerate_provisionings(engine: Engine, base: &Provisioning, steps: u32) -> Vec<Provisioning> {
    let mut out = vec![base.clone()];
    if engine == Engine::Serverless {
        return out;
    }
    let classes = instance_classes(engine);
    let Some(idx) = classes.iter().position(|c| c.name == base.instance_class) else {
        return out;
    };

    let reach = steps as usize;
    let lo = idx.saturating_sub(reach);
    let hi = (idx + reach).min(classes.len() - 1);
    for class in &classes[lo..=hi] {
        let min_nodes = base.num_nodes.saturating_sub(steps).max(class.min_nodes);
        let max_nodes = (base.num_nodes + steps).min(class.max_nodes);
        for nodes in min_nodes..=max_nodes {
            push_unique(&mut out, Provisioning::new(class.name, nodes));
        }
    }
    if base.num_nodes <= steps {
        push_unique(&mut out, Provisioning::new(&base.instance_class, 0));
    }
    out
}

fn push_unique(out: &mut Vec<Provisioning>, p: Provisioning) {
    if !out.contains(&p) {
        out.push(p);
    }
}

/// Cross product of the OLTP and warehouse provisioning neighborhoods.
/// The first entry is `base`.
pub fn provisioning_grid(
    base: &BTreeMap<Engine, Provisioning>,
    steps: u32,
) -> Vec<BTreeMap<Engine, Provisioning>> {
    let mut grid = vec![base.clone()];
    for engine in [Engine::Oltp, Engine::Warehouse] {
        let Some(current) = base.get(&engine) else {
            continue;
        };
        let options = enumerate_provisionings(engine, current, steps);
        grid = grid
            .iter()
            .flat_map(|entry| {
                options.iter().map(move |p| {
                    let mut next = entry.clone();
                    next.insert(engine, p.clone());
                    next
                })
            })
            .collect();
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_table_placement_counts() {
        let current = vec![EngineSet::only(Engine::Oltp)];
        assert_eq!(enumerate_placements(&current, 1).len(), 4);
        assert_eq!(enumerate_placements(&current, 2).len(), 7);
        assert_eq!(enumerate_placements(&current, 3).len(), 8);
        assert_eq!(enumerate_placements(&current, 5).len(), 8);
    }

    #[test]
    fn placements_are_unique_and_start_with_current() {
        let current = vec![EngineSet::only(Engine::Oltp), EngineSet::only(Engine::Warehouse)];
        let all = enumerate_placements(&current, 2);
        assert_eq!(all[0], current);
        // 6 switches: 1 + 6 + 15.
        assert_eq!(all.len(), 22);
        let mut dedup = all.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), all.len());
    }

    #[test]
    fn zero_moves_is_just_current() {
        let current = vec![EngineSet::all(); 3];
        assert_eq!(enumerate_placements(&current, 0), vec![current]);
    }

    #[test]
    fn provisioning_neighborhood() {
        let base = Provisioning::new("dc2.large", 1);
        let nearby = enumerate_provisionings(Engine::Warehouse, &base, 1);
        assert_eq!(nearby[0], base);
        assert!(nearby.contains(&Provisioning::new("dc2.large", 2)));
        assert!(nearby.contains(&Provisioning::new("ra3.xlplus", 1)));
        assert!(nearby.contains(&Provisioning::new("ra3.xlplus", 2)));
        assert!(nearby.contains(&Provisioning::new("dc2.large", 0)));
        assert!(!nearby.contains(&Provisioning::new("ra3.4xlarge", 2)));
        assert_eq!(nearby.len(), 5);
    }

    #[test]
    fn provisioning_respects_class_limits() {
        let base = Provisioning::new("ra3.xlplus", 1);
        let nearby = enumerate_provisionings(Engine::Warehouse, &base, 1);
        // ra3.4xlarge needs at least two nodes.
        assert!(nearby.contains(&Provisioning::new("ra3.4xlarge", 2)));
        assert!(!nearby.contains(&Provisioning::new("ra3.4xlarge", 1)));
    }

    #[test]
    fn turned_off_engine_can_turn_back_on() {
        let base = Provisioning::new("dc2.large", 0);
        let nearby = enumerate_provisionings(Engine::Warehouse, &base, 1);
        assert!(nearby.contains(&Provisioning::new("dc2.large", 1)));
    }

    #[test]
    fn serverless_is_never_reprovisioned() {
        let nearby = enumerate_provisionings(Engine::Serverless, &Provisioning::serverless(), 3);
        assert_eq!(nearby, vec![Provisioning::serverless()]);
    }

    #[test]
    fn grid_is_cross_product() {
        let base = BTreeMap::from([
            (Engine::Oltp, Provisioning::new("db.r6g.large", 1)),
            (Engine::Warehouse, Provisioning::new("dc2.large", 1)),
            (Engine::Serverless, Provisioning::serverless()),
        ]);
        let oltp = enumerate_provisionings(Engine::Oltp, &base[&Engine::Oltp], 1).len();
        let wh = enumerate_provisionings(Engine::Warehouse, &base[&Engine::Warehouse], 1).len();
        let grid = provisioning_grid(&base, 1);
        assert_eq!(grid.len(), oltp * wh);
        assert_eq!(grid[0], base);
        assert!(grid.iter().all(|g| g[&Engine::Serverless] == Provisioning::serverless()));
    }
}
