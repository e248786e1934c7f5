//! Router — maps each query to one engine under the active blueprint.
//!
//! Resolution order for a read-only query:
//! 1. location routing; a unique engine is returned immediately
//! 2. indefinite policies in order, skipping any that decline
//! 3. the definite policy
//! 4. the first engine of the narrowed set
//!
//! A policy answer outside the narrowed set is discarded. A router is
//! single-writer: concurrent callers must hold their own router or
//! synchronize externally.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use strata_core::{Blueprint, Engine, EngineSet, QueryRep};

use crate::cache::{PolicyAssetLoader, PolicyCache};
use crate::error::{RoutingError, RoutingResult};
use crate::location::location_routing;
use crate::policy::Policy;

pub struct Router {
    bitmap: BTreeMap<String, EngineSet>,
    indefinite: Vec<Policy>,
    definite: Policy,
    cache: PolicyCache,
    loader: Arc<dyn PolicyAssetLoader>,
}

impl Router {
    pub fn new(blueprint: &Blueprint, cache: PolicyCache, loader: Arc<dyn PolicyAssetLoader>) -> Self {
        let spec = blueprint.routing_policy();
        Self {
            bitmap: blueprint.location_bitmap(),
            indefinite: spec.indefinite.iter().map(Policy::from_ref).collect(),
            definite: Policy::from_ref(&spec.definite),
            cache,
            loader,
        }
    }

    /// Rebuild against a newly published blueprint. Assets already in the
    /// shared cache are reused.
    pub fn update_blueprint(&mut self, blueprint: &Blueprint) {
        *self = Self::new(blueprint, self.cache.clone(), self.loader.clone());
    }

    /// Route any statement. Transactional statements always go to OLTP.
    pub async fn route(&mut self, query: &QueryRep) -> RoutingResult<Engine> {
        if query.transactional {
            return Ok(Engine::Oltp);
        }
        self.engine_for(query).await
    }

    /// Route a read-only query.
    pub async fn engine_for(&mut self, query: &QueryRep) -> RoutingResult<Engine> {
        let (valid, single) = location_routing(query, &self.bitmap)?;
        if let Some(engine) = single {
            return Ok(engine);
        }

        for policy in self.indefinite.iter_mut() {
            policy.ensure_loaded(&self.cache, self.loader.as_ref()).await;
            if let Some(engine) = accept(policy, query, valid) {
                return Ok(engine);
            }
        }

        self.definite
            .ensure_loaded(&self.cache, self.loader.as_ref())
            .await;
        if let Some(engine) = accept(&mut self.definite, query, valid) {
            return Ok(engine);
        }

        valid.first().ok_or_else(|| RoutingError::NoCommonEngine {
            tables: query.tables.clone(),
        })
    }
}

fn accept(policy: &mut Policy, query: &QueryRep, valid: EngineSet) -> Option<Engine> {
    let engine = policy.engine_for(query, valid)?;
    if valid.contains(engine) {
        Some(engine)
    } else {
        debug!(
            policy = policy.name(),
            %engine,
            %valid,
            fingerprint = %query.fingerprint,
            "policy chose an engine outside the valid set"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use strata_core::{PolicyRef, Provisioning, RoutingPolicySpec, Table};

    use super::*;
    use crate::cache::CachedDecisions;

    struct MapLoader(BTreeMap<String, Vec<u8>>);

    #[async_trait]
    impl PolicyAssetLoader for MapLoader {
        async fn load(&self, name: &str) -> anyhow::Result<Vec<u8>> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing {name}"))
        }
    }

    fn blueprint(policy: RoutingPolicySpec) -> Blueprint {
        Blueprint::new(
            "shop",
            vec![
                Table::new("orders", EngineSet::all()).transactional(),
                Table::new(
                    "events",
                    EngineSet::from(vec![Engine::Warehouse, Engine::Serverless]),
                ),
                Table::new("carts", EngineSet::only(Engine::Oltp)),
            ],
            BTreeMap::from([
                (Engine::Oltp, Provisioning::new("db.r6g.large", 1)),
                (Engine::Warehouse, Provisioning::new("dc2.large", 1)),
                (Engine::Serverless, Provisioning::serverless()),
            ]),
            policy,
        )
        .unwrap()
    }

    fn router(policy: RoutingPolicySpec, assets: &[(&str, Vec<u8>)]) -> Router {
        let loader = MapLoader(
            assets
                .iter()
                .map(|(n, b)| (n.to_string(), b.clone()))
                .collect(),
        );
        Router::new(&blueprint(policy), PolicyCache::new(), Arc::new(loader))
    }

    fn definite(policy: PolicyRef) -> RoutingPolicySpec {
        RoutingPolicySpec {
            indefinite: vec![],
            definite: policy,
        }
    }

    #[tokio::test]
    async fn unique_location_bypasses_policies() {
        let mut r = router(definite(PolicyRef::AlwaysOne { engine: Engine::Serverless }), &[]);
        let q = QueryRep::read_only("q", &["orders", "carts"]);
        assert_eq!(r.engine_for(&q).await.unwrap(), Engine::Oltp);
    }

    #[tokio::test]
    async fn transactional_statements_pin_to_oltp() {
        let mut r = router(definite(PolicyRef::AlwaysOne { engine: Engine::Serverless }), &[]);
        let q = QueryRep::transactional("t", &["orders"]);
        assert_eq!(r.route(&q).await.unwrap(), Engine::Oltp);
    }

    #[tokio::test]
    async fn no_common_engine_is_an_error() {
        let mut r = router(RoutingPolicySpec::default(), &[]);
        let q = QueryRep::read_only("q", &["events", "carts"]);
        assert!(matches!(
            r.engine_for(&q).await,
            Err(RoutingError::NoCommonEngine { .. })
        ));
    }

    #[tokio::test]
    async fn out_of_set_answer_falls_through() {
        // AlwaysOne(Oltp) is invalid for `events`; fall back to first bit.
        let mut r = router(definite(PolicyRef::AlwaysOne { engine: Engine::Oltp }), &[]);
        let q = QueryRep::read_only("q", &["events"]);
        assert_eq!(r.engine_for(&q).await.unwrap(), Engine::Warehouse);
    }

    #[tokio::test]
    async fn round_robin_alternates_within_valid_set() {
        let mut r = router(definite(PolicyRef::RoundRobin), &[]);
        let q = QueryRep::read_only("q", &["events"]);
        let picks = [
            r.engine_for(&q).await.unwrap(),
            r.engine_for(&q).await.unwrap(),
            r.engine_for(&q).await.unwrap(),
        ];
        assert_eq!(picks, [Engine::Warehouse, Engine::Serverless, Engine::Warehouse]);
    }

    #[tokio::test]
    async fn cached_hit_then_miss_falls_back_to_definite() {
        let decisions = CachedDecisions::from([("hot".to_string(), Engine::Serverless)]);
        let spec = RoutingPolicySpec {
            indefinite: vec![PolicyRef::Cached {
                asset: "decisions".into(),
            }],
            definite: PolicyRef::RuleBased,
        };
        let mut r = router(spec, &[("decisions", serde_json::to_vec(&decisions).unwrap())]);

        let hot = QueryRep::read_only("hot", &["events"]);
        let cold = QueryRep::read_only("cold", &["events"]);
        assert_eq!(r.engine_for(&hot).await.unwrap(), Engine::Serverless);
        assert_eq!(r.engine_for(&cold).await.unwrap(), Engine::Warehouse);
    }

    #[tokio::test]
    async fn missing_asset_degrades_to_definite_policy() {
        let spec = RoutingPolicySpec {
            indefinite: vec![PolicyRef::LearnedForest {
                asset: "absent".into(),
            }],
            definite: PolicyRef::AlwaysOne {
                engine: Engine::Serverless,
            },
        };
        let mut r = router(spec, &[]);
        let q = QueryRep::read_only("q", &["events"]);
        assert_eq!(r.engine_for(&q).await.unwrap(), Engine::Serverless);
    }

    #[tokio::test]
    async fn missing_asset_is_fetched_once_across_queries() {
        let spec = RoutingPolicySpec {
            indefinite: vec![PolicyRef::LearnedForest {
                asset: "absent".into(),
            }],
            definite: PolicyRef::RuleBased,
        };
        let cache = PolicyCache::new();
        let mut r = Router::new(
            &blueprint(spec),
            cache.clone(),
            Arc::new(MapLoader(BTreeMap::new())),
        );
        let q = QueryRep::read_only("q", &["events"]);
        for _ in 0..5 {
            assert_eq!(r.engine_for(&q).await.unwrap(), Engine::Warehouse);
        }
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test]
    async fn shared_cache_survives_blueprint_update() {
        let decisions = CachedDecisions::from([("hot".to_string(), Engine::Serverless)]);
        let spec = RoutingPolicySpec {
            indefinite: vec![PolicyRef::Cached {
                asset: "decisions".into(),
            }],
            definite: PolicyRef::RuleBased,
        };
        let cache = PolicyCache::new();
        let loader = Arc::new(MapLoader(BTreeMap::from([(
            "decisions".to_string(),
            serde_json::to_vec(&decisions).unwrap(),
        )])));
        let bp = blueprint(spec);
        let mut r = Router::new(&bp, cache.clone(), loader);
        let hot = QueryRep::read_only("hot", &["events"]);

        r.engine_for(&hot).await.unwrap();
        r.update_blueprint(&bp);
        assert_eq!(r.engine_for(&hot).await.unwrap(), Engine::Serverless);
        assert_eq!(cache.fetch_count(), 1);
    }
}
