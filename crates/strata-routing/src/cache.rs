//! Lazily loaded routing assets.
//!
//! Cached-decision maps and forest models are fetched on first use and
//! kept in a `PolicyCache` shared by every router in the process, so
//! rebuilding a router after a blueprint swap does not refetch them.
//! A failed fetch is remembered too: lookups inside the retry window
//! fail fast with [`RoutingError::AssetUnavailable`] instead of calling
//! the loader again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use strata_core::Engine;
use strata_state::StateStore;

use crate::error::{RoutingError, RoutingResult};
use crate::forest::DecisionForest;

/// Query fingerprint to engine, produced by a prior planning run.
pub type CachedDecisions = HashMap<String, Engine>;

/// Fetches raw routing assets by name.
#[async_trait]
pub trait PolicyAssetLoader: Send + Sync {
    async fn load(&self, name: &str) -> anyhow::Result<Vec<u8>>;
}

/// Loads assets from the state store of one schema.
pub struct StoreAssetLoader {
    store: StateStore,
    schema: String,
}

impl StoreAssetLoader {
    pub fn new(store: StateStore, schema: &str) -> Self {
        Self {
            store,
            schema: schema.to_string(),
        }
    }
}

#[async_trait]
impl PolicyAssetLoader for StoreAssetLoader {
    async fn load(&self, name: &str) -> anyhow::Result<Vec<u8>> {
        self.store
            .get_asset(&self.schema, name)?
            .ok_or_else(|| anyhow::anyhow!("asset {name} not found in schema {}", self.schema))
    }
}

/// How long a failed fetch is remembered before the loader is tried again.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug)]
enum LoadedAsset {
    Cached(Arc<CachedDecisions>),
    Forest(Arc<DecisionForest>),
    Failed { reason: String, at: Instant },
}

#[derive(Clone)]
pub struct PolicyCache {
    assets: Arc<Mutex<HashMap<String, LoadedAsset>>>,
    fetches: Arc<AtomicUsize>,
    retry_after: Duration,
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self {
            assets: Arc::default(),
            fetches: Arc::default(),
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }
}

impl PolicyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub async fn cached_decisions(
        &self,
        name: &str,
        loader: &dyn PolicyAssetLoader,
    ) -> RoutingResult<Arc<CachedDecisions>> {
        let mut assets = self.assets.lock().await;
        match assets.get(name) {
            Some(LoadedAsset::Cached(decisions)) => return Ok(decisions.clone()),
            Some(LoadedAsset::Failed { reason, at }) if at.elapsed() < self.retry_after => {
                return Err(unavailable(name, reason));
            }
            _ => {}
        }
        match self.fetch(name, loader).await {
            Ok(decisions) => {
                let decisions: Arc<CachedDecisions> = Arc::new(decisions);
                assets.insert(name.to_string(), LoadedAsset::Cached(decisions.clone()));
                Ok(decisions)
            }
            Err(e) => Err(self.remember_failure(&mut assets, name, e)),
        }
    }

    pub async fn forest(
        &self,
        name: &str,
        loader: &dyn PolicyAssetLoader,
    ) -> RoutingResult<Arc<DecisionForest>> {
        let mut assets = self.assets.lock().await;
        match assets.get(name) {
            Some(LoadedAsset::Forest(forest)) => return Ok(forest.clone()),
            Some(LoadedAsset::Failed { reason, at }) if at.elapsed() < self.retry_after => {
                return Err(unavailable(name, reason));
            }
            _ => {}
        }
        match self.fetch(name, loader).await {
            Ok(forest) => {
                let forest: Arc<DecisionForest> = Arc::new(forest);
                assets.insert(name.to_string(), LoadedAsset::Forest(forest.clone()));
                Ok(forest)
            }
            Err(e) => Err(self.remember_failure(&mut assets, name, e)),
        }
    }

    fn remember_failure(
        &self,
        assets: &mut HashMap<String, LoadedAsset>,
        name: &str,
        err: RoutingError,
    ) -> RoutingError {
        warn!(
            asset = name,
            error = %err,
            retry_after_secs = self.retry_after.as_secs(),
            "routing asset fetch failed"
        );
        assets.insert(
            name.to_string(),
            LoadedAsset::Failed {
                reason: err.to_string(),
                at: Instant::now(),
            },
        );
        err
    }

    /// Number of remote fetches performed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        name: &str,
        loader: &dyn PolicyAssetLoader,
    ) -> RoutingResult<T> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let bytes = loader
            .load(name)
            .await
            .map_err(|e| RoutingError::AssetLoad {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        debug!(asset = name, len = bytes.len(), "routing asset fetched");
        serde_json::from_slice(&bytes).map_err(|source| RoutingError::AssetDecode {
            name: name.to_string(),
            source,
        })
    }
}

fn unavailable(name: &str, reason: &str) -> RoutingError {
    RoutingError::AssetUnavailable {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_from_store_once() {
        let store = StateStore::open_in_memory().unwrap();
        let decisions = CachedDecisions::from([("q1".to_string(), Engine::Warehouse)]);
        store
            .put_asset("shop", "decisions", &serde_json::to_vec(&decisions).unwrap())
            .unwrap();
        let loader = StoreAssetLoader::new(store, "shop");
        let cache = PolicyCache::new();

        let first = cache.cached_decisions("decisions", &loader).await.unwrap();
        let second = cache.cached_decisions("decisions", &loader).await.unwrap();
        assert_eq!(first.get("q1"), Some(&Engine::Warehouse));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test]
    async fn missing_asset_is_a_load_error() {
        let loader = StoreAssetLoader::new(StateStore::open_in_memory().unwrap(), "shop");
        let err = PolicyCache::new().forest("nope", &loader).await.unwrap_err();
        assert!(matches!(err, RoutingError::AssetLoad { name, .. } if name == "nope"));
    }

    #[tokio::test]
    async fn garbage_asset_is_a_decode_error() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_asset("shop", "forest", b"not json").unwrap();
        let loader = StoreAssetLoader::new(store, "shop");
        let err = PolicyCache::new().forest("forest", &loader).await.unwrap_err();
        assert!(matches!(err, RoutingError::AssetDecode { .. }));
    }

    #[tokio::test]
    async fn failed_fetch_is_not_retried_inside_window() {
        let loader = StoreAssetLoader::new(StateStore::open_in_memory().unwrap(), "shop");
        let cache = PolicyCache::new();

        assert!(matches!(
            cache.forest("nope", &loader).await,
            Err(RoutingError::AssetLoad { .. })
        ));
        for _ in 0..3 {
            assert!(matches!(
                cache.forest("nope", &loader).await,
                Err(RoutingError::AssetUnavailable { .. })
            ));
        }
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_retried_after_window() {
        let store = StateStore::open_in_memory().unwrap();
        let loader = StoreAssetLoader::new(store.clone(), "shop");
        let cache = PolicyCache::new().with_retry_after(Duration::ZERO);

        assert!(cache.cached_decisions("decisions", &loader).await.is_err());
        let decisions = CachedDecisions::from([("q1".to_string(), Engine::Oltp)]);
        store
            .put_asset("shop", "decisions", &serde_json::to_vec(&decisions).unwrap())
            .unwrap();

        let loaded = cache.cached_decisions("decisions", &loader).await.unwrap();
        assert_eq!(loaded.get("q1"), Some(&Engine::Oltp));
        assert_eq!(cache.fetch_count(), 2);
    }
}
