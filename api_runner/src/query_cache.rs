//! Process-local query cache with per-entry TTL and targeted invalidation

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::felt::{felt_to_hex, Felt};

/// Assets with a cached USD quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceAsset {
    Bitcoin,
    BitUsd,
}

/// Identity of a cached query. Addresses are normalized hex strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum QueryKey {
    Price {
        asset: PriceAsset,
    },
    OwnerPositions {
        owner: String,
        trove_manager: String,
    },
    UserPositions {
        owner: String,
    },
    Balance {
        chain_id: String,
        token: String,
        address: String,
        block: String,
    },
    StakedAmount {
        address: String,
        stability_pool: String,
    },
    ClaimableRewards {
        address: String,
        stability_pool: String,
    },
}

impl QueryKey {
    /// Token balance at the latest block
    pub fn latest_balance(chain_id: &str, token: &str, address: &str) -> Self {
        QueryKey::Balance {
            chain_id: chain_id.to_string(),
            token: token.to_string(),
            address: address.to_string(),
            block: "latest".to_string(),
        }
    }

    pub fn token_balance(chain_id: &str, token: Felt, owner: Felt) -> Self {
        Self::latest_balance(chain_id, &felt_to_hex(&token), &felt_to_hex(&owner))
    }

    pub fn owner_positions(owner: Felt, trove_manager: Felt) -> Self {
        QueryKey::OwnerPositions {
            owner: felt_to_hex(&owner),
            trove_manager: felt_to_hex(&trove_manager),
        }
    }

    pub fn user_positions(owner: Felt) -> Self {
        QueryKey::UserPositions {
            owner: felt_to_hex(&owner),
        }
    }

    pub fn staked_amount(owner: Felt, stability_pool: Felt) -> Self {
        QueryKey::StakedAmount {
            address: felt_to_hex(&owner),
            stability_pool: felt_to_hex(&stability_pool),
        }
    }

    pub fn claimable_rewards(owner: Felt, stability_pool: Felt) -> Self {
        QueryKey::ClaimableRewards {
            address: felt_to_hex(&owner),
            stability_pool: felt_to_hex(&stability_pool),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Cache statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn calculate_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
    }
}

#[derive(Clone)]
pub struct QueryCache {
    entries: Arc<RwLock<HashMap<QueryKey, CacheEntry>>>,
    stats: Arc<RwLock<CacheStats>>,
    default_ttl: Duration,
}

impl QueryCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(CacheStats::default())),
            default_ttl,
        }
    }

    /// Fresh value for `key`, if present and decodable
    pub async fn get<T>(&self, key: &QueryKey) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(key).cloned()
        };

        match entry {
            Some(entry) if entry.expires_at > Instant::now() => {
                match serde_json::from_value::<T>(entry.value) {
                    Ok(value) => {
                        debug!(?key, "Cache HIT");
                        self.stats.write().await.hits += 1;
                        Some(value)
                    }
                    Err(e) => {
                        warn!(?key, error = %e, "Failed to decode cached value");
                        self.stats.write().await.errors += 1;
                        None
                    }
                }
            }
            Some(_) => {
                debug!(?key, "Cache MISS (expired)");
                self.evict_if_expired(key).await;
                self.stats.write().await.misses += 1;
                None
            }
            None => {
                debug!(?key, "Cache MISS");
                self.stats.write().await.misses += 1;
                None
            }
        }
    }

    /// Remove `key` if it is still expired once the write lock is held;
    /// a concurrent `set` may have refreshed it in between.
    async fn evict_if_expired(&self, key: &QueryKey) {
        let mut entries = self.entries.write().await;
        let expired = entries
            .get(key)
            .map_or(false, |entry| entry.expires_at <= Instant::now());
        if expired {
            entries.remove(key);
            drop(entries);
            self.stats.write().await.expirations += 1;
        }
    }

    pub async fn set<T>(&self, key: QueryKey, value: &T, ttl: Option<Duration>)
    where
        T: Serialize,
    {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(?key, error = %e, "Failed to encode value for cache");
                self.stats.write().await.errors += 1;
                return;
            }
        };

        let now = Instant::now();
        let expires_at = now + ttl.unwrap_or(self.default_ttl);

        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let swept = (before - entries.len()) as u64;
        entries.insert(key, CacheEntry { value, expires_at });
        drop(entries);

        let mut stats = self.stats.write().await;
        stats.sets += 1;
        stats.expirations += swept;
    }

    /// Cached value, or run `fetch` and cache its success.
    /// Failures are returned and never cached.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: QueryKey,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(&key).await {
            return Ok(value);
        }
        let value = fetch().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Drop one entry. Returns whether it was present.
    pub async fn invalidate(&self, key: &QueryKey) -> bool {
        let removed = self.entries.write().await.remove(key).is_some();
        self.stats.write().await.invalidations += 1;
        debug!(?key, removed, "Cache invalidated");
        removed
    }

    pub async fn contains(&self, key: &QueryKey) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().await.clone();
        stats.calculate_hit_rate();
        stats
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
