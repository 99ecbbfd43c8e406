//! Three-tier, tenant-scoped read cache.
//!
//! Entries live in exactly one of three tiers, each bounded by a byte cap and
//! a default TTL:
//!
//! | Tier | Default cap | Default TTL |
//! |------|-------------|-------------|
//! | L1   | 1 MiB       | 5 minutes   |
//! | L2   | 16 MiB      | 30 minutes  |
//! | L3   | 64 MiB      | 24 hours    |
//!
//! A write lands in the smallest tier whose cap fits the payload; within a
//! tier, least recently used entries are evicted to make room. Entries read
//! more than the promotion threshold move to L1 with a fresh L1 TTL.
//!
//! Keys are [`CacheKey`]s, which always carry a tenant, and every entry is
//! tagged `tenant:<id>` so one call to [`TieredCache::invalidate`] can drop a
//! tenant's (or a resource's) cached reads across all tiers.
//!
//! Each tier has its own mutex and no operation holds two tier locks at once.
//! Every write is stamped with a version from a global counter; after a write
//! or a promotion the other tiers are checked, older copies are dropped and a
//! copy that lost to a newer version removes itself, so one key is never live
//! in two tiers.
//!
//! [`TieredCache::get_or_compute`] never caches a value computed across an
//! invalidation: the cache keeps an invalidation epoch, and a result whose
//! computation started before the latest [`TieredCache::invalidate`] is
//! returned to the caller but not stored.
//!
//! Cache failures never reach callers: serialization errors and oversized
//! payloads are logged and behave like a miss.

pub mod key;
pub mod sweeper;
pub mod tier;

use bytes::Bytes;
use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use tier::{Entry, Tier};

pub use key::{CacheKey, resource_tag, tenant_tag};
pub use sweeper::run_cache_sweeper;
pub use tier::TierLevel;

/// Longest lifetime an entry can be given; longer TTLs are clamped
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now + ttl.min(MAX_TTL)
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to serialize cache value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payload of {size} bytes exceeds the largest tier ({max_bytes} bytes)")]
    TooLarge { size: usize, max_bytes: usize },
}

/// Per-tier occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub level: TierLevel,
    pub entries: usize,
    pub bytes: usize,
    pub max_bytes: usize,
}

/// Counters since construction plus current occupancy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub promotions: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub expirations: u64,
    pub tiers: Vec<TierStats>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    expirations: AtomicU64,
}

#[derive(Debug)]
pub struct TieredCache {
    tiers: [Tier; 3],
    promotion_threshold: u64,
    /// Shared by access stamps and write versions; both only need to be increasing
    sequence: AtomicU64,
    /// Bumped by every invalidation, before entries are removed
    epoch: AtomicU64,
    counters: Counters,
}

impl TieredCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            tiers: [
                Tier::new(TierLevel::L1, config.l1.max_bytes, config.l1.ttl),
                Tier::new(TierLevel::L2, config.l2.max_bytes, config.l2.ttl),
                Tier::new(TierLevel::L3, config.l3.max_bytes, config.l3.ttl),
            ],
            promotion_threshold: config.promotion_threshold,
            sequence: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn tier(&self, level: TierLevel) -> &Tier {
        &self.tiers[level.index()]
    }

    /// Look up `key` in L1, L2 then L3.
    ///
    /// An expired entry is removed and counts as a miss. A live hit may
    /// promote the entry to L1.
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let now = Instant::now();

        for tier in &self.tiers {
            let sequence = self.next_sequence();
            let mut state = tier.state.lock();

            match state.entries.get(key.as_str()) {
                None => continue,
                Some(entry) if entry.is_expired(now) => {
                    state.remove(key.as_str());
                    self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %key, tier = %tier.level, "Expired entry removed on read");
                    continue;
                }
                Some(_) => {}
            }

            let Some(entry) = state.touch(key.as_str(), sequence) else {
                continue;
            };
            let payload = entry.payload.clone();
            let promote = tier.level != TierLevel::L1
                && entry.access_count > self.promotion_threshold
                && entry.size() <= self.tier(TierLevel::L1).max_bytes;
            let version = entry.version;
            trace!(key = %key, tier = %tier.level, age_ms = entry.created_at.elapsed().as_millis() as u64, "Cache hit");
            drop(state);

            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            counter!("spacectl_cache_hits_total", "tier" => tier.level.as_str()).increment(1);

            if promote {
                self.promote(key, tier.level, version);
            }
            return Some(payload);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        counter!("spacectl_cache_misses_total").increment(1);
        None
    }

    /// Move `key` from `from` to L1, provided the entry there is still `version`
    fn promote(&self, key: &CacheKey, from: TierLevel, version: u64) {
        let entry = {
            let mut state = self.tier(from).state.lock();
            match state.entries.get(key.as_str()) {
                Some(entry) if entry.version == version => state.remove(key.as_str()),
                _ => None,
            }
        };
        let Some(mut entry) = entry else {
            return;
        };

        let l1 = self.tier(TierLevel::L1);
        entry.expires_at = expiry(Instant::now(), l1.ttl);
        {
            let mut state = l1.state.lock();
            if state.entries.get(key.as_str()).is_some_and(|existing| existing.version > version) {
                return;
            }
            let evicted = state.insert(key.as_str().to_string(), entry, l1.max_bytes);
            self.record_evictions(TierLevel::L1, evicted);
        }

        self.counters.promotions.fetch_add(1, Ordering::Relaxed);
        counter!("spacectl_cache_promotions_total", "from" => from.as_str()).increment(1);
        debug!(key = %key, from = %from, "Promoted cache entry to l1");

        self.settle(key, TierLevel::L1, version);
    }

    /// Store `payload` under `key` in the smallest tier that fits.
    ///
    /// `ttl` defaults to the tier's TTL and is capped at [`MAX_TTL`]. The
    /// key's tenant tag is always added.
    pub fn set(&self, key: &CacheKey, payload: Bytes, ttl: Option<Duration>, tags: &[String]) -> Result<TierLevel, CacheError> {
        self.set_in(key, payload, TierLevel::L1, ttl, tags)
    }

    /// Like [`set`](Self::set) but never places the entry above `lowest`.
    ///
    /// Lets callers park results they expect to be read rarely in a colder
    /// tier; frequent reads will still promote them to L1.
    pub fn set_in(
        &self,
        key: &CacheKey,
        payload: Bytes,
        lowest: TierLevel,
        ttl: Option<Duration>,
        tags: &[String],
    ) -> Result<TierLevel, CacheError> {
        self.write(key, payload, lowest, ttl, tags).map(|(level, _)| level)
    }

    /// Insert an entry and return where it landed and its version
    fn write(
        &self,
        key: &CacheKey,
        payload: Bytes,
        lowest: TierLevel,
        ttl: Option<Duration>,
        tags: &[String],
    ) -> Result<(TierLevel, u64), CacheError> {
        let size = payload.len();
        let tier = self
            .tiers
            .iter()
            .filter(|tier| tier.level >= lowest)
            .find(|tier| size <= tier.max_bytes)
            .ok_or(CacheError::TooLarge {
                size,
                max_bytes: self.tier(TierLevel::L3).max_bytes,
            })?;

        let mut tag_set: HashSet<String> = tags.iter().cloned().collect();
        tag_set.insert(tenant_tag(key.tenant_id()));

        let version = self.next_sequence();
        let now = Instant::now();
        let entry = Entry {
            payload,
            created_at: now,
            expires_at: expiry(now, ttl.unwrap_or(tier.ttl)),
            last_access: version,
            access_count: 0,
            tags: tag_set,
            version,
        };

        let evicted = tier.state.lock().insert(key.as_str().to_string(), entry, tier.max_bytes);
        self.record_evictions(tier.level, evicted);
        trace!(key = %key, tier = %tier.level, size, "Cache set");

        self.settle(key, tier.level, version);
        Ok((tier.level, version))
    }

    /// Remove `key` wherever it is still at `version`
    fn remove_version(&self, key: &CacheKey, version: u64) {
        for tier in &self.tiers {
            let mut state = tier.state.lock();
            if state.entries.get(key.as_str()).is_some_and(|entry| entry.version == version) {
                state.remove(key.as_str());
            }
        }
    }

    /// Enforce a single live copy after writing `version` of `key` into `written`.
    ///
    /// Older copies in other tiers are removed; if a newer copy exists
    /// elsewhere, the one just written is removed instead.
    fn settle(&self, key: &CacheKey, written: TierLevel, version: u64) {
        let mut superseded = false;
        for tier in self.tiers.iter().filter(|tier| tier.level != written) {
            let mut state = tier.state.lock();
            match state.entries.get(key.as_str()).map(|entry| entry.version) {
                Some(other) if other < version => {
                    state.remove(key.as_str());
                }
                Some(other) if other > version => superseded = true,
                _ => {}
            }
        }

        if superseded {
            let mut state = self.tier(written).state.lock();
            if state.entries.get(key.as_str()).is_some_and(|entry| entry.version == version) {
                state.remove(key.as_str());
            }
        }
    }

    fn record_evictions(&self, level: TierLevel, evicted: usize) {
        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            counter!("spacectl_cache_evictions_total", "tier" => level.as_str()).increment(evicted as u64);
            debug!(tier = %level, evicted, "Evicted least recently used entries");
        }
    }

    /// Remove every entry whose key contains `pattern` or whose tags intersect `tags`.
    pub fn invalidate(&self, pattern: Option<&str>, tags: &[String]) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut removed = 0;
        for tier in &self.tiers {
            removed += tier.state.lock().remove_where(|key, entry| {
                pattern.is_some_and(|pattern| key.contains(pattern)) || tags.iter().any(|tag| entry.tags.contains(tag))
            });
        }

        if removed > 0 {
            self.counters.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
            counter!("spacectl_cache_invalidations_total").increment(removed as u64);
        }
        debug!(?pattern, ?tags, removed, "Invalidated cache entries");
        removed
    }

    /// Remove expired entries from every tier
    pub fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for tier in &self.tiers {
            removed += tier.state.lock().remove_where(|_, entry| entry.is_expired(now));
        }

        if removed > 0 {
            self.counters.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            counter!("spacectl_cache_expirations_total").increment(removed as u64);
        }
        removed
    }

    /// Typed read; a payload that no longer deserializes is treated as a miss
    pub fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let payload = self.get(key)?;
        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached payload failed to deserialize");
                None
            }
        }
    }

    /// Typed write. Returns whether the value was cached.
    pub fn set_json<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T, ttl: Option<Duration>, tags: &[String]) -> bool {
        self.write_json(key, value, ttl, tags).is_some()
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T, ttl: Option<Duration>, tags: &[String]) -> Option<u64> {
        let result = serde_json::to_vec(value)
            .map_err(CacheError::from)
            .and_then(|payload| self.write(key, Bytes::from(payload), TierLevel::L1, ttl, tags));
        match result {
            Ok((_, version)) => Some(version),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed");
                None
            }
        }
    }

    /// Read-through: serve `key` from the cache or run `compute` and cache its result.
    ///
    /// Errors from `compute` are returned and nothing is cached. Neither is a
    /// value when any invalidation ran while it was being computed.
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &CacheKey, ttl: Option<Duration>, tags: &[String], compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get_json(key) {
            return Ok(value);
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        let value = compute().await?;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(key = %key, "Invalidated during compute, not caching");
            return Ok(value);
        }

        // An invalidation between the check and the write has either removed
        // the entry already or bumped the epoch before we look again
        if let Some(version) = self.write_json(key, &value, ttl, tags) {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                self.remove_version(key, version);
            }
        }
        Ok(value)
    }

    pub fn stats(&self) -> CacheStats {
        let tiers = self
            .tiers
            .iter()
            .map(|tier| {
                let state = tier.state.lock();
                TierStats {
                    level: tier.level,
                    entries: state.entries.len(),
                    bytes: state.bytes(),
                    max_bytes: tier.max_bytes,
                }
            })
            .collect();

        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            tiers,
        }
    }

    /// Tiers currently holding `key`, expired or not
    #[cfg(test)]
    fn locate(&self, key: &CacheKey) -> Vec<TierLevel> {
        self.tiers
            .iter()
            .filter(|tier| tier.state.lock().entries.contains_key(key.as_str()))
            .map(|tier| tier.level)
            .collect()
    }
}
