//! Explicit per-session cache of derived per-gauge tables.
//!
//! Four typed slots (observed series, forecast series with its issue time,
//! ensemble run, percentile bands), each keyed by gauge id. Entries expire
//! once their age is strictly greater than the TTL; the clock is passed in
//! by the caller.
//! The cache is advisory: callers recompute on a miss, and `bypass` drops
//! everything held for a gauge before the lookup.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::analysis::percentiles::PercentileBandSet;
use crate::config::CacheConfig;
use crate::ingest::hefs::EnsembleFetch;
use crate::logging::{self, Component};
use crate::model::NormalizedSeries;
use crate::view::ForecastSeries;

/// True when an entry stored at `stored_at` is older than `ttl` at `now`.
pub fn is_expired_at(stored_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    now - stored_at > ttl
}

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    stored_at: DateTime<Utc>,
}

/// One kind of cached value, keyed by gauge id.
#[derive(Debug, Clone)]
pub struct Slot<T> {
    name: &'static str,
    ttl: Duration,
    entries: BTreeMap<String, Entry<T>>,
}

impl<T> Slot<T> {
    fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: BTreeMap::new(),
        }
    }

    /// Live value for `gauge_id`; an expired entry is evicted and misses.
    pub fn get(&mut self, gauge_id: &str, now: DateTime<Utc>) -> Option<&T> {
        let expired = self
            .entries
            .get(gauge_id)
            .is_some_and(|e| is_expired_at(e.stored_at, self.ttl, now));
        if expired {
            logging::debug(Component::Cache, Some(gauge_id), &format!("{} entry expired", self.name));
            self.entries.remove(gauge_id);
        }
        self.entries.get(gauge_id).map(|e| &e.value)
    }

    pub fn insert(&mut self, gauge_id: &str, value: T, now: DateTime<Utc>) {
        self.entries.insert(
            gauge_id.to_string(),
            Entry {
                value,
                stored_at: now,
            },
        );
    }

    /// Cached value, or `compute()` stored and returned on a miss.
    pub fn get_or_insert_with(
        &mut self,
        gauge_id: &str,
        now: DateTime<Utc>,
        compute: impl FnOnce() -> T,
    ) -> &T {
        if self.get(gauge_id, now).is_none() {
            logging::debug(Component::Cache, Some(gauge_id), &format!("{} miss", self.name));
            self.insert(gauge_id, compute(), now);
        }
        // Present: either it was live or it was just inserted.
        &self.entries[gauge_id].value
    }

    pub fn invalidate(&mut self, gauge_id: &str) {
        self.entries.remove(gauge_id);
    }

    pub fn contains(&self, gauge_id: &str) -> bool {
        self.entries.contains_key(gauge_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Derived tables for the gauges viewed in one session.
#[derive(Debug, Clone)]
pub struct SessionCache {
    pub observed: Slot<NormalizedSeries>,
    pub forecast: Slot<ForecastSeries>,
    pub ensemble: Slot<EnsembleFetch>,
    pub percentiles: Slot<PercentileBandSet>,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            observed: Slot::new("observed", ttl),
            forecast: Slot::new("forecast", ttl),
            ensemble: Slot::new("ensemble", ttl),
            percentiles: Slot::new("percentiles", ttl),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let ttl = i64::try_from(config.ttl_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .unwrap_or(Duration::MAX);
        Self::new(ttl)
    }

    /// Drops every slot's entry for `gauge_id`.
    pub fn invalidate_gauge(&mut self, gauge_id: &str) {
        self.observed.invalidate(gauge_id);
        self.forecast.invalidate(gauge_id);
        self.ensemble.invalidate(gauge_id);
        self.percentiles.invalidate(gauge_id);
    }

    /// Call at the start of a gauge load; with `bypass` the gauge starts cold.
    pub fn begin(&mut self, gauge_id: &str, bypass: bool) {
        if bypass {
            logging::info(Component::Cache, Some(gauge_id), "bypassing cache; fresh data will be loaded");
            self.invalidate_gauge(gauge_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
