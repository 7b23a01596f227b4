//! The authoritative, concurrency-safe set of proxies (spec.md §4.1).

use crate::error::PoolError;
use crate::proxy::{Endpoint, Proxy, ProxyView};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// In-memory proxy pool. Reads (`snapshot`) never block writers for longer
/// than an `O(n)` copy; writers (`add`/`remove`/`update`) take the pool-write
/// lock. Per-proxy statistics are mutated through `Proxy::stats` which has
/// its own lock, so `record_outcome` does not need the pool-write lock.
#[derive(Default)]
pub struct Pool {
    proxies: RwLock<HashMap<String, Proxy>>,
    version: AtomicU64,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Insert a new proxy. Fails with `AlreadyExists` if its id collides.
    pub fn add(&self, proxy: Proxy) -> Result<(), PoolError> {
        let id = proxy.id();
        let mut guard = self.proxies.write().unwrap_or_else(|p| p.into_inner());
        if guard.contains_key(&id) {
            return Err(PoolError::AlreadyExists { proxy_id: id });
        }
        guard.insert(id, proxy);
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Remove a proxy by id, returning it. The caller is responsible for
    /// tearing down any associated circuit breaker (spec.md §4.1).
    pub fn remove(&self, id: &str) -> Result<Proxy, PoolError> {
        let mut guard = self.proxies.write().unwrap_or_else(|p| p.into_inner());
        let proxy = guard
            .remove(id)
            .ok_or_else(|| PoolError::NotFound { proxy_id: id.to_string() })?;
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(proxy)
    }

    /// Apply a mutation to metadata (country/region/tags) for an existing
    /// proxy. Statistics are never touched here; use `record_outcome`.
    pub fn update<F>(&self, id: &str, mutator: F) -> Result<(), PoolError>
    where
        F: FnOnce(&mut Proxy),
    {
        let guard = self.proxies.read().unwrap_or_else(|p| p.into_inner());
        match guard.get(id) {
            Some(_) => {}
            None => return Err(PoolError::NotFound { proxy_id: id.to_string() }),
        }
        drop(guard);
        let mut guard = self.proxies.write().unwrap_or_else(|p| p.into_inner());
        match guard.get_mut(id) {
            Some(proxy) => {
                mutator(proxy);
                Ok(())
            }
            None => Err(PoolError::NotFound { proxy_id: id.to_string() }),
        }
    }

    /// Record the outcome of one dispatch attempt against `id`'s stats.
    /// This is the only path that mutates statistics (spec.md §4.1).
    pub fn record_outcome(&self, id: &str, success: bool, latency: Duration) -> Result<(), PoolError> {
        let guard = self.proxies.read().unwrap_or_else(|p| p.into_inner());
        let proxy = guard.get(id).ok_or_else(|| PoolError::NotFound { proxy_id: id.to_string() })?;
        proxy.stats.record_outcome(success, latency);
        Ok(())
    }

    pub fn start_attempt(&self, id: &str) -> Result<(), PoolError> {
        let guard = self.proxies.read().unwrap_or_else(|p| p.into_inner());
        let proxy = guard.get(id).ok_or_else(|| PoolError::NotFound { proxy_id: id.to_string() })?;
        proxy.stats.start_attempt();
        Ok(())
    }

    /// Clone the endpoint for one proxy, for handing to the dispatcher.
    pub fn endpoint(&self, id: &str) -> Option<Endpoint> {
        self.proxies.read().unwrap_or_else(|p| p.into_inner()).get(id).map(|p| p.endpoint.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.proxies.read().unwrap_or_else(|p| p.into_inner()).contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.proxies.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// O(n) copy of selection-relevant fields. Strategies only ever see
    /// this, never the live `Proxy` records (spec.md §4.1).
    pub fn snapshot(&self) -> (u64, Vec<ProxyView>) {
        let guard = self.proxies.read().unwrap_or_else(|p| p.into_inner());
        let views = guard
            .values()
            .map(|p| ProxyView {
                id: p.id(),
                country_code: p.country_code.clone(),
                region: p.region.clone(),
                tags: p.tags.clone(),
                stats: p.stats.snapshot(),
                health: p.stats.health(),
            })
            .collect();
        (self.version(), views)
    }

    /// Fetcher interface: wholesale replace the pool contents (spec.md §6).
    pub fn replace(&self, proxies: Vec<Proxy>) {
        let mut guard = self.proxies.write().unwrap_or_else(|p| p.into_inner());
        guard.clear();
        for proxy in proxies {
            guard.insert(proxy.id(), proxy);
        }
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Fetcher interface: merge by id. Duplicates update metadata but never
    /// reset statistics (spec.md §6).
    pub fn merge(&self, proxies: Vec<Proxy>) {
        let mut guard = self.proxies.write().unwrap_or_else(|p| p.into_inner());
        for incoming in proxies {
            match guard.get_mut(&incoming.id()) {
                Some(existing) => {
                    existing.country_code = incoming.country_code;
                    existing.region = incoming.region;
                    existing.tags = incoming.tags;
                }
                None => {
                    guard.insert(incoming.id(), incoming);
                }
            }
        }
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}
