//! Cache hooks around the render fetch
//!
//! The prerender core keeps no cache of its own. Callers plug a store in by
//! implementing [`RenderCache`]; both hooks default to doing nothing.

use crate::render::RenderResult;
use crate::request::RequestView;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[async_trait]
pub trait RenderCache: Send + Sync {
    /// Look up a stored render. `Some` short-circuits the remote fetch.
    ///
    /// An error counts as a miss.
    async fn before_render(&self, _request: &RequestView) -> anyhow::Result<Option<RenderResult>> {
        Ok(None)
    }

    /// Observe a freshly fetched render. Errors are logged and ignored.
    async fn after_render(&self, _request: &RequestView, _result: &RenderResult) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that never hit and never store
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl RenderCache for NoopCache {}

/// Entries kept by [`MemoryCache::new`]
pub const DEFAULT_MEMORY_CAPACITY: usize = 1000;
/// Lifetime of an entry in [`MemoryCache::new`]
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct CachedRender {
    result: RenderResult,
    stored_at: Instant,
}

/// In-process hook implementation keyed by the request URL.
///
/// Only 2xx and 3xx renders are stored. Entries expire after `ttl`; once
/// `capacity` is reached, expired entries are swept and then the oldest one
/// is evicted.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, CachedRender>,
    capacity: usize,
    ttl: Duration,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MEMORY_CAPACITY, DEFAULT_MEMORY_TTL)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn is_cacheable(result: &RenderResult) -> bool {
        result.status.is_success() || result.status.is_redirection()
    }

    /// Make room for one more entry
    fn evict(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        if self.entries.len() < self.capacity {
            return;
        }

        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().stored_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            debug!(url = %key, "Evicting oldest cached render");
            self.entries.remove(&key);
        }
    }
}

#[async_trait]
impl RenderCache for MemoryCache {
    async fn before_render(&self, request: &RequestView) -> anyhow::Result<Option<RenderResult>> {
        let key = request.url();
        let hit = match self.entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.result.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if hit.is_none() {
            self.entries.remove(&key);
        }
        Ok(hit)
    }

    async fn after_render(&self, request: &RequestView, result: &RenderResult) -> anyhow::Result<()> {
        let key = request.url();
        if self.capacity == 0 || !Self::is_cacheable(result) {
            debug!(url = %key, status = %result.status, "Not caching render");
            return Ok(());
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict();
        }

        debug!(url = %key, status = %result.status, "Caching rendered page");
        self.entries.insert(
            key,
            CachedRender {
                result: result.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }
}
