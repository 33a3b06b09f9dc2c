//! Versioned cache of encoded chart payloads.
//!
//! Every key holds at most one entry. A request with a version different from
//! the stored one recomputes the payload and overwrites the entry. Requests
//! for the same key are serialized while computing, so concurrent misses
//! compute once; different keys never wait for each other.

use std::{future::Future, hash::Hash, sync::Arc};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::metrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedChart {
    pub version: u64,
    pub bytes: Bytes,
}

type EventHandler<K> = Arc<dyn Fn(&K, &CachedChart) + Send + Sync>;
type Slot = Arc<RwLock<Option<CachedChart>>>;

fn noop_event_handler<K>() -> EventHandler<K> {
    Arc::new(|_: &K, _: &CachedChart| {})
}

pub struct ChartCache<K> {
    entries: DashMap<K, Slot>,
    on_hit: EventHandler<K>,
    on_computed: EventHandler<K>,
}

impl<K> Default for ChartCache<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ChartCache<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            on_hit: noop_event_handler(),
            on_computed: noop_event_handler(),
        }
    }

    pub fn with_on_hit(
        mut self,
        handler: impl Fn(&K, &CachedChart) + Send + Sync + 'static,
    ) -> Self {
        self.on_hit = Arc::new(handler);
        self
    }

    pub fn with_on_computed(
        mut self,
        handler: impl Fn(&K, &CachedChart) + Send + Sync + 'static,
    ) -> Self {
        self.on_computed = Arc::new(handler);
        self
    }

    fn slot(&self, key: &K) -> Slot {
        self.entries.entry(key.clone()).or_default().clone()
    }

    /// Stored payload for `key` if it was computed for `version`.
    pub async fn get(&self, key: &K, version: u64) -> Option<Bytes> {
        let slot = self.entries.get(key).map(|s| s.clone())?;
        let entry = slot.read().await;
        entry
            .as_ref()
            .filter(|cached| cached.version == version)
            .map(|cached| cached.bytes.clone())
    }

    /// Payload for `key` at `version`, computing and storing it on a miss.
    ///
    /// A failed computation leaves the previous entry in place.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &K,
        version: u64,
        compute: F,
    ) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        let slot = self.slot(key);
        {
            let entry = slot.read().await;
            if let Some(cached) = entry.as_ref().filter(|c| c.version == version) {
                return Ok(self.hit(key, cached));
            }
        }

        let mut entry = slot.write().await;
        // someone else may have computed it while we waited for the lock
        if let Some(cached) = entry.as_ref().filter(|c| c.version == version) {
            return Ok(self.hit(key, cached));
        }
        metrics::CHART_CACHE_REQUESTS.with_label_values(&["miss"]).inc();
        let bytes = compute().await?;
        let cached = CachedChart {
            version,
            bytes: bytes.clone(),
        };
        (self.on_computed)(key, &cached);
        *entry = Some(cached);
        Ok(bytes)
    }

    fn hit(&self, key: &K, cached: &CachedChart) -> Bytes {
        metrics::CHART_CACHE_REQUESTS.with_label_values(&["hit"]).inc();
        (self.on_hit)(key, cached);
        cached.bytes.clone()
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
