//! Context cache - chunk sets kept behind opaque handles for follow-up questions
//!
//! Provides:
//! - `ContextStore` trait (`store`, `load`, `evict`)
//! - Sharded in-memory store with TTL and least-recently-created capacity eviction
//! - Redis store (entries expire server-side, a creation-ordered index bounds
//!   capacity; errors degrade to a miss)

use super::types::{ChunkRef, ContextHandle, QueryContext};
use crate::cache::{keys, RedisCache};
use crate::config::{ContextBackend, ContextCacheConfig};
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const CACHE_NAME: &str = "context";

/// Storage for query contexts.
///
/// A miss is a normal outcome; callers fall back to retrieval.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Keep `chunks` under a fresh unique handle. Never fails.
    async fn store(&self, question: &str, chunks: Vec<ChunkRef>) -> ContextHandle;

    /// The context behind `handle`, or `None` when unknown or expired
    async fn load(&self, handle: &ContextHandle) -> Option<Arc<QueryContext>>;

    /// Drop a handle; returns whether it was live
    async fn evict(&self, handle: &ContextHandle) -> bool;

    fn backend_name(&self) -> &'static str;
}

struct Entry {
    context: Arc<QueryContext>,
    expires_at: Instant,
}

type Shard = RwLock<HashMap<ContextHandle, Entry>>;

/// In-process store partitioned by handle hash.
///
/// Loads and evictions of different handles only contend when they share a
/// shard. The creation-order queue is locked separately and never while a
/// shard lock is held.
pub struct MemoryContextStore {
    shards: Vec<Shard>,
    order: Mutex<VecDeque<(ContextHandle, Instant)>>,
    ttl: Duration,
    capacity: usize,
}

impl MemoryContextStore {
    pub fn new(ttl: Duration, capacity: usize, shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect(),
            order: Mutex::new(VecDeque::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(config: &ContextCacheConfig) -> Self {
        Self::new(config.ttl(), config.capacity, config.shards)
    }

    fn shard(&self, handle: &ContextHandle) -> &Shard {
        let mut hasher = DefaultHasher::new();
        handle.hash(&mut hasher);
        &self.shards[(hasher.finish() % self.shards.len() as u64) as usize]
    }

    /// Live entries, including expired ones not yet purged
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Record creation order and pick the handles to drop: expired ones from
    /// the front, then the oldest-created while over capacity.
    async fn admit(&self, handle: ContextHandle, now: Instant) -> (Vec<ContextHandle>, usize) {
        let mut order = self.order.lock().await;
        order.push_back((handle, now));

        let mut victims = Vec::new();
        while let Some((_, created)) = order.front() {
            if now.duration_since(*created) < self.ttl {
                break;
            }
            if let Some((expired, _)) = order.pop_front() {
                victims.push(expired);
            }
        }
        let expired = victims.len();

        while order.len() > self.capacity {
            if let Some((oldest, _)) = order.pop_front() {
                victims.push(oldest);
            }
        }
        (victims, expired)
    }

    async fn remove(&self, handle: &ContextHandle) -> bool {
        self.shard(handle).write().await.remove(handle).is_some()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn store(&self, question: &str, chunks: Vec<ChunkRef>) -> ContextHandle {
        let handle = ContextHandle::generate();
        let now = Instant::now();
        let context = QueryContext {
            handle: handle.clone(),
            chunks,
            question: question.to_string(),
            created_at: Utc::now(),
        };

        self.shard(&handle).write().await.insert(
            handle.clone(),
            Entry {
                context: Arc::new(context),
                expires_at: now + self.ttl,
            },
        );

        let (victims, expired) = self.admit(handle.clone(), now).await;
        for victim in &victims {
            self.remove(victim).await;
        }
        metrics::record_eviction("ttl", expired);
        metrics::record_eviction("capacity", victims.len() - expired);

        debug!(handle = %handle, evicted = victims.len(), "Context stored");
        handle
    }

    async fn load(&self, handle: &ContextHandle) -> Option<Arc<QueryContext>> {
        let shard = self.shard(handle);
        let found = {
            let entries = shard.read().await;
            entries
                .get(handle)
                .map(|entry| (entry.context.clone(), entry.expires_at))
        };

        let context = match found {
            Some((context, expires_at)) if Instant::now() < expires_at => Some(context),
            Some(_) => {
                // Lazily drop an expired entry; the queue purges it on a later store
                shard.write().await.remove(handle);
                metrics::record_eviction("ttl", 1);
                None
            }
            None => None,
        };

        metrics::record_cache(context.is_some(), CACHE_NAME);
        context
    }

    async fn evict(&self, handle: &ContextHandle) -> bool {
        let removed = self.remove(handle).await;
        if removed {
            self.order.lock().await.retain(|(h, _)| h != handle);
            metrics::record_eviction("explicit", 1);
        }
        removed
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Store backed by Redis `SET EX`, bounded by a sorted set of handles
/// scored by creation time
pub struct RedisContextStore {
    cache: RedisCache,
    ttl_secs: u64,
    capacity: usize,
}

impl RedisContextStore {
    pub fn new(cache: RedisCache, ttl_secs: u64, capacity: usize) -> Self {
        Self {
            cache,
            ttl_secs,
            capacity: capacity.max(1),
        }
    }

    /// Index a new handle and delete the oldest-created entries past capacity
    async fn admit(&self, handle: &ContextHandle, created_ms: i64) -> Result<usize> {
        let index = keys::context_index();
        let expired_before = created_ms - (self.ttl_secs as i64).saturating_mul(1000);
        self.cache
            .index_add(index, handle.as_str(), created_ms, expired_before, self.ttl_secs)
            .await?;

        let victims = self.cache.index_overflow(index, self.capacity).await?;
        if victims.is_empty() {
            return Ok(0);
        }
        let entries: Vec<String> = victims.iter().map(|h| keys::context(h)).collect();
        self.cache.delete_many(&entries).await?;
        self.cache.index_remove(index, &victims).await?;
        Ok(victims.len())
    }
}

#[async_trait]
impl ContextStore for RedisContextStore {
    async fn store(&self, question: &str, chunks: Vec<ChunkRef>) -> ContextHandle {
        let handle = ContextHandle::generate();
        let context = QueryContext {
            handle: handle.clone(),
            chunks,
            question: question.to_string(),
            created_at: Utc::now(),
        };

        if let Err(e) = self
            .cache
            .set_with_ttl(&keys::context(handle.as_str()), &context, self.ttl_secs)
            .await
        {
            // The handle is still issued; a follow-up will miss and fall back
            warn!(handle = %handle, error = %e, "Failed to store context");
            return handle;
        }

        match self.admit(&handle, context.created_at.timestamp_millis()).await {
            Ok(evicted) => {
                metrics::record_eviction("capacity", evicted);
                debug!(handle = %handle, evicted, "Context stored");
            }
            Err(e) => warn!(handle = %handle, error = %e, "Failed to enforce context capacity"),
        }
        handle
    }

    async fn load(&self, handle: &ContextHandle) -> Option<Arc<QueryContext>> {
        let context = match self.cache.get::<QueryContext>(&keys::context(handle.as_str())).await {
            Ok(context) => context.map(Arc::new),
            Err(e) => {
                warn!(handle = %handle, error = %e, "Failed to load context, treating as miss");
                None
            }
        };
        metrics::record_cache(context.is_some(), CACHE_NAME);
        context
    }

    async fn evict(&self, handle: &ContextHandle) -> bool {
        let members = [handle.as_str().to_string()];
        if let Err(e) = self.cache.index_remove(keys::context_index(), &members).await {
            debug!(handle = %handle, error = %e, "Failed to unindex context");
        }
        match self.cache.delete(&keys::context(handle.as_str())).await {
            Ok(removed) => {
                if removed {
                    metrics::record_eviction("explicit", 1);
                }
                removed
            }
            Err(e) => {
                warn!(handle = %handle, error = %e, "Failed to evict context");
                false
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Create the configured context store
pub async fn create_context_store(config: &ContextCacheConfig) -> Result<Arc<dyn ContextStore>> {
    match config.backend {
        ContextBackend::Memory => {
            info!(
                ttl_secs = config.ttl_secs,
                capacity = config.capacity,
                shards = config.shards,
                "Using in-memory context cache"
            );
            Ok(Arc::new(MemoryContextStore::from_config(config)))
        }
        ContextBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| AppError::Configuration {
                message: "context_cache.redis_url is not set".to_string(),
            })?;
            let cache = RedisCache::connect(url, config.key_prefix.clone()).await?;
            cache.ping().await?;
            info!(
                ttl_secs = config.ttl_secs,
                capacity = config.capacity,
                "Using Redis context cache"
            );
            Ok(Arc::new(RedisContextStore::new(cache, config.ttl_secs, config.capacity)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn chunk(doc: &str) -> ChunkRef {
        ChunkRef {
            chunk_id: format!("{}#0", doc),
            document_id: doc.to_string(),
            document_name: doc.to_string(),
            ordinal: 0,
            text: "text".to_string(),
            industry: "Retail".to_string(),
            topics: vec![],
            url: None,
            score: 0.7,
        }
    }

    fn store(capacity: usize) -> MemoryContextStore {
        MemoryContextStore::new(Duration::from_secs(60), capacity, 4)
    }

    #[tokio::test]
    async fn test_store_then_load_returns_same_chunks() {
        let cache = store(8);
        let chunks = vec![chunk("a"), chunk("b")];

        let handle = cache.store("q", chunks.clone()).await;
        let context = cache.load(&handle).await.unwrap();

        assert_eq!(context.chunks, chunks);
        assert_eq!(context.question, "q");
        assert_eq!(context.handle, handle);
    }

    #[tokio::test]
    async fn test_unknown_handle_misses() {
        let cache = store(8);
        assert!(cache.load(&ContextHandle::from("missing")).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_stores_yield_distinct_handles() {
        let cache = Arc::new(store(256));
        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.store(&format!("q{}", i), vec![chunk("a")]).await })
            })
            .collect();

        let mut handles = HashSet::new();
        for task in tasks {
            handles.insert(task.await.unwrap());
        }
        assert_eq!(handles.len(), 64);
        assert_eq!(cache.len().await, 64);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_created_not_least_used() {
        let cache = store(2);
        let first = cache.store("one", vec![chunk("a")]).await;
        let second = cache.store("two", vec![chunk("b")]).await;

        // Reading the oldest does not protect it
        assert!(cache.load(&first).await.is_some());

        let third = cache.store("three", vec![chunk("c")]).await;

        assert!(cache.load(&first).await.is_none());
        assert!(cache.load(&second).await.is_some());
        assert!(cache.load(&third).await.is_some());
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = store(8);
        let handle = cache.store("q", vec![chunk("a")]).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.load(&handle).await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.load(&handle).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_purges_expired_entries() {
        let cache = store(8);
        cache.store("old", vec![chunk("a")]).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.store("new", vec![chunk("b")]).await;

        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_evict_frees_capacity() {
        let cache = store(2);
        let first = cache.store("one", vec![chunk("a")]).await;
        let second = cache.store("two", vec![chunk("b")]).await;

        assert!(cache.evict(&second).await);
        assert!(!cache.evict(&second).await);

        cache.store("three", vec![chunk("c")]).await;
        assert!(cache.load(&first).await.is_some());
    }

    #[tokio::test]
    async fn test_create_memory_store_from_config() {
        let store = tokio_test::assert_ok!(create_context_store(&ContextCacheConfig::default()).await);
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_redis_backend_requires_url() {
        let config = ContextCacheConfig {
            backend: ContextBackend::Redis,
            redis_url: None,
            ..ContextCacheConfig::default()
        };
        assert!(create_context_store(&config).await.is_err());
    }
}
