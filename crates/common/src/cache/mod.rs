//! Redis cache integration
//!
//! Provides:
//! - Multiplexed connection management
//! - JSON get/set operations with TTL
//! - Creation-ordered sorted-set indexes for capacity bounds
//! - Key namespacing for context handles

use crate::errors::{AppError, Result};
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// Redis cache client
pub struct RedisCache {
    connection: MultiplexedConnection,
    key_prefix: String,
}

impl RedisCache {
    /// Connect to Redis
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to create Redis client: {}", e)
            })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.into(),
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full_key = self.key(key);
        // Multiplexed connections are cheap to clone and safe to use concurrently
        let mut conn = self.connection.clone();

        let value: Option<String> = conn.get(&full_key).await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to get key '{}': {}", full_key, e),
            })?;

        match value {
            Some(json) => {
                let parsed = serde_json::from_str(&json)
                    .map_err(|e| AppError::CacheError {
                        message: format!("Failed to parse cached value: {}", e),
                    })?;
                debug!(key = %full_key, "Cache hit");
                Ok(Some(parsed))
            }
            None => {
                debug!(key = %full_key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Set a value in cache with a TTL
    pub async fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let full_key = self.key(key);
        let json = serde_json::to_string(value)
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to serialize value: {}", e),
            })?;

        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(&full_key, &json, ttl_secs)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs, "Cache set");
        Ok(())
    }

    /// Delete a key from cache
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let deleted: i32 = conn.del(&full_key).await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to delete key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, deleted = deleted > 0, "Cache delete");
        Ok(deleted > 0)
    }

    /// Delete several keys at once, returning how many existed
    pub async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let full_keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        let mut conn = self.connection.clone();

        let deleted: usize = conn.del(&full_keys).await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to delete {} keys: {}", full_keys.len(), e),
            })?;

        debug!(requested = full_keys.len(), deleted, "Cache delete many");
        Ok(deleted)
    }

    /// Add `member` to a sorted-set index scored by creation time.
    ///
    /// Members scored at or before `expired_before` are dropped and the index
    /// itself expires `ttl_secs` after the last add.
    pub async fn index_add(
        &self,
        index: &str,
        member: &str,
        score: i64,
        expired_before: i64,
        ttl_secs: u64,
    ) -> Result<()> {
        let full_key = self.key(index);
        let mut conn = self.connection.clone();

        redis::pipe()
            .atomic()
            .zadd(&full_key, member, score).ignore()
            .zrembyscore(&full_key, "-inf", expired_before).ignore()
            .expire(&full_key, ttl_secs as i64).ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to index '{}' in '{}': {}", member, full_key, e),
            })?;

        Ok(())
    }

    /// Oldest members of an index beyond the newest `capacity`
    pub async fn index_overflow(&self, index: &str, capacity: usize) -> Result<Vec<String>> {
        let full_key = self.key(index);
        let mut conn = self.connection.clone();

        conn.zrange(&full_key, 0, overflow_stop(capacity)).await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to read index '{}': {}", full_key, e),
            })
    }

    /// Remove members from an index
    pub async fn index_remove(&self, index: &str, members: &[String]) -> Result<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let full_key = self.key(index);
        let mut conn = self.connection.clone();

        conn.zrem(&full_key, members).await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to trim index '{}': {}", full_key, e),
            })
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// Inclusive `ZRANGE` stop selecting everything but the newest `capacity`
/// members. Past the end of a short index the range is empty.
fn overflow_stop(capacity: usize) -> isize {
    -(capacity.min(isize::MAX as usize - 1) as isize) - 1
}

/// Cache key builder helpers
pub mod keys {
    /// Key of the chunk set behind a context handle
    pub fn context(handle: &str) -> String {
        format!("ctx:{}", handle)
    }

    /// Creation-ordered index of live context handles
    pub fn context_index() -> &'static str {
        "ctx:index"
    }
}
