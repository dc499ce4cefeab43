use redis::aio::ConnectionManager;
use std::time::Duration;

use crate::error::StoreError;

/// Atomic integer register stored at a single key.
///
/// A missing key reads as 0; INCRBY/DECRBY create the key on first write.
#[derive(Clone)]
pub struct Counter {
    key: String,
    manager: ConnectionManager,
}

impl Counter {
    pub(crate) fn new(key: String, manager: ConnectionManager) -> Self {
        Self { key, manager }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn get(&self) -> Result<i64, StoreError> {
        let value: Option<i64> = redis::cmd("GET")
            .arg(&self.key)
            .query_async(&mut self.manager.clone())
            .await?;

        Ok(value.unwrap_or(0))
    }

    pub async fn set(&self, value: i64) -> Result<(), StoreError> {
        redis::cmd("SET")
            .arg(&self.key)
            .arg(value)
            .query_async::<_, ()>(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    /// Add `by`, returning the post-increment value.
    pub async fn incr_by(&self, by: i64) -> Result<i64, StoreError> {
        redis::cmd("INCRBY")
            .arg(&self.key)
            .arg(by)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    /// Subtract `by`, returning the post-decrement value.
    pub async fn decr_by(&self, by: i64) -> Result<i64, StoreError> {
        redis::cmd("DECRBY")
            .arg(&self.key)
            .arg(by)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    pub async fn exists(&self) -> Result<bool, StoreError> {
        redis::cmd("EXISTS")
            .arg(&self.key)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    /// Start (or restart) the key's expiration clock.
    pub async fn expire(&self, ttl: Duration) -> Result<(), StoreError> {
        redis::cmd("EXPIRE")
            .arg(&self.key)
            .arg(ttl.as_secs())
            .query_async::<_, ()>(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    pub async fn delete(&self) -> Result<(), StoreError> {
        redis::cmd("DEL")
            .arg(&self.key)
            .query_async::<_, ()>(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }
}
