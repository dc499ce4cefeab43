use redis::{aio::ConnectionManager, Client};
use std::time::Duration;
use tracing::debug;

use crate::counter::Counter;
use crate::error::StoreError;
use crate::lock::Lock;
use crate::sorted_set::SortedSet;

/// Shared handle to a Redis server.
///
/// Wraps a [`ConnectionManager`] that multiplexes requests over one
/// connection and re-establishes it on failure. Cloning is cheap; every
/// typed handle produced by this client carries its own clone.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        debug!("connected to redis at {}", redis_url);

        Ok(Self { manager })
    }

    /// Atomic integer register stored at `key`.
    pub fn counter(&self, key: impl Into<String>) -> Counter {
        Counter::new(key.into(), self.manager.clone())
    }

    /// Sorted set stored at `key`.
    pub fn sorted_set(&self, key: impl Into<String>) -> SortedSet {
        SortedSet::new(key.into(), self.manager.clone())
    }

    /// Advisory lease lock stored at `key`.
    pub fn lock(&self, key: impl Into<String>, lease: Duration) -> Lock {
        Lock::new(key.into(), lease, self.manager.clone())
    }
}
