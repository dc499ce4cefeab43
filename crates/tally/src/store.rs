//! Per-(key, slice) accumulator records.

use std::time::Duration;

use tally_redis::{Counter, RedisClient, StoreError};

use crate::keys::Keyspace;

/// Access to the integer accumulators behind counter slices.
///
/// Records are created lazily: the first touch, read or write, creates the
/// register at 0 and starts the retention clock. Once a record expires it
/// is indistinguishable from one that never existed.
#[derive(Clone)]
pub(crate) struct SliceStore {
    client: RedisClient,
    keys: Keyspace,
    expiration: Duration,
}

impl SliceStore {
    pub(crate) fn new(client: RedisClient, keys: Keyspace, expiration: Duration) -> Self {
        Self {
            client,
            keys,
            expiration,
        }
    }

    /// Handle for one (key, slice) record, creating it with the retention
    /// TTL if absent. The TTL runs from this first touch, not from the
    /// slice boundary, so data survives at least the full horizon after
    /// its first write.
    async fn slice_counter(&self, key: &str, slice: i64) -> Result<Counter, StoreError> {
        let counter = self.client.counter(self.keys.slice(key, slice));

        if !counter.exists().await? {
            counter.set(0).await?;
            counter.expire(self.expiration).await?;
        }

        Ok(counter)
    }

    pub(crate) async fn value(&self, key: &str, slice: i64) -> Result<i64, StoreError> {
        self.slice_counter(key, slice).await?.get().await
    }

    pub(crate) async fn incr(&self, key: &str, slice: i64, by: i64) -> Result<i64, StoreError> {
        self.slice_counter(key, slice).await?.incr_by(by).await
    }

    pub(crate) async fn decr(&self, key: &str, slice: i64, by: i64) -> Result<i64, StoreError> {
        self.slice_counter(key, slice).await?.decr_by(by).await
    }
}
