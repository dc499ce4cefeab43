//! Sliding-window averages over recent samples.
//!
//! Each key owns a sorted set of samples scored by insertion time, capped
//! at a window of most-recent entries. Eviction is lazy: a read that finds
//! the set over capacity trims everything older than the window cutoff.

use tally_redis::{RedisClient, SortedSet, StoreError};

use crate::keys::Keyspace;
use crate::slice::unix_now;

/// Samples kept per key unless the caller asks for a different window.
pub const DEFAULT_AVERAGE_WINDOW: usize = 100;

#[derive(Clone)]
pub(crate) struct Averages {
    client: RedisClient,
    keys: Keyspace,
    list: SortedSet,
}

impl Averages {
    pub(crate) fn new(client: RedisClient, keys: Keyspace) -> Self {
        let list = client.sorted_set(keys.average_list());
        Self { client, keys, list }
    }

    fn samples(&self, key: &str) -> SortedSet {
        self.client.sorted_set(self.keys.samples(key))
    }

    /// Record a sample for `key`, registering the key on first use.
    ///
    /// Samples are keyed by value: re-pushing an identical value refreshes
    /// its recency instead of storing a duplicate.
    pub(crate) async fn push(&self, key: &str, value: f64) -> Result<(), StoreError> {
        let now = unix_now() as f64;

        if self.list.score(key).await?.is_none() {
            self.list.add(key, now).await?;
        }

        self.samples(key).add(&value.to_string(), now).await
    }

    /// The `window` most recent samples, newest first. A set that has
    /// outgrown the window is trimmed below the cutoff score before the
    /// data is returned.
    pub(crate) async fn data(&self, key: &str, window: usize) -> Result<Vec<f64>, StoreError> {
        let samples = self.samples(key);
        let recent = samples.rev_range_with_scores(window).await?;

        if samples.len().await? > window as u64 {
            if let Some((_, cutoff)) = recent.last() {
                samples.remove_below(*cutoff).await?;
            }
        }

        Ok(recent
            .iter()
            .filter_map(|(member, _)| member.parse::<f64>().ok())
            .collect())
    }

    /// Arithmetic mean of the recent samples. An empty set reads as 0.0
    /// rather than an error.
    pub(crate) async fn average(&self, key: &str, window: usize) -> Result<f64, StoreError> {
        let data = self.data(key, window).await?;

        if data.is_empty() {
            return Ok(0.0);
        }

        Ok(data.iter().sum::<f64>() / data.len() as f64)
    }
}
