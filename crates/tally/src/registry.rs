//! The ordered set of registered counters and their read progress.

use tally_redis::{RedisClient, SortedSet, StoreError};

/// Counter registry: membership plus a last-read slice score per key.
///
/// Scores are slice indices stored as sorted-set scores; they fit an f64
/// exactly at any realistic magnitude.
#[derive(Clone)]
pub(crate) struct Registry {
    set: SortedSet,
}

impl Registry {
    pub(crate) fn new(client: &RedisClient, key: String) -> Self {
        Self {
            set: client.sorted_set(key),
        }
    }

    /// Register `key` as caught up through `last_completed`.
    pub(crate) async fn register(&self, key: &str, last_completed: i64) -> Result<(), StoreError> {
        self.set.add(key, last_completed as f64).await
    }

    pub(crate) async fn unregister(&self, key: &str) -> Result<(), StoreError> {
        self.set.remove(key).await
    }

    pub(crate) async fn is_registered(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.set.score(key).await?.is_some())
    }

    /// Last-read slice for `key`, or `None` before the first read.
    pub(crate) async fn score(&self, key: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.set.score(key).await?.map(|score| score as i64))
    }

    pub(crate) async fn set_score(&self, key: &str, slice: i64) -> Result<(), StoreError> {
        self.set.add(key, slice as f64).await
    }

    /// Advance the score by one, returning the post-increment value.
    pub(crate) async fn increment_score(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self.set.incr(key, 1.0).await? as i64)
    }

    /// Every registered (key, last-read slice) pair.
    pub(crate) async fn enumerate(&self) -> Result<Vec<(String, i64)>, StoreError> {
        Ok(self
            .set
            .members_with_scores()
            .await?
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    /// Set every registered key's score to `slice` in one round trip.
    pub(crate) async fn mark_all(&self, slice: i64) -> Result<(), StoreError> {
        let entries: Vec<(String, f64)> = self
            .set
            .members_with_scores()
            .await?
            .into_iter()
            .map(|(member, _)| (member, slice as f64))
            .collect();

        self.set.add_all(&entries).await
    }
}
