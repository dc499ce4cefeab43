use redis::aio::ConnectionManager;

use crate::error::StoreError;

/// Sorted set keyed by member string with a numeric score.
#[derive(Clone)]
pub struct SortedSet {
    key: String,
    manager: ConnectionManager,
}

impl SortedSet {
    pub(crate) fn new(key: String, manager: ConnectionManager) -> Self {
        Self { key, manager }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Add a member, or update its score if it is already present.
    pub async fn add(&self, member: &str, score: f64) -> Result<(), StoreError> {
        redis::cmd("ZADD")
            .arg(&self.key)
            .arg(score)
            .arg(member)
            .query_async::<_, ()>(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    /// Add or update many members in a single pipelined round trip.
    pub async fn add_all(&self, entries: &[(String, f64)]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for (member, score) in entries {
            pipe.cmd("ZADD").arg(&self.key).arg(*score).arg(member).ignore();
        }

        pipe.query_async::<_, ()>(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    pub async fn score(&self, member: &str) -> Result<Option<f64>, StoreError> {
        redis::cmd("ZSCORE")
            .arg(&self.key)
            .arg(member)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    pub async fn remove(&self, member: &str) -> Result<(), StoreError> {
        redis::cmd("ZREM")
            .arg(&self.key)
            .arg(member)
            .query_async::<_, ()>(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    /// Adjust a member's score by `delta`, returning the new score.
    pub async fn incr(&self, member: &str, delta: f64) -> Result<f64, StoreError> {
        redis::cmd("ZINCRBY")
            .arg(&self.key)
            .arg(delta)
            .arg(member)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    /// Every member with its score, lowest score first.
    pub async fn members_with_scores(&self) -> Result<Vec<(String, f64)>, StoreError> {
        redis::cmd("ZRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    /// The `count` highest-scored members, highest score first.
    pub async fn rev_range_with_scores(
        &self,
        count: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        redis::cmd("ZREVRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(count as isize - 1)
            .arg("WITHSCORES")
            .query_async(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    pub async fn len(&self) -> Result<u64, StoreError> {
        redis::cmd("ZCARD")
            .arg(&self.key)
            .query_async(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    /// Remove every member whose score is strictly below `cutoff`,
    /// returning how many were removed.
    pub async fn remove_below(&self, cutoff: f64) -> Result<u64, StoreError> {
        redis::cmd("ZREMRANGEBYSCORE")
            .arg(&self.key)
            .arg("-inf")
            .arg(format!("({}", cutoff))
            .query_async(&mut self.manager.clone())
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
