use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::StoreError;

/// Non-blocking advisory lock with a lease.
///
/// Acquisition is a single `SET NX PX`: it either succeeds immediately or
/// reports the lock as held elsewhere; there is no retry or backoff. The
/// lease bounds how long a crashed holder can keep the lock. Release is a
/// best-effort `DEL`.
#[derive(Clone)]
pub struct Lock {
    key: String,
    lease: Duration,
    manager: ConnectionManager,
}

impl Lock {
    pub(crate) fn new(key: String, lease: Duration, manager: ConnectionManager) -> Self {
        Self { key, lease, manager }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Attempt to take the lock. Returns `false` without waiting when the
    /// lock is already held.
    pub async fn try_acquire(&self) -> Result<bool, StoreError> {
        let outcome: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(self.lease.as_millis() as u64)
            .query_async(&mut self.manager.clone())
            .await?;

        Ok(outcome.is_some())
    }

    pub async fn release(&self) -> Result<(), StoreError> {
        redis::cmd("DEL")
            .arg(&self.key)
            .query_async::<_, ()>(&mut self.manager.clone())
            .await
            .map_err(StoreError::from)
    }

    /// Run `body` while holding the lock.
    ///
    /// Returns `Ok(None)` without running `body` when the lock is already
    /// held elsewhere. The lock is released when `body` completes, whether
    /// or not it succeeded; a holder that crashes mid-body is covered by
    /// the lease expiry.
    pub async fn with_lock<T, F, Fut>(&self, body: F) -> Result<Option<T>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.try_acquire().await? {
            return Ok(None);
        }

        let outcome = body().await;

        // The lease expires on its own if this fails.
        if let Err(cause) = self.release().await {
            warn!("failed to release lock '{}': {}", self.key, cause);
        }

        Ok(Some(outcome))
    }
}
