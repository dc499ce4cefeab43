//! The counter engine: registration, slice accumulation, and the
//! read/advance drain protocol.
//!
//! All state lives in the shared store. Any number of writers may call
//! [`Tally::increment`] / [`Tally::decrement`] concurrently; they rely on
//! the store's atomic single-key operations and take no lock. The
//! multi-counter drain ([`Tally::read_counters`]) is serialized
//! process-wide by a non-blocking advisory lock; single-counter reads are
//! not, and the enumerator's corrective score write tolerates the races
//! that allows.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tally_redis::RedisClient;
use tracing::info;

use crate::average::{Averages, DEFAULT_AVERAGE_WINDOW};
use crate::config::TallyConfig;
use crate::error::{CallbackError, Error, Result};
use crate::keys::{normalize_key, Keyspace, NORMALIZATION_KEY};
use crate::logging::{CounterLog, LogFormatter, LogOptions, LogPayload, LogSink, TracingSink};
use crate::registry::Registry;
use crate::slice::{resolve_range, slice_index, unix_now, SliceValue};
use crate::store::SliceStore;

/// Lease on the multi-counter drain lock.
const DRAIN_LOCK_LEASE: Duration = Duration::from_secs(60);

/// Outcome of a guarded mutation.
///
/// See [`Tally::increment_guarded`]: the follow-up computation decides
/// whether the mutation stands or is rewound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarded<T> {
    /// The follow-up succeeded; the mutation stands.
    Applied(T),
    /// The follow-up declined; the mutation was rewound.
    Reverted,
}

/// Summary returned by [`Tally::prune_counters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PruneSummary {
    pub examined: usize,
    pub kept: usize,
    pub pruned: usize,
}

/// Builder for [`Tally`]: collects the configuration and logging hooks,
/// validates once, and connects.
pub struct TallyBuilder {
    config: TallyConfig,
    sink: Arc<dyn LogSink>,
    formatter: Option<LogFormatter>,
}

impl TallyBuilder {
    fn new(config: TallyConfig) -> Self {
        Self {
            config,
            sink: Arc::new(TracingSink),
            formatter: None,
        }
    }

    /// Replace the default tracing-backed sink for counter events.
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Install a formatter applied to every counter event.
    pub fn log_formatter(mut self, formatter: LogFormatter) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Validate the configuration and connect to the store.
    pub async fn connect(self) -> Result<Tally> {
        self.config.validate()?;
        let client = RedisClient::new(&self.config.store_connection).await?;
        Ok(self.assemble(client))
    }

    /// Validate the configuration and reuse an already-open client.
    pub fn build(self, client: RedisClient) -> Result<Tally> {
        self.config.validate()?;
        Ok(self.assemble(client))
    }

    fn assemble(self, client: RedisClient) -> Tally {
        let keys = Keyspace::new(self.config.key_prefix.clone());
        let registry = Registry::new(&client, keys.counter_list());
        let store = SliceStore::new(
            client.clone(),
            keys.clone(),
            self.config.expiration_duration(),
        );
        let averages = Averages::new(client.clone(), keys.clone());

        Tally {
            client,
            keys,
            registry,
            store,
            averages,
            log: CounterLog::new(self.sink, self.formatter),
            granularity: self.config.granularity,
            expiration: self.config.expiration,
        }
    }
}

/// Handle to the counter engine.
///
/// All counter state lives in the store; this is a cheap bundle of
/// accessors that can be cloned freely across tasks.
#[derive(Clone)]
pub struct Tally {
    pub(crate) client: RedisClient,
    pub(crate) keys: Keyspace,
    pub(crate) registry: Registry,
    pub(crate) store: SliceStore,
    averages: Averages,
    log: CounterLog,
    pub(crate) granularity: u64,
    pub(crate) expiration: u64,
}

impl Tally {
    pub fn builder(config: TallyConfig) -> TallyBuilder {
        TallyBuilder::new(config)
    }

    /// Connect with the given configuration and default logging.
    pub async fn connect(config: TallyConfig) -> Result<Self> {
        Self::builder(config).connect().await
    }

    // =================================================================
    // counter operations
    // =================================================================

    /// Add `by` to `key`'s current slice, returning the new slice value.
    /// Registers the key on first use.
    pub async fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let key = self.normalize(key).await?;
        self.increment_raw(&key, by).await
    }

    /// Subtract `by` from `key`'s current slice, returning the new slice
    /// value.
    pub async fn decrement(&self, key: &str, by: i64) -> Result<i64> {
        let key = self.normalize(key).await?;
        self.decrement_raw(&key, by).await
    }

    /// Increment, then run `follow_up` with the new slice value.
    ///
    /// `Ok(Some(v))` keeps the increment and yields [`Guarded::Applied`].
    /// `Ok(None)` rewinds it and yields [`Guarded::Reverted`]. `Err`
    /// rewinds it and surfaces the failure as [`Error::Callback`], so an
    /// observed error leaves the counter as if the call never happened.
    pub async fn increment_guarded<T, F, Fut>(
        &self,
        key: &str,
        by: i64,
        follow_up: F,
    ) -> Result<Guarded<T>>
    where
        F: FnOnce(i64) -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, CallbackError>>,
    {
        let key = self.normalize(key).await?;
        let value = self.increment_raw(&key, by).await?;

        match follow_up(value).await {
            Ok(Some(output)) => Ok(Guarded::Applied(output)),
            Ok(None) => {
                self.decrement_raw(&key, by).await?;
                Ok(Guarded::Reverted)
            }
            Err(cause) => {
                self.decrement_raw(&key, by).await?;
                Err(Error::Callback(cause))
            }
        }
    }

    /// Decrement, then run `follow_up` with the new slice value; the
    /// rewind re-increments. Semantics as [`Tally::increment_guarded`].
    pub async fn decrement_guarded<T, F, Fut>(
        &self,
        key: &str,
        by: i64,
        follow_up: F,
    ) -> Result<Guarded<T>>
    where
        F: FnOnce(i64) -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, CallbackError>>,
    {
        let key = self.normalize(key).await?;
        let value = self.decrement_raw(&key, by).await?;

        match follow_up(value).await {
            Ok(Some(output)) => Ok(Guarded::Applied(output)),
            Ok(None) => {
                self.increment_raw(&key, by).await?;
                Ok(Guarded::Reverted)
            }
            Err(cause) => {
                self.increment_raw(&key, by).await?;
                Err(Error::Callback(cause))
            }
        }
    }

    /// Increment and emit a counter event carrying the new value.
    pub async fn increment_with_logging(
        &self,
        key: &str,
        by: i64,
        payload: LogPayload,
        options: LogOptions,
    ) -> Result<i64> {
        let value = self.increment(key, by).await?;
        self.log.emit(key, value, &payload, &options);
        Ok(value)
    }

    /// Decrement and emit a counter event carrying the new value.
    pub async fn decrement_with_logging(
        &self,
        key: &str,
        by: i64,
        payload: LogPayload,
        options: LogOptions,
    ) -> Result<i64> {
        let value = self.decrement(key, by).await?;
        self.log.emit(key, value, &payload, &options);
        Ok(value)
    }

    /// Value of `key`'s current, still-accumulating slice.
    pub async fn value(&self, key: &str) -> Result<i64> {
        let key = self.normalize(key).await?;
        Ok(self.store.value(&key, self.current_slice()).await?)
    }

    /// Whether `key` is registered.
    pub async fn has_counter(&self, key: &str) -> Result<bool> {
        let key = self.normalize(key).await?;
        Ok(self.registry.is_registered(&key).await?)
    }

    // =================================================================
    // drains
    // =================================================================

    /// Drain every registered counter's unread completed slices.
    ///
    /// Serialized process-wide by the advisory drain lock; a concurrent
    /// caller fails fast with [`Error::LockUnavailable`] and produces no
    /// side effects.
    pub async fn read_counters(&self, mark_read: bool) -> Result<Vec<SliceValue>> {
        self.read_counters_with(mark_read, |item| item).await
    }

    /// As [`Tally::read_counters`], passing every item through
    /// `transform`.
    pub async fn read_counters_with<T, F>(&self, mark_read: bool, mut transform: F) -> Result<Vec<T>>
    where
        F: FnMut(SliceValue) -> T,
    {
        let end_slice = self.current_slice() - 1;
        let lock = self
            .client
            .lock(self.keys.counter_list_lock(), DRAIN_LOCK_LEASE);

        match lock
            .with_lock(|| self.drain_all(end_slice, mark_read, &mut transform))
            .await?
        {
            Some(outcome) => outcome,
            None => Err(Error::LockUnavailable),
        }
    }

    async fn drain_all<T, F>(
        &self,
        end_slice: i64,
        mark_read: bool,
        transform: &mut F,
    ) -> Result<Vec<T>>
    where
        F: FnMut(SliceValue) -> T,
    {
        let mut items = Vec::new();

        for (key, last_read) in self.registry.enumerate().await? {
            let produced = self
                .enumerate_slices(
                    &key,
                    Some(last_read + 1),
                    Some(end_slice),
                    mark_read,
                    &mut *transform,
                )
                .await?;
            items.extend(produced);
        }

        Ok(items)
    }

    /// Drain one counter's unread completed slices, resuming from its own
    /// last-read score. Not lock-protected: two concurrent readers of the
    /// same key may race on the score and are tolerated by the corrective
    /// write in the enumerator.
    pub async fn read_counter(&self, key: &str, mark_read: bool) -> Result<Vec<SliceValue>> {
        self.read_counter_with(key, mark_read, |item| item).await
    }

    /// As [`Tally::read_counter`], passing every item through `transform`.
    pub async fn read_counter_with<T, F>(
        &self,
        key: &str,
        mark_read: bool,
        mut transform: F,
    ) -> Result<Vec<T>>
    where
        F: FnMut(SliceValue) -> T,
    {
        let end_slice = self.current_slice() - 1;
        self.enumerate_slices(key, None, Some(end_slice), mark_read, &mut transform)
            .await
    }

    /// [`Tally::read_counters`] with mark-read on.
    pub async fn drain_counters(&self) -> Result<Vec<SliceValue>> {
        self.read_counters(true).await
    }

    /// [`Tally::read_counter`] with mark-read on.
    pub async fn drain_counter(&self, key: &str) -> Result<Vec<SliceValue>> {
        self.read_counter(key, true).await
    }

    /// Mark every registered counter as read through the last completed
    /// slice without reading any values.
    pub async fn mark_read_all(&self) -> Result<()> {
        let last_completed = self.current_slice() - 1;
        Ok(self.registry.mark_all(last_completed).await?)
    }

    // =================================================================
    // maintenance
    // =================================================================

    /// Deregister every counter with no positive value anywhere in the
    /// retained window. A maintenance sweep, meant to run out-of-band
    /// rather than on the write/read path.
    pub async fn prune_counters(&self) -> Result<PruneSummary> {
        let now = unix_now();
        let end_slice = slice_index(now, self.granularity) - 1;
        let mut summary = PruneSummary::default();

        for (key, _) in self.registry.enumerate().await? {
            summary.examined += 1;

            let mut has_data = false;
            if let Some(range) = resolve_range(
                now,
                self.granularity,
                self.expiration,
                None,
                Some(0),
                Some(end_slice),
            ) {
                for slice in range.start..=range.end {
                    if self.store.value(&key, slice).await? > 0 {
                        has_data = true;
                        break;
                    }
                }
            }

            if has_data {
                summary.kept += 1;
            } else {
                info!("counter '{}' has no data in the retained window; unregistering", key);
                summary.pruned += 1;
                self.registry.unregister(&key).await?;
            }
        }

        info!(
            "pruned counters: examined {}, kept {}, pruned {}",
            summary.examined, summary.kept, summary.pruned
        );

        Ok(summary)
    }

    // =================================================================
    // sliding averages
    // =================================================================

    /// Record a sample for `key`'s sliding average.
    pub async fn push(&self, key: &str, value: f64) -> Result<()> {
        let key = self.normalize(key).await?;
        Ok(self.averages.push(&key, value).await?)
    }

    /// The `window` most recent samples for `key`, newest first.
    pub async fn average_data(&self, key: &str, window: usize) -> Result<Vec<f64>> {
        let key = self.normalize(key).await?;
        Ok(self.averages.data(&key, window).await?)
    }

    /// Mean of the default window of recent samples; 0.0 when empty.
    pub async fn average(&self, key: &str) -> Result<f64> {
        let key = self.normalize(key).await?;
        Ok(self.averages.average(&key, DEFAULT_AVERAGE_WINDOW).await?)
    }

    // =================================================================
    // internals
    // =================================================================

    fn current_slice(&self) -> i64 {
        slice_index(unix_now(), self.granularity)
    }

    async fn increment_raw(&self, key: &str, by: i64) -> Result<i64> {
        self.ensure_registered(key).await?;
        Ok(self.store.incr(key, self.current_slice(), by).await?)
    }

    async fn decrement_raw(&self, key: &str, by: i64) -> Result<i64> {
        self.ensure_registered(key).await?;
        Ok(self.store.decr(key, self.current_slice(), by).await?)
    }

    /// A freshly registered counter is caught up through the slice
    /// preceding registration.
    async fn ensure_registered(&self, key: &str) -> Result<()> {
        if !self.registry.is_registered(key).await? {
            self.registry.register(key, self.current_slice() - 1).await?;
        }
        Ok(())
    }

    /// Truncate over-long keys, recording each occurrence on a dedicated
    /// counter and through the logging hook.
    async fn normalize(&self, key: &str) -> Result<String> {
        let (normalized, truncated) = normalize_key(key);

        if truncated {
            let count = self.increment_raw(NORMALIZATION_KEY, 1).await?;
            self.log.emit(
                NORMALIZATION_KEY,
                count,
                &LogPayload::message("counter key required normalization"),
                &LogOptions::default()
                    .field("original_key", key)
                    .field("normalized_key", normalized.as_ref()),
            );
        }

        Ok(normalized.into_owned())
    }

    /// Walk the resolved slice range for `key`, reading each slice's value
    /// and, under mark-read, advancing the registry score as each slice is
    /// consumed.
    async fn enumerate_slices<T, F>(
        &self,
        key: &str,
        requested_start: Option<i64>,
        requested_end: Option<i64>,
        mark_read: bool,
        transform: &mut F,
    ) -> Result<Vec<T>>
    where
        F: FnMut(SliceValue) -> T,
    {
        let now = unix_now();
        let last_read = self.registry.score(key).await?;

        let Some(range) = resolve_range(
            now,
            self.granularity,
            self.expiration,
            last_read,
            requested_start,
            requested_end,
        ) else {
            return Ok(Vec::new());
        };

        // Pre-set the score so a reader that dies mid-range resumes from
        // the right place.
        if mark_read {
            self.registry.set_score(key, range.start - 1).await?;
        }

        let mut items = Vec::new();

        for slice in range.start..=range.end {
            let value = self.store.value(key, slice).await?;
            let item = SliceValue {
                counter: key.to_string(),
                value,
                timestamp: slice * self.granularity as i64,
            };

            items.push(transform(item));

            // Advance one slice at a time; if the increment lands somewhere
            // unexpected (lost update under a concurrent reader), force the
            // score back to the slice just consumed.
            if mark_read {
                let advanced = self.registry.increment_score(key).await?;
                if advanced != slice {
                    self.registry.set_score(key, slice).await?;
                }
            }
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::RecordingSink;
    use tracing::Level;

    /// Connect to the test server, or skip when none is reachable.
    async fn test_tally(prefix: &str) -> Option<(Tally, Arc<RecordingSink>)> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());

        let client = match RedisClient::new(&redis_url).await {
            Ok(client) => client,
            Err(e) => {
                println!("Skipping counter tests: {}", e);
                return None;
            }
        };

        let sink = Arc::new(RecordingSink::new());
        let config = TallyConfig {
            key_prefix: Some(format!("tally_test:{}", prefix)),
            granularity: 60,
            expiration: 300,
            ..TallyConfig::default()
        };

        let tally = Tally::builder(config)
            .log_sink(sink.clone())
            .build(client)
            .unwrap();

        Some((tally, sink))
    }

    /// Avoid starting a test within a few seconds of a slice rollover.
    async fn settle_slice_boundary(granularity: u64) {
        let into = unix_now() as u64 % granularity;
        if into >= granularity - 5 {
            tokio::time::sleep(Duration::from_secs(granularity - into + 1)).await;
        }
    }

    /// Wipe a counter's registration and every slice record in the
    /// retained window, so reruns within the TTL start clean.
    async fn clear_counter(tally: &Tally, key: &str) {
        let now = unix_now();
        let current = slice_index(now, tally.granularity);
        let floor = slice_index(now - tally.expiration as i64, tally.granularity);

        for slice in floor..=current {
            tally
                .client
                .counter(tally.keys.slice(key, slice))
                .delete()
                .await
                .unwrap();
        }

        tally.registry.unregister(key).await.unwrap();
    }

    async fn clear_samples(tally: &Tally, key: &str) {
        tally
            .client
            .sorted_set(tally.keys.samples(key))
            .delete()
            .await
            .unwrap();
        tally
            .client
            .sorted_set(tally.keys.average_list())
            .remove(key)
            .await
            .unwrap();
    }

    /// Backdate a counter's read progress and plant values in completed
    /// slices, as if writers had been active in earlier windows.
    async fn plant_history(tally: &Tally, key: &str, values: &[i64]) -> i64 {
        let last_completed = tally.current_slice() - 1;
        let first = last_completed - values.len() as i64 + 1;

        tally.registry.set_score(key, first - 1).await.unwrap();
        for (offset, value) in values.iter().enumerate() {
            if *value != 0 {
                tally
                    .store
                    .incr(key, first + offset as i64, *value)
                    .await
                    .unwrap();
            }
        }

        last_completed
    }

    // ====== increment / decrement / value ======

    #[tokio::test]
    async fn test_increment_and_value() {
        let Some((tally, _)) = test_tally("incr").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "apples").await;

        assert_eq!(tally.value("apples").await.unwrap(), 0);
        assert_eq!(tally.increment("apples", 1).await.unwrap(), 1);
        assert_eq!(tally.value("apples").await.unwrap(), 1);
        assert_eq!(tally.increment("apples", 4).await.unwrap(), 5);
        assert_eq!(tally.value("apples").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_decrement() {
        let Some((tally, _)) = test_tally("decr").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "bananas").await;

        assert_eq!(tally.value("bananas").await.unwrap(), 0);
        assert_eq!(tally.decrement("bananas", 1).await.unwrap(), -1);
        assert_eq!(tally.value("bananas").await.unwrap(), -1);
        assert_eq!(tally.decrement("bananas", 6).await.unwrap(), -7);
    }

    #[tokio::test]
    async fn test_has_counter_after_first_increment() {
        let Some((tally, _)) = test_tally("membership").await else { return };
        clear_counter(&tally, "cherries").await;

        assert!(!tally.has_counter("cherries").await.unwrap());
        tally.increment("cherries", 1).await.unwrap();
        assert!(tally.has_counter("cherries").await.unwrap());
    }

    // ====== guarded mutations ======

    #[tokio::test]
    async fn test_guarded_increment_applies() {
        let Some((tally, _)) = test_tally("guard_apply").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "orders").await;

        let outcome = tally
            .increment_guarded("orders", 5, |value| async move {
                assert_eq!(value, 5);
                Ok::<_, CallbackError>(Some("shipped"))
            })
            .await
            .unwrap();

        assert_eq!(outcome, Guarded::Applied("shipped"));
        assert_eq!(tally.value("orders").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_guarded_increment_reverts_on_none() {
        let Some((tally, _)) = test_tally("guard_none").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "orders").await;

        let outcome = tally
            .increment_guarded("orders", 5, |_| async move {
                Ok::<Option<()>, CallbackError>(None)
            })
            .await
            .unwrap();

        assert_eq!(outcome, Guarded::Reverted);
        assert_eq!(tally.value("orders").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_guarded_increment_rewinds_on_error() {
        let Some((tally, _)) = test_tally("guard_err").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "orders").await;

        let result = tally
            .increment_guarded("orders", 5, |_| async move {
                Err::<Option<()>, CallbackError>("payment declined".into())
            })
            .await;

        assert!(matches!(result, Err(Error::Callback(_))));
        assert_eq!(tally.value("orders").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_guarded_decrement_rewinds_on_error() {
        let Some((tally, _)) = test_tally("guard_decr").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "stock").await;

        tally.increment("stock", 10).await.unwrap();

        let result = tally
            .decrement_guarded("stock", 3, |_| async move {
                Err::<Option<()>, CallbackError>("reservation failed".into())
            })
            .await;

        assert!(matches!(result, Err(Error::Callback(_))));
        assert_eq!(tally.value("stock").await.unwrap(), 10);
    }

    // ====== logging hooks ======

    #[tokio::test]
    async fn test_increment_with_logging_emits_event() {
        let Some((tally, sink)) = test_tally("log_incr").await else { return };
        clear_counter(&tally, "signups").await;

        tally
            .increment_with_logging(
                "signups",
                1,
                LogPayload::message("new signup"),
                LogOptions::default().field("plan", "pro"),
            )
            .await
            .unwrap();

        let (level, event) = sink.last().unwrap();
        assert_eq!(level, Level::INFO);
        assert_eq!(event.message, "new signup");
        assert_eq!(event.fields["plan"], "pro");
    }

    // ====== drains ======

    #[tokio::test]
    async fn test_read_counter_advances_score() {
        let Some((tally, _)) = test_tally("read_one").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "monkey").await;

        let last_completed = plant_history(&tally, "monkey", &[1, 2, 3]).await;

        let drained = tally.read_counter("monkey", true).await.unwrap();
        let values: Vec<i64> = drained.iter().map(|item| item.value).collect();
        assert_eq!(values, vec![1, 2, 3]);

        // Timestamps sit on slice boundaries, in ascending order.
        for window in drained.windows(2) {
            assert_eq!(window[1].timestamp - window[0].timestamp, 60);
            assert_eq!(window[0].timestamp % 60, 0);
        }

        assert_eq!(
            tally.registry.score("monkey").await.unwrap(),
            Some(last_completed)
        );

        // A subsequent marked read resumes past the consumed range.
        assert!(tally.read_counter("monkey", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmarked_read_leaves_score() {
        let Some((tally, _)) = test_tally("peek").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "monkey").await;

        let last_completed = plant_history(&tally, "monkey", &[4, 5]).await;
        let score_before = tally.registry.score("monkey").await.unwrap();

        let drained = tally.read_counter("monkey", false).await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(tally.registry.score("monkey").await.unwrap(), score_before);

        // The same slices drain again until someone marks them read.
        let again = tally.read_counter("monkey", false).await.unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(again.last().unwrap().timestamp, last_completed * 60);
    }

    #[tokio::test]
    async fn test_read_counters_drain_is_idempotent() {
        let Some((tally, _)) = test_tally("drain_all").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "alpha").await;
        clear_counter(&tally, "beta").await;

        plant_history(&tally, "alpha", &[2, 4]).await;
        plant_history(&tally, "beta", &[7]).await;

        let drained = tally.read_counters(true).await.unwrap();
        let total: i64 = drained.iter().map(|item| item.value).sum();
        assert_eq!(total, 13);
        assert_eq!(drained.len(), 3);

        // Nothing left on the second pass: no double counting.
        let drained_again = tally.read_counters(true).await.unwrap();
        assert!(drained_again.is_empty());
    }

    #[tokio::test]
    async fn test_read_counters_fails_fast_when_locked() {
        let Some((tally, _)) = test_tally("locked").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "gamma").await;

        plant_history(&tally, "gamma", &[9]).await;
        let score_before = tally.registry.score("gamma").await.unwrap();

        let holder = tally
            .client
            .lock(tally.keys.counter_list_lock(), Duration::from_secs(30));
        assert!(holder.try_acquire().await.unwrap());

        let result = tally.read_counters(true).await;
        assert!(matches!(result, Err(Error::LockUnavailable)));

        // The failed drain produced no side effects.
        assert_eq!(tally.registry.score("gamma").await.unwrap(), score_before);

        holder.release().await.unwrap();
        assert_eq!(tally.read_counters(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_read_counters_with_transform() {
        let Some((tally, _)) = test_tally("transform").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "delta").await;

        plant_history(&tally, "delta", &[3, 6]).await;

        let doubled = tally
            .read_counters_with(true, |item| item.value * 2)
            .await
            .unwrap();
        assert_eq!(doubled, vec![6, 12]);
    }

    #[tokio::test]
    async fn test_mark_read_all_skips_values() {
        let Some((tally, _)) = test_tally("mark_all").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "epsilon").await;

        let last_completed = plant_history(&tally, "epsilon", &[8, 8]).await;

        tally.mark_read_all().await.unwrap();

        assert_eq!(
            tally.registry.score("epsilon").await.unwrap(),
            Some(last_completed)
        );
        assert!(tally.read_counter("epsilon", true).await.unwrap().is_empty());
    }

    // ====== pruning ======

    #[tokio::test]
    async fn test_prune_unregisters_empty_counters() {
        let Some((tally, _)) = test_tally("prune").await else { return };
        settle_slice_boundary(tally.granularity).await;
        clear_counter(&tally, "quiet").await;
        clear_counter(&tally, "busy").await;
        clear_counter(&tally, "negative").await;

        // Registered but never written.
        tally.registry.set_score("quiet", 0).await.unwrap();
        // Positive activity in a completed slice.
        plant_history(&tally, "busy", &[0, 1]).await;
        // Only negative activity; counts as no data.
        plant_history(&tally, "negative", &[-5]).await;

        let summary = tally.prune_counters().await.unwrap();
        assert_eq!(summary.examined, 3);
        assert_eq!(summary.kept, 1);
        assert_eq!(summary.pruned, 2);

        assert!(tally.registry.is_registered("busy").await.unwrap());
        assert!(!tally.registry.is_registered("quiet").await.unwrap());
        assert!(!tally.registry.is_registered("negative").await.unwrap());
    }

    // ====== key normalization ======

    #[tokio::test]
    async fn test_key_truncation_records_event() {
        let Some((tally, sink)) = test_tally("truncate").await else { return };
        settle_slice_boundary(tally.granularity).await;

        let long_key = "x".repeat(300);
        let truncated: String = long_key.chars().take(crate::keys::MAX_KEY_LENGTH).collect();
        clear_counter(&tally, NORMALIZATION_KEY).await;
        clear_counter(&tally, &truncated).await;

        tally.increment(&long_key, 1).await.unwrap();

        // The value landed under the truncated key.
        assert_eq!(tally.value(&truncated).await.unwrap(), 1);
        assert!(tally.has_counter(&truncated).await.unwrap());

        // Exactly one normalization event per occurrence.
        assert_eq!(tally.value(NORMALIZATION_KEY).await.unwrap(), 1);
        tally.value(&long_key).await.unwrap();
        assert_eq!(tally.value(NORMALIZATION_KEY).await.unwrap(), 2);

        let (level, event) = sink.last().unwrap();
        assert_eq!(level, Level::INFO);
        assert_eq!(event.fields["original_key"], long_key.as_str());
        assert_eq!(event.fields["normalized_key"], truncated.as_str());
    }

    // ====== sliding averages ======

    #[tokio::test]
    async fn test_push_and_average() {
        let Some((tally, _)) = test_tally("avg").await else { return };
        clear_samples(&tally, "latency").await;

        tally.push("latency", 1.0).await.unwrap();
        tally.push("latency", 2.0).await.unwrap();
        tally.push("latency", 3.0).await.unwrap();

        assert_eq!(tally.average("latency").await.unwrap(), 2.0);

        let data = tally.average_data("latency", 2).await.unwrap();
        assert_eq!(data.len(), 2);
    }

    #[tokio::test]
    async fn test_average_of_empty_set_is_zero() {
        let Some((tally, _)) = test_tally("avg_empty").await else { return };
        clear_samples(&tally, "untouched").await;

        assert_eq!(tally.average("untouched").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_average_window_trims_old_samples() {
        let Some((tally, _)) = test_tally("avg_trim").await else { return };
        clear_samples(&tally, "sizes").await;

        for value in [1.0, 2.0, 3.0] {
            tally.push("sizes", value).await.unwrap();
        }

        // Let the next batch land on a later score so the cutoff separates
        // the generations.
        tokio::time::sleep(Duration::from_millis(1_200)).await;

        for value in [4.0, 5.0, 6.0] {
            tally.push("sizes", value).await.unwrap();
        }

        let data = tally.average_data("sizes", 3).await.unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.iter().sum::<f64>(), 15.0);

        // The read-side trim evicted the first generation.
        let remaining = tally
            .client
            .sorted_set(tally.keys.samples("sizes"))
            .len()
            .await
            .unwrap();
        assert_eq!(remaining, 3);
    }
}
