//! Key layout for everything the engine keeps in the store, plus key
//! normalization.

use std::borrow::Cow;

/// Longest counter key the engine will store; longer keys are truncated.
pub const MAX_KEY_LENGTH: usize = 255;

pub(crate) const COUNTER_LIST_KEY: &str = "tally:counter_list";
pub(crate) const COUNTER_LIST_LOCK_KEY: &str = "tally:counter_list_lock";
pub(crate) const AVERAGE_LIST_KEY: &str = "tally:average_list";
pub(crate) const COUNTER_SLICE_PREFIX: &str = "tally:counters";
pub(crate) const AVERAGE_SAMPLE_PREFIX: &str = "tally:averages";

/// Counter that records how many keys needed truncation.
pub(crate) const NORMALIZATION_KEY: &str = "tally:key_normalization";

/// Builds the store key names used by the engine, applying the optional
/// process-wide prefix.
#[derive(Debug, Clone)]
pub(crate) struct Keyspace {
    prefix: Option<String>,
}

impl Keyspace {
    pub(crate) fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    fn with_prefix(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    pub(crate) fn counter_list(&self) -> String {
        self.with_prefix(COUNTER_LIST_KEY)
    }

    pub(crate) fn counter_list_lock(&self) -> String {
        self.with_prefix(COUNTER_LIST_LOCK_KEY)
    }

    pub(crate) fn average_list(&self) -> String {
        self.with_prefix(AVERAGE_LIST_KEY)
    }

    /// Key of the accumulator for one (counter, slice) pair.
    pub(crate) fn slice(&self, key: &str, slice: i64) -> String {
        format!("{}:{}:{}", self.with_prefix(COUNTER_SLICE_PREFIX), key, slice)
    }

    /// Key of the sample set backing one sliding average.
    pub(crate) fn samples(&self, key: &str) -> String {
        format!("{}:{}", self.with_prefix(AVERAGE_SAMPLE_PREFIX), key)
    }
}

/// Truncate `key` to [`MAX_KEY_LENGTH`] characters.
///
/// Returns the possibly-shortened key and whether truncation happened; the
/// caller records the event.
pub(crate) fn normalize_key(key: &str) -> (Cow<'_, str>, bool) {
    if key.chars().count() <= MAX_KEY_LENGTH {
        return (Cow::Borrowed(key), false);
    }

    (Cow::Owned(key.chars().take(MAX_KEY_LENGTH).collect()), true)
}
