//! # Tally — time-sliced counters on Redis
//!
//! Many independent processes increment named counters; readers later
//! drain them as discrete, non-overlapping slices of elapsed time, each
//! slice consumed by at most one reader cycle.
//!
//! ## Design
//!
//! - Writes land in one atomic integer register per (counter, slice)
//!   pair, where a slice is a fixed-width time bucket. No locking on the
//!   write path: the store's single-key operations are atomic.
//! - A sorted set tracks every registered counter with its last-read
//!   slice as the score. Readers resume from `score + 1` and advance the
//!   score as they consume slices, so a crashed reader picks up where it
//!   left off and a repeated drain yields nothing new.
//! - The multi-counter drain is serialized by a non-blocking advisory
//!   lease lock; a concurrent drain fails fast instead of queuing.
//! - Slice records expire after a configured retention horizon; readers
//!   never reach below that floor, and never into the still-accumulating
//!   current slice.
//! - A separate sorted set per key holds recent numeric samples for
//!   sliding-window averages, trimmed lazily on read.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use tally::{Tally, TallyConfig};
//!
//! let tally = Tally::connect(TallyConfig::default()).await?;
//!
//! tally.increment("requests", 1).await?;
//!
//! // Later, from the reader process:
//! for item in tally.read_counters(true).await? {
//!     println!("{} was {} at {}", item.counter, item.value, item.timestamp);
//! }
//! ```

mod average;
pub mod config;
pub mod counters;
pub mod error;
mod keys;
pub mod logging;
mod registry;
mod slice;
mod store;

pub use average::DEFAULT_AVERAGE_WINDOW;
pub use config::TallyConfig;
pub use counters::{Guarded, PruneSummary, Tally, TallyBuilder};
pub use error::{CallbackError, ConfigError, Error, Result};
pub use keys::MAX_KEY_LENGTH;
pub use logging::{
    FormattedEvent, LogFormatter, LogOptions, LogPayload, LogSink, RecordingSink, TracingSink,
};
pub use slice::SliceValue;
