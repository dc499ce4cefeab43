//! Typed Redis primitives used by the tally counter engine: atomic integer
//! registers, sorted sets, and a non-blocking advisory lease lock. One
//! [`RedisClient`] is opened per process; the handles it produces share the
//! underlying managed connection.

pub mod client;
pub mod counter;
pub mod error;
pub mod lock;
pub mod sorted_set;

pub use client::RedisClient;
pub use counter::Counter;
pub use error::StoreError;
pub use lock::Lock;
pub use sorted_set::SortedSet;
