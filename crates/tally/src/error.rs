//! Error taxonomy for the counter engine.

use thiserror::Error;

/// Failure raised by the follow-up computation of a guarded mutation.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Rejected configuration. Surfaced at construction time; nothing is
/// half-configured when one of these is returned.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("granularity must be at least one second")]
    ZeroGranularity,

    #[error("expiration ({expiration}s) must exceed granularity ({granularity}s)")]
    ExpirationTooShort { granularity: u64, expiration: u64 },

    #[error("failed to load configuration: {0}")]
    Load(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Another reader currently holds the multi-counter drain lock. The
    /// caller may retry later; there is no built-in backoff.
    #[error("another reader holds the counter drain lock")]
    LockUnavailable,

    /// The underlying store failed. Not retried locally.
    #[error(transparent)]
    Store(#[from] tally_redis::StoreError),

    /// The follow-up computation of a guarded mutation failed; the counter
    /// mutation has already been rewound.
    #[error("guarded mutation failed: {0}")]
    Callback(#[source] CallbackError),
}

pub type Result<T> = std::result::Result<T, Error>;
