//! Slice math: mapping timestamps to window indices and resolving the
//! range of slices a reader should consume.

use serde::Serialize;

/// One drained slice of one counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SliceValue {
    /// Counter key the value belongs to.
    pub counter: String,
    /// Accumulated value for the slice.
    pub value: i64,
    /// Unix seconds of the slice's left boundary.
    pub timestamp: i64,
}

/// Number of whole `granularity` periods since the Unix epoch.
pub(crate) fn slice_index(unix_secs: i64, granularity: u64) -> i64 {
    unix_secs / granularity as i64
}

/// Current wall-clock time in unix seconds.
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// Inclusive slice range for one read. `start` may exceed `end`, in which
/// case the range is empty but the read-progress score is still pre-set
/// under mark-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SliceRange {
    pub(crate) start: i64,
    pub(crate) end: i64,
}

/// Resolve the effective read range for one counter.
///
/// `last_read` is the registry score, `None` before the first read. The
/// start never reaches below the retention floor (slices that old have
/// expired) and the end never reaches into the still-accumulating current
/// slice. Returns `None` when the start lands past the last completed
/// slice; the caller must then leave the registry score untouched.
pub(crate) fn resolve_range(
    now: i64,
    granularity: u64,
    expiration: u64,
    last_read: Option<i64>,
    requested_start: Option<i64>,
    requested_end: Option<i64>,
) -> Option<SliceRange> {
    let last_completed = slice_index(now, granularity) - 1;
    let floor = slice_index(now.saturating_sub(expiration as i64), granularity);

    let start = requested_start
        .unwrap_or_else(|| last_read.unwrap_or(-1) + 1)
        .max(floor);
    let end = requested_end.unwrap_or(last_completed).min(last_completed);

    if start > last_completed {
        return None;
    }

    Some(SliceRange { start, end })
}
