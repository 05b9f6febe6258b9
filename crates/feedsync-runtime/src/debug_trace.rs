#![forbid(unsafe_code)]

//! Env-gated stderr tracing for the threaded driver.
//!
//! Set `FEEDSYNC_DEBUG_TRACE=1` (or `true`) to get one timestamped line per
//! spawned fetch and per applied completion, without installing a
//! `tracing` subscriber. Off by default; a disabled check is one bool load.
//!
//! ```ignore
//! use feedsync_runtime::debug_trace;
//! debug_trace!("page fetch spawned: stream={} in_flight={}", key, n);
//! ```

use std::sync::LazyLock;
use std::time::Instant;

static ENABLED: LazyLock<bool> = LazyLock::new(|| {
    std::env::var("FEEDSYNC_DEBUG_TRACE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
});

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Whether `FEEDSYNC_DEBUG_TRACE` switched tracing on.
#[inline]
pub fn is_enabled() -> bool {
    *ENABLED
}

/// Milliseconds since the first trace call, shared by all threads so
/// worker and pump lines interleave in order.
#[inline]
pub fn elapsed_ms() -> u64 {
    u64::try_from(EPOCH.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Print a timestamped line to stderr when tracing is on.
#[macro_export]
macro_rules! debug_trace {
    ($($arg:tt)*) => {
        if $crate::debug_trace::is_enabled() {
            eprintln!(
                "[feedsync {:>8}ms {:?}] {}",
                $crate::debug_trace::elapsed_ms(),
                ::std::thread::current().id(),
                format_args!($($arg)*)
            );
        }
    };
}
