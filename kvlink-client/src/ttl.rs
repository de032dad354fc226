//! # TTL Policies
//!
//! Purpose: Turn a time-to-live policy into the integer number of seconds a
//! write should carry.
//!
//! ## Design Principles
//! 1. **Closed Set**: Every policy shape is an enum variant, so resolution is
//!    an exhaustive match with no fallback branch.
//! 2. **Lazy Resolution**: Policies are resolved once per write, with the key
//!    being written, so per-key policies see the actual key.
//! 3. **Zero Means Persistent**: A resolved `0` is "no expiry", never
//!    "expire immediately". Unsigned seconds keep results non-negative.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Per-key TTL callback.
pub type TtlFn = Arc<dyn Fn(&str) -> u64 + Send + Sync>;

/// Time-to-live policy applied to writes.
#[derive(Clone, Default)]
pub enum TtlPolicy {
    /// Keys never expire.
    #[default]
    NoExpiry,
    /// Every key expires after the same number of seconds.
    FixedSeconds(u64),
    /// Every key expires after the same duration, truncated to whole seconds.
    Duration(Duration),
    /// Seconds are computed from the key at write time.
    PerKey(TtlFn),
}

impl TtlPolicy {
    /// Builds a per-key policy from a closure.
    pub fn per_key<F>(f: F) -> Self
    where
        F: Fn(&str) -> u64 + Send + Sync + 'static,
    {
        TtlPolicy::PerKey(Arc::new(f))
    }

    /// Resolves the policy for `key` into whole seconds; `0` means no expiry.
    pub fn resolve(&self, key: &str) -> u64 {
        match self {
            TtlPolicy::NoExpiry => 0,
            TtlPolicy::FixedSeconds(seconds) => *seconds,
            TtlPolicy::Duration(duration) => duration.as_secs(),
            TtlPolicy::PerKey(f) => f(key),
        }
    }
}

impl fmt::Debug for TtlPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TtlPolicy::NoExpiry => write!(f, "NoExpiry"),
            TtlPolicy::FixedSeconds(seconds) => f.debug_tuple("FixedSeconds").field(seconds).finish(),
            TtlPolicy::Duration(duration) => f.debug_tuple("Duration").field(duration).finish(),
            TtlPolicy::PerKey(_) => write!(f, "PerKey(<fn>)"),
        }
    }
}

impl From<u64> for TtlPolicy {
    fn from(seconds: u64) -> Self {
        TtlPolicy::FixedSeconds(seconds)
    }
}

impl From<Duration> for TtlPolicy {
    fn from(duration: Duration) -> Self {
        TtlPolicy::Duration(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn no_expiry_resolves_to_zero() {
        assert_eq!(TtlPolicy::NoExpiry.resolve("foo"), 0);
        assert_eq!(TtlPolicy::default().resolve("foo"), 0);
    }

    #[test]
    fn fixed_seconds_pass_through() {
        assert_eq!(TtlPolicy::FixedSeconds(42).resolve("foo"), 42);
        assert_eq!(TtlPolicy::from(7).resolve("foo"), 7);
    }

    #[test]
    fn durations_truncate_toward_zero() {
        assert_eq!(TtlPolicy::from(Duration::from_secs(1)).resolve("foo"), 1);
        assert_eq!(TtlPolicy::from(Duration::from_millis(1999)).resolve("foo"), 1);
        assert_eq!(TtlPolicy::from(Duration::from_millis(999)).resolve("foo"), 0);
    }

    #[test]
    fn per_key_function_is_called_once_with_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let policy = TtlPolicy::per_key(move |key| {
            seen.fetch_add(1, Ordering::SeqCst);
            if key == "foo" { 30 } else { 0 }
        });

        assert_eq!(policy.resolve("foo"), 30);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(policy.resolve("bar"), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn debug_hides_closure() {
        assert_eq!(format!("{:?}", TtlPolicy::per_key(|_| 1)), "PerKey(<fn>)");
    }
}
