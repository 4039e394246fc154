//! Thread-safe counter for method-call ids.
//!
//! # What is a call id? (for beginners)
//!
//! A method call is addressed as `METHODS/<path>/<caller-id>/<call-id>`.
//! The caller id is a UUID picked once per remote client; the call id comes
//! from this counter.  Together they make every call's topic, and therefore
//! its reply stream, unique: two concurrent calls to the same method never
//! see each other's replies.
//!
//! The counter uses `AtomicU64`, so any number of tasks can start calls
//! simultaneously without a lock and without ever drawing the same id.

use std::sync::atomic::{AtomicU64, Ordering};

/// A lock-free, monotonically increasing call-id source.
///
/// # Examples
///
/// ```rust
/// use tagbus_core::CallIdCounter;
///
/// let counter = CallIdCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct CallIdCounter {
    inner: AtomicU64,
}

impl CallIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id.  Wraps from `u64::MAX` to 0.
    ///
    /// `Ordering::Relaxed` is enough: ids only need to be distinct, they do
    /// not publish any other memory.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call to [`next`](Self::next) will return.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}
