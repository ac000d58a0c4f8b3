//! A small clock abstraction.
//!
//! The dispatcher needs a monotonic-ish nanosecond clock to stamp
//! `start_time_ns`, compute `end_time_ns` deadlines, and check for queue
//! timeouts. Depending on `std::time::SystemTime` directly throughout the
//! core would make deadline logic impossible to test deterministically, so
//! every consumer takes a `&dyn TimeProvider` (or is generic over
//! `TimeProvider`) instead of reading the wall clock itself.

use std::{
    fmt::Debug,
    sync::atomic::{AtomicI64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// A single point in time, represented as nanoseconds since the Unix epoch.
///
/// `Time` is `Copy` and carries no provider state; it's produced by a
/// [`TimeProvider`] and consumed as plain data everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(i64);

impl Time {
    /// Construct from a nanosecond timestamp.
    pub fn from_timestamp_nanos(ns: i64) -> Self {
        Self(ns)
    }

    /// Construct from a millisecond timestamp.
    pub fn from_timestamp_millis(ms: i64) -> Self {
        Self(ms * 1_000_000)
    }

    /// Nanoseconds since the Unix epoch.
    pub fn timestamp_nanos(&self) -> i64 {
        self.0
    }

    /// `self + d`, where `d` is a duration in nanoseconds.
    pub fn checked_add_ns(&self, ns: i64) -> Option<Self> {
        self.0.checked_add(ns).map(Self)
    }
}

/// Source of the current time.
///
/// Implemented by [`SystemProvider`] (the real wall clock) and
/// [`MockProvider`] (a fixed or steerable time, for tests).
pub trait TimeProvider: Debug + Send + Sync + 'static {
    /// The current time.
    fn now(&self) -> Time;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider {}

impl SystemProvider {
    /// Construct a new [`SystemProvider`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        let ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_nanos() as i64;
        Time::from_timestamp_nanos(ns)
    }
}

/// A fixed (but mutable) time, for deterministic tests.
#[derive(Debug)]
pub struct MockProvider {
    now: AtomicI64,
}

impl MockProvider {
    /// Construct a [`MockProvider`] fixed at `time`.
    pub fn new(time: Time) -> Self {
        Self {
            now: AtomicI64::new(time.timestamp_nanos()),
        }
    }

    /// Advance (or rewind) the mock clock to `time`.
    pub fn set(&self, time: Time) {
        self.now.store(time.timestamp_nanos(), Ordering::SeqCst);
    }

    /// Advance the mock clock by `ns` nanoseconds.
    pub fn inc(&self, ns: i64) {
        self.now.fetch_add(ns, Ordering::SeqCst);
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        Time::from_timestamp_nanos(self.now.load(Ordering::SeqCst))
    }
}
