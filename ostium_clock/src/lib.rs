//! Time utilities for token lifetimes
//!
//! Tokens issued by an authority carry lifetimes measured in whole seconds, so
//! everything here works at second granularity. Clocks are abstracted behind
//! the [`Clock`] trait so that expiry decisions can be exercised in tests with
//! a [`TestClock`] that only moves when told to.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_must_use
)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

use std::{
    ops,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

/// Seconds since 1970-01-01T00:00:00Z
///
/// Serialized as a bare integer when the `serde` feature is enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct UnixTime(pub u64);

impl From<SystemTime> for UnixTime {
    /// Instants before the epoch are clamped to it
    fn from(t: SystemTime) -> Self {
        Self(
            t.duration_since(SystemTime::UNIX_EPOCH)
                .map_or(0, |elapsed| elapsed.as_secs()),
        )
    }
}

/// A whole number of seconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct DurationSecs(pub u64);

impl From<DurationSecs> for Duration {
    fn from(secs: DurationSecs) -> Self {
        Duration::from_secs(secs.0)
    }
}

impl ops::Add<DurationSecs> for UnixTime {
    type Output = UnixTime;

    fn add(self, span: DurationSecs) -> UnixTime {
        UnixTime(self.0.saturating_add(span.0))
    }
}

impl ops::Sub<UnixTime> for UnixTime {
    type Output = DurationSecs;

    /// Saturates at zero when `earlier` is actually later
    fn sub(self, earlier: UnixTime) -> DurationSecs {
        DurationSecs(self.0.saturating_sub(earlier.0))
    }
}

/// A source of the current time
pub trait Clock {
    /// The current time
    fn now(&self) -> UnixTime;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> UnixTime {
        C::now(self)
    }
}

/// Reads the operating system's wall clock
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    fn now(&self) -> UnixTime {
        SystemTime::now().into()
    }
}

/// A manually driven clock for tests
///
/// Every clone reads and moves the same instant, so a clock handed to a
/// component can still be advanced by the test that owns the original.
#[derive(Clone, Debug, Default)]
pub struct TestClock(Arc<AtomicU64>);

impl TestClock {
    /// A clock stopped at `time`
    pub fn new(time: UnixTime) -> Self {
        Self(Arc::new(AtomicU64::new(time.0)))
    }

    /// Jumps to `time`, forwards or backwards
    pub fn set(&self, time: UnixTime) {
        self.0.store(time.0, Ordering::SeqCst);
    }

    /// Moves forward by `span`
    pub fn advance(&self, span: DurationSecs) {
        self.0.fetch_add(span.0, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> UnixTime {
        UnixTime(self.0.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_time_never_goes_negative() {
        assert_eq!(UnixTime(10) - UnixTime(30), DurationSecs(0));
        assert_eq!(UnixTime(30) - UnixTime(10), DurationSecs(20));
        assert_eq!(UnixTime(u64::MAX) + DurationSecs(1), UnixTime(u64::MAX));
    }

    #[test]
    fn test_clock_handles_share_one_instant() {
        let clock = TestClock::new(UnixTime(100));
        let handle = clock.clone();

        handle.advance(DurationSecs(50));
        assert_eq!(clock.now(), UnixTime(150));

        clock.set(UnixTime(7));
        assert_eq!(handle.now(), UnixTime(7));
    }

    #[test]
    fn pre_epoch_system_time_clamps_to_zero() {
        let before = SystemTime::UNIX_EPOCH - Duration::from_secs(5);
        assert_eq!(UnixTime::from(before), UnixTime(0));
    }
}
