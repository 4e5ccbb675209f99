//! Consumer-supplied wall-clock source.
//!
//! Mirrors `topgun_core::hlc::ClockSource`: the core never reads the system
//! clock directly, it always goes through a [`ClockSource`] so embedders can
//! substitute a deterministic clock in tests or simulations. `gridStartTime`,
//! ack-tracker diagnostics, and the join-wait diagnostic cadence (spec.md
//! §5) are the only consumers; event ordering never depends on wall time.

use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies the current wall-clock time in milliseconds since the Unix epoch.
pub trait ClockSource: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// [`ClockSource`] backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_nonzero_and_monotone_enough() {
        let clock = SystemClock;
        let first = clock.now_millis();
        let second = clock.now_millis();
        assert!(first > 0);
        assert!(second >= first);
    }

    struct FixedClock(u64);
    impl ClockSource for FixedClock {
        fn now_millis(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn custom_clock_source_is_usable_as_trait_object() {
        let clock: Box<dyn ClockSource> = Box::new(FixedClock(12345));
        assert_eq!(clock.now_millis(), 12345);
    }
}
