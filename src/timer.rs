//! Monotonic time keeping for reception timestamps and transmit pacing.

use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

/// Reception time of a CAN frame, relative to a monotonic origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

fn origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// Returns the current monotonic time as a [`Timestamp`].
pub fn now() -> Timestamp {
    let elapsed = origin().elapsed();

    Timestamp {
        secs: elapsed.as_secs() as i64,
        nanos: elapsed.subsec_nanos(),
    }
}

/// Suspends the calling thread for the given number of microseconds.
pub fn delay_us(micros: u64) {
    thread::sleep(Duration::from_micros(micros));
}

/// Deadline helper for timed waits.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Instant,
}

impl Deadline {
    pub(crate) fn after_millis(millis: u16) -> Self {
        Self {
            at: Instant::now() + Duration::from_millis(u64::from(millis)),
        }
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub(crate) fn elapsed(&self) -> bool {
        self.remaining().is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_monotonic() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }

    #[test]
    fn deadline_elapses() {
        let deadline = Deadline::after_millis(1);
        delay_us(2_000);
        assert!(deadline.elapsed());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
