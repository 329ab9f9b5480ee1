//! Monotonic time as the runtime sees it.
//!
//! The kernel interface (§6) exposes a single clock primitive,
//! `get_time_ticks() -> microseconds`; everything else (relative delays,
//! deadlines, "forever") is built from that one `u64` tick count the way
//! `nx_svc`'s SVC wrappers build all of their timeout handling on top of a
//! raw nanosecond count.

use core::time::Duration;

/// A point in time, measured in microseconds on the kernel's monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64);

impl Instant {
    /// Wraps a raw microsecond tick count as returned by
    /// [`KernelOps::get_time_ticks`](crate::KernelOps::get_time_ticks).
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// The raw microsecond tick count.
    pub const fn as_ticks(self) -> u64 {
        self.0
    }

    /// `self + duration`, saturating rather than overflowing.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let micros = duration.as_micros().min(u64::MAX as u128) as u64;
        Self(self.0.saturating_add(micros))
    }
}

/// A point in time to stop waiting, or "never".
///
/// Spec.md §4.5 calls this "saturation to forever on overflow or when the
/// input denotes indefinite"; modeling it as an `Option` makes that
/// saturation a total, panic-free operation.
///
/// Ordering treats [`Deadline::INDEFINITE`] as later than every concrete
/// instant (it is the value a priority queue of deadlines should drain
/// last), which is the opposite of `Option`'s derived order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Deadline(Option<Instant>);

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        match (self.0, other.0) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => core::cmp::Ordering::Less,
            (None, Some(_)) => core::cmp::Ordering::Greater,
            (None, None) => core::cmp::Ordering::Equal,
        }
    }
}

impl Deadline {
    /// A deadline that never passes.
    pub const INDEFINITE: Deadline = Deadline(None);

    /// A concrete point in time.
    pub const fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    /// `now + delay`, saturating to [`Deadline::INDEFINITE`] on overflow.
    pub fn after(now: Instant, delay: Duration) -> Self {
        if delay == Duration::MAX {
            return Deadline::INDEFINITE;
        }
        Deadline(Some(now.saturating_add(delay)))
    }

    /// `true` if this deadline can never be reached.
    pub const fn is_indefinite(self) -> bool {
        self.0.is_none()
    }

    /// The concrete instant, if any.
    pub const fn instant(self) -> Option<Instant> {
        self.0
    }

    /// `true` if `now` has reached or passed this deadline.
    pub fn has_passed(self, now: Instant) -> bool {
        match self.0 {
            Some(instant) => now >= instant,
            None => false,
        }
    }
}

impl From<Instant> for Deadline {
    fn from(instant: Instant) -> Self {
        Deadline::at(instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_add_does_not_overflow() {
        let now = Instant::from_ticks(u64::MAX - 10);
        let later = now.saturating_add(Duration::from_micros(1000));
        assert_eq!(later.as_ticks(), u64::MAX);
    }

    #[test]
    fn indefinite_never_passes() {
        assert!(!Deadline::INDEFINITE.has_passed(Instant::from_ticks(u64::MAX)));
    }

    #[test]
    fn after_max_duration_saturates_to_indefinite() {
        let now = Instant::from_ticks(0);
        assert_eq!(Deadline::after(now, Duration::MAX), Deadline::INDEFINITE);
    }

    #[test]
    fn ordering_follows_ticks() {
        let a = Instant::from_ticks(10);
        let b = Instant::from_ticks(20);
        assert!(Deadline::at(a) < Deadline::at(b));
    }
}
