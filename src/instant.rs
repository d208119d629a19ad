use std::ops::Sub;
use std::time::Duration;

/// Monotonic timestamp used for cache bookkeeping.
///
/// Backed by [`tokio::time::Instant`] so staleness and gc arithmetic follow the
/// runtime clock, including the paused clock used by tests.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(pub(crate) tokio::time::Instant);

impl Instant {
    /// The current time.
    pub fn now() -> Self {
        Instant(tokio::time::Instant::now())
    }

    /// Time elapsed since this instant, saturating to zero.
    pub fn elapsed(&self) -> Duration {
        Instant::now() - *self
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Instant) -> Self::Output {
        self.0.duration_since(rhs.0)
    }
}

impl std::fmt::Debug for Instant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instant").field(&self.0).finish()
    }
}
