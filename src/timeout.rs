//! Timeout type accepted by every blocking call.

use std::time::{Duration, Instant};

/// How long a blocking call may wait.
///
/// # Example
///
/// ```
/// use audio_pipeline::Timeout;
/// use std::time::Duration;
///
/// let t: Timeout = Duration::from_millis(20).into();
/// assert_eq!(t, Timeout::After(Duration::from_millis(20)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Do not block; fail right away if the call cannot make progress.
    Immediate,
    /// Block for at most this long.
    After(Duration),
    /// Block until the call can make progress or is aborted.
    #[default]
    Infinite,
}

impl Timeout {
    /// Creates a timeout from milliseconds.
    #[must_use]
    pub fn from_millis(ms: u64) -> Self {
        Self::After(Duration::from_millis(ms))
    }

    /// Converts to an absolute deadline, `None` meaning "never".
    ///
    /// A duration too long to represent as an `Instant` waits forever.
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            Self::Immediate => Some(Instant::now()),
            Self::After(d) => Instant::now().checked_add(d),
            Self::Infinite => None,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Self::Immediate
        } else {
            Self::After(d)
        }
    }
}
