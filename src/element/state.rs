//! Element identity, lifecycle states, and music format.

use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identifier of an element.
///
/// Assigned once at construction and compared by value, so events can be
/// matched to elements without holding a reference to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(u64);

impl ElementId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "el#{}", self.0)
    }
}

/// Lifecycle state of an element.
///
/// ```text
/// Init ──start──▶ Running ◀──resume── Paused
///                   │  └────pause────▶   │
///                   │ input done         │ stop
///                   ▼                    ▼
///                Finished            Stopping ──▶ Stopped
/// ```
///
/// `Error` is entered on a processing fault and stays until `reset()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ElementState {
    /// Constructed or reset; no worker.
    #[default]
    Init,
    /// Worker is moving data.
    Running,
    /// Worker is parked.
    Paused,
    /// Stop requested; waiting for the worker to exit.
    Stopping,
    /// Worker exited after a stop request or an aborted buffer.
    Stopped,
    /// Worker drained its input to end of stream. A kind of stopped.
    Finished,
    /// Worker exited on a processing fault.
    Error,
}

impl ElementState {
    /// Returns true for `Stopped` and `Finished`.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped | Self::Finished)
    }

    /// Returns true if no worker is, or will soon be, running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            Self::Init | Self::Stopped | Self::Finished | Self::Error
        )
    }

    /// Returns true if `start()` is allowed.
    #[must_use]
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Init | Self::Stopped | Self::Finished)
    }
}

/// Status carried by a `ReportStatus` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementStatus {
    /// The state just entered.
    pub state: ElementState,
    /// Fault description when `state` is `Error`.
    pub reason: Option<String>,
}

impl ElementStatus {
    /// Creates a status without a reason.
    #[must_use]
    pub fn new(state: ElementState) -> Self {
        Self {
            state,
            reason: None,
        }
    }

    /// Creates an `Error` status with the given reason.
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            state: ElementState::Error,
            reason: Some(reason.into()),
        }
    }
}

/// Format of the audio flowing through an element.
///
/// Sources discover it and report it; downstream elements and the
/// application read it and may overwrite it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MusicInfo {
    /// Sample rate in Hz (e.g., 44100, 48000).
    pub sample_rate: u32,
    /// Bits per sample.
    pub bits: u16,
    /// Number of interleaved channels.
    pub channels: u16,
}

impl MusicInfo {
    /// Creates a music info record.
    #[must_use]
    pub const fn new(sample_rate: u32, bits: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits,
            channels,
        }
    }

    /// Bytes in one frame (one sample for every channel).
    #[must_use]
    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.bits / 8) * usize::from(self.channels)
    }

    /// Bytes per second of audio in this format.
    #[must_use]
    pub fn byte_rate(&self) -> usize {
        self.sample_rate as usize * self.bytes_per_frame()
    }
}

impl Default for MusicInfo {
    fn default() -> Self {
        Self::new(44_100, 16, 2)
    }
}

impl std::fmt::Display for MusicInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz/{}bit/{}ch",
            self.sample_rate, self.bits, self.channels
        )
    }
}
