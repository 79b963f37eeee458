//! Configuration types for elements, the event queue, and board variants.
//!
//! Board variants are plain data: a [`BoardProfile`] names the link order,
//! the output clock, and the key layout, so wiring a new board never needs
//! conditional compilation.

use crate::element::MusicInfo;

/// Default size of an element's output ring buffer.
pub const DEFAULT_RINGBUF_SIZE: usize = 8 * 1024;

/// Default number of bytes a worker moves per iteration.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default event queue depth.
pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 5;

/// Per-element buffer sizing.
///
/// # Example
///
/// ```
/// use audio_pipeline::ElementConfig;
///
/// let config = ElementConfig {
///     chunk_size: 512,
///     ..Default::default()
/// };
/// assert_eq!(config.out_buffer_size, 8 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct ElementConfig {
    /// Capacity of the element's output ring buffer in bytes.
    ///
    /// Default: 8 KiB
    pub out_buffer_size: usize,

    /// Capacity of the feed buffer a source peripheral writes into.
    ///
    /// Only used when the element is first in the link order.
    /// Default: 8 KiB
    pub feed_buffer_size: usize,

    /// Maximum bytes read from the input per worker iteration.
    ///
    /// Default: 1 KiB
    pub chunk_size: usize,
}

impl Default for ElementConfig {
    fn default() -> Self {
        Self {
            out_buffer_size: DEFAULT_RINGBUF_SIZE,
            feed_buffer_size: DEFAULT_RINGBUF_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Event interface sizing.
#[derive(Debug, Clone)]
pub struct EventConfig {
    /// Maximum queued messages before posts are dropped.
    ///
    /// Default: 5
    pub queue_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_EVENT_QUEUE_SIZE,
        }
    }
}

/// Logical actions a key press can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputAction {
    /// Resume playback on the remote device.
    Play,
    /// The "set" key; pauses playback.
    Pause,
    /// Volume up; also skips to the next track.
    VolumeUp,
    /// Volume down; also returns to the previous track.
    VolumeDown,
    /// Cycle playback mode.
    Mode,
}

/// Maps raw key ids reported by input peripherals to logical actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMap {
    /// Key id of the play key.
    pub play: i32,
    /// Key id of the set key.
    pub set: i32,
    /// Key id of the volume-up key.
    pub volume_up: i32,
    /// Key id of the volume-down key.
    pub volume_down: i32,
    /// Key id of the mode key.
    pub mode: i32,
}

impl KeyMap {
    /// Returns the action bound to `key_id`, if any.
    #[must_use]
    pub fn action_for(&self, key_id: i32) -> Option<InputAction> {
        match key_id {
            id if id == self.play => Some(InputAction::Play),
            id if id == self.set => Some(InputAction::Pause),
            id if id == self.volume_up => Some(InputAction::VolumeUp),
            id if id == self.volume_down => Some(InputAction::VolumeDown),
            id if id == self.mode => Some(InputAction::Mode),
            _ => None,
        }
    }
}

/// Supported board layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoardProfile {
    /// LyraTD-MSC: ADC buttons, codec clocked at 48 kHz.
    LyraTdMsc,

    /// Any other board: touch pads, codec clocked at 96 kHz.
    #[default]
    Generic,
}

impl BoardProfile {
    /// Element tags in dataflow order, source first.
    #[must_use]
    pub fn link_tags(&self) -> &'static [&'static str] {
        &["bt", "filter", "i2s"]
    }

    /// Music format the output element is clocked at.
    #[must_use]
    pub fn output_info(&self) -> MusicInfo {
        let sample_rate = match self {
            Self::LyraTdMsc => 48_000,
            Self::Generic => 96_000,
        };
        MusicInfo::new(sample_rate, 16, 2)
    }

    /// Key layout for this board.
    #[must_use]
    pub fn key_map(&self) -> KeyMap {
        match self {
            Self::LyraTdMsc => KeyMap {
                play: 3,
                set: 2,
                volume_up: 0,
                volume_down: 1,
                mode: 4,
            },
            Self::Generic => KeyMap {
                play: 9,
                set: 8,
                volume_up: 7,
                volume_down: 4,
                mode: 3,
            },
        }
    }

    /// Parses a board name as given on the command line.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "lyratd-msc" | "lyratd_msc" | "msc" => Some(Self::LyraTdMsc),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }
}

/// Configuration for the Bluetooth speaker application.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Name the speaker advertises over Bluetooth.
    pub device_name: String,

    /// Board layout.
    pub board: BoardProfile,

    /// Key layout the player maps input events through.
    ///
    /// Default: the board's [`key_map()`](BoardProfile::key_map)
    pub keys: KeyMap,

    /// Volume at startup, in percent.
    ///
    /// Default: 90
    pub initial_volume: u8,

    /// Volume change per key press, in percent.
    ///
    /// Default: 10
    pub volume_step: u8,

    /// Element configuration shared by every stage.
    pub element: ElementConfig,

    /// Event queue configuration.
    pub events: EventConfig,
}

impl PlayerConfig {
    /// Default configuration for `board`, including its key layout.
    #[must_use]
    pub fn for_board(board: BoardProfile) -> Self {
        Self {
            board,
            keys: board.key_map(),
            ..Self::default()
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let board = BoardProfile::default();
        Self {
            device_name: "audio-pipeline speaker".to_string(),
            board,
            keys: board.key_map(),
            initial_volume: 90,
            volume_step: 10,
            element: ElementConfig::default(),
            events: EventConfig::default(),
        }
    }
}
