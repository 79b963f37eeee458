//! Mock peripherals for running pipelines without hardware.
//!
//! These stand in for the board drivers in tests and in the demo binary:
//!
//! - [`MockButtons`]: keys or touch pads pressed programmatically
//! - [`MockBluetooth`]: an A2DP source that streams a generated tone into a
//!   pipeline and records AVRCP commands
//! - [`MockLed`]: a status LED that records its pattern

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{Peripheral, PeripheralCommand, PeripheralEmitter, PeripheralKind};
use crate::element::{MusicInfo, StreamWriter};
use crate::event::Payload;
use crate::{BufferError, PipelineError, Timeout};

/// Length of one generated PCM chunk.
const CHUNK_DURATION: Duration = Duration::from_millis(10);

/// How long a feed write may block before the stop flag is re-checked.
const WRITE_POLL: Duration = Duration::from_millis(50);

/// Remote-control commands sent to the connected device (AVRCP).
pub trait MediaControl: Send + Sync {
    /// Resume playback.
    fn play(&self);
    /// Pause playback.
    fn pause(&self);
    /// Skip to the next track.
    fn next(&self);
    /// Return to the previous track.
    fn prev(&self);
}

/// A status LED.
pub trait StatusLed: Send + Sync {
    /// Blinks with the given period.
    fn blink(&self, period: Duration);
    /// Turns the LED off.
    fn off(&self);
}

/// Keys or touch pads.
///
/// Clones share the same emitter, so a test can keep one clone and hand the
/// other to a [`PeripheralSet`](crate::PeripheralSet).
#[derive(Clone)]
pub struct MockButtons {
    kind: PeripheralKind,
    emitter: Arc<Mutex<Option<PeripheralEmitter>>>,
}

impl MockButtons {
    /// Creates an input peripheral of the given kind.
    pub fn new(kind: PeripheralKind) -> Self {
        Self {
            kind,
            emitter: Arc::new(Mutex::new(None)),
        }
    }

    /// Presses and releases `key_id`.
    ///
    /// Touch pads post a single `TouchTap`; buttons post `ButtonPressed`
    /// then `ButtonReleased`. Returns false if the peripheral is not started.
    pub fn press(&self, key_id: i32) -> bool {
        let Some(emitter) = self.emitter.lock().clone() else {
            tracing::debug!(key_id, "key press ignored, peripheral not started");
            return false;
        };

        if self.kind == PeripheralKind::Touch {
            emitter.post(PeripheralCommand::TouchTap, Payload::Value(key_id));
        } else {
            emitter.post(PeripheralCommand::ButtonPressed, Payload::Value(key_id));
            emitter.post(PeripheralCommand::ButtonReleased, Payload::Value(key_id));
        }
        true
    }
}

impl Peripheral for MockButtons {
    fn kind(&self) -> PeripheralKind {
        self.kind
    }

    fn name(&self) -> &str {
        match self.kind {
            PeripheralKind::Touch => "touch",
            PeripheralKind::AdcButton => "adc-button",
            _ => "button",
        }
    }

    fn start(&mut self, emitter: PeripheralEmitter) -> Result<(), PipelineError> {
        *self.emitter.lock() = Some(emitter);
        Ok(())
    }

    fn stop(&mut self) {
        *self.emitter.lock() = None;
    }
}

/// Pattern a [`MockLed`] is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    /// Dark.
    Off,
    /// Blinking with the given period.
    Blink(Duration),
}

/// A status LED that records every pattern it was asked to show.
#[derive(Clone)]
pub struct MockLed {
    history: Arc<Mutex<Vec<LedPattern>>>,
}

impl MockLed {
    /// Creates a dark LED.
    pub fn new() -> Self {
        Self {
            history: Arc::new(Mutex::new(vec![LedPattern::Off])),
        }
    }

    /// Pattern currently shown.
    pub fn pattern(&self) -> LedPattern {
        self.history
            .lock()
            .last()
            .copied()
            .unwrap_or(LedPattern::Off)
    }

    /// Every pattern shown so far, oldest first.
    pub fn history(&self) -> Vec<LedPattern> {
        self.history.lock().clone()
    }

    fn show(&self, pattern: LedPattern) {
        tracing::debug!(?pattern, "led");
        self.history.lock().push(pattern);
    }
}

impl Default for MockLed {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLed for MockLed {
    fn blink(&self, period: Duration) {
        self.show(LedPattern::Blink(period));
    }

    fn off(&self) {
        self.show(LedPattern::Off);
    }
}

impl Peripheral for MockLed {
    fn kind(&self) -> PeripheralKind {
        PeripheralKind::Led
    }

    fn name(&self) -> &str {
        "led"
    }

    fn start(&mut self, _emitter: PeripheralEmitter) -> Result<(), PipelineError> {
        Ok(())
    }

    fn stop(&mut self) {
        if self.pattern() != LedPattern::Off {
            self.off();
        }
    }
}

/// AVRCP command recorded by [`MockBluetooth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCommand {
    /// `play()` was sent.
    Play,
    /// `pause()` was sent.
    Pause,
    /// `next()` was sent.
    Next,
    /// `prev()` was sent.
    Prev,
}

/// Generated test signal.
#[derive(Debug, Clone, Copy)]
pub enum Tone {
    /// Digital silence.
    Silence,
    /// A sine wave at the given frequency in Hz.
    Sine(f64),
}

struct BluetoothShared {
    writer: StreamWriter,
    info: MusicInfo,
    tone: Tone,
    duration: Option<Duration>,
    realtime: bool,
    commands: Mutex<Vec<MediaCommand>>,
    emitter: Mutex<Option<PeripheralEmitter>>,
    stop: AtomicBool,
}

impl BluetoothShared {
    fn post(&self, command: PeripheralCommand) {
        if let Some(emitter) = self.emitter.lock().as_ref() {
            emitter.post(command, Payload::Empty);
        }
    }

    fn record(&self, command: MediaCommand) {
        tracing::debug!(?command, "avrcp command");
        self.commands.lock().push(command);
    }

    /// Streams the tone into the feed until it ends or a stop arrives.
    fn stream(&self) {
        self.writer.report_info(self.info);
        self.post(PeripheralCommand::BluetoothAudioStarted);

        let frames_per_chunk = frames_for(self.info.sample_rate, CHUNK_DURATION);
        let total_frames = self
            .duration
            .map(|duration| frames_for(self.info.sample_rate, duration));

        let started = Instant::now();
        let mut frame = 0usize;
        let mut chunk = Vec::new();

        loop {
            if self.stop.load(Ordering::SeqCst) {
                tracing::debug!(frames = frame, "bluetooth stream stopped");
                return;
            }

            let remaining = total_frames.map_or(frames_per_chunk, |total| {
                total.saturating_sub(frame).min(frames_per_chunk)
            });
            if remaining == 0 {
                break;
            }

            chunk.clear();
            render(self.tone, &self.info, frame, remaining, &mut chunk);
            if !self.write(&chunk) {
                tracing::debug!(frames = frame, "feed closed, bluetooth stream ended");
                return;
            }
            frame += remaining;

            if self.realtime {
                let due = CHUNK_DURATION.mul_f64(frame as f64 / frames_per_chunk as f64);
                if let Some(wait) = due.checked_sub(started.elapsed()) {
                    std::thread::sleep(wait);
                }
            }
        }

        self.writer.mark_done();
        self.post(PeripheralCommand::BluetoothAudioSuspended);
        tracing::debug!(frames = frame, "bluetooth stream complete");
    }

    /// Writes everything, re-checking the stop flag while the feed is full.
    fn write(&self, mut bytes: &[u8]) -> bool {
        while !bytes.is_empty() {
            if self.stop.load(Ordering::SeqCst) {
                return false;
            }
            match self.writer.write(bytes, Timeout::After(WRITE_POLL)) {
                Ok(written) => bytes = &bytes[written..],
                Err(BufferError::Timeout) => {}
                Err(BufferError::Aborted | BufferError::Done) => return false,
            }
        }
        true
    }
}

/// A Bluetooth A2DP source with AVRCP remote control.
///
/// On start it posts `BluetoothConnected`, reports its music info through
/// the source element, and streams the configured tone into the element's
/// feed. When the tone ends it marks the feed done and posts
/// `BluetoothAudioSuspended`.
///
/// # Example
///
/// ```
/// use audio_pipeline::mock::{MockBluetooth, Tone};
/// use audio_pipeline::{Element, MusicInfo, Passthrough};
/// use std::time::Duration;
///
/// let source = Element::new(Passthrough);
/// let bt = MockBluetooth::new(source.writer(), MusicInfo::new(44_100, 16, 2))
///     .tone(Tone::Sine(440.0))
///     .duration(Duration::from_millis(100));
/// ```
#[derive(Clone)]
pub struct MockBluetooth {
    shared: Arc<BluetoothShared>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MockBluetooth {
    /// Creates a source that writes into `writer` in the given format.
    ///
    /// Defaults to a 440 Hz sine that plays until stopped.
    pub fn new(writer: StreamWriter, info: MusicInfo) -> Self {
        Self::from_parts(BluetoothShared {
            writer,
            info,
            tone: Tone::Sine(440.0),
            duration: None,
            realtime: false,
            commands: Mutex::new(Vec::new()),
            emitter: Mutex::new(None),
            stop: AtomicBool::new(false),
        })
    }

    /// Sets the generated signal.
    #[must_use]
    pub fn tone(self, tone: Tone) -> Self {
        self.rebuild(|shared| shared.tone = tone)
    }

    /// Ends the stream after `duration` of audio.
    #[must_use]
    pub fn duration(self, duration: Duration) -> Self {
        self.rebuild(|shared| shared.duration = Some(duration))
    }

    /// Paces the stream at the audio rate instead of as fast as possible.
    #[must_use]
    pub fn realtime(self, realtime: bool) -> Self {
        self.rebuild(|shared| shared.realtime = realtime)
    }

    /// Posts `BluetoothDisconnected`, as if the remote device went away.
    pub fn disconnect(&self) {
        tracing::info!("bluetooth device disconnected");
        self.shared.post(PeripheralCommand::BluetoothDisconnected);
    }

    /// Format of the generated stream.
    pub fn info(&self) -> MusicInfo {
        self.shared.info
    }

    /// Remote-control commands sent so far, oldest first.
    pub fn commands(&self) -> Vec<MediaCommand> {
        self.shared.commands.lock().clone()
    }

    fn from_parts(shared: BluetoothShared) -> Self {
        Self {
            shared: Arc::new(shared),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    fn rebuild(self, f: impl FnOnce(&mut BluetoothShared)) -> Self {
        let mut shared = BluetoothShared {
            writer: self.shared.writer.clone(),
            info: self.shared.info,
            tone: self.shared.tone,
            duration: self.shared.duration,
            realtime: self.shared.realtime,
            commands: Mutex::new(Vec::new()),
            emitter: Mutex::new(None),
            stop: AtomicBool::new(false),
        };
        f(&mut shared);
        Self::from_parts(shared)
    }
}

impl MediaControl for MockBluetooth {
    fn play(&self) {
        self.shared.record(MediaCommand::Play);
    }

    fn pause(&self) {
        self.shared.record(MediaCommand::Pause);
    }

    fn next(&self) {
        self.shared.record(MediaCommand::Next);
    }

    fn prev(&self) {
        self.shared.record(MediaCommand::Prev);
    }
}

impl Peripheral for MockBluetooth {
    fn kind(&self) -> PeripheralKind {
        PeripheralKind::Bluetooth
    }

    fn name(&self) -> &str {
        "bluetooth"
    }

    fn start(&mut self, emitter: PeripheralEmitter) -> Result<(), PipelineError> {
        *self.shared.emitter.lock() = Some(emitter);
        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.post(PeripheralCommand::BluetoothConnected);

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("bt-stream".to_string())
            .spawn(move || shared.stream())
            .map_err(|source| PipelineError::SpawnFailed {
                name: self.name().to_string(),
                source,
            })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("bluetooth stream thread panicked");
            }
        }
        *self.shared.emitter.lock() = None;
    }
}

fn frames_for(sample_rate: u32, duration: Duration) -> usize {
    (u128::from(sample_rate) * duration.as_millis() / 1000) as usize
}

/// Appends `frames` frames of 16-bit interleaved PCM starting at `first`.
fn render(tone: Tone, info: &MusicInfo, first: usize, frames: usize, out: &mut Vec<u8>) {
    let channels = usize::from(info.channels.max(1));
    let sample_rate = f64::from(info.sample_rate.max(1));

    for i in first..first + frames {
        let sample = match tone {
            Tone::Silence => 0i16,
            Tone::Sine(frequency) => {
                let t = i as f64 / sample_rate;
                let value = (2.0 * std::f64::consts::PI * frequency * t).sin();
                (value * 32767.0) as i16
            }
        };

        // Same sample on every channel
        for _ in 0..channels {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
}
