//! In-line filters: passthrough and software volume.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use super::{ProcessContext, Processor};
use crate::ProcessError;

/// Maximum volume in percent.
const MAX_VOLUME: u8 = 100;

/// Copies input to output unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Processor for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn process(
        &mut self,
        input: &[u8],
        output: &mut Vec<u8>,
        _ctx: &ProcessContext,
    ) -> Result<(), ProcessError> {
        output.extend_from_slice(input);
        Ok(())
    }
}

/// Shared volume level in percent, clamped to 0..=100.
///
/// Cloning shares the level: the application adjusts it from the event loop
/// while a [`Gain`] element reads it on its worker thread.
#[derive(Debug, Clone)]
pub struct VolumeControl {
    level: Arc<AtomicU8>,
}

impl VolumeControl {
    /// Creates a control at the given level.
    pub fn new(level: u8) -> Self {
        Self {
            level: Arc::new(AtomicU8::new(level.min(MAX_VOLUME))),
        }
    }

    /// Returns the current level.
    pub fn get(&self) -> u8 {
        self.level.load(Ordering::Relaxed)
    }

    /// Sets the level, clamped to 100.
    pub fn set(&self, level: u8) {
        self.level.store(level.min(MAX_VOLUME), Ordering::Relaxed);
    }

    /// Raises the level by `step` and returns the new level.
    pub fn step_up(&self, step: u8) -> u8 {
        self.update(|level| level.saturating_add(step).min(MAX_VOLUME))
    }

    /// Lowers the level by `step` and returns the new level.
    pub fn step_down(&self, step: u8) -> u8 {
        self.update(|level| level.saturating_sub(step))
    }

    fn update(&self, f: impl Fn(u8) -> u8) -> u8 {
        let previous = self
            .level
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |level| Some(f(level)))
            .unwrap_or_else(|level| level);
        f(previous)
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new(MAX_VOLUME)
    }
}

/// Scales 16-bit little-endian PCM by a [`VolumeControl`].
///
/// An odd trailing byte is carried over to the next chunk so samples are
/// never split.
#[derive(Debug, Clone)]
pub struct Gain {
    volume: VolumeControl,
    carry: Option<u8>,
}

impl Gain {
    /// Creates a gain stage reading from `volume`.
    pub fn new(volume: VolumeControl) -> Self {
        Self {
            volume,
            carry: None,
        }
    }

    /// Returns the shared volume control.
    pub fn volume(&self) -> &VolumeControl {
        &self.volume
    }

    fn scale(sample: [u8; 2], level: u8) -> [u8; 2] {
        let value = i32::from(i16::from_le_bytes(sample));
        let scaled = value * i32::from(level) / i32::from(MAX_VOLUME);
        // |scaled| <= |value|, always fits
        #[allow(clippy::cast_possible_truncation)]
        let narrowed = scaled as i16;
        narrowed.to_le_bytes()
    }
}

impl Processor for Gain {
    fn name(&self) -> &str {
        "gain"
    }

    fn process(
        &mut self,
        input: &[u8],
        output: &mut Vec<u8>,
        _ctx: &ProcessContext,
    ) -> Result<(), ProcessError> {
        let level = self.volume.get();
        let mut input = input;

        if let Some(low) = self.carry.take() {
            let Some((&high, rest)) = input.split_first() else {
                self.carry = Some(low);
                return Ok(());
            };
            output.extend_from_slice(&Self::scale([low, high], level));
            input = rest;
        }

        let mut samples = input.chunks_exact(2);
        for sample in &mut samples {
            output.extend_from_slice(&Self::scale([sample[0], sample[1]], level));
        }
        self.carry = samples.remainder().first().copied();
        Ok(())
    }

    fn flush(&mut self, output: &mut Vec<u8>, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        // A dangling half sample is passed through as-is
        if let Some(byte) = self.carry.take() {
            output.push(byte);
        }
        Ok(())
    }

    fn close(&mut self, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        self.carry = None;
        Ok(())
    }
}
