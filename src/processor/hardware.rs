//! Sink that hands audio to an output device callback.

use super::{ProcessContext, Processor};
use crate::element::MusicInfo;
use crate::ProcessError;

type OutputFn = dyn FnMut(&[u8], &MusicInfo) -> Result<(), ProcessError> + Send;

/// The terminal stage of a pipeline, standing in for an I2S or DAC driver.
///
/// Each chunk is passed to the callback together with the element's current
/// music info, which the application may have overwritten with the format
/// reported by the source.
///
/// # Example
///
/// ```
/// use audio_pipeline::{Element, HardwareSink};
///
/// let i2s = Element::new(HardwareSink::new(|bytes, info| {
///     let _ = (bytes.len(), info.sample_rate);
///     Ok(())
/// }));
/// ```
pub struct HardwareSink {
    name: String,
    output: Box<OutputFn>,
    bytes_written: u64,
}

impl HardwareSink {
    /// Creates a sink with the given output callback.
    pub fn new<F>(output: F) -> Self
    where
        F: FnMut(&[u8], &MusicInfo) -> Result<(), ProcessError> + Send + 'static,
    {
        Self::with_name("hardware", output)
    }

    /// Creates a sink with a custom name.
    pub fn with_name<F>(name: impl Into<String>, output: F) -> Self
    where
        F: FnMut(&[u8], &MusicInfo) -> Result<(), ProcessError> + Send + 'static,
    {
        Self {
            name: name.into(),
            output: Box::new(output),
            bytes_written: 0,
        }
    }

    /// Total bytes delivered to the callback in the current run.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Processor for HardwareSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, ctx: &ProcessContext) -> Result<(), ProcessError> {
        self.bytes_written = 0;
        tracing::debug!(element = %ctx.tag(), info = %ctx.info(), "hardware sink opened");
        Ok(())
    }

    fn process(
        &mut self,
        input: &[u8],
        _output: &mut Vec<u8>,
        ctx: &ProcessContext,
    ) -> Result<(), ProcessError> {
        if input.is_empty() {
            return Ok(());
        }
        (self.output)(input, &ctx.info())?;
        self.bytes_written += input.len() as u64;
        Ok(())
    }

    fn close(&mut self, ctx: &ProcessContext) -> Result<(), ProcessError> {
        tracing::debug!(
            element = %ctx.tag(),
            bytes = self.bytes_written,
            "hardware sink closed"
        );
        Ok(())
    }
}

impl std::fmt::Debug for HardwareSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareSink")
            .field("name", &self.name)
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}
