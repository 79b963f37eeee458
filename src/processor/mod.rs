//! Processor trait and built-in transforms.
//!
//! A [`Processor`] is the pluggable part of an element: the worker reads a
//! chunk from the input, calls [`process`](Processor::process), and writes
//! whatever the processor appended to the output buffer. The crate provides:
//!
//! - [`Passthrough`]: copies input to output
//! - [`Gain`]: scales 16-bit PCM by a shared [`VolumeControl`]
//! - [`HardwareSink`]: hands every chunk to an injected output callback
//! - [`ChannelSink`]: forwards chunks to a tokio mpsc channel
//! - [`WavSink`]: writes chunks to a WAV file
//!
//! Implement the trait for decoders, resamplers, or any custom stage.

mod channel;
mod file;
mod filter;
mod hardware;

pub use channel::ChannelSink;
pub use file::WavSink;
pub use filter::{Gain, Passthrough, VolumeControl};
pub use hardware::HardwareSink;

use std::sync::Arc;

use crate::element::{ElementId, ElementShared, MusicInfo};
use crate::ProcessError;

/// A stream transform run by an element's worker thread.
///
/// # Implementation Notes
///
/// - Methods take `&mut self`; the processor is owned by exactly one worker
/// - `open` runs on the worker thread before the first chunk
/// - `process` appends its output to `output`; appending nothing is fine
/// - `flush` runs once when the input reaches end of stream
/// - `close` always runs before the worker exits, even after a fault
///
/// Returning an error moves the element to `Error`.
///
/// # Example
///
/// ```
/// use audio_pipeline::{ProcessContext, ProcessError, Processor};
///
/// struct Invert;
///
/// impl Processor for Invert {
///     fn name(&self) -> &str {
///         "invert"
///     }
///
///     fn process(
///         &mut self,
///         input: &[u8],
///         output: &mut Vec<u8>,
///         _ctx: &ProcessContext,
///     ) -> Result<(), ProcessError> {
///         output.extend(input.iter().map(|b| !b));
///         Ok(())
///     }
/// }
/// ```
pub trait Processor: Send {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Called once before the first chunk.
    ///
    /// Default implementation does nothing.
    fn open(&mut self, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        Ok(())
    }

    /// Transforms one chunk.
    fn process(
        &mut self,
        input: &[u8],
        output: &mut Vec<u8>,
        ctx: &ProcessContext,
    ) -> Result<(), ProcessError>;

    /// Emits any buffered tail once the input is exhausted.
    ///
    /// Default implementation does nothing.
    fn flush(&mut self, _output: &mut Vec<u8>, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        Ok(())
    }

    /// Called once before the worker exits.
    ///
    /// Default implementation does nothing.
    fn close(&mut self, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        Ok(())
    }
}

impl<P: Processor + ?Sized> Processor for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self, ctx: &ProcessContext) -> Result<(), ProcessError> {
        (**self).open(ctx)
    }

    fn process(
        &mut self,
        input: &[u8],
        output: &mut Vec<u8>,
        ctx: &ProcessContext,
    ) -> Result<(), ProcessError> {
        (**self).process(input, output, ctx)
    }

    fn flush(&mut self, output: &mut Vec<u8>, ctx: &ProcessContext) -> Result<(), ProcessError> {
        (**self).flush(output, ctx)
    }

    fn close(&mut self, ctx: &ProcessContext) -> Result<(), ProcessError> {
        (**self).close(ctx)
    }
}

/// What a processor can see of its element.
pub struct ProcessContext {
    shared: Arc<ElementShared>,
}

impl ProcessContext {
    pub(crate) fn new(shared: Arc<ElementShared>) -> Self {
        Self { shared }
    }

    /// Id of the element running this processor.
    pub fn id(&self) -> ElementId {
        self.shared.id()
    }

    /// Name the element was registered under.
    pub fn tag(&self) -> Arc<str> {
        self.shared.tag()
    }

    /// Current music info of the element.
    pub fn info(&self) -> MusicInfo {
        self.shared.info()
    }

    /// Stores a discovered music format and reports it to listeners.
    pub fn report_info(&self, info: MusicInfo) {
        self.shared.report_info(info);
    }

    /// Returns true once a stop has been requested.
    ///
    /// Long-running processors may poll this to bail out early.
    pub fn is_stopping(&self) -> bool {
        self.shared.stop_requested()
    }
}

/// A processor backed by a closure.
///
/// Built with [`processor_fn`].
pub struct FnProcessor<F> {
    name: String,
    f: F,
}

impl<F> FnProcessor<F> {
    /// Renames the processor.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<F> Processor for FnProcessor<F>
where
    F: FnMut(&[u8], &mut Vec<u8>) -> Result<(), ProcessError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(
        &mut self,
        input: &[u8],
        output: &mut Vec<u8>,
        _ctx: &ProcessContext,
    ) -> Result<(), ProcessError> {
        (self.f)(input, output)
    }
}

/// Wraps a closure as a [`Processor`].
///
/// # Example
///
/// ```
/// use audio_pipeline::{processor_fn, Element};
///
/// let reverse = Element::new(processor_fn(|input, output| {
///     output.extend(input.iter().rev());
///     Ok(())
/// }));
/// ```
pub fn processor_fn<F>(f: F) -> FnProcessor<F>
where
    F: FnMut(&[u8], &mut Vec<u8>) -> Result<(), ProcessError> + Send,
{
    FnProcessor {
        name: "fn".to_string(),
        f,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_processor_runs_closure() {
        let mut doubled = processor_fn(|input, output| {
            output.extend(input.iter().map(|b| b * 2));
            Ok(())
        })
        .named("double");
        assert_eq!(doubled.name(), "double");

        let element = crate::Element::new(Passthrough);
        let ctx = element.process_context();

        let mut out = Vec::new();
        doubled.process(&[1, 2, 3], &mut out, &ctx).unwrap();
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[test]
    fn test_processor_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Box<dyn Processor>>();
    }
}
