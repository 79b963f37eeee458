//! Tokio mpsc channel sink implementation.

use tokio::sync::mpsc;

use super::{ProcessContext, Processor};
use crate::ProcessError;

/// A sink that sends each chunk to a tokio mpsc channel.
///
/// This is the way to get audio out of a pipeline and into async code.
/// The worker blocks while the channel is full, so a slow receiver applies
/// back-pressure to the whole pipeline.
///
/// # Example
///
/// ```
/// use audio_pipeline::{ChannelSink, Element};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<Vec<u8>>(100);
/// let sink = Element::new(ChannelSink::new(tx));
///
/// // Register `sink` last in a pipeline, then receive chunks:
/// // while let Some(chunk) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<Vec<u8>>,
}

impl ChannelSink {
    /// Creates a new channel sink with the given sender.
    pub fn new(sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            name: "channel".to_string(),
            sender,
        }
    }

    /// Creates a new channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

impl Processor for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(
        &mut self,
        input: &[u8],
        _output: &mut Vec<u8>,
        _ctx: &ProcessContext,
    ) -> Result<(), ProcessError> {
        if input.is_empty() {
            return Ok(());
        }
        // Runs on the element's worker thread, never inside the runtime
        self.sender
            .blocking_send(input.to_vec())
            .map_err(|_| ProcessError::ChannelClosed)
    }
}
