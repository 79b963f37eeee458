//! The per-element worker loop.

use std::sync::Arc;

use super::{ElementShared, ElementState, ElementStatus};
use crate::pipeline::RingBuffer;
use crate::processor::{ProcessContext, Processor};
use crate::{BufferError, Timeout};

/// Chunks between periodic debug logs.
const LOG_INTERVAL: u64 = 512;

/// Why the worker loop ended.
enum Exit {
    /// Input reached end of stream and everything was flushed.
    Finished,
    /// A stop was requested or a buffer was aborted.
    Stopped,
    /// The processor failed.
    Fault(String),
}

pub(super) struct Worker {
    shared: Arc<ElementShared>,
    processor: Box<dyn Processor>,
    input: Arc<RingBuffer>,
    output: Option<Arc<RingBuffer>>,
    chunk_size: usize,
}

impl Worker {
    pub fn new(
        shared: Arc<ElementShared>,
        processor: Box<dyn Processor>,
        input: Arc<RingBuffer>,
        output: Option<Arc<RingBuffer>>,
        chunk_size: usize,
    ) -> Self {
        Self {
            shared,
            processor,
            input,
            output,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Runs until the stream ends, a stop arrives, or the processor fails.
    ///
    /// Hands the processor back so the element can be restarted.
    pub fn run(mut self) -> Box<dyn Processor> {
        let ctx = ProcessContext::new(Arc::clone(&self.shared));

        let mut exit = match self.processor.open(&ctx) {
            Ok(()) => self.pump(&ctx),
            Err(e) => Exit::Fault(e.to_string()),
        };

        if let Err(e) = self.processor.close(&ctx) {
            if !matches!(exit, Exit::Fault(_)) {
                exit = Exit::Fault(e.to_string());
            }
        }

        self.finish(exit);
        self.processor
    }

    fn pump(&mut self, ctx: &ProcessContext) -> Exit {
        let mut chunk = vec![0u8; self.chunk_size];
        let mut out = Vec::with_capacity(self.chunk_size);
        let mut chunks: u64 = 0;
        let mut bytes: u64 = 0;

        loop {
            if !self.shared.wait_while_paused() {
                return Exit::Stopped;
            }

            match self.input.read(&mut chunk, Timeout::Infinite) {
                Ok(n) => {
                    out.clear();
                    if let Err(e) = self.processor.process(&chunk[..n], &mut out, ctx) {
                        return Exit::Fault(e.to_string());
                    }
                    if let Err(exit) = self.push(&out) {
                        return exit;
                    }

                    chunks += 1;
                    bytes += n as u64;
                    if chunks % LOG_INTERVAL == 0 {
                        tracing::debug!(element = %ctx.tag(), chunks, bytes, "worker progress");
                    }
                }
                Err(BufferError::Done) => {
                    out.clear();
                    if let Err(e) = self.processor.flush(&mut out, ctx) {
                        return Exit::Fault(e.to_string());
                    }
                    if let Err(exit) = self.push(&out) {
                        return exit;
                    }
                    if let Some(output) = &self.output {
                        output.mark_done();
                    }
                    tracing::debug!(element = %ctx.tag(), chunks, bytes, "input drained");
                    return Exit::Finished;
                }
                Err(BufferError::Aborted) => return Exit::Stopped,
                Err(BufferError::Timeout) => {}
            }
        }
    }

    /// Writes every byte downstream, blocking on back-pressure.
    fn push(&self, mut bytes: &[u8]) -> Result<(), Exit> {
        let Some(output) = &self.output else {
            return Ok(());
        };

        while !bytes.is_empty() {
            if self.shared.stop_requested() {
                return Err(Exit::Stopped);
            }
            match output.write(bytes, Timeout::Infinite) {
                Ok(written) => bytes = &bytes[written..],
                Err(BufferError::Timeout) => {}
                Err(BufferError::Aborted | BufferError::Done) => return Err(Exit::Stopped),
            }
        }
        Ok(())
    }

    /// Records the final state; `Stopping` always resolves to `Stopped`.
    ///
    /// A stop caused by an aborted buffer rather than `stop()` still passes
    /// through `Stopping`.
    fn finish(&self, exit: Exit) {
        let tag = self.shared.tag();
        let mut state = self.shared.state.lock();

        let status = match exit {
            Exit::Finished if *state == ElementState::Stopping => {
                ElementStatus::new(ElementState::Stopped)
            }
            Exit::Finished => ElementStatus::new(ElementState::Finished),
            Exit::Stopped => {
                if *state != ElementState::Stopping {
                    tracing::debug!(element = %tag, "buffer aborted, stopping");
                    self.shared
                        .enter(&mut state, ElementStatus::new(ElementState::Stopping));
                }
                ElementStatus::new(ElementState::Stopped)
            }
            Exit::Fault(reason) => {
                tracing::error!(element = %tag, %reason, "element fault");
                ElementStatus::error(reason)
            }
        };

        self.shared.enter(&mut state, status);
    }
}
