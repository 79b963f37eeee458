//! Audio elements: stream-processing nodes with their own worker thread.
//!
//! An element reads from its input port, hands each chunk to its
//! [`Processor`], and writes the result to its output ring buffer:
//!
//! ```text
//! input (upstream output or feed) → Worker Thread → Processor → output ring buffer
//! ```
//!
//! - **Feed**: the first element of a pipeline has no upstream; it reads the
//!   bytes a source peripheral pushes through a [`StreamWriter`]
//! - **Output**: owned by the element; left unbound when the element is the
//!   last one in the link order
//! - **Events**: every state transition posts exactly one `ReportStatus`
//!   message to each attached listener

mod state;
mod worker;

pub use state::{ElementId, ElementState, ElementStatus, MusicInfo};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use crate::event::{EventMessage, EventSender, EventSource, Listeners};
use crate::pipeline::RingBuffer;
use crate::processor::Processor;
use crate::{BufferError, ElementConfig, PipelineError, Timeout};

use worker::Worker;

/// State shared between an element, its handles, and its worker.
pub(crate) struct ElementShared {
    id: ElementId,
    tag: RwLock<Arc<str>>,
    state: Mutex<ElementState>,
    state_changed: Condvar,
    stop_requested: AtomicBool,
    info: Mutex<MusicInfo>,
    feed: Arc<RingBuffer>,
    output: Arc<RingBuffer>,
    listeners: Listeners,
}

impl ElementShared {
    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn tag(&self) -> Arc<str> {
        Arc::clone(&self.tag.read())
    }

    pub fn state(&self) -> ElementState {
        *self.state.lock()
    }

    pub fn info(&self) -> MusicInfo {
        *self.info.lock()
    }

    pub fn set_info(&self, info: MusicInfo) {
        *self.info.lock() = info;
    }

    /// Stores `info` and tells listeners about it.
    pub fn report_info(&self, info: MusicInfo) {
        self.set_info(info);
        tracing::debug!(element = %self.tag(), %info, "music info reported");
        self.listeners.emit(&EventMessage::music_info(self.id, info));
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Moves to `status.state` and emits exactly one status event.
    ///
    /// The caller holds the state lock, so events from one element are
    /// emitted in transition order.
    fn enter(&self, state: &mut MutexGuard<'_, ElementState>, status: ElementStatus) {
        let previous = **state;
        **state = status.state;
        self.state_changed.notify_all();

        tracing::debug!(
            element = %self.tag(),
            from = ?previous,
            to = ?status.state,
            "element state changed"
        );
        self.listeners.emit(&EventMessage::status(self.id, status));
    }

    /// Parks the caller while the element is paused.
    ///
    /// Returns false if a stop was requested.
    fn wait_while_paused(&self) -> bool {
        let mut state = self.state.lock();
        while *state == ElementState::Paused {
            if self.stop_requested() {
                return false;
            }
            self.state_changed.wait(&mut state);
        }
        !self.stop_requested()
    }

    /// Blocks until no worker is running.
    fn wait_idle(&self, deadline: Option<Instant>) -> Result<(), PipelineError> {
        let mut state = self.state.lock();

        while !state.is_idle() {
            match deadline {
                None => self.state_changed.wait(&mut state),
                Some(deadline) => {
                    if self
                        .state_changed
                        .wait_until(&mut state, deadline)
                        .timed_out()
                        && !state.is_idle()
                    {
                        return Err(PipelineError::Timeout);
                    }
                }
            }
        }
        Ok(())
    }
}

/// A stream-processing node.
///
/// Created from a [`Processor`], then usually handed to a
/// [`Pipeline`](crate::Pipeline) which names it and links it to its
/// neighbours. The application keeps an [`ElementHandle`] to read its state
/// and music info afterwards.
///
/// # Example
///
/// ```
/// use audio_pipeline::{Element, Passthrough};
///
/// let element = Element::new(Passthrough);
/// assert_eq!(element.state(), audio_pipeline::ElementState::Init);
/// ```
pub struct Element {
    shared: Arc<ElementShared>,
    config: ElementConfig,
    processor: Option<Box<dyn Processor>>,
    /// Upstream output; `None` means read from the feed.
    input: Option<Arc<RingBuffer>>,
    output_bound: bool,
    worker: Option<JoinHandle<Box<dyn Processor>>>,
}

impl Element {
    /// Creates an element with default buffer sizes.
    pub fn new(processor: impl Processor + 'static) -> Self {
        Self::with_config(ElementConfig::default(), processor)
    }

    /// Creates an element with the given buffer sizes.
    pub fn with_config(config: ElementConfig, processor: impl Processor + 'static) -> Self {
        let shared = ElementShared {
            id: ElementId::next(),
            tag: RwLock::new(Arc::from("element")),
            state: Mutex::new(ElementState::Init),
            state_changed: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            info: Mutex::new(MusicInfo::default()),
            feed: Arc::new(RingBuffer::new(config.feed_buffer_size)),
            output: Arc::new(RingBuffer::new(config.out_buffer_size)),
            listeners: Listeners::default(),
        };

        Self {
            shared: Arc::new(shared),
            config,
            processor: Some(Box::new(processor)),
            input: None,
            output_bound: true,
            worker: None,
        }
    }

    /// Returns the element's id.
    pub fn id(&self) -> ElementId {
        self.shared.id
    }

    /// Returns the name the element was registered under.
    pub fn tag(&self) -> Arc<str> {
        self.shared.tag()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ElementState {
        self.shared.state()
    }

    /// Returns the current music info.
    pub fn info(&self) -> MusicInfo {
        self.shared.info()
    }

    /// Overwrites the music info.
    pub fn set_info(&self, info: MusicInfo) {
        self.shared.set_info(info);
    }

    /// Returns a cloneable handle to this element.
    pub fn handle(&self) -> ElementHandle {
        ElementHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns a writer into this element's feed.
    ///
    /// Only meaningful for the first element of a pipeline.
    pub fn writer(&self) -> StreamWriter {
        StreamWriter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns true if the element reads from its feed rather than an
    /// upstream element.
    pub fn is_source(&self) -> bool {
        self.input.is_none()
    }

    /// Returns true if the element's output is bound to a downstream element.
    pub fn is_sink(&self) -> bool {
        !self.output_bound
    }

    #[cfg(test)]
    pub(crate) fn process_context(&self) -> crate::processor::ProcessContext {
        crate::processor::ProcessContext::new(Arc::clone(&self.shared))
    }

    pub(crate) fn set_tag(&self, tag: &str) {
        *self.shared.tag.write() = Arc::from(tag);
    }

    pub(crate) fn output_buffer(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.shared.output)
    }

    pub(crate) fn bind_input(&mut self, input: Option<Arc<RingBuffer>>) {
        self.input = input;
    }

    pub(crate) fn bind_output(&mut self, bound: bool) {
        self.output_bound = bound;
    }

    /// Spawns the worker and moves to `Running`.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidState`] unless the element is in `Init`,
    ///   `Stopped`, or `Finished`
    /// - [`PipelineError::SpawnFailed`] if the OS refused the thread
    pub fn start(&mut self) -> Result<(), PipelineError> {
        let current = self.shared.state();
        if !current.can_start() {
            return Err(PipelineError::invalid_state(&*self.tag(), current, "start"));
        }

        // Reclaim the processor from the previous run
        self.join_worker();
        let processor = self
            .processor
            .take()
            .ok_or_else(|| PipelineError::invalid_state(&*self.tag(), current, "start"))?;

        if current != ElementState::Init {
            self.shared.output.reset();
            if self.input.is_none() {
                self.shared.feed.reset();
            }
        }
        self.shared.stop_requested.store(false, Ordering::SeqCst);

        let input = self
            .input
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.shared.feed));
        let output = self.output_bound.then(|| Arc::clone(&self.shared.output));
        let worker = Worker::new(
            Arc::clone(&self.shared),
            processor,
            input,
            output,
            self.config.chunk_size,
        );

        {
            let mut state = self.shared.state.lock();
            self.shared
                .enter(&mut state, ElementStatus::new(ElementState::Running));
        }

        let tag = self.tag();
        let spawned = std::thread::Builder::new()
            .name(format!("element-{tag}"))
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                tracing::info!(element = %tag, id = %self.id(), "element started");
                Ok(())
            }
            Err(source) => {
                let mut state = self.shared.state.lock();
                self.shared.enter(
                    &mut state,
                    ElementStatus::error(format!("worker spawn failed: {source}")),
                );
                Err(PipelineError::SpawnFailed {
                    name: tag.to_string(),
                    source,
                })
            }
        }
    }

    /// Parks the worker at its next safe point.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidState`] unless the element is `Running`.
    pub fn pause(&self) -> Result<(), PipelineError> {
        let mut state = self.shared.state.lock();
        if *state != ElementState::Running {
            return Err(PipelineError::invalid_state(&*self.tag(), *state, "pause"));
        }
        self.shared
            .enter(&mut state, ElementStatus::new(ElementState::Paused));
        Ok(())
    }

    /// Wakes a paused worker.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidState`] unless the element is `Paused`.
    pub fn resume(&self) -> Result<(), PipelineError> {
        let mut state = self.shared.state.lock();
        if *state != ElementState::Paused {
            return Err(PipelineError::invalid_state(&*self.tag(), *state, "resume"));
        }
        self.shared
            .enter(&mut state, ElementStatus::new(ElementState::Running));
        Ok(())
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// The worker finishes its current chunk; buffers are aborted so it
    /// cannot stay blocked in I/O. Calling this on an element that is not
    /// running only reclaims an already-exited worker.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` leaves room for drivers that can
    /// refuse to stop.
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                ElementState::Running | ElementState::Paused => {
                    self.shared.stop_requested.store(true, Ordering::SeqCst);
                    self.shared
                        .enter(&mut state, ElementStatus::new(ElementState::Stopping));
                }
                ElementState::Stopping => {}
                _ => {
                    drop(state);
                    self.join_worker();
                    return Ok(());
                }
            }
        }

        match &self.input {
            Some(input) => input.abort(),
            None => self.shared.feed.abort(),
        }
        if self.output_bound {
            self.shared.output.abort();
        }

        self.join_worker();

        let mut state = self.shared.state.lock();
        if *state == ElementState::Stopping {
            self.shared
                .enter(&mut state, ElementStatus::new(ElementState::Stopped));
        }
        drop(state);

        tracing::info!(element = %self.tag(), "element stopped");
        Ok(())
    }

    /// Blocks until the element is no longer running.
    ///
    /// Returns once the state is `Stopped`, `Finished`, `Error`, or `Init`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Timeout`] if the deadline passes first.
    pub fn wait_for_stop(&mut self, timeout: Timeout) -> Result<(), PipelineError> {
        self.wait_until(timeout.deadline())
    }

    pub(crate) fn wait_until(&mut self, deadline: Option<Instant>) -> Result<(), PipelineError> {
        self.shared.wait_idle(deadline)?;
        self.join_worker();
        Ok(())
    }

    /// Stops the element if needed, clears its buffers, and returns to `Init`.
    ///
    /// Also clears an `Error` state.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`stop()`](Self::stop).
    pub fn reset(&mut self) -> Result<(), PipelineError> {
        self.stop()?;

        self.shared.output.reset();
        self.shared.feed.reset();
        self.shared.stop_requested.store(false, Ordering::SeqCst);

        let mut state = self.shared.state.lock();
        if *state != ElementState::Init {
            self.shared
                .enter(&mut state, ElementStatus::new(ElementState::Init));
        }
        Ok(())
    }

    /// Joins an exited worker and takes its processor back.
    fn join_worker(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };

        match handle.join() {
            Ok(processor) => self.processor = Some(processor),
            Err(_) => {
                tracing::error!(element = %self.tag(), "element worker panicked");
                let mut state = self.shared.state.lock();
                if !state.is_idle() {
                    self.shared
                        .enter(&mut state, ElementStatus::error("worker panicked"));
                }
            }
        }
    }
}

impl EventSource for Element {
    fn attach(&self, sender: EventSender) {
        self.shared.listeners.add(sender);
    }

    fn detach(&self, sender: &EventSender) {
        self.shared.listeners.remove(sender);
    }
}

impl Drop for Element {
    fn drop(&mut self) {
        if self.worker.is_some() {
            // Dropped while running - release the worker before freeing buffers
            let _ = self.stop();
        }
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("id", &self.id())
            .field("tag", &self.tag())
            .field("state", &self.state())
            .field("source", &self.is_source())
            .field("sink", &self.is_sink())
            .finish_non_exhaustive()
    }
}

/// Cloneable view of an element.
///
/// Stays valid after the element is moved into a pipeline; used by the
/// application to match events and to move music info between elements.
#[derive(Clone)]
pub struct ElementHandle {
    shared: Arc<ElementShared>,
}

impl ElementHandle {
    /// Returns the element's id.
    pub fn id(&self) -> ElementId {
        self.shared.id()
    }

    /// Returns the name the element was registered under.
    pub fn tag(&self) -> Arc<str> {
        self.shared.tag()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ElementState {
        self.shared.state()
    }

    /// Returns the current music info.
    pub fn info(&self) -> MusicInfo {
        self.shared.info()
    }

    /// Overwrites the music info.
    pub fn set_info(&self, info: MusicInfo) {
        self.shared.set_info(info);
    }

    /// Returns a writer into the element's feed.
    pub fn writer(&self) -> StreamWriter {
        StreamWriter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Blocks until the element is no longer running.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Timeout`] if the deadline passes first.
    pub fn wait_for_stop(&self, timeout: Timeout) -> Result<(), PipelineError> {
        self.shared.wait_idle(timeout.deadline())
    }
}

impl std::fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementHandle")
            .field("id", &self.id())
            .field("tag", &self.tag())
            .finish()
    }
}

/// Pushes bytes into a source element.
///
/// This is the contract a source peripheral (e.g., a Bluetooth radio) uses:
/// write audio, report the format once it is known, and mark the end of the
/// stream.
#[derive(Clone)]
pub struct StreamWriter {
    shared: Arc<ElementShared>,
}

impl StreamWriter {
    /// Returns the id of the element being fed.
    pub fn element(&self) -> ElementId {
        self.shared.id()
    }

    /// Writes bytes into the feed, blocking while it is full.
    ///
    /// # Errors
    ///
    /// See [`RingBuffer::write`].
    pub fn write(&self, bytes: &[u8], timeout: Timeout) -> Result<usize, BufferError> {
        self.shared.feed.write(bytes, timeout)
    }

    /// Writes every byte, blocking as long as needed.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Aborted`] or [`BufferError::Done`] if the feed
    /// was closed before everything was written.
    pub fn write_all(&self, mut bytes: &[u8]) -> Result<(), BufferError> {
        while !bytes.is_empty() {
            let written = self.shared.feed.write(bytes, Timeout::Infinite)?;
            bytes = &bytes[written..];
        }
        Ok(())
    }

    /// Marks the end of the stream.
    pub fn mark_done(&self) {
        self.shared.feed.mark_done();
    }

    /// Stores the discovered music format on the element and reports it.
    pub fn report_info(&self, info: MusicInfo) {
        self.shared.report_info(info);
    }
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("element", &self.element())
            .finish()
    }
}
