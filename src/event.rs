//! Unified event queue for element and peripheral notifications.
//!
//! Elements report state changes and discovered music info, peripherals
//! report button presses and connection changes. All of them post into one
//! [`EventInterface`], and the application blocks on
//! [`listen()`](EventInterface::listen) to drive its main loop.
//!
//! Posting never blocks: producers are usually time-critical worker threads,
//! so a full queue drops the message and counts the drop instead of applying
//! back-pressure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::element::{ElementId, ElementState, ElementStatus, MusicInfo};
use crate::peripheral::{PeripheralCommand, PeripheralId};
use crate::{EventConfig, PipelineError, Timeout};

/// Broad category of an event producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// A pipeline element.
    Element,
    /// An external peripheral driver.
    Peripheral,
}

/// Identity of the producer that emitted an event.
///
/// Compared by value; the application matches it against the ids of the
/// elements and peripherals it created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// Emitted by an element.
    Element(ElementId),
    /// Emitted by a peripheral.
    Peripheral(PeripheralId),
}

impl SourceId {
    /// Returns the category of this producer.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Element(_) => SourceKind::Element,
            Self::Peripheral(_) => SourceKind::Peripheral,
        }
    }
}

/// What an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// An element changed state; payload is [`Payload::Status`].
    ReportStatus,
    /// An element discovered its music format; payload is [`Payload::Info`].
    ReportMusicInfo,
    /// A peripheral event; payload is peripheral-defined.
    Peripheral(PeripheralCommand),
}

/// Data carried by an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No data.
    Empty,
    /// New element status.
    Status(ElementStatus),
    /// Music format.
    Info(MusicInfo),
    /// Opaque integer, e.g. the id of a pressed key.
    Value(i32),
}

/// A single message delivered through the [`EventInterface`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    /// Producer of the event.
    pub source: SourceId,
    /// What the event reports.
    pub command: Command,
    /// Associated data.
    pub payload: Payload,
}

impl EventMessage {
    /// Creates a status report from an element.
    #[must_use]
    pub fn status(element: ElementId, status: ElementStatus) -> Self {
        Self {
            source: SourceId::Element(element),
            command: Command::ReportStatus,
            payload: Payload::Status(status),
        }
    }

    /// Creates a music info report from an element.
    #[must_use]
    pub fn music_info(element: ElementId, info: MusicInfo) -> Self {
        Self {
            source: SourceId::Element(element),
            command: Command::ReportMusicInfo,
            payload: Payload::Info(info),
        }
    }

    /// Creates a peripheral event.
    #[must_use]
    pub fn peripheral(peripheral: PeripheralId, command: PeripheralCommand, payload: Payload) -> Self {
        Self {
            source: SourceId::Peripheral(peripheral),
            command: Command::Peripheral(command),
            payload,
        }
    }

    /// Returns the reported state if this is a status event.
    #[must_use]
    pub fn state(&self) -> Option<ElementState> {
        match (&self.command, &self.payload) {
            (Command::ReportStatus, Payload::Status(status)) => Some(status.state),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub fn value(&self) -> Option<i32> {
        match self.payload {
            Payload::Value(v) => Some(v),
            _ => None,
        }
    }
}

struct Queue {
    messages: Mutex<VecDeque<EventMessage>>,
    available: Condvar,
    capacity: usize,
    overflow: AtomicU64,
}

impl Queue {
    fn push(&self, message: EventMessage) -> bool {
        let mut messages = self.messages.lock();
        if messages.len() >= self.capacity {
            let dropped = self.overflow.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                source = ?message.source,
                command = ?message.command,
                dropped,
                "event queue full, message dropped"
            );
            return false;
        }
        messages.push_back(message);
        self.available.notify_one();
        true
    }
}

/// Bounded multi-producer single-consumer event queue.
///
/// # Example
///
/// ```
/// use audio_pipeline::{EventConfig, EventInterface, Timeout};
///
/// let events = EventInterface::new(EventConfig::default());
/// assert!(events.listen(Timeout::Immediate).is_err());
/// ```
pub struct EventInterface {
    queue: Arc<Queue>,
    producers: AtomicUsize,
}

impl EventInterface {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(config: EventConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        Self {
            queue: Arc::new(Queue {
                messages: Mutex::new(VecDeque::with_capacity(capacity)),
                available: Condvar::new(),
                capacity,
                overflow: AtomicU64::new(0),
            }),
            producers: AtomicUsize::new(0),
        }
    }

    /// Enqueues a message without blocking.
    ///
    /// Returns false if the queue was full; the message is dropped and the
    /// overflow counter incremented.
    pub fn post(&self, message: EventMessage) -> bool {
        self.queue.push(message)
    }

    /// Blocks until a message is available or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Timeout`] if no message arrived in time.
    pub fn listen(&self, timeout: Timeout) -> Result<EventMessage, PipelineError> {
        let deadline = timeout.deadline();
        let mut messages = self.queue.messages.lock();

        loop {
            if let Some(message) = messages.pop_front() {
                return Ok(message);
            }

            match deadline {
                None => self.queue.available.wait(&mut messages),
                Some(deadline) => {
                    if std::time::Instant::now() >= deadline
                        || self
                            .queue
                            .available
                            .wait_until(&mut messages, deadline)
                            .timed_out()
                    {
                        return messages.pop_front().ok_or(PipelineError::Timeout);
                    }
                }
            }
        }
    }

    /// Returns a handle producers use to post into this queue.
    #[must_use]
    pub fn sender(&self) -> EventSender {
        EventSender {
            queue: Arc::downgrade(&self.queue),
        }
    }

    /// Funnels the events of `source` into this queue.
    pub fn set_listener<S: EventSource + ?Sized>(&self, source: &S) {
        source.attach(self.sender());
        self.producers.fetch_add(1, Ordering::SeqCst);
    }

    /// Stops funnelling the events of `source` into this queue.
    ///
    /// Call this for every attached producer before dropping the interface.
    pub fn remove_listener<S: EventSource + ?Sized>(&self, source: &S) {
        source.detach(&self.sender());
        let _ = self
            .producers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Number of producers currently attached through `set_listener`.
    pub fn producer_count(&self) -> usize {
        self.producers.load(Ordering::SeqCst)
    }

    /// Number of messages dropped because the queue was full.
    pub fn overflow_count(&self) -> u64 {
        self.queue.overflow.load(Ordering::Relaxed)
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.messages.lock().len()
    }

    /// Returns true if no message is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued messages.
    pub fn capacity(&self) -> usize {
        self.queue.capacity
    }
}

impl Default for EventInterface {
    fn default() -> Self {
        Self::new(EventConfig::default())
    }
}

/// Posting handle for an [`EventInterface`].
///
/// Holds a weak reference: once the interface is dropped, posts are
/// silently discarded instead of touching freed state.
#[derive(Clone)]
pub struct EventSender {
    queue: Weak<Queue>,
}

impl EventSender {
    /// Posts a message. Returns false if it was dropped.
    pub fn post(&self, message: EventMessage) -> bool {
        match self.queue.upgrade() {
            Some(queue) => queue.push(message),
            None => false,
        }
    }

    /// Returns true while the interface is alive.
    pub fn is_connected(&self) -> bool {
        self.queue.strong_count() > 0
    }

    /// Returns true if both senders post into the same interface.
    pub fn same_queue(&self, other: &EventSender) -> bool {
        self.queue.ptr_eq(&other.queue)
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// A producer whose events can be funnelled into an [`EventInterface`].
///
/// Implemented by [`Pipeline`](crate::Pipeline) and
/// [`PeripheralSet`](crate::PeripheralSet).
pub trait EventSource {
    /// Starts forwarding events to `sender`.
    fn attach(&self, sender: EventSender);

    /// Stops forwarding events to the queue behind `sender`.
    fn detach(&self, sender: &EventSender);
}

/// Set of senders a producer emits to.
///
/// Cloning shares the set, so a pipeline and its elements see the same
/// listeners.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    senders: Arc<RwLock<Vec<EventSender>>>,
}

impl Listeners {
    pub fn add(&self, sender: EventSender) {
        let mut senders = self.senders.write();
        if !senders.iter().any(|s| s.same_queue(&sender)) {
            senders.push(sender);
        }
    }

    pub fn remove(&self, sender: &EventSender) {
        self.senders.write().retain(|s| !s.same_queue(sender));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.senders.read().len()
    }

    pub fn senders(&self) -> Vec<EventSender> {
        self.senders.read().clone()
    }

    /// Delivers `message` to every listener.
    pub fn emit(&self, message: &EventMessage) {
        for sender in self.senders.read().iter() {
            sender.post(message.clone());
        }
    }
}
