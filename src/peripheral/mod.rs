//! Peripheral stub interface.
//!
//! Peripherals are the board-side drivers around a pipeline: keys, touch
//! pads, the Bluetooth radio, the status LED. Each one runs on its own
//! thread (or none at all) and reports through a [`PeripheralEmitter`]; a
//! [`PeripheralSet`] owns them and forwards their events to any attached
//! [`EventInterface`](crate::EventInterface).
//!
//! Real drivers are out of scope; [`mock`] provides stand-ins that behave
//! like the hardware from the pipeline's point of view.

pub mod mock;
mod peripheral_id;

pub use peripheral_id::{PeripheralCommand, PeripheralId, PeripheralKind};

use crate::event::{EventMessage, EventSender, EventSource, Listeners, Payload};
use crate::PipelineError;

/// A board-side driver that reports events.
///
/// # Implementation Notes
///
/// - `start` receives the emitter to post through; keep a clone if events
///   are posted from a background thread
/// - `stop` must return promptly and join any thread the driver spawned
pub trait Peripheral: Send {
    /// Category of the peripheral.
    fn kind(&self) -> PeripheralKind;

    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Starts the driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver cannot start, e.g. a thread could not
    /// be spawned.
    fn start(&mut self, emitter: PeripheralEmitter) -> Result<(), PipelineError>;

    /// Stops the driver.
    fn stop(&mut self);
}

/// Posts events on behalf of one peripheral.
#[derive(Clone)]
pub struct PeripheralEmitter {
    id: PeripheralId,
    listeners: Listeners,
}

impl PeripheralEmitter {
    /// Id of the peripheral this emitter posts for.
    pub fn id(&self) -> PeripheralId {
        self.id
    }

    /// Posts an event to every listener attached to the set.
    pub fn post(&self, command: PeripheralCommand, payload: Payload) {
        tracing::trace!(peripheral = %self.id, ?command, ?payload, "peripheral event");
        self.listeners
            .emit(&EventMessage::peripheral(self.id, command, payload));
    }
}

impl std::fmt::Debug for PeripheralEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralEmitter")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

struct Entry {
    id: PeripheralId,
    peripheral: Box<dyn Peripheral>,
    running: bool,
}

/// Owns peripherals and funnels their events to listeners.
///
/// # Example
///
/// ```
/// use audio_pipeline::mock::MockButtons;
/// use audio_pipeline::{EventInterface, PeripheralKind, PeripheralSet};
///
/// let events = EventInterface::default();
/// let mut peripherals = PeripheralSet::new();
/// events.set_listener(&peripherals);
///
/// let keys = MockButtons::new(PeripheralKind::Touch);
/// let id = peripherals.add(keys.clone());
/// peripherals.start_all()?;
/// assert!(peripherals.is_running(id));
///
/// peripherals.stop_all();
/// # Ok::<(), audio_pipeline::PipelineError>(())
/// ```
#[derive(Default)]
pub struct PeripheralSet {
    entries: Vec<Entry>,
    listeners: Listeners,
    next_id: u64,
}

impl PeripheralSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a peripheral and returns its id.
    ///
    /// The peripheral is not started.
    pub fn add(&mut self, peripheral: impl Peripheral + 'static) -> PeripheralId {
        self.next_id += 1;
        let id = PeripheralId::new(self.next_id);
        tracing::debug!(peripheral = %id, name = peripheral.name(), kind = ?peripheral.kind(), "peripheral added");
        self.entries.push(Entry {
            id,
            peripheral: Box::new(peripheral),
            running: false,
        });
        id
    }

    /// Starts one peripheral. Starting a running peripheral is a no-op.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::UnknownPeripheral`] if `id` was not issued by this set
    /// - Any error the driver reports from `start`
    pub fn start(&mut self, id: PeripheralId) -> Result<(), PipelineError> {
        let listeners = self.listeners.clone();
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(PipelineError::UnknownPeripheral { id })?;

        if entry.running {
            return Ok(());
        }

        entry.peripheral.start(PeripheralEmitter { id, listeners })?;
        entry.running = true;
        tracing::info!(peripheral = %id, name = entry.peripheral.name(), "peripheral started");
        Ok(())
    }

    /// Starts every peripheral in insertion order.
    ///
    /// # Errors
    ///
    /// Returns the first error; peripherals after the failing one are not
    /// started.
    pub fn start_all(&mut self) -> Result<(), PipelineError> {
        let ids: Vec<_> = self.entries.iter().map(|entry| entry.id).collect();
        for id in ids {
            self.start(id)?;
        }
        Ok(())
    }

    /// Stops one peripheral. Stopping an idle peripheral is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownPeripheral`] if `id` was not issued by
    /// this set.
    pub fn stop(&mut self, id: PeripheralId) -> Result<(), PipelineError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(PipelineError::UnknownPeripheral { id })?;
        Self::stop_entry(entry);
        Ok(())
    }

    /// Stops every running peripheral in reverse insertion order.
    pub fn stop_all(&mut self) {
        for entry in self.entries.iter_mut().rev() {
            Self::stop_entry(entry);
        }
    }

    /// Returns true if the peripheral is started.
    pub fn is_running(&self, id: PeripheralId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.id == id && entry.running)
    }

    /// Returns the kind of the peripheral, if known.
    pub fn kind(&self, id: PeripheralId) -> Option<PeripheralKind> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.peripheral.kind())
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> Vec<PeripheralId> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    /// Number of peripherals in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn stop_entry(entry: &mut Entry) {
        if entry.running {
            entry.peripheral.stop();
            entry.running = false;
            tracing::info!(peripheral = %entry.id, name = entry.peripheral.name(), "peripheral stopped");
        }
    }
}

impl EventSource for PeripheralSet {
    fn attach(&self, sender: EventSender) {
        self.listeners.add(sender);
    }

    fn detach(&self, sender: &EventSender) {
        self.listeners.remove(sender);
    }
}

impl Drop for PeripheralSet {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl std::fmt::Debug for PeripheralSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.id, entry.peripheral.name(), entry.running))
            .collect();
        f.debug_struct("PeripheralSet")
            .field("peripherals", &names)
            .finish()
    }
}
