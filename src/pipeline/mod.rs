//! Pipeline: registers elements, links them, and drives their lifecycle.
//!
//! Elements are chained through their output ring buffers:
//!
//! ```text
//! StreamWriter → feed → [bt] → ring → [filter] → ring → [i2s] → hardware
//! ```
//!
//! - **Register**: elements are named; names must be unique
//! - **Link**: an ordered list of names; element *i* reads the output of
//!   element *i-1*, the first reads its feed, the last leaves its output
//!   unbound
//! - **Run / Stop**: workers start source first and stop sink first

mod ring_buffer;

pub use ring_buffer::RingBuffer;

use std::collections::HashSet;

use crate::element::{Element, ElementHandle, ElementState};
use crate::event::{EventInterface, EventSender, EventSource, Listeners};
use crate::{PipelineError, Timeout};

/// Name used in errors about the pipeline itself.
const PIPELINE_TAG: &str = "pipeline";

struct Slot {
    name: String,
    element: Element,
}

/// An ordered graph of elements.
///
/// # Lifecycle
///
/// 1. [`register()`](Pipeline::register) elements under unique names
/// 2. [`link()`](Pipeline::link) them in dataflow order
/// 3. [`run()`](Pipeline::run) to start every linked worker
/// 4. [`stop()`](Pipeline::stop) and [`wait_for_stop()`](Pipeline::wait_for_stop)
/// 5. [`terminate()`](Pipeline::terminate) to reset every element
///
/// # Example
///
/// ```
/// use audio_pipeline::{Element, Passthrough, Pipeline, Timeout};
///
/// let mut pipeline = Pipeline::new();
/// let source = pipeline.register(Element::new(Passthrough), "src")?;
/// pipeline.register(Element::new(Passthrough), "sink")?;
/// pipeline.link(&["src", "sink"])?;
///
/// pipeline.run()?;
/// source.writer().mark_done();
/// pipeline.wait_for_stop(Timeout::from_millis(1000))?;
/// pipeline.terminate()?;
/// # Ok::<(), audio_pipeline::PipelineError>(())
/// ```
#[derive(Default)]
pub struct Pipeline {
    slots: Vec<Slot>,
    link: Option<Vec<String>>,
    running: bool,
    listeners: Listeners,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an element under `name` and returns a handle to it.
    ///
    /// The element inherits every listener attached to the pipeline.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidState`] while the pipeline is running
    /// - [`PipelineError::DuplicateName`] if `name` is taken
    pub fn register(&mut self, element: Element, name: &str) -> Result<ElementHandle, PipelineError> {
        self.ensure_stopped("register")?;
        if self.position(name).is_some() {
            return Err(PipelineError::DuplicateName {
                name: name.to_string(),
            });
        }

        element.set_tag(name);
        for sender in self.listeners.senders() {
            element.attach(sender);
        }

        let handle = element.handle();
        tracing::debug!(element = %name, id = %handle.id(), "element registered");
        self.slots.push(Slot {
            name: name.to_string(),
            element,
        });
        Ok(handle)
    }

    /// Removes an element and hands it back.
    ///
    /// Unlinks the pipeline if the element was part of the link.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidState`] while the pipeline is running
    /// - [`PipelineError::UnknownElement`] if `name` is not registered
    pub fn unregister(&mut self, name: &str) -> Result<Element, PipelineError> {
        self.ensure_stopped("unregister")?;
        let index = self
            .position(name)
            .ok_or_else(|| PipelineError::unknown(name))?;

        if self
            .link
            .as_ref()
            .is_some_and(|link| link.iter().any(|n| n == name))
        {
            tracing::debug!(element = %name, "unlinking pipeline");
            self.link = None;
            self.clear_bindings();
        }

        let Slot { mut element, .. } = self.slots.remove(index);
        for sender in self.listeners.senders() {
            element.detach(&sender);
        }
        element.bind_input(None);
        element.bind_output(true);

        tracing::debug!(element = %name, "element unregistered");
        Ok(element)
    }

    /// Connects elements in dataflow order, source first.
    ///
    /// Replaces any previous link.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidState`] while the pipeline is running
    /// - [`PipelineError::EmptyLink`] if `names` is empty
    /// - [`PipelineError::DuplicateName`] if a name repeats
    /// - [`PipelineError::UnknownElement`] if a name is not registered
    pub fn link(&mut self, names: &[&str]) -> Result<(), PipelineError> {
        self.ensure_stopped("link")?;
        if names.is_empty() {
            return Err(PipelineError::EmptyLink);
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in names {
            if !seen.insert(*name) {
                return Err(PipelineError::DuplicateName {
                    name: (*name).to_string(),
                });
            }
            if self.position(name).is_none() {
                return Err(PipelineError::unknown(*name));
            }
        }

        self.clear_bindings();

        let last = names.len() - 1;
        let mut upstream = None;
        for (i, name) in names.iter().enumerate() {
            let element = self.element_mut(name)?;
            element.bind_input(upstream.take());
            element.bind_output(i < last);
            upstream = Some(element.output_buffer());
        }

        self.link = Some(names.iter().map(|n| (*n).to_string()).collect());
        tracing::info!(order = ?names, bindings = self.bindings(), "pipeline linked");
        Ok(())
    }

    /// Number of buffer bindings between linked elements.
    pub fn bindings(&self) -> usize {
        self.link.as_ref().map_or(0, |link| link.len().saturating_sub(1))
    }

    /// Starts every linked element, source first.
    ///
    /// If one element fails to start, the ones already started are stopped
    /// again.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NotLinked`] before [`link()`](Self::link)
    /// - [`PipelineError::InvalidState`] if already running, or if an element
    ///   cannot start (e.g., it is in `Error` and needs a reset)
    /// - [`PipelineError::SpawnFailed`] if a worker thread cannot be spawned
    pub fn run(&mut self) -> Result<(), PipelineError> {
        let link = self.link.clone().ok_or(PipelineError::NotLinked)?;
        if self.running {
            return Err(PipelineError::invalid_state(
                PIPELINE_TAG,
                ElementState::Running,
                "run",
            ));
        }

        for (started, name) in link.iter().enumerate() {
            if let Err(e) = self.element_mut(name)?.start() {
                tracing::warn!(element = %name, error = %e, "element failed to start, rolling back");
                for name in link[..started].iter().rev() {
                    self.element_mut(name)?.stop()?;
                }
                return Err(e);
            }
        }

        self.running = true;
        tracing::info!(elements = link.len(), "pipeline running");
        Ok(())
    }

    /// Parks every running linked element, sink first.
    ///
    /// Elements that already stopped on their own are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidState`] if the pipeline is not running.
    pub fn pause(&mut self) -> Result<(), PipelineError> {
        self.ensure_running("pause")?;
        for slot in self.linked_slots().into_iter().rev() {
            if slot.element.state() == ElementState::Running {
                slot.element.pause()?;
            }
        }
        tracing::info!("pipeline paused");
        Ok(())
    }

    /// Wakes every paused linked element, source first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidState`] if the pipeline is not running.
    pub fn resume(&mut self) -> Result<(), PipelineError> {
        self.ensure_running("resume")?;
        for slot in self.linked_slots() {
            if slot.element.state() == ElementState::Paused {
                slot.element.resume()?;
            }
        }
        tracing::info!("pipeline resumed");
        Ok(())
    }

    /// Stops every linked element, sink first, and joins the workers.
    ///
    /// Stopping a pipeline that is not running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by an element; the remaining
    /// elements are still stopped.
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        let Some(link) = self.link.clone() else {
            return Ok(());
        };

        let mut first_error = None;
        for name in link.iter().rev() {
            let result = self.element_mut(name).and_then(Element::stop);
            if let Err(e) = result {
                tracing::warn!(element = %name, error = %e, "element failed to stop");
                first_error.get_or_insert(e);
            }
        }

        if self.running {
            tracing::info!("pipeline stopped");
        }
        self.running = false;
        first_error.map_or(Ok(()), Err)
    }

    /// Blocks until every linked element has stopped, finished, or failed.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Timeout`] if the deadline passes first; the
    /// pipeline stays running.
    pub fn wait_for_stop(&mut self, timeout: Timeout) -> Result<(), PipelineError> {
        let Some(link) = self.link.clone() else {
            return Ok(());
        };

        let deadline = timeout.deadline();
        for name in &link {
            self.element_mut(name)?.wait_until(deadline)?;
        }

        self.running = false;
        tracing::debug!("pipeline workers joined");
        Ok(())
    }

    /// Stops anything still running, resets every element, and drops the link.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by an element.
    pub fn terminate(&mut self) -> Result<(), PipelineError> {
        let stopped = self.stop();

        let mut first_error = stopped.err();
        for slot in &mut self.slots {
            if let Err(e) = slot.element.reset() {
                first_error.get_or_insert(e);
            }
        }

        self.link = None;
        self.clear_bindings();
        tracing::info!(elements = self.slots.len(), "pipeline terminated");
        first_error.map_or(Ok(()), Err)
    }

    /// Funnels the events of every element into `events`.
    ///
    /// Elements registered later are attached too.
    pub fn set_listener(&self, events: &EventInterface) {
        events.set_listener(self);
    }

    /// Stops funnelling element events into `events`.
    pub fn remove_listener(&self, events: &EventInterface) {
        events.remove_listener(self);
    }

    /// Returns a handle to the named element.
    pub fn element(&self, name: &str) -> Option<ElementHandle> {
        self.slot(name).map(|slot| slot.element.handle())
    }

    /// Returns the state of the named element.
    pub fn state(&self, name: &str) -> Option<ElementState> {
        self.slot(name).map(|slot| slot.element.state())
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.name.as_str()).collect()
    }

    /// Linked names in dataflow order; empty if unlinked.
    pub fn linked_names(&self) -> Vec<&str> {
        self.link
            .as_ref()
            .map(|link| link.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns true once [`link()`](Self::link) succeeded.
    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    /// Returns true between [`run()`](Self::run) and a stop.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of registered elements.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot.name == name)
    }

    fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    fn element_mut(&mut self, name: &str) -> Result<&mut Element, PipelineError> {
        self.slots
            .iter_mut()
            .find(|slot| slot.name == name)
            .map(|slot| &mut slot.element)
            .ok_or_else(|| PipelineError::unknown(name))
    }

    fn linked_slots(&self) -> Vec<&Slot> {
        self.linked_names()
            .into_iter()
            .filter_map(|name| self.slot(name))
            .collect()
    }

    fn clear_bindings(&mut self) {
        for slot in &mut self.slots {
            slot.element.bind_input(None);
            slot.element.bind_output(true);
        }
    }

    fn ensure_stopped(&self, operation: &'static str) -> Result<(), PipelineError> {
        if self.running {
            return Err(PipelineError::invalid_state(
                PIPELINE_TAG,
                ElementState::Running,
                operation,
            ));
        }
        Ok(())
    }

    fn ensure_running(&self, operation: &'static str) -> Result<(), PipelineError> {
        if !self.running {
            return Err(PipelineError::invalid_state(
                PIPELINE_TAG,
                ElementState::Stopped,
                operation,
            ));
        }
        Ok(())
    }
}

impl EventSource for Pipeline {
    fn attach(&self, sender: EventSender) {
        for slot in &self.slots {
            slot.element.attach(sender.clone());
        }
        self.listeners.add(sender);
    }

    fn detach(&self, sender: &EventSender) {
        for slot in &self.slots {
            slot.element.detach(sender);
        }
        self.listeners.remove(sender);
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("elements", &self.names())
            .field("link", &self.link)
            .field("running", &self.running)
            .finish()
    }
}
