//! Builder pattern for [`Pipeline`].

use std::collections::HashSet;

use crate::element::Element;
use crate::processor::Processor;
use crate::{ElementConfig, Pipeline, PipelineError};

/// Builder that registers and links a pipeline in one expression.
///
/// Elements are linked in the order they are added unless
/// [`link()`](Self::link) names an explicit order.
///
/// # Example
///
/// ```
/// use audio_pipeline::{HardwareSink, Passthrough, PipelineBuilder};
///
/// let pipeline = PipelineBuilder::new()
///     .element("bt", Passthrough)
///     .element("filter", Passthrough)
///     .element("i2s", HardwareSink::new(|_bytes, _info| Ok(())))
///     .build()?;
///
/// assert_eq!(pipeline.linked_names(), vec!["bt", "filter", "i2s"]);
/// assert_eq!(pipeline.bindings(), 2);
/// # Ok::<(), audio_pipeline::PipelineError>(())
/// ```
#[must_use]
pub struct PipelineBuilder {
    /// Elements in registration order.
    elements: Vec<(String, Element)>,
    /// Explicit link order, if any.
    link: Option<Vec<String>>,
    /// Configuration for elements created by [`element()`](Self::element).
    config: ElementConfig,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
            link: None,
            config: ElementConfig::default(),
        }
    }

    /// Sets the buffer sizes for elements added after this call.
    pub fn with_config(mut self, config: ElementConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds an element wrapping `processor`.
    pub fn element(mut self, name: impl Into<String>, processor: impl Processor + 'static) -> Self {
        let element = Element::with_config(self.config.clone(), processor);
        self.elements.push((name.into(), element));
        self
    }

    /// Adds an already constructed element.
    pub fn add(mut self, name: impl Into<String>, element: Element) -> Self {
        self.elements.push((name.into(), element));
        self
    }

    /// Links in the given order instead of insertion order.
    pub fn link(mut self, names: &[&str]) -> Self {
        self.link = Some(names.iter().map(|n| (*n).to_string()).collect());
        self
    }

    /// Returns the registered names.
    pub fn names(&self) -> Vec<&str> {
        self.elements.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Validates the builder configuration.
    fn validate(&self) -> Result<(), PipelineError> {
        if self.elements.is_empty() {
            return Err(PipelineError::EmptyLink);
        }

        let mut seen = HashSet::new();
        for (name, _) in &self.elements {
            if !seen.insert(name) {
                return Err(PipelineError::DuplicateName { name: name.clone() });
            }
        }

        Ok(())
    }

    /// Registers every element and links them.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No elements were added
    /// - Two elements share a name
    /// - The explicit link order names an unknown element
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        self.validate()?;

        let order = self.link.unwrap_or_else(|| {
            self.elements
                .iter()
                .map(|(name, _)| name.clone())
                .collect()
        });

        let mut pipeline = Pipeline::new();
        for (name, element) in self.elements {
            pipeline.register(element, &name)?;
        }

        let order: Vec<&str> = order.iter().map(String::as_str).collect();
        pipeline.link(&order)?;
        Ok(pipeline)
    }
}
