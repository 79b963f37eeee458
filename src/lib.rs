//! # audio-pipeline
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! A streaming audio pipeline runtime: named elements, each on its own worker
//! thread, linked through blocking ring buffers, with one event queue that
//! collects element and peripheral notifications.
//!
//! ## Quick Start
//!
//! ```rust
//! use audio_pipeline::{
//!     Element, EventInterface, HardwareSink, Passthrough, Pipeline, Timeout,
//! };
//!
//! let events = EventInterface::default();
//! let mut pipeline = Pipeline::new();
//! pipeline.set_listener(&events);
//!
//! let bt = pipeline.register(Element::new(Passthrough), "bt")?;
//! pipeline.register(Element::new(Passthrough), "filter")?;
//! let i2s = pipeline.register(
//!     Element::new(HardwareSink::new(|_bytes, _info| Ok(()))),
//!     "i2s",
//! )?;
//! pipeline.link(&["bt", "filter", "i2s"])?;
//! pipeline.run()?;
//!
//! // A source peripheral pushes audio into the first element
//! let writer = bt.writer();
//! writer.write_all(&[0u8; 256])?;
//! writer.mark_done();
//!
//! pipeline.wait_for_stop(Timeout::from_millis(1000))?;
//! assert!(i2s.state().is_stopped());
//!
//! pipeline.terminate()?;
//! pipeline.remove_listener(&events);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **Element**: a worker thread that reads its input, runs a
//!   [`Processor`], and writes its output ring buffer
//! - **Pipeline**: registers, links, starts (source first) and stops (sink
//!   first) its elements
//! - **Event interface**: bounded MPSC queue; posting never blocks, overflow
//!   is dropped and counted
//! - **Peripherals**: board drivers that post key presses and connection
//!   changes into the same queue
//!
//! Stopping never kills a thread: buffers are aborted so blocked workers
//! wake, finish their chunk, and exit.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod config;
pub mod element;
mod error;
pub mod event;
pub mod peripheral;
mod pipeline;
pub mod player;
pub mod processor;
mod timeout;

pub use builder::PipelineBuilder;
pub use config::{
    BoardProfile, ElementConfig, EventConfig, InputAction, KeyMap, PlayerConfig,
    DEFAULT_CHUNK_SIZE, DEFAULT_EVENT_QUEUE_SIZE, DEFAULT_RINGBUF_SIZE,
};
pub use element::{
    Element, ElementHandle, ElementId, ElementState, ElementStatus, MusicInfo, StreamWriter,
};
pub use error::{BufferError, PipelineError, ProcessError};
pub use event::{
    Command, EventInterface, EventMessage, EventSender, EventSource, Payload, SourceId,
    SourceKind,
};
pub use peripheral::{
    mock, Peripheral, PeripheralCommand, PeripheralEmitter, PeripheralId, PeripheralKind,
    PeripheralSet,
};
pub use pipeline::{Pipeline, RingBuffer};
pub use player::{Flow, Player, PlayerContext, StopReason};
pub use processor::{
    processor_fn, ChannelSink, FnProcessor, Gain, HardwareSink, Passthrough, ProcessContext,
    Processor, VolumeControl, WavSink,
};
pub use timeout::Timeout;
