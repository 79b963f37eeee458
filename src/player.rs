//! Event-driven Bluetooth speaker application.
//!
//! The [`Player`] owns no global state: everything it needs lives in a
//! [`PlayerContext`] built by the caller. It reacts to three kinds of
//! events:
//!
//! - music info reported by the source, copied onto the sink
//! - key presses, mapped through the board's [`KeyMap`] to remote-control
//!   commands and volume changes
//! - terminal events (remote disconnected, sink stopped or failed), which
//!   end the loop

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::element::{ElementHandle, ElementId, ElementState};
use crate::event::{Command, EventInterface, EventMessage, Payload, SourceId};
use crate::peripheral::mock::{MediaControl, StatusLed};
use crate::peripheral::{PeripheralCommand, PeripheralId, PeripheralSet};
use crate::processor::VolumeControl;
use crate::{InputAction, KeyMap, Pipeline, PipelineError, Timeout};

/// Blink period shown while the speaker is playing.
const PLAYING_BLINK: Duration = Duration::from_millis(500);

/// Everything the player acts on.
pub struct PlayerContext {
    /// Status LED.
    pub led: Arc<dyn StatusLed>,
    /// Remote control of the connected device.
    pub remote: Arc<dyn MediaControl>,
    /// Volume shared with the gain stage.
    pub volume: VolumeControl,
    /// Volume change per key press, in percent.
    pub volume_step: u8,
    /// Key layout of the board.
    pub keys: KeyMap,
    /// The element that reports the source music info.
    pub source: ElementId,
    /// The output element.
    pub sink: ElementHandle,
    /// The Bluetooth peripheral.
    pub bluetooth: PeripheralId,
}

/// Why the player stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The remote device disconnected.
    Disconnected,
    /// The sink stopped or reached end of stream.
    SinkStopped,
    /// The sink failed.
    SinkFault(String),
}

/// Outcome of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Keep listening.
    Continue,
    /// Leave the event loop.
    Stop(StopReason),
}

/// The speaker's main loop.
pub struct Player {
    ctx: PlayerContext,
}

impl Player {
    /// Creates a player over the given context.
    pub fn new(ctx: PlayerContext) -> Self {
        Self { ctx }
    }

    /// Returns the context.
    pub fn context(&self) -> &PlayerContext {
        &self.ctx
    }

    /// Starts blinking the LED and runs the pipeline.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Pipeline::run`].
    pub fn start(&self, pipeline: &mut Pipeline) -> Result<(), PipelineError> {
        self.ctx.led.blink(PLAYING_BLINK);
        tracing::info!(volume = self.ctx.volume.get(), "starting playback");
        pipeline.run()
    }

    /// Reacts to one event.
    pub fn handle(&self, message: &EventMessage) -> Flow {
        match (message.source, message.command, &message.payload) {
            (SourceId::Element(id), Command::ReportMusicInfo, Payload::Info(info))
                if id == self.ctx.source =>
            {
                tracing::info!(%info, "music info received from source");
                self.ctx.sink.set_info(*info);
                Flow::Continue
            }
            (SourceId::Element(id), Command::ReportStatus, Payload::Status(status))
                if id == self.ctx.sink.id() =>
            {
                match status.state {
                    ElementState::Stopped | ElementState::Finished => {
                        tracing::warn!(state = ?status.state, "sink stopped");
                        Flow::Stop(StopReason::SinkStopped)
                    }
                    ElementState::Error => {
                        let reason = status.reason.clone().unwrap_or_default();
                        tracing::warn!(%reason, "sink failed");
                        Flow::Stop(StopReason::SinkFault(reason))
                    }
                    _ => Flow::Continue,
                }
            }
            (SourceId::Peripheral(_), Command::Peripheral(command), Payload::Value(key))
                if command.is_key_event() =>
            {
                self.on_key(*key);
                Flow::Continue
            }
            (
                SourceId::Peripheral(id),
                Command::Peripheral(PeripheralCommand::BluetoothDisconnected),
                _,
            ) if id == self.ctx.bluetooth => {
                tracing::warn!("bluetooth disconnected");
                Flow::Stop(StopReason::Disconnected)
            }
            _ => Flow::Continue,
        }
    }

    /// Listens until a terminal event arrives.
    ///
    /// Listen timeouts are retried; only the overall `timeout` ends the loop
    /// early.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Timeout`] if `timeout` passes first.
    pub fn run(&self, events: &EventInterface, timeout: Timeout) -> Result<StopReason, PipelineError> {
        let deadline = timeout.deadline();

        loop {
            let wait = match deadline {
                None => Timeout::Infinite,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PipelineError::Timeout);
                    }
                    Timeout::After(deadline - now)
                }
            };

            match events.listen(wait) {
                Ok(message) => {
                    if let Flow::Stop(reason) = self.handle(&message) {
                        return Ok(reason);
                    }
                }
                Err(PipelineError::Timeout) => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn on_key(&self, key: i32) {
        let Some(action) = self.ctx.keys.action_for(key) else {
            tracing::warn!(key, "unmapped key");
            return;
        };

        match action {
            InputAction::Play => {
                tracing::info!("[play] key");
                self.ctx.remote.play();
            }
            InputAction::Pause => {
                tracing::info!("[set] key");
                self.ctx.remote.pause();
            }
            InputAction::VolumeUp => {
                self.ctx.remote.next();
                let volume = self.ctx.volume.step_up(self.ctx.volume_step);
                tracing::info!(volume, "[vol+] key");
            }
            InputAction::VolumeDown => {
                let volume = self.ctx.volume.step_down(self.ctx.volume_step);
                self.ctx.remote.prev();
                tracing::info!(volume, "[vol-] key");
            }
            InputAction::Mode => tracing::info!("[mode] key"),
        }
    }
}

/// Tears everything down exactly once, in dependency order.
///
/// 1. LED off
/// 2. stop the pipeline and wait for its workers
/// 3. terminate the pipeline and unregister its elements
/// 4. detach the pipeline from `events`
/// 5. stop every peripheral, then detach them from `events`
///
/// The caller drops `events` afterwards.
///
/// # Errors
///
/// Returns the first error met; later steps still run.
pub fn shutdown(
    pipeline: &mut Pipeline,
    peripherals: &mut PeripheralSet,
    events: &EventInterface,
    led: &dyn StatusLed,
) -> Result<(), PipelineError> {
    led.off();

    let mut first_error = pipeline.stop().err();
    if let Err(e) = pipeline.wait_for_stop(Timeout::Infinite) {
        first_error.get_or_insert(e);
    }
    if let Err(e) = pipeline.terminate() {
        first_error.get_or_insert(e);
    }

    let names: Vec<String> = pipeline.names().into_iter().map(str::to_string).collect();
    for name in names {
        match pipeline.unregister(&name) {
            Ok(element) => drop(element),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    pipeline.remove_listener(events);

    peripherals.stop_all();
    events.remove_listener(peripherals);

    tracing::info!(
        dropped_events = events.overflow_count(),
        "shutdown complete"
    );
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementStatus, MusicInfo};
    use crate::peripheral::mock::{LedPattern, MediaCommand, MockBluetooth, MockLed};
    use crate::{BoardProfile, Element, Passthrough};

    struct Fixture {
        player: Player,
        remote: MockBluetooth,
        sink: Element,
        source: ElementId,
        bluetooth: PeripheralId,
    }

    fn fixture() -> Fixture {
        let source = Element::new(Passthrough);
        let sink = Element::new(Passthrough);
        let remote = MockBluetooth::new(source.writer(), MusicInfo::default());
        let bluetooth = PeripheralId::new(1);

        let player = Player::new(PlayerContext {
            led: Arc::new(MockLed::new()),
            remote: Arc::new(remote.clone()),
            volume: VolumeControl::new(90),
            volume_step: 10,
            keys: BoardProfile::Generic.key_map(),
            source: source.id(),
            sink: sink.handle(),
            bluetooth,
        });

        Fixture {
            player,
            remote,
            sink,
            source: source.id(),
            bluetooth,
        }
    }

    fn key(value: i32) -> EventMessage {
        EventMessage::peripheral(
            PeripheralId::new(2),
            PeripheralCommand::TouchTap,
            Payload::Value(value),
        )
    }

    #[test]
    fn test_music_info_copied_to_sink() {
        let f = fixture();
        let info = MusicInfo::new(44_100, 16, 2);

        let flow = f.player.handle(&EventMessage::music_info(f.source, info));
        assert_eq!(flow, Flow::Continue);
        assert_eq!(f.sink.info(), info);
    }

    #[test]
    fn test_music_info_from_other_element_ignored() {
        let f = fixture();
        let before = f.sink.info();
        let other = Element::new(Passthrough);

        f.player.handle(&EventMessage::music_info(
            other.id(),
            MusicInfo::new(8_000, 8, 1),
        ));
        assert_eq!(f.sink.info(), before);
    }

    #[test]
    fn test_volume_keys_clamp_and_skip() {
        let f = fixture();
        let keys = BoardProfile::Generic.key_map();

        f.player.handle(&key(keys.volume_up));
        f.player.handle(&key(keys.volume_up));
        assert_eq!(f.player.context().volume.get(), 100);

        for _ in 0..12 {
            f.player.handle(&key(keys.volume_down));
        }
        assert_eq!(f.player.context().volume.get(), 0);

        let commands = f.remote.commands();
        assert_eq!(commands[..2], [MediaCommand::Next, MediaCommand::Next]);
        assert_eq!(commands.len(), 14);
        assert!(commands[2..].iter().all(|c| *c == MediaCommand::Prev));
    }

    #[test]
    fn test_play_and_set_keys() {
        let f = fixture();
        let keys = BoardProfile::Generic.key_map();

        f.player.handle(&key(keys.play));
        f.player.handle(&key(keys.set));
        f.player.handle(&key(keys.mode));
        f.player.handle(&key(1234));

        assert_eq!(
            f.remote.commands(),
            vec![MediaCommand::Play, MediaCommand::Pause]
        );
    }

    #[test]
    fn test_terminal_events() {
        let f = fixture();

        let disconnected = EventMessage::peripheral(
            f.bluetooth,
            PeripheralCommand::BluetoothDisconnected,
            Payload::Empty,
        );
        assert_eq!(
            f.player.handle(&disconnected),
            Flow::Stop(StopReason::Disconnected)
        );

        let finished =
            EventMessage::status(f.sink.id(), ElementStatus::new(ElementState::Finished));
        assert_eq!(
            f.player.handle(&finished),
            Flow::Stop(StopReason::SinkStopped)
        );

        let fault = EventMessage::status(f.sink.id(), ElementStatus::error("dma underrun"));
        assert_eq!(
            f.player.handle(&fault),
            Flow::Stop(StopReason::SinkFault("dma underrun".to_string()))
        );

        let running = EventMessage::status(f.sink.id(), ElementStatus::new(ElementState::Running));
        assert_eq!(f.player.handle(&running), Flow::Continue);
    }

    #[test]
    fn test_run_times_out() {
        let f = fixture();
        let events = EventInterface::default();
        events.post(key(1234));

        let result = f.player.run(&events, Timeout::from_millis(20));
        assert!(matches!(result, Err(PipelineError::Timeout)));
    }

    #[test]
    fn test_run_stops_on_disconnect() {
        let f = fixture();
        let events = EventInterface::default();
        events.post(key(BoardProfile::Generic.key_map().play));
        events.post(EventMessage::peripheral(
            f.bluetooth,
            PeripheralCommand::BluetoothDisconnected,
            Payload::Empty,
        ));

        let reason = f.player.run(&events, Timeout::from_millis(1000)).unwrap();
        assert_eq!(reason, StopReason::Disconnected);
        assert_eq!(f.remote.commands(), vec![MediaCommand::Play]);
    }

    #[test]
    fn test_shutdown_tears_down_everything() {
        let events = EventInterface::new(crate::EventConfig { queue_capacity: 32 });
        let led = MockLed::new();
        led.blink(PLAYING_BLINK);

        let mut pipeline = crate::PipelineBuilder::new()
            .element("a", Passthrough)
            .element("b", Passthrough)
            .build()
            .unwrap();
        pipeline.set_listener(&events);
        pipeline.run().unwrap();

        let mut peripherals = PeripheralSet::new();
        events.set_listener(&peripherals);
        peripherals.add(led.clone());
        peripherals.start_all().unwrap();
        assert_eq!(events.producer_count(), 2);

        shutdown(&mut pipeline, &mut peripherals, &events, &led).unwrap();

        assert!(pipeline.is_empty());
        assert!(!pipeline.is_linked());
        assert_eq!(events.producer_count(), 0);
        assert_eq!(led.pattern(), LedPattern::Off);
    }
}
