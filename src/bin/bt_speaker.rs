//! Bluetooth speaker demo.
//!
//! Wires a mock Bluetooth source through a volume filter into an output
//! stage, then drives it from the event loop until the stream ends, the
//! remote disconnects, or Ctrl+C is pressed.
//!
//! ```bash
//! bt-speaker --board lyratd-msc --output speaker.wav --seconds 3
//! RUST_LOG=audio_pipeline=debug bt-speaker
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use audio_pipeline::mock::{MockBluetooth, MockButtons, MockLed, StatusLed, Tone};
use audio_pipeline::{
    player, BoardProfile, Element, EventInterface, EventMessage, Gain, HardwareSink, MusicInfo,
    Passthrough, Payload, PeripheralCommand, PeripheralKind, PeripheralSet, Pipeline, Player,
    PlayerConfig, PlayerContext, Processor, Timeout, VolumeControl, WavSink,
};

#[derive(Parser)]
#[command(name = "bt-speaker")]
#[command(author, version, about = "Bluetooth speaker pipeline demo", long_about = None)]
struct Args {
    /// Board layout (generic, lyratd-msc)
    #[arg(short, long, default_value = "generic", value_parser = parse_board)]
    board: BoardProfile,

    /// Write the output to a WAV file instead of the hardware stub
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Seconds of audio the mock remote streams (omit to play until Ctrl+C)
    #[arg(short, long)]
    seconds: Option<f64>,

    /// Tone frequency in Hz (0 for silence)
    #[arg(short, long, default_value_t = 440.0)]
    tone: f64,

    /// Initial volume in percent
    #[arg(short, long)]
    volume: Option<u8>,

    /// Stream as fast as possible instead of at the audio rate
    #[arg(long)]
    fast: bool,

    /// Name the speaker advertises
    #[arg(long)]
    name: Option<String>,

    /// Event queue depth; startup alone posts about half a dozen events
    #[arg(long, default_value_t = 16)]
    event_queue: usize,
}

fn parse_board(s: &str) -> Result<BoardProfile, String> {
    BoardProfile::from_name(s).ok_or_else(|| format!("unknown board '{s}'"))
}

impl Args {
    fn config(&self) -> PlayerConfig {
        let mut config = PlayerConfig::for_board(self.board);
        config.events.queue_capacity = self.event_queue.max(1);
        if let Some(volume) = self.volume {
            config.initial_volume = volume.min(100);
        }
        if let Some(name) = &self.name {
            config.device_name.clone_from(name);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.config();
    let board = config.board;
    tracing::info!(name = %config.device_name, ?board, "starting speaker");

    // Pipeline: bt → filter → i2s
    let [bt_tag, filter_tag, i2s_tag] = board.link_tags() else {
        anyhow::bail!("board {board:?} must link exactly three elements");
    };

    let volume = VolumeControl::new(config.initial_volume);
    let bt_element = Element::with_config(config.element.clone(), Passthrough);
    let filter = Element::with_config(config.element.clone(), Gain::new(volume.clone()));
    let i2s = Element::with_config(config.element.clone(), output_stage(args.output.as_ref()));

    let mut pipeline = Pipeline::new();
    let bt_stream = pipeline.register(bt_element, bt_tag)?;
    pipeline.register(filter, filter_tag)?;
    let i2s_stream = pipeline.register(i2s, i2s_tag)?;
    pipeline.link(board.link_tags())?;

    // Peripherals
    let led = MockLed::new();
    let keys = MockButtons::new(match board {
        BoardProfile::LyraTdMsc => PeripheralKind::AdcButton,
        BoardProfile::Generic => PeripheralKind::Touch,
    });
    let mut bt = MockBluetooth::new(bt_stream.writer(), MusicInfo::default())
        .tone(if args.tone > 0.0 {
            Tone::Sine(args.tone)
        } else {
            Tone::Silence
        })
        .realtime(!args.fast);
    if let Some(seconds) = args.seconds {
        let seconds = Duration::try_from_secs_f64(seconds).context("invalid --seconds")?;
        bt = bt.duration(seconds);
    }

    // A WAV file records the stream as delivered, so its header must match
    // the source before the first write. The codec starts at the board clock
    // and follows the source once its info event arrives.
    if args.output.is_some() {
        i2s_stream.set_info(bt.info());
    } else {
        i2s_stream.set_info(board.output_info());
    }

    let mut peripherals = PeripheralSet::new();
    peripherals.add(led.clone());
    peripherals.add(keys);
    let bt_id = peripherals.add(bt.clone());

    // Event interface
    let events = Arc::new(EventInterface::new(config.events.clone()));
    pipeline.set_listener(&events);
    events.set_listener(&peripherals);

    let player = Arc::new(Player::new(PlayerContext {
        led: Arc::new(led.clone()),
        remote: Arc::new(bt.clone()),
        volume,
        volume_step: config.volume_step,
        keys: config.keys,
        source: bt_stream.id(),
        sink: i2s_stream.clone(),
        bluetooth: bt_id,
    }));

    // The event loop blocks, so it runs off the async runtime. It is
    // listening before anything starts posting.
    let loop_player = Arc::clone(&player);
    let loop_events = Arc::clone(&events);
    let mut event_loop = tokio::task::spawn_blocking(move || {
        loop_player.run(&loop_events, Timeout::Infinite)
    });

    let started = player
        .start(&mut pipeline)
        .and_then(|()| peripherals.start_all());
    if let Err(e) = started {
        // Wake the loop even if the remote never connected
        tracing::error!(error = %e, "startup failed");
        events.post(EventMessage::peripheral(
            bt_id,
            PeripheralCommand::BluetoothDisconnected,
            Payload::Empty,
        ));
    }

    let result = tokio::select! {
        joined = &mut event_loop => joined?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            bt.disconnect();
            event_loop.await?
        }
    };

    match result {
        Ok(reason) => tracing::info!(?reason, "event loop finished"),
        Err(e) => tracing::error!(error = %e, "event loop failed"),
    }

    let led: &dyn StatusLed = &*player.context().led;
    player::shutdown(&mut pipeline, &mut peripherals, &events, led)?;

    tracing::info!(
        state = ?i2s_stream.state(),
        dropped_events = events.overflow_count(),
        "speaker stopped"
    );
    Ok(())
}

/// Builds the output processor: a WAV file or the hardware stub.
fn output_stage(path: Option<&PathBuf>) -> Box<dyn Processor> {
    match path {
        Some(path) => Box::new(WavSink::new(path)),
        None => Box::new(HardwareSink::with_name("i2s", |bytes, info| {
            tracing::trace!(bytes = bytes.len(), %info, "i2s write");
            Ok(())
        })),
    }
}
