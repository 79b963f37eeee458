//! Integration tests for audio-pipeline.
//!
//! Everything here runs on mock peripherals; no audio hardware is needed.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use audio_pipeline::mock::{LedPattern, MediaCommand, MockBluetooth, MockButtons, MockLed, Tone};
use audio_pipeline::{
    player, processor_fn, BoardProfile, BufferError, ChannelSink, Element, ElementConfig,
    ElementId, ElementState, EventConfig, EventInterface, EventMessage, Gain, HardwareSink,
    MusicInfo, Passthrough, Payload, PeripheralCommand, PeripheralId, PeripheralKind,
    PeripheralSet, Pipeline, PipelineBuilder, PipelineError, Player, PlayerConfig, PlayerContext,
    ProcessError, RingBuffer, SourceId, StopReason, Timeout, VolumeControl, WavSink,
};

/// A sink that keeps every byte it receives.
fn collecting_sink() -> (HardwareSink, Arc<Mutex<Vec<u8>>>) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink_bytes = Arc::clone(&collected);
    let sink = HardwareSink::with_name("collect", move |bytes, _info| {
        sink_bytes.lock().extend_from_slice(bytes);
        Ok(())
    });
    (sink, collected)
}

fn events(capacity: usize) -> EventInterface {
    EventInterface::new(EventConfig {
        queue_capacity: capacity,
    })
}

/// Drains the queue and returns `(element, state)` for every status event.
fn status_events(events: &EventInterface) -> Vec<(ElementId, ElementState)> {
    let mut statuses = Vec::new();
    while let Ok(message) = events.listen(Timeout::Immediate) {
        if let (SourceId::Element(id), Some(state)) = (message.source, message.state()) {
            statuses.push((id, state));
        }
    }
    statuses
}

#[test]
fn test_three_stage_pipeline_drains_to_end() {
    let (sink, collected) = collecting_sink();

    let mut pipeline = Pipeline::new();
    let a = pipeline.register(Element::new(Passthrough), "A").unwrap();
    pipeline.register(Element::new(Passthrough), "B").unwrap();
    pipeline.register(Element::new(sink), "C").unwrap();
    pipeline.link(&["A", "B", "C"]).unwrap();
    pipeline.run().unwrap();

    let data: Vec<u8> = (0..100).collect();
    let writer = a.writer();
    writer.write_all(&data).unwrap();
    writer.mark_done();

    pipeline.wait_for_stop(Timeout::from_millis(2000)).unwrap();

    for name in ["A", "B", "C"] {
        assert_eq!(pipeline.state(name), Some(ElementState::Finished), "{name}");
    }
    assert_eq!(*collected.lock(), data);
    assert!(!pipeline.is_running());

    pipeline.terminate().unwrap();
    for name in ["A", "B", "C"] {
        assert_eq!(pipeline.state(name), Some(ElementState::Init));
    }
}

#[test]
fn test_start_and_stop_order() {
    let events = events(32);
    let mut pipeline = PipelineBuilder::new()
        .element("A", Passthrough)
        .element("B", Passthrough)
        .element("C", Passthrough)
        .build()
        .unwrap();
    pipeline.set_listener(&events);

    let ids: Vec<ElementId> = ["A", "B", "C"]
        .iter()
        .map(|name| pipeline.element(name).unwrap().id())
        .collect();
    let name_of = |id: ElementId| ["A", "B", "C"][ids.iter().position(|i| *i == id).unwrap()];

    pipeline.run().unwrap();
    let started: Vec<&str> = status_events(&events)
        .into_iter()
        .filter(|(_, state)| *state == ElementState::Running)
        .map(|(id, _)| name_of(id))
        .collect();
    assert_eq!(started, vec!["A", "B", "C"]);

    pipeline.stop().unwrap();
    let statuses = status_events(&events);
    let stopping: Vec<&str> = statuses
        .iter()
        .filter(|(_, state)| *state == ElementState::Stopping)
        .map(|(id, _)| name_of(*id))
        .collect();
    assert_eq!(stopping, vec!["C", "B", "A"]);
    let stopped = statuses
        .iter()
        .filter(|(_, state)| *state == ElementState::Stopped)
        .count();
    assert_eq!(stopped, 3);

    for name in ["A", "B", "C"] {
        assert_eq!(pipeline.state(name), Some(ElementState::Stopped));
    }
    pipeline.terminate().unwrap();
}

#[test]
fn test_run_requires_link() {
    let mut pipeline = Pipeline::new();
    pipeline.register(Element::new(Passthrough), "A").unwrap();

    assert!(matches!(pipeline.run(), Err(PipelineError::NotLinked)));
    assert_eq!(pipeline.state("A"), Some(ElementState::Init));
}

#[test]
fn test_link_binds_neighbours() {
    let mut pipeline = Pipeline::new();
    for name in ["a", "b", "c", "d"] {
        pipeline.register(Element::new(Passthrough), name).unwrap();
    }

    pipeline.link(&["a", "b", "c", "d"]).unwrap();
    assert_eq!(pipeline.bindings(), 3);

    pipeline.link(&["d", "a"]).unwrap();
    assert_eq!(pipeline.bindings(), 1);
    assert_eq!(pipeline.linked_names(), vec!["d", "a"]);
}

#[test]
fn test_unregister_while_running_is_rejected() {
    let mut pipeline = PipelineBuilder::new()
        .element("A", Passthrough)
        .element("B", Passthrough)
        .build()
        .unwrap();
    pipeline.run().unwrap();

    assert!(matches!(
        pipeline.unregister("A"),
        Err(PipelineError::InvalidState { .. })
    ));

    pipeline.terminate().unwrap();
    let element = pipeline.unregister("A").unwrap();
    assert_eq!(element.state(), ElementState::Init);
    assert_eq!(pipeline.names(), vec!["B"]);
}

#[test]
fn test_pause_and_resume_whole_pipeline() {
    let (sink, collected) = collecting_sink();
    let mut pipeline = PipelineBuilder::new()
        .element("A", Passthrough)
        .element("B", sink)
        .build()
        .unwrap();
    let writer = pipeline.element("A").unwrap().writer();

    assert!(matches!(
        pipeline.pause(),
        Err(PipelineError::InvalidState { .. })
    ));

    pipeline.run().unwrap();
    pipeline.pause().unwrap();
    assert_eq!(pipeline.state("A"), Some(ElementState::Paused));
    assert_eq!(pipeline.state("B"), Some(ElementState::Paused));

    pipeline.resume().unwrap();
    assert_eq!(pipeline.state("A"), Some(ElementState::Running));
    assert_eq!(pipeline.state("B"), Some(ElementState::Running));

    writer.write_all(&[7u8; 64]).unwrap();
    writer.mark_done();
    pipeline.wait_for_stop(Timeout::from_millis(2000)).unwrap();
    assert_eq!(collected.lock().len(), 64);
    pipeline.terminate().unwrap();
}

#[test]
fn test_concurrent_producers_keep_their_order() {
    let events = events(16);
    let producers: Vec<_> = (1..=2u64)
        .map(|producer| {
            let sender = events.sender();
            thread::spawn(move || {
                for i in 0..5 {
                    let message = EventMessage::peripheral(
                        PeripheralId::new(producer),
                        PeripheralCommand::Custom(0),
                        Payload::Value(i),
                    );
                    assert!(sender.post(message));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let mut received: Vec<(SourceId, i32)> = Vec::new();
    while let Ok(message) = events.listen(Timeout::Immediate) {
        received.push((message.source, message.value().unwrap()));
    }
    assert_eq!(received.len(), 10);

    for producer in 1..=2u64 {
        let source = SourceId::Peripheral(PeripheralId::new(producer));
        let values: Vec<i32> = received
            .iter()
            .filter(|(s, _)| *s == source)
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }
    assert_eq!(events.overflow_count(), 0);
}

#[test]
fn test_full_queue_drops_newest() {
    let events = events(2);
    let post = |value| {
        events.post(EventMessage::peripheral(
            PeripheralId::new(1),
            PeripheralCommand::Custom(1),
            Payload::Value(value),
        ))
    };

    assert!(post(1));
    assert!(post(2));
    assert!(!post(3));
    assert_eq!(events.overflow_count(), 1);

    assert_eq!(events.listen(Timeout::Immediate).unwrap().value(), Some(1));
    assert_eq!(events.listen(Timeout::Immediate).unwrap().value(), Some(2));
    assert!(matches!(
        events.listen(Timeout::Immediate),
        Err(PipelineError::Timeout)
    ));
}

#[test]
fn test_abort_unblocks_reader_and_writer() {
    let buffer = Arc::new(RingBuffer::new(4));

    let reader_buffer = Arc::clone(&buffer);
    let reader = thread::spawn(move || {
        let mut dest = [0u8; 4];
        reader_buffer.read(&mut dest, Timeout::Infinite)
    });

    thread::sleep(Duration::from_millis(20));
    buffer.abort();
    assert_eq!(reader.join().unwrap(), Err(BufferError::Aborted));

    buffer.reset();
    buffer.write(&[1, 2, 3, 4], Timeout::Immediate).unwrap();
    let writer_buffer = Arc::clone(&buffer);
    let writer = thread::spawn(move || writer_buffer.write(&[5], Timeout::Infinite));

    thread::sleep(Duration::from_millis(20));
    buffer.abort();
    assert_eq!(writer.join().unwrap(), Err(BufferError::Aborted));
}

#[test]
fn test_stop_unblocks_idle_pipeline() {
    let mut pipeline = PipelineBuilder::new()
        .element("A", Passthrough)
        .element("B", Passthrough)
        .build()
        .unwrap();
    pipeline.run().unwrap();

    // Nothing was written, so every worker is blocked on a read
    thread::sleep(Duration::from_millis(20));
    pipeline.stop().unwrap();
    pipeline.wait_for_stop(Timeout::from_millis(500)).unwrap();
    assert_eq!(pipeline.state("A"), Some(ElementState::Stopped));
    pipeline.terminate().unwrap();
}

#[test]
fn test_wav_sink_in_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.wav");

    let sink = Element::new(WavSink::new(&path));
    sink.set_info(MusicInfo::new(16_000, 16, 1));

    let mut pipeline = PipelineBuilder::new()
        .element("src", Passthrough)
        .add("wav", sink)
        .build()
        .unwrap();
    let writer = pipeline.element("src").unwrap().writer();
    pipeline.run().unwrap();

    writer.write_all(&[0x11; 3200]).unwrap();
    writer.mark_done();
    pipeline.wait_for_stop(Timeout::from_millis(2000)).unwrap();
    pipeline.terminate().unwrap();

    let data = std::fs::read(&path).unwrap();
    assert_eq!(data.len(), 44 + 3200);
    assert_eq!(&data[0..4], b"RIFF");
    assert_eq!(&data[8..12], b"WAVE");
    assert_eq!(u32::from_le_bytes([data[24], data[25], data[26], data[27]]), 16_000);
    assert_eq!(u32::from_le_bytes([data[40], data[41], data[42], data[43]]), 3200);
}

#[tokio::test]
async fn test_channel_sink_pipeline() {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(16);

    let mut pipeline = PipelineBuilder::new()
        .element("src", Passthrough)
        .element("gain", Gain::new(VolumeControl::new(50)))
        .element("out", ChannelSink::new(tx))
        .build()
        .unwrap();
    let writer = pipeline.element("src").unwrap().writer();
    pipeline.run().unwrap();

    let samples: Vec<u8> = [1000i16, -2000, 300, -4]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    writer.write_all(&samples).unwrap();
    writer.mark_done();

    let mut received = Vec::new();
    while received.len() < samples.len() {
        let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        received.extend(chunk);
    }

    let scaled: Vec<i16> = received
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    assert_eq!(scaled, vec![500, -1000, 150, -2]);

    tokio::task::spawn_blocking(move || {
        pipeline.wait_for_stop(Timeout::from_millis(2000)).unwrap();
        pipeline.terminate().unwrap();
    })
    .await
    .unwrap();
}

#[test]
fn test_speaker_plays_stream_to_end() {
    let board = BoardProfile::Generic;
    let volume = VolumeControl::new(90);
    let (sink, collected) = collecting_sink();

    let mut pipeline = Pipeline::new();
    let bt_stream = pipeline.register(Element::new(Passthrough), "bt").unwrap();
    pipeline
        .register(Element::new(Gain::new(volume.clone())), "filter")
        .unwrap();
    let i2s = pipeline.register(Element::new(sink), "i2s").unwrap();
    i2s.set_info(board.output_info());
    pipeline.link(board.link_tags()).unwrap();

    let info = MusicInfo::new(8_000, 16, 1);
    let bt = MockBluetooth::new(bt_stream.writer(), info)
        .tone(Tone::Silence)
        .duration(Duration::from_millis(100));
    let led = MockLed::new();
    let pads = MockButtons::new(PeripheralKind::Touch);

    let mut peripherals = PeripheralSet::new();
    peripherals.add(led.clone());
    peripherals.add(pads.clone());
    let bt_id = peripherals.add(bt.clone());

    let events = Arc::new(events(32));
    pipeline.set_listener(&events);
    events.set_listener(&peripherals);

    let player = Player::new(PlayerContext {
        led: Arc::new(led.clone()),
        remote: Arc::new(bt.clone()),
        volume: volume.clone(),
        volume_step: 10,
        keys: board.key_map(),
        source: bt_stream.id(),
        sink: i2s.clone(),
        bluetooth: bt_id,
    });

    player.start(&mut pipeline).unwrap();
    assert_eq!(led.pattern(), LedPattern::Blink(Duration::from_millis(500)));

    peripherals.start_all().unwrap();
    assert!(pads.press(board.key_map().volume_up));

    let reason = player.run(&events, Timeout::from_millis(5000)).unwrap();
    assert_eq!(reason, StopReason::SinkStopped);

    // 100 ms at 8 kHz mono 16-bit
    assert_eq!(collected.lock().len(), 1600);
    assert_eq!(i2s.info(), info);
    assert_eq!(volume.get(), 100);
    assert_eq!(bt.commands(), vec![MediaCommand::Next]);

    player::shutdown(&mut pipeline, &mut peripherals, &events, &led).unwrap();
    assert!(pipeline.is_empty());
    assert_eq!(led.pattern(), LedPattern::Off);
    assert_eq!(events.producer_count(), 0);
}

#[test]
fn test_speaker_stops_on_disconnect() {
    let board = BoardProfile::LyraTdMsc;
    let mut pipeline = PipelineBuilder::new()
        .element("bt", Passthrough)
        .element("filter", Passthrough)
        .element("i2s", HardwareSink::new(|_bytes, _info| Ok(())))
        .build()
        .unwrap();
    let bt_stream = pipeline.element("bt").unwrap();
    let i2s = pipeline.element("i2s").unwrap();

    // Streams until stopped
    let bt = MockBluetooth::new(bt_stream.writer(), MusicInfo::default()).tone(Tone::Silence);
    let led = MockLed::new();

    let mut peripherals = PeripheralSet::new();
    peripherals.add(led.clone());
    let bt_id = peripherals.add(bt.clone());

    let events = Arc::new(events(64));
    pipeline.set_listener(&events);
    events.set_listener(&peripherals);

    let player = Player::new(PlayerContext {
        led: Arc::new(led.clone()),
        remote: Arc::new(bt.clone()),
        volume: VolumeControl::default(),
        volume_step: 10,
        keys: board.key_map(),
        source: bt_stream.id(),
        sink: i2s.clone(),
        bluetooth: bt_id,
    });
    player.start(&mut pipeline).unwrap();
    peripherals.start_all().unwrap();

    let loop_events = Arc::clone(&events);
    let event_loop = thread::spawn(move || player.run(&loop_events, Timeout::from_millis(5000)));

    thread::sleep(Duration::from_millis(50));
    bt.disconnect();
    assert_eq!(event_loop.join().unwrap().unwrap(), StopReason::Disconnected);
    assert_eq!(i2s.state(), ElementState::Running);

    player::shutdown(&mut pipeline, &mut peripherals, &events, &led).unwrap();
    assert!(pipeline.is_empty());
    assert!(!peripherals.is_running(bt_id));
}

#[test]
fn test_stop_unblocks_writers_under_back_pressure() {
    let small = ElementConfig {
        out_buffer_size: 16,
        feed_buffer_size: 16,
        chunk_size: 8,
    };
    let slow_sink = HardwareSink::with_name("slow", |_bytes, _info| {
        thread::sleep(Duration::from_millis(20));
        Ok(())
    });

    let mut pipeline = PipelineBuilder::new()
        .with_config(small)
        .element("A", Passthrough)
        .element("B", Passthrough)
        .element("C", slow_sink)
        .build()
        .unwrap();
    let writer = pipeline.element("A").unwrap().writer();
    pipeline.run().unwrap();

    // Far more than the buffers hold, so every upstream stage blocks writing
    let producer = thread::spawn(move || writer.write_all(&[0u8; 4096]));
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    pipeline.stop().unwrap();
    pipeline.wait_for_stop(Timeout::from_millis(1000)).unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    for name in ["A", "B", "C"] {
        assert_eq!(pipeline.state(name), Some(ElementState::Stopped), "{name}");
    }
    assert_eq!(producer.join().unwrap(), Err(BufferError::Aborted));
    pipeline.terminate().unwrap();
}

#[test]
fn test_middle_fault_reports_error_and_stop_tears_down() {
    let events = events(32);
    let (sink, collected) = collecting_sink();
    let mut pipeline = PipelineBuilder::new()
        .element("A", Passthrough)
        .element(
            "B",
            processor_fn(|_input, _output| Err(ProcessError::failed("bad frame"))).named("decoder"),
        )
        .element("C", sink)
        .build()
        .unwrap();
    pipeline.set_listener(&events);
    let writer = pipeline.element("A").unwrap().writer();
    let decoder = pipeline.element("B").unwrap();

    pipeline.run().unwrap();
    writer.write_all(&[1, 2, 3, 4]).unwrap();
    decoder.wait_for_stop(Timeout::from_millis(1000)).unwrap();
    assert_eq!(decoder.state(), ElementState::Error);

    let mut reason = None;
    while let Ok(message) = events.listen(Timeout::Immediate) {
        if let (SourceId::Element(id), Payload::Status(status)) = (message.source, message.payload) {
            if id == decoder.id() && status.state == ElementState::Error {
                reason = status.reason;
            }
        }
    }
    assert_eq!(reason.as_deref(), Some("processing failed: bad frame"));

    // The sink is still waiting on the failed stage
    assert_eq!(pipeline.state("C"), Some(ElementState::Running));
    pipeline.stop().unwrap();
    pipeline.wait_for_stop(Timeout::from_millis(1000)).unwrap();

    assert_eq!(pipeline.state("C"), Some(ElementState::Stopped));
    assert_eq!(pipeline.state("B"), Some(ElementState::Error));
    assert!(pipeline.state("A").is_some_and(|state| state.is_stopped()));
    assert!(collected.lock().is_empty());

    pipeline.terminate().unwrap();
    assert_eq!(pipeline.state("B"), Some(ElementState::Init));
}

#[test]
fn test_speaker_loop_listens_before_startup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("speaker.wav");

    let config = PlayerConfig {
        events: EventConfig { queue_capacity: 16 },
        ..PlayerConfig::for_board(BoardProfile::LyraTdMsc)
    };
    let board = config.board;
    let volume = VolumeControl::new(config.initial_volume);

    let mut pipeline = PipelineBuilder::new()
        .element("bt", Passthrough)
        .element("filter", Gain::new(volume.clone()))
        .element("i2s", WavSink::new(&path))
        .link(board.link_tags())
        .build()
        .unwrap();
    let bt_stream = pipeline.element("bt").unwrap();
    let i2s = pipeline.element("i2s").unwrap();

    let bt = MockBluetooth::new(bt_stream.writer(), MusicInfo::new(8_000, 16, 1))
        .tone(Tone::Sine(440.0))
        .duration(Duration::from_millis(100));
    // The file header is written before the player's info copy could land
    i2s.set_info(bt.info());

    let led = MockLed::new();
    let mut peripherals = PeripheralSet::new();
    peripherals.add(led.clone());
    let bt_id = peripherals.add(bt.clone());

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
        sink: i2s.clone(),
        bluetooth: bt_id,
    }));

    let loop_player = Arc::clone(&player);
    let loop_events = Arc::clone(&events);
    let event_loop =
        thread::spawn(move || loop_player.run(&loop_events, Timeout::from_millis(5000)));

    player.start(&mut pipeline).unwrap();
    peripherals.start_all().unwrap();

    assert_eq!(event_loop.join().unwrap().unwrap(), StopReason::SinkStopped);
    assert_eq!(events.overflow_count(), 0);
    assert_eq!(i2s.info(), bt.info());

    player::shutdown(&mut pipeline, &mut peripherals, &events, &led).unwrap();

    let data = std::fs::read(&path).unwrap();
    assert_eq!(u32::from_le_bytes([data[24], data[25], data[26], data[27]]), 8_000);
    assert_eq!(u16::from_le_bytes([data[22], data[23]]), 1);
    assert_eq!(data.len(), 44 + 1600);
}
