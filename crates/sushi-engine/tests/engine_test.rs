//! End-to-end engine tests: full chunks through tracks, plugins and the
//! master section, in both direct and realtime mutation modes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sushi_core::{chunk_duration, SampleBuffer, Time, AUDIO_CHUNK_SIZE};
use sushi_engine::{
    AudioEngine, ControlBuffer, EngineError, PlayStateChange, PlayingMode, PluginInfo, PluginType,
    RtEvent,
};

const SAMPLE_RATE: f32 = 48000.0;

struct TestHarness {
    engine: Arc<AudioEngine>,
    in_buffer: SampleBuffer,
    out_buffer: SampleBuffer,
    sample_count: i64,
}

impl TestHarness {
    fn new(cores: usize) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let engine = Arc::new(AudioEngine::new(SAMPLE_RATE, cores, None));
        engine.set_audio_channels(2, 2);
        Self {
            engine,
            in_buffer: SampleBuffer::new(2),
            out_buffer: SampleBuffer::new(2),
            sample_count: 0,
        }
    }

    fn timestamp(&self) -> Time {
        chunk_duration(SAMPLE_RATE) * (self.sample_count / AUDIO_CHUNK_SIZE as i64) as u32
    }

    fn process_chunk(&mut self) {
        let mut controls_out = ControlBuffer::default();
        let timestamp = self.timestamp();
        self.engine.process_chunk(
            &self.in_buffer,
            &mut self.out_buffer,
            &ControlBuffer::default(),
            &mut controls_out,
            timestamp,
            self.sample_count,
        );
        self.sample_count += AUDIO_CHUNK_SIZE as i64;
    }

    fn process_chunks(&mut self, count: usize) {
        for _ in 0..count {
            self.process_chunk();
        }
    }
}

fn internal(uid: &str) -> PluginInfo {
    PluginInfo {
        uid: uid.to_string(),
        path: String::new(),
        plugin_type: PluginType::Internal,
    }
}

fn set_plugin_parameter(engine: &AudioEngine, plugin_name: &str, parameter: &str, domain: f32) {
    let info = engine
        .processor_container()
        .processor_by_name(plugin_name)
        .expect("plugin is registered");
    let descriptor = info
        .parameters
        .descriptor_from_name(parameter)
        .expect("parameter exists");
    let index = info.parameters.index_of(descriptor.id).unwrap();
    info.parameters.set_domain(index, domain);
}

#[test]
fn test_gain_chain_end_to_end() {
    let mut harness = TestHarness::new(1);
    let engine = harness.engine.clone();

    let track_id = engine.create_track("main", 2).unwrap();
    let gain_id = engine
        .create_processor(&internal("sushi.testing.gain"), "gain_0")
        .unwrap();
    engine.add_plugin_to_track(gain_id, track_id, None).unwrap();
    set_plugin_parameter(&engine, "gain_0", "gain", 6.0);

    engine.connect_audio_input_channel(0, 0, track_id).unwrap();
    engine.connect_audio_output_channel(0, 0, track_id).unwrap();

    harness.in_buffer.channel_mut(0).fill(1.0);
    harness.process_chunks(4);

    // +6 dB on a unity input
    let out = harness.out_buffer.channel(0)[AUDIO_CHUNK_SIZE - 1];
    assert!((out - 2.0).abs() < 0.02, "expected ~2.0, got {}", out);
    // Unconnected output channel stays silent
    assert_eq!(harness.out_buffer.calc_peak_value(1), 0.0);
}

#[test]
fn test_passthrough_and_unconnected_channels() {
    let mut harness = TestHarness::new(1);
    let engine = harness.engine.clone();

    let track_id = engine.create_track("main", 2).unwrap();
    engine.connect_audio_input_channel(0, 0, track_id).unwrap();
    engine.connect_audio_output_channel(0, 0, track_id).unwrap();

    harness.in_buffer.channel_mut(0).fill(1.0);
    harness.in_buffer.channel_mut(1).fill(1.0);
    harness.process_chunks(2);

    let out = harness.out_buffer.channel(0)[0];
    assert!((out - 1.0).abs() < 1e-4, "expected passthrough, got {}", out);
    assert_eq!(harness.out_buffer.calc_peak_value(1), 0.0);
}

#[test]
fn test_two_tracks_sum_on_shared_output() {
    let mut harness = TestHarness::new(1);
    let engine = harness.engine.clone();

    let t1 = engine.create_track("track_1", 2).unwrap();
    let t2 = engine.create_track("track_2", 2).unwrap();
    for track in [t1, t2] {
        engine.connect_audio_input_channel(0, 0, track).unwrap();
        engine.connect_audio_output_channel(0, 0, track).unwrap();
    }

    harness.in_buffer.channel_mut(0).fill(1.0);
    harness.process_chunks(2);

    let out = harness.out_buffer.channel(0)[0];
    assert!((out - 2.0).abs() < 1e-4, "expected summed 2.0, got {}", out);
}

#[test]
fn test_synth_note_on_and_off() {
    let mut harness = TestHarness::new(1);
    let engine = harness.engine.clone();

    let track_id = engine.create_track("synth_track", 2).unwrap();
    let synth_id = engine
        .create_processor(
            &PluginInfo {
                uid: "sushi.brickworks.simple_synth".to_string(),
                path: String::new(),
                plugin_type: PluginType::Brickworks,
            },
            "synth",
        )
        .unwrap();
    engine.add_plugin_to_track(synth_id, track_id, None).unwrap();
    engine.connect_audio_output_channel(0, 0, track_id).unwrap();

    // Keyboard events sent to the track bubble through the chain
    engine
        .send_rt_event(RtEvent::note_on(track_id, 0, 0, 60, 1.0))
        .unwrap();
    harness.process_chunks(2);
    assert!(
        harness.out_buffer.calc_peak_value(0) > 0.0,
        "note on should produce audio"
    );

    engine
        .send_rt_event(RtEvent::note_off(track_id, 0, 0, 60, 1.0))
        .unwrap();
    // Render well past decay + release (0.4 s at the default settings)
    harness.process_chunks((SAMPLE_RATE * 0.6) as usize / AUDIO_CHUNK_SIZE);
    assert_eq!(
        harness.out_buffer.calc_peak_value(0),
        0.0,
        "note should have released to silence"
    );
}

#[test]
fn test_master_limiter_bounds_output() {
    let mut harness = TestHarness::new(1);
    let engine = harness.engine.clone();
    engine.enable_master_limiter(true);

    let track_id = engine.create_track("hot", 2).unwrap();
    engine.connect_audio_input_channel(0, 0, track_id).unwrap();
    engine.connect_audio_output_channel(0, 0, track_id).unwrap();

    harness.in_buffer.channel_mut(0).fill(2.0);
    harness.process_chunk();

    for &sample in &harness.out_buffer.channel(0)[4..] {
        assert!(
            sample.abs() <= 1.0 + 1e-3,
            "limited output {} above 0 dB",
            sample
        );
    }
}

#[test]
fn test_transport_state_change_is_latched_one_chunk() {
    let mut harness = TestHarness::new(1);
    let engine = harness.engine.clone();

    harness.process_chunk();
    assert_eq!(
        engine.transport_view().current_state_change(),
        PlayStateChange::Unchanged
    );

    engine.set_transport_mode(PlayingMode::Playing);
    harness.process_chunk();
    assert_eq!(
        engine.transport_view().current_state_change(),
        PlayStateChange::Starting
    );
    assert!(engine.transport_view().playing());

    harness.process_chunk();
    assert_eq!(
        engine.transport_view().current_state_change(),
        PlayStateChange::Unchanged
    );
}

#[test]
fn test_multicore_render() {
    let mut harness = TestHarness::new(2);
    let engine = harness.engine.clone();

    let t1 = engine.create_track("left", 2).unwrap();
    let t2 = engine.create_track("right", 2).unwrap();
    engine.connect_audio_input_channel(0, 0, t1).unwrap();
    engine.connect_audio_input_channel(1, 0, t2).unwrap();
    engine.connect_audio_output_channel(0, 0, t1).unwrap();
    engine.connect_audio_output_channel(1, 0, t2).unwrap();

    harness.in_buffer.channel_mut(0).fill(0.25);
    harness.in_buffer.channel_mut(1).fill(0.5);
    harness.process_chunks(2);

    assert!((harness.out_buffer.channel(0)[0] - 0.25).abs() < 1e-4);
    assert!((harness.out_buffer.channel(1)[0] - 0.5).abs() < 1e-4);
}

#[test]
fn test_realtime_track_roundtrip_leaves_engine_clean() {
    let engine = Arc::new(AudioEngine::new(SAMPLE_RATE, 1, None));
    engine.set_audio_channels(2, 2);
    engine.enable_realtime(true);

    let tracks_before = engine.processor_container().all_tracks().len();
    let pumping = Arc::new(AtomicBool::new(true));

    std::thread::scope(|scope| {
        let pump_engine = engine.clone();
        let pump_flag = pumping.clone();
        scope.spawn(move || {
            let in_buffer = SampleBuffer::new(2);
            let mut out_buffer = SampleBuffer::new(2);
            let mut controls = ControlBuffer::default();
            let mut sample_count = 0i64;
            while pump_flag.load(Ordering::Acquire) {
                pump_engine.process_chunk(
                    &in_buffer,
                    &mut out_buffer,
                    &ControlBuffer::default(),
                    &mut controls,
                    chunk_duration(SAMPLE_RATE) * (sample_count / AUDIO_CHUNK_SIZE as i64) as u32,
                    sample_count,
                );
                sample_count += AUDIO_CHUNK_SIZE as i64;
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        });

        // Full lifecycle while the "audio thread" is pumping
        let track_id = engine.create_track("rt_track", 2).unwrap();
        let plugin_id = engine
            .create_processor(&internal("sushi.testing.passthrough"), "pt")
            .unwrap();
        engine.add_plugin_to_track(plugin_id, track_id, None).unwrap();
        engine.remove_plugin_from_track(plugin_id, track_id).unwrap();
        engine.delete_plugin(plugin_id).unwrap();
        engine.delete_track(track_id).unwrap();

        // Deleting again fails: nothing leaked in the containers
        assert_eq!(engine.delete_track(track_id), Err(EngineError::InvalidTrack));

        pumping.store(false, Ordering::Release);
    });

    assert_eq!(
        engine.processor_container().all_tracks().len(),
        tracks_before
    );
    assert!(engine.processor_container().all_processors().is_empty());
}

#[test]
fn test_dispatcher_forwards_control_events() {
    use sushi_engine::{Event, EventBody, EventDispatcher};

    let engine = Arc::new(AudioEngine::new(SAMPLE_RATE, 1, None));
    engine.set_audio_channels(2, 2);
    engine.enable_realtime(true);

    let dispatcher = EventDispatcher::new(engine.clone());
    let pumping = Arc::new(AtomicBool::new(true));

    std::thread::scope(|scope| {
        let pump_engine = engine.clone();
        let pump_flag = pumping.clone();
        scope.spawn(move || {
            let in_buffer = SampleBuffer::new(2);
            let mut out_buffer = SampleBuffer::new(2);
            let mut controls = ControlBuffer::default();
            let mut sample_count = 0i64;
            while pump_flag.load(Ordering::Acquire) {
                pump_engine.process_chunk(
                    &in_buffer,
                    &mut out_buffer,
                    &ControlBuffer::default(),
                    &mut controls,
                    chunk_duration(SAMPLE_RATE) * (sample_count / AUDIO_CHUNK_SIZE as i64) as u32,
                    sample_count,
                );
                sample_count += AUDIO_CHUNK_SIZE as i64;
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        });

        let track_id = engine.create_track("dispatched", 2).unwrap();
        let info = engine.processor_container().track(track_id).unwrap();
        let gain = info.parameters.descriptor_from_name("gain").unwrap().clone();

        // A parameter change posted to the dispatcher ends up applied on the
        // RT side through the main-in queue
        dispatcher.post_event(Event::new(
            EventBody::ParameterChange {
                processor_id: track_id,
                parameter_id: gain.id,
                normalized_value: 0.25,
            },
            sushi_core::monotonic_time(),
        ));

        let index = info.parameters.index_of(gain.id).unwrap();
        let mut applied = false;
        for _ in 0..100 {
            if (info.parameters.normalized_value(index) - 0.25).abs() < 1e-6 {
                applied = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(applied, "parameter change should reach the rt domain");

        pumping.store(false, Ordering::Release);
    });
}

#[test]
fn test_send_and_return_across_tracks() {
    let mut harness = TestHarness::new(1);
    let engine = harness.engine.clone();

    let source_track = engine.create_track("source", 2).unwrap();
    let return_track = engine.create_track("fx_return", 2).unwrap();

    let return_id = engine
        .create_processor(&internal("sushi.testing.return"), "verb_return")
        .unwrap();
    engine
        .add_plugin_to_track(return_id, return_track, None)
        .unwrap();

    let send_id = engine
        .create_processor(&internal("sushi.testing.send"), "verb_send")
        .unwrap();
    engine.add_plugin_to_track(send_id, source_track, None).unwrap();

    // Point the send at the return by name
    engine
        .send_rt_event(RtEvent::StringPropertyChange {
            processor_id: send_id,
            sample_offset: 0,
            property_id: engine
                .processor_container()
                .processor_by_name("verb_send")
                .unwrap()
                .parameters
                .property_descriptor_from_name("destination_name")
                .unwrap()
                .id,
            value: Box::new("verb_return".to_string()),
        })
        .unwrap();

    engine.connect_audio_input_channel(0, 0, source_track).unwrap();
    engine.connect_audio_output_channel(0, 0, return_track).unwrap();

    harness.in_buffer.channel_mut(0).fill(0.5);
    // One chunk to prime the bus, one for the swapped buffer to surface
    harness.process_chunks(3);

    let out = harness.out_buffer.channel(0)[0];
    assert!(
        (out - 0.5).abs() < 1e-4,
        "return track should carry the sent audio, got {}",
        out
    );
}
