//! The audio engine composition root
//!
//! Owns the RT state (transport, graph, processor slots, master section)
//! behind an uncontended mutex taken once per chunk by the audio thread, and
//! the shared services (queues, registries, receivers) reachable from any
//! thread. Graph mutations while the engine is realtime travel as RtEvents
//! through the control queue and are acknowledged on the way back; with the
//! engine stopped the same handlers run directly.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use portable_atomic::AtomicF32;
use thiserror::Error;

use sushi_core::{
    EventId, ObjectId, ObjectIdSource, SampleBuffer, SpinLock, Time, AUDIO_CHUNK_SIZE,
    MAX_ENGINE_CV_IO_PORTS, MAX_ENGINE_GATE_NOTE_NO, MAX_ENGINE_GATE_PORTS, MAX_TRACK_BUSES,
    MAX_TRACK_CHANNELS,
};
use sushi_dsp::MasterLimiter;

use crate::engine::audio_graph::AudioGraph;
use crate::engine::event_timer::EventTimer;
use crate::engine::processor_container::{ProcessorContainer, ProcessorInfo};
use crate::engine::receiver::AsyncEventReceiver;
use crate::engine::track::{Track, TrackType};
use crate::engine::transport::{PlayingMode, SyncMode, TimeSignature, Transport, TransportView};
use crate::engine::worker_pool::WorkerPoolConfig;
use crate::library::connection_types::{AudioConnection, CvConnection, GateConnection};
use crate::library::event::{AudioGraphNotification, Event, EventBody};
use crate::library::performance_timer::{PerformanceTimer, ENGINE_TIMING_ID};
use crate::library::processor::{HostControl, Processor, ProcessorReturnCode};
use crate::library::processor_state::{ProcessorState, RtState};
use crate::library::rt_event::{
    EventStatus, ProcessorInstance, RtEvent, RtEventFifo, RtGarbage, TrackInstance,
};
use crate::plugins::send_return::ReturnBusRegistry;

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS & PUBLIC TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Upper bound of the realtime processor slot vector, indexed by ObjectId.
const MAX_RT_PROCESSOR_COUNT: usize = 1000;

const MAX_AUDIO_CONNECTIONS: usize = 128;
const MAX_CV_CONNECTIONS: usize = MAX_ENGINE_CV_IO_PORTS * 10;
const MAX_GATE_CONNECTIONS: usize = MAX_ENGINE_GATE_PORTS * 10;

const CONTROL_QUEUE_SIZE: usize = 256;
const MAIN_QUEUE_SIZE: usize = 1024;

const MAX_TRACKS_PER_CORE: usize = 16;

/// Round-trip budget for graph mutations while the engine is realtime.
const GRAPH_OP_TIMEOUT: Duration = Duration::from_millis(200);

/// Per-channel cooldown between clipping notifications.
const CLIPPING_DETECTION_INTERVAL: Duration = Duration::from_millis(500);

/// Failure taxonomy of all engine mutators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("operation failed")]
    Error,
    #[error("invalid number of channels")]
    InvalidNChannels,
    #[error("invalid channel index")]
    InvalidChannel,
    #[error("invalid plugin")]
    InvalidPlugin,
    #[error("invalid plugin type")]
    InvalidPluginType,
    #[error("invalid processor")]
    InvalidProcessor,
    #[error("invalid track")]
    InvalidTrack,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("queue full")]
    QueueFull,
}

/// Result alias used by every engine mutator.
pub type EngineReturnStatus<T = ()> = Result<T, EngineError>;

/// Identifies the kind of plugin to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginType {
    Internal,
    Vst2x,
    Vst3x,
    Lv2,
    Brickworks,
}

#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub uid: String,
    pub path: String,
    pub plugin_type: PluginType,
}

/// CV samples and gate bits passed alongside the audio in each direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlBuffer {
    pub cv_values: [f32; MAX_ENGINE_CV_IO_PORTS],
    pub gate_values: u32,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED SERVICES
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) struct EngineShared {
    pub(crate) container: Arc<ProcessorContainer>,
    control_queue_in: RtEventFifo,
    control_in_lock: SpinLock<()>,
    control_queue_out: Arc<RtEventFifo>,
    main_in_queue: RtEventFifo,
    main_in_lock: SpinLock<()>,
    pub(crate) main_out_queue: Arc<RtEventFifo>,
    receiver: Mutex<AsyncEventReceiver>,
    pub(crate) transport_view: Arc<TransportView>,
    pub(crate) event_timer: Arc<EventTimer>,
    pub(crate) process_timer: Arc<PerformanceTimer>,
    return_buses: Arc<ReturnBusRegistry>,
    ids: ObjectIdSource,
    realtime: AtomicBool,
    sample_rate: AtomicF32,
    input_channels: AtomicUsize,
    output_channels: AtomicUsize,
    audio_in_connections: Mutex<Vec<AudioConnection>>,
    audio_out_connections: Mutex<Vec<AudioConnection>>,
    cv_in_connections: SpinLock<Vec<CvConnection>>,
    gate_in_connections: SpinLock<Vec<GateConnection>>,
    input_clip_detection: AtomicBool,
    output_clip_detection: AtomicBool,
    master_limiter_enabled: AtomicBool,
    notification_sender: Mutex<Option<crossbeam_channel::Sender<Event>>>,
}

impl EngineShared {
    fn notify(&self, body: EventBody) {
        if let Some(sender) = &*self.notification_sender.lock() {
            let _ = sender.try_send(Event::new(body, sushi_core::monotonic_time()));
        }
    }

    /// Wire the dispatcher in as the sink for engine notifications.
    pub(crate) fn attach_notification_sender(&self, sender: crossbeam_channel::Sender<Event>) {
        *self.notification_sender.lock() = Some(sender);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLIP DETECTION
// ═══════════════════════════════════════════════════════════════════════════════

struct ClipDetector {
    interval: usize,
    input_counters: Vec<usize>,
    output_counters: Vec<usize>,
}

impl ClipDetector {
    fn new(sample_rate: f32, channels: usize) -> Self {
        let interval = (sample_rate * CLIPPING_DETECTION_INTERVAL.as_secs_f32()) as usize;
        Self {
            interval,
            input_counters: vec![interval; channels],
            output_counters: vec![interval; channels],
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.interval = (sample_rate * CLIPPING_DETECTION_INTERVAL.as_secs_f32()) as usize;
    }

    fn set_channels(&mut self, channels: usize, input: bool) {
        let counters = if input {
            &mut self.input_counters
        } else {
            &mut self.output_counters
        };
        counters.clear();
        counters.resize(channels, self.interval);
    }

    /// Emit at most one notification per channel per cooldown interval.
    fn detect_clipped_samples(&mut self, buffer: &SampleBuffer, queue: &RtEventFifo, input: bool) {
        let counters = if input {
            &mut self.input_counters
        } else {
            &mut self.output_counters
        };
        for (channel, counter) in counters.iter_mut().enumerate().take(buffer.channel_count()) {
            if buffer.count_clipped_samples(channel) > 0 && *counter >= self.interval {
                let _ = queue.push(RtEvent::ClipNotification { channel, input });
                *counter = 0;
            } else {
                *counter = counter.saturating_add(AUDIO_CHUNK_SIZE);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RT CORE
// ═══════════════════════════════════════════════════════════════════════════════

struct EngineCore {
    transport: Transport,
    graph: AudioGraph,
    pre_track: Option<Box<Track>>,
    post_track: Option<Box<Track>>,
    prepost_event_output: Arc<RtEventFifo>,
    rt_processors: Vec<Option<Box<dyn Processor>>>,
    audio_in_rt: Vec<AudioConnection>,
    audio_out_rt: Vec<AudioConnection>,
    input_swap_buffer: SampleBuffer,
    output_swap_buffer: SampleBuffer,
    master_limiters: Vec<MasterLimiter>,
    limiter_scratch: [f32; AUDIO_CHUNK_SIZE],
    clip_detector: ClipDetector,
    prev_gate_inputs: u32,
    outgoing_gate_values: u32,
    outgoing_cv_values: [f32; MAX_ENGINE_CV_IO_PORTS],
}

impl EngineCore {
    fn rt_slot(&mut self, id: ObjectId) -> Option<&mut Box<dyn Processor>> {
        self.rt_processors.get_mut(id as usize)?.as_mut()
    }

    fn insert_processor(&mut self, processor: Box<dyn Processor>) -> Result<(), Box<dyn Processor>> {
        let index = processor.id() as usize;
        match self.rt_processors.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(processor);
                Ok(())
            }
            _ => Err(processor),
        }
    }

    fn take_processor(&mut self, id: ObjectId) -> Option<Box<dyn Processor>> {
        self.rt_processors.get_mut(id as usize)?.take()
    }

    /// A track anywhere in the engine: graph, pre or post slot.
    fn any_track_mut(&mut self, track_id: ObjectId) -> Option<&mut Track> {
        if let Some(track) = &mut self.pre_track {
            if track.id() == track_id {
                return Some(track);
            }
        }
        if let Some(track) = &mut self.post_track {
            if track.id() == track_id {
                return Some(track);
            }
        }
        self.graph.track_mut(track_id)
    }

    /// Handle one engine control event and report whether it succeeded.
    /// Rejected instance-carrying events push their payload onto the main
    /// out queue as deletion envelopes.
    fn handle_control_event(&mut self, event: RtEvent, main_out: &RtEventFifo) -> Option<(EventId, bool)> {
        match event {
            RtEvent::Tempo { .. }
            | RtEvent::TimeSignature { .. }
            | RtEvent::PlayingMode { .. }
            | RtEvent::SyncMode { .. } => {
                self.transport.process_event(event);
                None
            }
            RtEvent::InsertProcessor {
                event_id,
                processor,
            } => match self.insert_processor(processor.0) {
                Ok(()) => Some((event_id, true)),
                Err(rejected) => {
                    let _ = main_out.push(RtEvent::Delete(RtGarbage::Processor(rejected)));
                    Some((event_id, false))
                }
            },
            RtEvent::RemoveProcessor {
                event_id,
                processor_id,
            } => match self.take_processor(processor_id) {
                Some(processor) => {
                    let _ = main_out.push(RtEvent::Delete(RtGarbage::Processor(processor)));
                    Some((event_id, true))
                }
                None => Some((event_id, false)),
            },
            RtEvent::AddProcessorToTrack {
                event_id,
                processor_id,
                track_id,
                before_id,
            } => {
                let Some(mut processor) = self.take_processor(processor_id) else {
                    return Some((event_id, false));
                };
                let Some(track) = self.any_track_mut(track_id) else {
                    // Put it back, the track does not exist in the rt domain
                    if let Err(orphan) = self.insert_processor(processor) {
                        let _ = main_out.push(RtEvent::Delete(RtGarbage::Processor(orphan)));
                    }
                    return Some((event_id, false));
                };
                let channels = track.input_channels();
                processor.set_input_channels(channels);
                processor.set_output_channels(channels);
                match track.add(processor, before_id) {
                    Ok(()) => Some((event_id, true)),
                    Err(rejected) => {
                        if let Err(orphan) = self.insert_processor(rejected) {
                            let _ = main_out.push(RtEvent::Delete(RtGarbage::Processor(orphan)));
                        }
                        Some((event_id, false))
                    }
                }
            }
            RtEvent::RemoveProcessorFromTrack {
                event_id,
                processor_id,
                track_id,
            } => {
                let removed = self
                    .any_track_mut(track_id)
                    .and_then(|track| track.remove(processor_id));
                match removed {
                    Some(processor) => {
                        if let Err(orphan) = self.insert_processor(processor) {
                            let _ = main_out.push(RtEvent::Delete(RtGarbage::Processor(orphan)));
                        }
                        Some((event_id, true))
                    }
                    None => Some((event_id, false)),
                }
            }
            RtEvent::AddTrack { event_id, track } => {
                let mut track = track.0;
                match track.track_type() {
                    TrackType::Pre if self.pre_track.is_none() => {
                        track.set_event_output(Some(self.prepost_event_output.clone()));
                        self.pre_track = Some(track);
                        Some((event_id, true))
                    }
                    TrackType::Post if self.post_track.is_none() => {
                        track.set_event_output(Some(self.prepost_event_output.clone()));
                        self.post_track = Some(track);
                        Some((event_id, true))
                    }
                    TrackType::Regular => match self.graph.add(track) {
                        Ok(()) => Some((event_id, true)),
                        Err(rejected) => {
                            let _ = main_out.push(RtEvent::Delete(RtGarbage::Track(rejected)));
                            Some((event_id, false))
                        }
                    },
                    _ => {
                        let _ = main_out.push(RtEvent::Delete(RtGarbage::Track(track)));
                        Some((event_id, false))
                    }
                }
            }
            RtEvent::RemoveTrack { event_id, track_id } => {
                let removed = if self.pre_track.as_ref().map(|t| t.id()) == Some(track_id) {
                    self.pre_track.take()
                } else if self.post_track.as_ref().map(|t| t.id()) == Some(track_id) {
                    self.post_track.take()
                } else {
                    self.graph.remove(track_id)
                };
                match removed {
                    Some(track) => {
                        let _ = main_out.push(RtEvent::Delete(RtGarbage::Track(track)));
                        Some((event_id, true))
                    }
                    None => Some((event_id, false)),
                }
            }
            RtEvent::AddAudioConnection {
                event_id,
                input_connection,
                connection,
            } => {
                let handled = self.add_connection_rt(connection, input_connection);
                Some((event_id, handled))
            }
            RtEvent::RemoveAudioConnection {
                event_id,
                input_connection,
                connection,
            } => {
                let storage = if input_connection {
                    &mut self.audio_in_rt
                } else {
                    &mut self.audio_out_rt
                };
                match storage.iter().position(|c| *c == connection) {
                    Some(position) => {
                        storage.swap_remove(position);
                        Some((event_id, true))
                    }
                    None => Some((event_id, false)),
                }
            }
            _ => None,
        }
    }

    fn add_connection_rt(&mut self, connection: AudioConnection, input: bool) -> bool {
        // Mono tracks with stereo-capable outputs auto-expand when their
        // second channel gets connected
        if connection.track_channel == 1 {
            if let Some(track) = self.any_track_mut(connection.track) {
                if track.input_channels() == 1 && track.max_output_channels() == 2 {
                    track.expand_to_stereo();
                }
            }
        }
        let valid = self
            .any_track_mut(connection.track)
            .map(|track| connection.track_channel < track.output_channels().max(track.input_channels()))
            .unwrap_or(false);
        let storage = if input {
            &mut self.audio_in_rt
        } else {
            &mut self.audio_out_rt
        };
        if !valid || storage.len() >= storage.capacity() || storage.contains(&connection) {
            return false;
        }
        storage.push(connection);
        true
    }

    /// Route a parameter or keyboard event to its target processor. Unknown
    /// ids are dropped silently.
    fn route_event(&mut self, event: RtEvent) {
        let Some(processor_id) = event.processor_id() else {
            return;
        };
        if let Some(processor) = self.rt_slot(processor_id) {
            processor.process_event(event);
            return;
        }
        if let Some(track) = self.any_track_mut(processor_id) {
            track.process_event(event);
            return;
        }
        if let Some(track) = &mut self.pre_track {
            if track.has_processor(processor_id) {
                track.process_event_for(processor_id, event);
                return;
            }
        }
        if let Some(track) = &mut self.post_track {
            if track.has_processor(processor_id) {
                track.process_event_for(processor_id, event);
                return;
            }
        }
        self.graph.process_event_for(processor_id, event);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct AudioEngine {
    core: Mutex<EngineCore>,
    shared: Arc<EngineShared>,
}

impl AudioEngine {
    /// Build an engine. `rt_cpu_cores` beyond the machine's core count is
    /// clamped; more than one core starts the render worker pool.
    pub fn new(sample_rate: f32, rt_cpu_cores: usize, device_name: Option<String>) -> Self {
        let cores = rt_cpu_cores.clamp(1, num_cpus::get());
        let transport_view = Arc::new(TransportView::new());
        let process_timer = PerformanceTimer::new();
        process_timer.set_timing_period(sample_rate);

        let graph = AudioGraph::new(
            cores,
            MAX_TRACKS_PER_CORE,
            WorkerPoolConfig {
                sample_rate,
                device_name,
            },
        );

        let mut rt_processors = Vec::new();
        rt_processors.resize_with(MAX_RT_PROCESSOR_COUNT, || None);

        let core = EngineCore {
            transport: Transport::new(sample_rate, transport_view.clone()),
            graph,
            pre_track: None,
            post_track: None,
            prepost_event_output: Arc::new(RtEventFifo::new(CONTROL_QUEUE_SIZE)),
            rt_processors,
            audio_in_rt: Vec::with_capacity(MAX_AUDIO_CONNECTIONS),
            audio_out_rt: Vec::with_capacity(MAX_AUDIO_CONNECTIONS),
            input_swap_buffer: SampleBuffer::new(MAX_TRACK_CHANNELS),
            output_swap_buffer: SampleBuffer::new(MAX_TRACK_CHANNELS),
            master_limiters: Vec::new(),
            limiter_scratch: [0.0; AUDIO_CHUNK_SIZE],
            clip_detector: ClipDetector::new(sample_rate, 2),
            prev_gate_inputs: 0,
            outgoing_gate_values: 0,
            outgoing_cv_values: [0.0; MAX_ENGINE_CV_IO_PORTS],
        };

        let control_queue_out = Arc::new(RtEventFifo::new(CONTROL_QUEUE_SIZE));
        let shared = Arc::new(EngineShared {
            container: Arc::new(ProcessorContainer::new()),
            control_queue_in: RtEventFifo::new(CONTROL_QUEUE_SIZE),
            control_in_lock: SpinLock::new(()),
            control_queue_out: control_queue_out.clone(),
            main_in_queue: RtEventFifo::new(MAIN_QUEUE_SIZE),
            main_in_lock: SpinLock::new(()),
            main_out_queue: Arc::new(RtEventFifo::new(MAIN_QUEUE_SIZE)),
            receiver: Mutex::new(AsyncEventReceiver::new(control_queue_out)),
            transport_view,
            event_timer: Arc::new(EventTimer::new(sample_rate)),
            process_timer,
            return_buses: Arc::new(ReturnBusRegistry::new()),
            ids: ObjectIdSource::new(),
            realtime: AtomicBool::new(false),
            sample_rate: AtomicF32::new(sample_rate),
            input_channels: AtomicUsize::new(0),
            output_channels: AtomicUsize::new(0),
            audio_in_connections: Mutex::new(Vec::new()),
            audio_out_connections: Mutex::new(Vec::new()),
            cv_in_connections: SpinLock::new(Vec::with_capacity(MAX_CV_CONNECTIONS)),
            gate_in_connections: SpinLock::new(Vec::with_capacity(MAX_GATE_CONNECTIONS)),
            input_clip_detection: AtomicBool::new(false),
            output_clip_detection: AtomicBool::new(false),
            master_limiter_enabled: AtomicBool::new(false),
            notification_sender: Mutex::new(None),
        });

        Self {
            core: Mutex::new(core),
            shared,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    fn host_control(&self) -> HostControl {
        HostControl::new(
            self.shared.transport_view.clone(),
            self.shared.return_buses.clone(),
        )
    }

    pub fn sample_rate(&self) -> f32 {
        self.shared.sample_rate.load(Ordering::Relaxed)
    }

    /// Change the sample rate. Only valid while the engine is stopped.
    pub fn set_sample_rate(&self, sample_rate: f32) {
        self.shared.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.shared.event_timer.set_sample_rate(sample_rate);
        self.shared.process_timer.set_timing_period(sample_rate);

        let mut core = self.core.lock();
        core.transport.set_sample_rate(sample_rate);
        core.clip_detector.set_sample_rate(sample_rate);
        for limiter in &mut core.master_limiters {
            limiter.init(sample_rate);
        }
        for slot in core.rt_processors.iter_mut().flatten() {
            slot.configure(sample_rate);
        }
        // Pre/post tracks, then the graph tracks and their chains
        for track in core.pre_track.iter_mut() {
            track.configure(sample_rate);
        }
        for track in core.post_track.iter_mut() {
            track.configure(sample_rate);
        }
        let track_ids: Vec<ObjectId> = self
            .shared
            .container
            .all_tracks()
            .iter()
            .map(|info| info.id)
            .collect();
        for track_id in track_ids {
            if let Some(track) = core.graph.track_mut(track_id) {
                track.configure(sample_rate);
            }
        }
    }

    pub fn set_audio_channels(&self, input_channels: usize, output_channels: usize) {
        self.shared
            .input_channels
            .store(input_channels, Ordering::Relaxed);
        self.shared
            .output_channels
            .store(output_channels, Ordering::Relaxed);
        let mut core = self.core.lock();
        let channels = input_channels.max(output_channels).max(2);
        core.input_swap_buffer = SampleBuffer::new(channels);
        core.output_swap_buffer = SampleBuffer::new(channels);
        let sample_rate = self.sample_rate();
        core.master_limiters = (0..output_channels).map(|_| {
            let mut limiter = MasterLimiter::new();
            limiter.init(sample_rate);
            limiter
        }).collect();
        core.clip_detector.set_channels(input_channels, true);
        core.clip_detector.set_channels(output_channels, false);
    }

    pub fn audio_input_channels(&self) -> usize {
        self.shared.input_channels.load(Ordering::Relaxed)
    }

    pub fn audio_output_channels(&self) -> usize {
        self.shared.output_channels.load(Ordering::Relaxed)
    }

    pub fn realtime(&self) -> bool {
        self.shared.realtime.load(Ordering::Relaxed)
    }

    /// Switch between direct mutation (stopped) and event round trips
    /// (an audio thread is calling process_chunk).
    pub fn enable_realtime(&self, enabled: bool) {
        self.shared.realtime.store(enabled, Ordering::Release);
    }

    pub fn enable_input_clip_detection(&self, enabled: bool) {
        self.shared.input_clip_detection.store(enabled, Ordering::Relaxed);
    }

    pub fn enable_output_clip_detection(&self, enabled: bool) {
        self.shared.output_clip_detection.store(enabled, Ordering::Relaxed);
    }

    pub fn enable_master_limiter(&self, enabled: bool) {
        self.shared.master_limiter_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn processor_container(&self) -> &Arc<ProcessorContainer> {
        &self.shared.container
    }

    pub fn performance_timer(&self) -> &Arc<PerformanceTimer> {
        &self.shared.process_timer
    }

    pub fn event_timer(&self) -> &Arc<EventTimer> {
        &self.shared.event_timer
    }

    /// Lock-free transport snapshot, updated once per chunk.
    pub fn transport_view(&self) -> &Arc<TransportView> {
        &self.shared.transport_view
    }

    /// Enable or disable per-processor timing measurements.
    pub fn enable_timings(&self, enabled: bool) {
        self.shared.process_timer.enable(enabled);
    }

    /// Timings of the engine's own process_chunk, as fractions of the chunk
    /// budget.
    pub fn engine_timings(&self) -> Option<crate::library::performance_timer::ProcessTimings> {
        self.shared.process_timer.timings_for(ENGINE_TIMING_ID)
    }

    /// Dump all accumulated timing records to a file, typically on shutdown.
    pub fn print_timings_to_file(&self, path: &str) -> std::io::Result<()> {
        self.shared.process_timer.save_all_to_file(path)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // THE AUDIO CALLBACK
    // ───────────────────────────────────────────────────────────────────────────

    /// Process one chunk. Called by the audio frontend with planar buffers
    /// of `AUDIO_CHUNK_SIZE` samples per channel.
    pub fn process_chunk(
        &self,
        in_buffer: &SampleBuffer,
        out_buffer: &mut SampleBuffer,
        in_controls: &ControlBuffer,
        out_controls: &mut ControlBuffer,
        timestamp: Time,
        sample_count: i64,
    ) {
        // Signal that this is a realtime audio processing thread
        let _rt_flag = sushi_core::ThreadRtFlag::new();

        let mut core = self.core.lock();
        let core = &mut *core;
        let shared = &self.shared;

        let engine_timestamp = shared.process_timer.start_timer();
        shared.event_timer.set_incoming_time(timestamp);

        core.transport.set_time(timestamp, sample_count);

        // Control events first, so a graph mutation applied this chunk is
        // visible to parameter and keyboard events in the same chunk
        while let Some(event) = shared.control_queue_in.pop() {
            if let Some((event_id, handled)) =
                core.handle_control_event(event, &shared.main_out_queue)
            {
                let status = if handled {
                    EventStatus::HandledOk
                } else {
                    EventStatus::NotHandled
                };
                let _ = shared.control_queue_out.push(RtEvent::Ack { event_id, status });
            }
        }

        while let Some(event) = shared.main_in_queue.pop() {
            core.route_event(event);
        }

        self.route_cv_gate_ins(core, in_controls);

        if shared.input_clip_detection.load(Ordering::Relaxed) {
            core.clip_detector
                .detect_clipped_samples(in_buffer, &shared.main_out_queue, true);
        }

        // Input side: optional pre track, then the connection map. The box
        // and swap buffer are moved out and back so the borrows stay
        // disjoint; both moves are pointer swaps
        if let Some(mut pre) = core.pre_track.take() {
            let mut swap = std::mem::replace(&mut core.input_swap_buffer, SampleBuffer::new(0));
            pre.process_audio(in_buffer, &mut swap);
            Self::copy_audio_to_tracks(core, &swap);
            core.input_swap_buffer = swap;
            core.pre_track = Some(pre);
        } else {
            Self::copy_audio_to_tracks(core, in_buffer);
        }

        core.graph.render();

        self.retrieve_events_from_tracks(core, out_controls);
        let _ = shared.main_out_queue.push(RtEvent::Synchronisation {
            time: core.transport.current_process_time(),
        });

        // Output side: sum tracks, optional post track
        if let Some(mut post) = core.post_track.take() {
            let mut swap = std::mem::replace(&mut core.output_swap_buffer, SampleBuffer::new(0));
            swap.clear();
            Self::copy_audio_from_tracks(core, &mut swap);
            post.process_audio(&swap, out_buffer);
            core.output_swap_buffer = swap;
            core.post_track = Some(post);
        } else {
            out_buffer.clear();
            Self::copy_audio_from_tracks(core, out_buffer);
        }

        if shared.master_limiter_enabled.load(Ordering::Relaxed) {
            for channel in 0..out_buffer.channel_count().min(core.master_limiters.len()) {
                core.limiter_scratch.copy_from_slice(out_buffer.channel(channel));
                core.master_limiters[channel]
                    .process(&core.limiter_scratch, out_buffer.channel_mut(channel));
            }
        }

        if shared.output_clip_detection.load(Ordering::Relaxed) {
            core.clip_detector
                .detect_clipped_samples(out_buffer, &shared.main_out_queue, false);
        }

        shared.event_timer.set_outgoing_time(timestamp);
        shared.process_timer.stop_timer(engine_timestamp, ENGINE_TIMING_ID);
    }

    fn copy_audio_to_tracks(core: &mut EngineCore, input: &SampleBuffer) {
        for i in 0..core.audio_in_rt.len() {
            let connection = core.audio_in_rt[i];
            if connection.engine_channel >= input.channel_count() {
                continue;
            }
            if let Some(track) = core.any_track_mut(connection.track) {
                track
                    .input_channel_mut(connection.track_channel)
                    .copy_from_slice(input.channel(connection.engine_channel));
            }
        }
    }

    fn copy_audio_from_tracks(core: &mut EngineCore, output: &mut SampleBuffer) {
        for i in 0..core.audio_out_rt.len() {
            let connection = core.audio_out_rt[i];
            if connection.engine_channel >= output.channel_count() {
                continue;
            }
            if let Some(track) = core.any_track_mut(connection.track) {
                let source = track.output_channel(connection.track_channel);
                for (out, inp) in output
                    .channel_mut(connection.engine_channel)
                    .iter_mut()
                    .zip(source)
                {
                    *out += *inp;
                }
            }
        }
    }

    fn route_cv_gate_ins(&self, core: &mut EngineCore, in_controls: &ControlBuffer) {
        {
            let connections = self.shared.cv_in_connections.lock();
            for connection in connections.iter() {
                let value = in_controls.cv_values[connection.cv_id];
                let event = RtEvent::parameter_change(
                    connection.processor_id,
                    0,
                    connection.parameter_id,
                    value,
                );
                core.route_event(event);
            }
        }

        let changed_gates = in_controls.gate_values ^ core.prev_gate_inputs;
        if changed_gates != 0 {
            let connections = self.shared.gate_in_connections.lock();
            for connection in connections.iter() {
                let bit = 1u32 << connection.gate_id;
                if changed_gates & bit != 0 {
                    let event = if in_controls.gate_values & bit != 0 {
                        RtEvent::note_on(connection.processor_id, 0, connection.channel, connection.note_no, 1.0)
                    } else {
                        RtEvent::note_off(connection.processor_id, 0, connection.channel, connection.note_no, 1.0)
                    };
                    core.route_event(event);
                }
            }
        }
        core.prev_gate_inputs = in_controls.gate_values;
    }

    fn retrieve_events_from_tracks(&self, core: &mut EngineCore, out_controls: &mut ControlBuffer) {
        let EngineCore {
            graph,
            prepost_event_output,
            outgoing_cv_values,
            outgoing_gate_values,
            ..
        } = core;
        for output in graph
            .event_outputs()
            .iter()
            .map(|sink| sink.as_ref())
            .chain(std::iter::once(prepost_event_output.as_ref()))
        {
            while let Some(event) = output.pop() {
                match event {
                    RtEvent::CvEvent { cv_id, value, .. } => {
                        if cv_id < MAX_ENGINE_CV_IO_PORTS {
                            outgoing_cv_values[cv_id] = value;
                        }
                    }
                    RtEvent::GateEvent { gate_no, value, .. } => {
                        if gate_no < MAX_ENGINE_GATE_PORTS {
                            let bit = 1u32 << gate_no;
                            if value {
                                *outgoing_gate_values |= bit;
                            } else {
                                *outgoing_gate_values &= !bit;
                            }
                        }
                    }
                    other => {
                        let _ = self.shared.main_out_queue.push(other);
                    }
                }
            }
        }
        out_controls.cv_values = *outgoing_cv_values;
        out_controls.gate_values = *outgoing_gate_values;
    }

    // ───────────────────────────────────────────────────────────────────────────
    // EVENT PLUMBING
    // ───────────────────────────────────────────────────────────────────────────

    /// Queue a processor-targeted event for the next chunk.
    pub fn send_rt_event(&self, event: RtEvent) -> EngineReturnStatus {
        let _guard = self.shared.main_in_lock.lock();
        self.shared
            .main_in_queue
            .push(event)
            .map_err(|_| EngineError::QueueFull)
    }

    fn send_control_event(&self, event: RtEvent) -> EngineReturnStatus {
        debug_assert!(event.is_engine_control_event());
        let _guard = self.shared.control_in_lock.lock();
        self.shared
            .control_queue_in
            .push(event)
            .map_err(|_| EngineError::QueueFull)
    }

    /// Send a graph mutation and wait for the RT side to acknowledge it.
    fn roundtrip(&self, event_id: EventId, event: RtEvent) -> EngineReturnStatus {
        self.send_control_event(event)?;
        let handled = self
            .shared
            .receiver
            .lock()
            .wait_for_response(event_id, GRAPH_OP_TIMEOUT);
        if handled {
            Ok(())
        } else {
            log::error!("Realtime operation {} failed or timed out", event_id);
            Err(EngineError::Error)
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // TRANSPORT CONTROL
    // ───────────────────────────────────────────────────────────────────────────

    pub fn set_tempo(&self, tempo: f32) {
        let realtime = self.realtime();
        self.core.lock().transport.set_tempo(tempo, realtime);
        if realtime {
            let _ = self.send_control_event(RtEvent::Tempo { tempo });
        }
    }

    pub fn set_time_signature(&self, signature: TimeSignature) {
        let realtime = self.realtime();
        self.core
            .lock()
            .transport
            .set_time_signature(signature, realtime);
        if realtime {
            let _ = self.send_control_event(RtEvent::TimeSignature { signature });
        }
    }

    pub fn set_transport_mode(&self, mode: PlayingMode) {
        let realtime = self.realtime();
        self.core.lock().transport.set_playing_mode(mode, realtime);
        if realtime {
            let _ = self.send_control_event(RtEvent::PlayingMode { mode });
        }
    }

    pub fn set_tempo_sync_mode(&self, mode: SyncMode) {
        let realtime = self.realtime();
        self.core.lock().transport.set_sync_mode(mode, realtime);
        if realtime {
            let _ = self.send_control_event(RtEvent::SyncMode { mode });
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // TRACK MANAGEMENT
    // ───────────────────────────────────────────────────────────────────────────

    pub fn create_track(&self, name: &str, channel_count: usize) -> EngineReturnStatus<ObjectId> {
        if channel_count > MAX_TRACK_CHANNELS {
            return Err(EngineError::InvalidNChannels);
        }
        let mut track = Box::new(Track::new(
            self.host_control(),
            &self.shared.ids,
            self.shared.process_timer.clone(),
            channel_count,
            true,
            TrackType::Regular,
        ));
        track.init(self.sample_rate());
        self.register_and_deploy_track(track, name)
    }

    pub fn create_multibus_track(&self, name: &str, bus_count: usize) -> EngineReturnStatus<ObjectId> {
        if bus_count == 0 || bus_count > MAX_TRACK_BUSES {
            return Err(EngineError::InvalidNChannels);
        }
        let mut track = Box::new(Track::new_multibus(
            self.host_control(),
            &self.shared.ids,
            self.shared.process_timer.clone(),
            bus_count,
        ));
        track.init(self.sample_rate());
        self.register_and_deploy_track(track, name)
    }

    pub fn create_pre_track(&self, name: &str) -> EngineReturnStatus<ObjectId> {
        self.create_master_track(name, TrackType::Pre)
    }

    pub fn create_post_track(&self, name: &str) -> EngineReturnStatus<ObjectId> {
        self.create_master_track(name, TrackType::Post)
    }

    fn create_master_track(&self, name: &str, track_type: TrackType) -> EngineReturnStatus<ObjectId> {
        // At most one pre and one post track
        let exists = self
            .shared
            .container
            .all_tracks()
            .iter()
            .any(|info| info.track_type == Some(track_type));
        if exists {
            return Err(EngineError::Error);
        }
        let channels = self
            .audio_input_channels()
            .max(self.audio_output_channels())
            .max(2);
        let mut track = Box::new(Track::new(
            self.host_control(),
            &self.shared.ids,
            self.shared.process_timer.clone(),
            channels,
            false,
            track_type,
        ));
        track.init(self.sample_rate());
        self.register_and_deploy_track(track, name)
    }

    fn register_and_deploy_track(&self, mut track: Box<Track>, name: &str) -> EngineReturnStatus<ObjectId> {
        track.set_name(name);
        let track_id = track.id();
        let info = Arc::new(ProcessorInfo {
            id: track_id,
            name: name.to_string(),
            label: track.label().to_string(),
            track_type: Some(track.track_type()),
            channels: track.input_channels(),
            parameters: track.parameter_store().clone(),
        });
        if !self.shared.container.add_track(info) {
            return Err(EngineError::Error);
        }

        let result = if self.realtime() {
            let event_id = sushi_core::next_event_id();
            self.roundtrip(
                event_id,
                RtEvent::AddTrack {
                    event_id,
                    track: TrackInstance(track),
                },
            )
        } else {
            let mut core = self.core.lock();
            let status = core.handle_control_event(
                RtEvent::AddTrack {
                    event_id: 0,
                    track: TrackInstance(track),
                },
                &self.shared.main_out_queue,
            );
            match status {
                Some((_, true)) => Ok(()),
                _ => Err(EngineError::Error),
            }
        };

        match result {
            Ok(()) => {
                log::info!("Track {} ({}) added to the engine", name, track_id);
                self.shared
                    .notify(EventBody::AudioGraphNotification(AudioGraphNotification::TrackCreated {
                        track_id,
                    }));
                Ok(track_id)
            }
            Err(e) => {
                self.shared.container.remove_track(track_id);
                Err(e)
            }
        }
    }

    pub fn delete_track(&self, track_id: ObjectId) -> EngineReturnStatus {
        let Some(_info) = self.shared.container.track(track_id) else {
            return Err(EngineError::InvalidTrack);
        };
        if !self
            .shared
            .container
            .processors_on_track(track_id)
            .is_empty()
        {
            log::error!("Cannot delete track {} with processors on it", track_id);
            return Err(EngineError::Error);
        }
        self.remove_connections_for_track(track_id);

        let result = if self.realtime() {
            let event_id = sushi_core::next_event_id();
            self.roundtrip(event_id, RtEvent::RemoveTrack { event_id, track_id })
        } else {
            let mut core = self.core.lock();
            let status = core.handle_control_event(
                RtEvent::RemoveTrack {
                    event_id: 0,
                    track_id,
                },
                &self.shared.main_out_queue,
            );
            match status {
                Some((_, true)) => Ok(()),
                _ => Err(EngineError::InvalidTrack),
            }
        };

        result.map(|()| {
            self.shared.container.remove_track(track_id);
            self.shared
                .notify(EventBody::AudioGraphNotification(AudioGraphNotification::TrackDeleted {
                    track_id,
                }));
        })
    }

    fn remove_connections_for_track(&self, track_id: ObjectId) {
        let inputs: Vec<AudioConnection> = self
            .shared
            .audio_in_connections
            .lock()
            .iter()
            .filter(|c| c.track == track_id)
            .copied()
            .collect();
        for connection in inputs {
            let _ = self.disconnect_audio_channel(connection, true);
        }
        let outputs: Vec<AudioConnection> = self
            .shared
            .audio_out_connections
            .lock()
            .iter()
            .filter(|c| c.track == track_id)
            .copied()
            .collect();
        for connection in outputs {
            let _ = self.disconnect_audio_channel(connection, false);
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // PLUGIN MANAGEMENT
    // ───────────────────────────────────────────────────────────────────────────

    pub fn create_processor(&self, info: &PluginInfo, name: &str) -> EngineReturnStatus<ObjectId> {
        let mut processor = match info.plugin_type {
            PluginType::Internal | PluginType::Brickworks => {
                crate::plugins::create_internal_plugin(&info.uid, self.host_control(), &self.shared.ids)
                    .ok_or(EngineError::InvalidPlugin)?
            }
            _ => {
                log::error!("Plugin type of {} is not supported", info.uid);
                return Err(EngineError::InvalidPluginType);
            }
        };

        if processor.init(self.sample_rate()) != ProcessorReturnCode::Ok {
            log::error!("Failed to initialize plugin {}", info.uid);
            return Err(EngineError::InvalidPlugin);
        }
        processor.set_name(name);
        processor.set_enabled(true);

        let processor_id = processor.id();
        let registry_info = Arc::new(ProcessorInfo {
            id: processor_id,
            name: name.to_string(),
            label: processor.label().to_string(),
            track_type: None,
            channels: processor.max_input_channels(),
            parameters: processor.parameter_store().clone(),
        });
        if !self.shared.container.add_processor(registry_info) {
            return Err(EngineError::Error);
        }

        let result = if self.realtime() {
            let event_id = sushi_core::next_event_id();
            self.roundtrip(
                event_id,
                RtEvent::InsertProcessor {
                    event_id,
                    processor: ProcessorInstance(processor),
                },
            )
        } else {
            let mut core = self.core.lock();
            match core.insert_processor(processor) {
                Ok(()) => Ok(()),
                Err(rejected) => {
                    drop(rejected);
                    Err(EngineError::Error)
                }
            }
        };

        match result {
            Ok(()) => {
                self.shared.notify(EventBody::AudioGraphNotification(
                    AudioGraphNotification::ProcessorCreated { processor_id },
                ));
                Ok(processor_id)
            }
            Err(e) => {
                self.shared.container.remove_processor(processor_id);
                Err(e)
            }
        }
    }

    pub fn add_plugin_to_track(
        &self,
        plugin_id: ObjectId,
        track_id: ObjectId,
        before_plugin: Option<ObjectId>,
    ) -> EngineReturnStatus {
        let Some(plugin_info) = self.shared.container.processor(plugin_id) else {
            return Err(EngineError::InvalidPlugin);
        };
        if plugin_info.is_track() || self.shared.container.track_of(plugin_id).is_some() {
            return Err(EngineError::InvalidPlugin);
        }
        if self.shared.container.track(track_id).is_none() {
            return Err(EngineError::InvalidTrack);
        }

        let event = |event_id| RtEvent::AddProcessorToTrack {
            event_id,
            processor_id: plugin_id,
            track_id,
            before_id: before_plugin,
        };
        self.run_graph_op(event, EngineError::Error)?;

        self.shared
            .container
            .add_to_track(plugin_info, track_id, before_plugin);
        self.shared.notify(EventBody::AudioGraphNotification(
            AudioGraphNotification::ProcessorAddedToTrack {
                processor_id: plugin_id,
                track_id,
            },
        ));
        Ok(())
    }

    pub fn remove_plugin_from_track(
        &self,
        plugin_id: ObjectId,
        track_id: ObjectId,
    ) -> EngineReturnStatus {
        if self.shared.container.track_of(plugin_id) != Some(track_id) {
            return Err(EngineError::InvalidPlugin);
        }

        let event = |event_id| RtEvent::RemoveProcessorFromTrack {
            event_id,
            processor_id: plugin_id,
            track_id,
        };
        self.run_graph_op(event, EngineError::Error)?;

        self.shared.container.remove_from_track(plugin_id, track_id);
        self.shared.notify(EventBody::AudioGraphNotification(
            AudioGraphNotification::ProcessorRemovedFromTrack {
                processor_id: plugin_id,
                track_id,
            },
        ));
        Ok(())
    }

    pub fn delete_plugin(&self, plugin_id: ObjectId) -> EngineReturnStatus {
        let Some(info) = self.shared.container.processor(plugin_id) else {
            return Err(EngineError::InvalidPlugin);
        };
        if info.is_track() {
            return Err(EngineError::InvalidPlugin);
        }
        if self.shared.container.track_of(plugin_id).is_some() {
            log::error!("Plugin {} is still on a track", plugin_id);
            return Err(EngineError::Error);
        }

        let event = |event_id| RtEvent::RemoveProcessor {
            event_id,
            processor_id: plugin_id,
        };
        self.run_graph_op(event, EngineError::InvalidPlugin)?;

        self.shared.container.remove_processor(plugin_id);
        self.shared.notify(EventBody::AudioGraphNotification(
            AudioGraphNotification::ProcessorDeleted {
                processor_id: plugin_id,
            },
        ));
        Ok(())
    }

    /// Run one graph mutation either through the control queue round trip or
    /// directly on the core, depending on the realtime state.
    fn run_graph_op(
        &self,
        make_event: impl Fn(EventId) -> RtEvent,
        failure: EngineError,
    ) -> EngineReturnStatus {
        if self.realtime() {
            let event_id = sushi_core::next_event_id();
            self.roundtrip(event_id, make_event(event_id))
        } else {
            let mut core = self.core.lock();
            let status = core.handle_control_event(make_event(0), &self.shared.main_out_queue);
            match status {
                Some((_, true)) => Ok(()),
                _ => Err(failure),
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // CONNECTIONS
    // ───────────────────────────────────────────────────────────────────────────

    pub fn connect_audio_input_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
    ) -> EngineReturnStatus {
        self.connect_audio_channel(engine_channel, track_channel, track_id, true)
    }

    pub fn connect_audio_output_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
    ) -> EngineReturnStatus {
        self.connect_audio_channel(engine_channel, track_channel, track_id, false)
    }

    pub fn connect_audio_input_bus(
        &self,
        input_bus: usize,
        track_bus: usize,
        track_id: ObjectId,
    ) -> EngineReturnStatus {
        self.connect_audio_channel(input_bus * 2, track_bus * 2, track_id, true)?;
        self.connect_audio_channel(input_bus * 2 + 1, track_bus * 2 + 1, track_id, true)
    }

    pub fn connect_audio_output_bus(
        &self,
        output_bus: usize,
        track_bus: usize,
        track_id: ObjectId,
    ) -> EngineReturnStatus {
        self.connect_audio_channel(output_bus * 2, track_bus * 2, track_id, false)?;
        self.connect_audio_channel(output_bus * 2 + 1, track_bus * 2 + 1, track_id, false)
    }

    fn connect_audio_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
        input: bool,
    ) -> EngineReturnStatus {
        let engine_channels = if input {
            self.audio_input_channels()
        } else {
            self.audio_output_channels()
        };
        if engine_channel >= engine_channels {
            return Err(EngineError::InvalidChannel);
        }
        let Some(info) = self.shared.container.track(track_id) else {
            return Err(EngineError::InvalidTrack);
        };
        // A mono track with a stereo-capable output may have its second
        // channel connected, which auto-expands it on the rt side
        if track_channel >= info.channels.max(2) {
            return Err(EngineError::InvalidChannel);
        }

        let connection = AudioConnection {
            engine_channel,
            track_channel,
            track: track_id,
        };
        {
            let connections = if input {
                self.shared.audio_in_connections.lock()
            } else {
                self.shared.audio_out_connections.lock()
            };
            if connections.contains(&connection) {
                return Err(EngineError::Error);
            }
        }

        let event = |event_id| RtEvent::AddAudioConnection {
            event_id,
            input_connection: input,
            connection,
        };
        self.run_graph_op(event, EngineError::InvalidChannel)?;

        if input {
            self.shared.audio_in_connections.lock().push(connection);
        } else {
            self.shared.audio_out_connections.lock().push(connection);
        }
        log::info!(
            "Connected engine {} channel {} to channel {} of track {}",
            if input { "input" } else { "output" },
            engine_channel,
            track_channel,
            track_id
        );
        Ok(())
    }

    fn disconnect_audio_channel(
        &self,
        connection: AudioConnection,
        input: bool,
    ) -> EngineReturnStatus {
        let event = |event_id| RtEvent::RemoveAudioConnection {
            event_id,
            input_connection: input,
            connection,
        };
        self.run_graph_op(event, EngineError::InvalidChannel)?;

        let mut connections = if input {
            self.shared.audio_in_connections.lock()
        } else {
            self.shared.audio_out_connections.lock()
        };
        connections.retain(|c| *c != connection);
        Ok(())
    }

    pub fn disconnect_audio_input_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
    ) -> EngineReturnStatus {
        self.disconnect_audio_channel(
            AudioConnection {
                engine_channel,
                track_channel,
                track: track_id,
            },
            true,
        )
    }

    pub fn disconnect_audio_output_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
    ) -> EngineReturnStatus {
        self.disconnect_audio_channel(
            AudioConnection {
                engine_channel,
                track_channel,
                track: track_id,
            },
            false,
        )
    }

    pub fn audio_input_connections(&self) -> Vec<AudioConnection> {
        self.shared.audio_in_connections.lock().clone()
    }

    pub fn audio_output_connections(&self) -> Vec<AudioConnection> {
        self.shared.audio_out_connections.lock().clone()
    }

    pub fn connect_cv_to_parameter(
        &self,
        processor_name: &str,
        parameter_name: &str,
        cv_id: usize,
    ) -> EngineReturnStatus {
        if cv_id >= MAX_ENGINE_CV_IO_PORTS {
            return Err(EngineError::InvalidChannel);
        }
        let Some(info) = self.shared.container.processor_by_name(processor_name) else {
            return Err(EngineError::InvalidProcessor);
        };
        let Some(descriptor) = info.parameters.descriptor_from_name(parameter_name) else {
            return Err(EngineError::InvalidParameter);
        };
        let connection = CvConnection {
            processor_id: info.id,
            parameter_id: descriptor.id,
            cv_id,
        };
        let mut connections = self.shared.cv_in_connections.lock();
        if connections.len() >= MAX_CV_CONNECTIONS {
            return Err(EngineError::Error);
        }
        connections.push(connection);
        Ok(())
    }

    pub fn connect_gate_to_processor(
        &self,
        processor_name: &str,
        gate_id: usize,
        note_no: i32,
        channel: i32,
    ) -> EngineReturnStatus {
        if gate_id >= MAX_ENGINE_GATE_PORTS || note_no > MAX_ENGINE_GATE_NOTE_NO {
            return Err(EngineError::InvalidChannel);
        }
        let Some(info) = self.shared.container.processor_by_name(processor_name) else {
            return Err(EngineError::InvalidProcessor);
        };
        let connection = GateConnection {
            processor_id: info.id,
            gate_id,
            note_no,
            channel,
        };
        let mut connections = self.shared.gate_in_connections.lock();
        if connections.len() >= MAX_GATE_CONNECTIONS {
            return Err(EngineError::Error);
        }
        connections.push(connection);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    // STATE
    // ───────────────────────────────────────────────────────────────────────────

    /// Snapshot the state of a processor from its shared store.
    pub fn processor_state(&self, processor_id: ObjectId) -> EngineReturnStatus<ProcessorState> {
        let Some(info) = self.shared.container.processor(processor_id) else {
            return Err(EngineError::InvalidProcessor);
        };
        let store = &info.parameters;
        Ok(ProcessorState {
            program: None,
            bypassed: Some(store.bypassed()),
            parameters: store
                .descriptors()
                .iter()
                .map(|d| {
                    let index = store.index_of(d.id).expect("descriptor is in store");
                    (d.id, store.normalized_value(index))
                })
                .collect(),
            properties: store
                .property_descriptors()
                .iter()
                .map(|d| (d.id, store.property_value(d.id).unwrap_or_default()))
                .collect(),
            binary_data: None,
        })
    }

    /// Apply a state snapshot. The RT-applicable part travels as a SetState
    /// event when the engine is realtime; properties apply directly through
    /// the shared store either way.
    pub fn set_processor_state(
        &self,
        processor_id: ObjectId,
        state: &ProcessorState,
    ) -> EngineReturnStatus {
        let Some(info) = self.shared.container.processor(processor_id) else {
            return Err(EngineError::InvalidProcessor);
        };
        for (property_id, value) in &state.properties {
            info.parameters.swap_property_value(*property_id, value.clone());
        }

        let rt_state = Box::new(RtState::from(state));
        if self.realtime() {
            self.send_rt_event(RtEvent::SetState {
                processor_id,
                state: rt_state,
            })
        } else {
            let mut core = self.core.lock();
            core.route_event(RtEvent::SetState {
                processor_id,
                state: rt_state,
            });
            Ok(())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48000.0;

    fn make_engine() -> AudioEngine {
        let engine = AudioEngine::new(SAMPLE_RATE, 1, None);
        engine.set_audio_channels(2, 2);
        engine
    }

    fn internal_plugin(uid: &str) -> PluginInfo {
        PluginInfo {
            uid: uid.to_string(),
            path: String::new(),
            plugin_type: PluginType::Internal,
        }
    }

    #[test]
    fn test_create_and_delete_track() {
        let engine = make_engine();
        let track_id = engine.create_track("main", 2).unwrap();
        assert_eq!(engine.processor_container().all_tracks().len(), 1);

        // Duplicate names are rejected
        assert!(engine.create_track("main", 2).is_err());

        engine.delete_track(track_id).unwrap();
        assert!(engine.processor_container().all_tracks().is_empty());
        assert_eq!(engine.delete_track(track_id), Err(EngineError::InvalidTrack));
    }

    #[test]
    fn test_at_most_one_pre_and_post_track() {
        let engine = make_engine();
        engine.create_pre_track("pre").unwrap();
        assert!(engine.create_pre_track("pre_2").is_err());
        engine.create_post_track("post").unwrap();
        assert!(engine.create_post_track("post_2").is_err());
    }

    #[test]
    fn test_plugin_lifecycle() {
        let engine = make_engine();
        let track_id = engine.create_track("main", 2).unwrap();
        let plugin_id = engine
            .create_processor(&internal_plugin("sushi.testing.gain"), "gain_0")
            .unwrap();

        engine.add_plugin_to_track(plugin_id, track_id, None).unwrap();
        assert_eq!(
            engine.processor_container().track_of(plugin_id),
            Some(track_id)
        );

        // Track with plugins on it cannot be deleted
        assert!(engine.delete_track(track_id).is_err());
        // Plugin on a track cannot be deleted
        assert!(engine.delete_plugin(plugin_id).is_err());

        engine.remove_plugin_from_track(plugin_id, track_id).unwrap();
        engine.delete_plugin(plugin_id).unwrap();
        engine.delete_track(track_id).unwrap();
    }

    #[test]
    fn test_unknown_plugin_types_rejected() {
        let engine = make_engine();
        let mut info = internal_plugin("sushi.testing.gain");
        info.plugin_type = PluginType::Vst3x;
        assert_eq!(
            engine.create_processor(&info, "p"),
            Err(EngineError::InvalidPluginType)
        );

        let info = internal_plugin("sushi.testing.not_a_plugin");
        assert_eq!(
            engine.create_processor(&info, "p"),
            Err(EngineError::InvalidPlugin)
        );
    }

    #[test]
    fn test_connection_validation() {
        let engine = make_engine();
        let track_id = engine.create_track("main", 2).unwrap();

        assert_eq!(
            engine.connect_audio_input_channel(5, 0, track_id),
            Err(EngineError::InvalidChannel)
        );
        assert_eq!(
            engine.connect_audio_input_channel(0, 7, track_id),
            Err(EngineError::InvalidChannel)
        );
        assert_eq!(
            engine.connect_audio_input_channel(0, 0, 9999),
            Err(EngineError::InvalidTrack)
        );

        engine.connect_audio_input_channel(0, 0, track_id).unwrap();
        // Duplicates rejected
        assert!(engine.connect_audio_input_channel(0, 0, track_id).is_err());
        assert_eq!(engine.audio_input_connections().len(), 1);
    }

    #[test]
    fn test_cv_and_gate_connection_validation() {
        let engine = make_engine();
        engine.create_track("synth_track", 2).unwrap();
        engine
            .create_processor(
                &PluginInfo {
                    uid: "sushi.brickworks.simple_synth".to_string(),
                    path: String::new(),
                    plugin_type: PluginType::Brickworks,
                },
                "synth",
            )
            .unwrap();

        assert_eq!(
            engine.connect_cv_to_parameter("synth", "attack", 99),
            Err(EngineError::InvalidChannel)
        );
        assert_eq!(
            engine.connect_cv_to_parameter("missing", "attack", 0),
            Err(EngineError::InvalidProcessor)
        );
        assert_eq!(
            engine.connect_cv_to_parameter("synth", "missing", 0),
            Err(EngineError::InvalidParameter)
        );
        engine.connect_cv_to_parameter("synth", "attack", 0).unwrap();

        assert_eq!(
            engine.connect_gate_to_processor("synth", 99, 60, 0),
            Err(EngineError::InvalidChannel)
        );
        engine.connect_gate_to_processor("synth", 0, 60, 0).unwrap();
    }
}
