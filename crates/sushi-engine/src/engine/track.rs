//! Tracks: ordered processor chains with bus-level gain, pan and mute
//!
//! A track is itself a processor. Audio runs through the chain with
//! ping-pong buffering (two owned scratch buffers swapped between stages),
//! keyboard events bubble from processor to processor through an internal
//! FIFO, and the chunk ends with one of three pan/gain modes applied through
//! per-channel smoothers.

use std::sync::Arc;

use smallvec::SmallVec;

use sushi_core::{
    ObjectId, ObjectIdSource, Sample, SampleBuffer, MAX_TRACK_BUSES, TRACK_MAX_PROCESSORS,
};
use sushi_dsp::{ValueSmoother, GAIN_SMOOTHING_TIME};

use crate::library::parameters::{Direction, ParameterIndex, ParameterStore, PreProcessor};
use crate::library::performance_timer::PerformanceTimer;
use crate::library::processor::{
    HostControl, Processor, ProcessorData, ProcessorReturnCode, ProcessorType,
};
use crate::library::rt_event::{RtEvent, RtEventFifo};

/// 3 dB constant-power pan law constant, 10^(1.5/20).
pub const PAN_GAIN_3_DB: f32 = 1.412537;

const DEFAULT_TRACK_GAIN: f32 = 1.0;
const KEYBOARD_EVENT_QUEUE_SIZE: usize = 256;
const LEFT: usize = 0;
const RIGHT: usize = 1;

/// Map pan and gain to left/right gains with a 3 dB pan law.
pub fn calc_l_r_gain(gain: f32, pan: f32) -> (f32, f32) {
    if pan < 0.0 {
        // Audio panned left
        (gain * (1.0 + pan - PAN_GAIN_3_DB * pan), gain * (1.0 + pan))
    } else {
        // Audio panned right
        (gain * (1.0 - pan), gain * (1.0 - pan + PAN_GAIN_3_DB * pan))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    Regular,
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PanMode {
    GainOnly,
    PanAndGain,
    PanAndGainPerBus,
}

type Smoothers = SmallVec<[[ValueSmoother; 2]; MAX_TRACK_BUSES]>;

/// An ordered chain of processors with per-bus gain and pan.
pub struct Track {
    data: ProcessorData,
    track_type: TrackType,
    buses: usize,
    pan_mode: PanMode,
    processors: Vec<Box<dyn Processor>>,
    input_buffer: SampleBuffer,
    output_buffer: SampleBuffer,
    scratch_in: SampleBuffer,
    scratch_out: SampleBuffer,
    kb_event_buffer: RtEventFifo,
    /// Handed to every chained processor as its event output
    plugin_event_sink: Arc<RtEventFifo>,
    gain_indices: SmallVec<[ParameterIndex; MAX_TRACK_BUSES]>,
    pan_indices: SmallVec<[ParameterIndex; MAX_TRACK_BUSES]>,
    mute_index: ParameterIndex,
    smoothers: Smoothers,
    timer: Arc<PerformanceTimer>,
}

impl Track {
    /// Create a mono/stereo/multichannel track. Pan controls are registered
    /// for tracks of up to two channels.
    pub fn new(
        host: HostControl,
        ids: &ObjectIdSource,
        timer: Arc<PerformanceTimer>,
        channels: usize,
        pan_controls: bool,
        track_type: TrackType,
    ) -> Self {
        let pan_mode = if pan_controls && channels <= 2 {
            PanMode::PanAndGain
        } else {
            PanMode::GainOnly
        };
        let mut track = Self::build(host, ids, timer, channels.max(2), 1, pan_mode, track_type);
        track.data.max_input_channels = channels;
        track.data.max_output_channels = channels.max(2);
        track.data.current_input_channels = channels;
        track.data.current_output_channels = channels;
        track
    }

    /// Create a multibus track with `buses` stereo bus pairs.
    pub fn new_multibus(
        host: HostControl,
        ids: &ObjectIdSource,
        timer: Arc<PerformanceTimer>,
        buses: usize,
    ) -> Self {
        let buses = buses.clamp(1, MAX_TRACK_BUSES);
        let channels = buses * 2;
        let mut track = Self::build(
            host,
            ids,
            timer,
            channels,
            buses,
            PanMode::PanAndGainPerBus,
            TrackType::Regular,
        );
        track.data.max_input_channels = channels;
        track.data.max_output_channels = channels;
        track.data.current_input_channels = channels;
        track.data.current_output_channels = channels;
        track
    }

    fn build(
        host: HostControl,
        ids: &ObjectIdSource,
        timer: Arc<PerformanceTimer>,
        buffer_channels: usize,
        buses: usize,
        pan_mode: PanMode,
        track_type: TrackType,
    ) -> Self {
        let mut builder = ParameterStore::builder();
        let mut gain_indices = SmallVec::new();
        let mut pan_indices = SmallVec::new();
        let mut smoothers: Smoothers = SmallVec::new();

        gain_indices.push(builder.register_float_parameter(
            ids,
            "gain",
            "Gain",
            "dB",
            0.0,
            -120.0,
            24.0,
            Direction::Automatable,
            PreProcessor::DbToLin,
        ));
        smoothers.push([ValueSmoother::new(DEFAULT_TRACK_GAIN), ValueSmoother::new(DEFAULT_TRACK_GAIN)]);

        if pan_mode != PanMode::GainOnly {
            pan_indices.push(builder.register_float_parameter(
                ids,
                "pan",
                "Pan",
                "",
                0.0,
                -1.0,
                1.0,
                Direction::Automatable,
                PreProcessor::Linear,
            ));
        }
        let mute_index = builder.register_bool_parameter(ids, "mute", "Mute", false, Direction::Automatable);

        if pan_mode == PanMode::PanAndGainPerBus {
            for bus in 1..buses {
                gain_indices.push(builder.register_float_parameter(
                    ids,
                    &format!("gain_sub_{}", bus),
                    "Gain",
                    "dB",
                    0.0,
                    -120.0,
                    24.0,
                    Direction::Automatable,
                    PreProcessor::DbToLin,
                ));
                pan_indices.push(builder.register_float_parameter(
                    ids,
                    &format!("pan_sub_{}", bus),
                    "Pan",
                    "",
                    0.0,
                    -1.0,
                    1.0,
                    Direction::Automatable,
                    PreProcessor::Linear,
                ));
                smoothers.push([
                    ValueSmoother::new(DEFAULT_TRACK_GAIN),
                    ValueSmoother::new(DEFAULT_TRACK_GAIN),
                ]);
            }
        }

        let mut data = ProcessorData::new(ids.next(), builder.build(), host);
        data.label = "Track".to_string();

        let mut processors = Vec::new();
        processors.reserve_exact(TRACK_MAX_PROCESSORS);

        Self {
            data,
            track_type,
            buses,
            pan_mode,
            processors,
            input_buffer: SampleBuffer::new(buffer_channels),
            output_buffer: SampleBuffer::new(buffer_channels),
            scratch_in: SampleBuffer::new(buffer_channels),
            scratch_out: SampleBuffer::new(buffer_channels),
            kb_event_buffer: RtEventFifo::new(KEYBOARD_EVENT_QUEUE_SIZE),
            plugin_event_sink: Arc::new(RtEventFifo::new(KEYBOARD_EVENT_QUEUE_SIZE)),
            gain_indices,
            pan_indices,
            mute_index,
            smoothers,
            timer,
        }
    }

    pub fn track_type(&self) -> TrackType {
        self.track_type
    }

    pub fn buses(&self) -> usize {
        self.buses
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn has_processor(&self, id: ObjectId) -> bool {
        self.processors.iter().any(|p| p.id() == id)
    }

    /// Route an event to a chained processor by id. Returns false if the
    /// processor is not on this track.
    pub fn process_event_for(&mut self, processor_id: ObjectId, event: RtEvent) -> bool {
        match self.processors.iter_mut().find(|p| p.id() == processor_id) {
            Some(processor) => {
                processor.process_event(event);
                true
            }
            None => false,
        }
    }

    /// Grow a mono track to stereo. The buffers are always allocated for at
    /// least two channels, so this is a pure bookkeeping change and safe on
    /// the audio thread.
    pub fn expand_to_stereo(&mut self) {
        if self.data.max_output_channels >= 2 {
            self.data.max_input_channels = self.data.max_input_channels.max(2);
            self.data.current_input_channels = self.data.current_input_channels.max(2);
            self.data.current_output_channels = self.data.current_output_channels.max(2);
        }
    }

    /// Write access to one input channel, used by the engine to copy audio
    /// in through the connection map.
    pub fn input_channel_mut(&mut self, channel: usize) -> &mut [Sample] {
        self.input_buffer.channel_mut(channel)
    }

    /// Read access to one rendered output channel.
    pub fn output_channel(&self, channel: usize) -> &[Sample] {
        self.output_buffer.channel(channel)
    }

    /// Insert a processor, optionally before another one. On failure the
    /// instance is handed back.
    pub fn add(
        &mut self,
        mut processor: Box<dyn Processor>,
        before: Option<ObjectId>,
    ) -> Result<(), Box<dyn Processor>> {
        // _processors must not grow beyond its reservation on the rt thread
        if self.processors.len() >= TRACK_MAX_PROCESSORS || processor.id() == self.id() {
            return Err(processor);
        }
        debug_assert!(!processor.active_rt_processing());

        let position = match before {
            Some(before_id) => match self.processors.iter().position(|p| p.id() == before_id) {
                Some(position) => position,
                None => return Err(processor),
            },
            None => self.processors.len(),
        };

        processor.set_event_output(Some(self.plugin_event_sink.clone()));
        processor.set_active_rt_processing(true);
        self.processors.insert(position, processor);
        Ok(())
    }

    /// Remove a processor from the chain, returning ownership of it.
    pub fn remove(&mut self, processor_id: ObjectId) -> Option<Box<dyn Processor>> {
        let position = self.processors.iter().position(|p| p.id() == processor_id)?;
        let mut processor = self.processors.remove(position);
        processor.set_event_output(None);
        processor.set_active_rt_processing(false);
        Some(processor)
    }

    /// Render one chunk from the track's own input buffer into its output
    /// buffer, then clear the input for the next pass.
    pub fn render(&mut self) {
        // Swap the buffers out through zero-channel placeholders; this
        // allocates nothing and lets process_audio borrow self mutably
        let mut input = std::mem::replace(&mut self.input_buffer, SampleBuffer::new(0));
        let mut output = std::mem::replace(&mut self.output_buffer, SampleBuffer::new(0));

        self.process_audio(&input, &mut output);

        input.clear();
        self.input_buffer = input;
        self.output_buffer = output;
    }

    fn process_plugins(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let Track {
            processors,
            scratch_in,
            scratch_out,
            kb_event_buffer,
            plugin_event_sink,
            data,
            timer,
            ..
        } = self;

        scratch_in.clear();
        scratch_in.replace(input);

        for processor in processors.iter_mut() {
            let timestamp = timer.start_timer();

            // Processors can push new keyboard events back into this queue,
            // so only the events present now are delivered, not the queue
            // drained to empty
            for _ in 0..kb_event_buffer.len() {
                if let Some(event) = kb_event_buffer.pop() {
                    processor.process_event(event);
                }
            }

            scratch_out.clear();
            processor.process_audio(scratch_in, scratch_out);

            // Events the processor emitted: keyboard events continue down
            // the chain, everything else goes up to the engine
            while let Some(event) = plugin_event_sink.pop() {
                if event.is_keyboard_event() {
                    let _ = kb_event_buffer.push(event);
                } else {
                    data.output_event(event);
                }
            }

            timer.stop_timer(timestamp, processor.id());
            std::mem::swap(scratch_in, scratch_out);
        }

        // After the final swap the last processor's output is in scratch_in
        output.replace(scratch_in);
    }

    fn process_output_events(&mut self) {
        // Keyboard events not consumed by the chain bubble up to the engine,
        // re-stamped as coming from this track
        while let Some(event) = self.kb_event_buffer.pop() {
            let event = event.with_processor_id(self.data.id);
            self.data.output_event(event);
        }
    }

    fn apply_gain(&mut self, buffer: &mut SampleBuffer, muted: bool) {
        let gain = if muted {
            0.0
        } else {
            self.data.store.processed_value(self.gain_indices[0])
        };
        let smoother = &mut self.smoothers[0][LEFT];
        smoother.set(gain);
        if smoother.stationary() {
            buffer.apply_gain(gain);
        } else {
            buffer.ramp(smoother.value(), smoother.next_value());
        }
    }

    fn apply_pan_and_gain(&mut self, buffer: &mut SampleBuffer, muted: bool) {
        let gain = if muted {
            0.0
        } else {
            self.data.store.processed_value(self.gain_indices[0])
        };
        let pan = self.data.store.domain_value(self.pan_indices[0]);
        let (left_gain, right_gain) = calc_l_r_gain(gain, pan);

        if self.data.current_input_channels == 1 {
            buffer.copy_channel(RIGHT, LEFT);
        }

        let [left_smoother, right_smoother] = &mut self.smoothers[0];
        left_smoother.set(left_gain);
        right_smoother.set(right_gain);

        if left_smoother.stationary() && right_smoother.stationary() {
            buffer.apply_gain_to_channel(LEFT, left_gain);
            buffer.apply_gain_to_channel(RIGHT, right_gain);
        } else {
            buffer.ramp_channel(LEFT, left_smoother.value(), left_smoother.next_value());
            buffer.ramp_channel(RIGHT, right_smoother.value(), right_smoother.next_value());
        }
    }

    fn apply_pan_and_gain_per_bus(&mut self, buffer: &mut SampleBuffer, muted: bool) {
        for bus in 0..self.buses {
            let gain = if muted {
                0.0
            } else {
                self.data.store.processed_value(self.gain_indices[bus])
            };
            let pan = self.data.store.domain_value(self.pan_indices[bus]);
            let (left_gain, right_gain) = calc_l_r_gain(gain, pan);

            let left = bus * 2;
            let right = bus * 2 + 1;
            let [left_smoother, right_smoother] = &mut self.smoothers[bus];
            left_smoother.set(left_gain);
            right_smoother.set(right_gain);

            if left_smoother.stationary() && right_smoother.stationary() {
                buffer.apply_gain_to_channel(left, left_gain);
                buffer.apply_gain_to_channel(right, right_gain);
            } else {
                buffer.ramp_channel(left, left_smoother.value(), left_smoother.next_value());
                buffer.ramp_channel(right, right_smoother.value(), right_smoother.next_value());
            }
        }
    }
}

impl Processor for Track {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn processor_type(&self) -> ProcessorType {
        ProcessorType::Track
    }

    fn init(&mut self, sample_rate: f32) -> ProcessorReturnCode {
        self.configure(sample_rate);
        ProcessorReturnCode::Ok
    }

    fn configure(&mut self, sample_rate: f32) {
        self.data.sample_rate = sample_rate;
        let update_rate = sample_rate / sushi_core::AUDIO_CHUNK_SIZE as f32;
        for pair in &mut self.smoothers {
            pair[LEFT].set_lag_time(GAIN_SMOOTHING_TIME, update_rate);
            pair[RIGHT].set_lag_time(GAIN_SMOOTHING_TIME, update_rate);
            pair[LEFT].set_direct(DEFAULT_TRACK_GAIN);
            pair[RIGHT].set_direct(DEFAULT_TRACK_GAIN);
        }
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let timestamp = self.timer.start_timer();

        self.process_plugins(input, output);
        self.process_output_events();

        let muted = self.data.store.bool_value(self.mute_index);
        match self.pan_mode {
            PanMode::GainOnly => self.apply_gain(output, muted),
            PanMode::PanAndGain => self.apply_pan_and_gain(output, muted),
            PanMode::PanAndGainPerBus => self.apply_pan_and_gain_per_bus(output, muted),
        }

        let id = self.data.id;
        self.timer.stop_timer(timestamp, id);
    }

    fn process_event(&mut self, event: RtEvent) {
        if event.is_keyboard_event() {
            // Cached so they can be passed on to the processors in the chain
            let _ = self.kb_event_buffer.push(event);
        } else {
            self.data.process_generic_event(event);
        }
    }

    fn set_bypassed(&mut self, bypassed: bool) {
        for processor in &mut self.processors {
            processor.set_bypassed(bypassed);
        }
        let sample_rate = self.data.sample_rate;
        self.data.store.set_bypassed(bypassed);
        self.data.bypass.set_bypass(bypassed, sample_rate);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
