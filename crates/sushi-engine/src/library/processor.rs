//! The processor contract
//!
//! A processor is any node that processes one chunk of audio and/or events.
//! Concrete processors embed a [`ProcessorData`] and implement the
//! [`Processor`] trait; the trait's default methods supply the common
//! behaviour (channel negotiation, parameter queries, state handling) on top
//! of the embedded data.

use std::sync::Arc;

use sushi_core::{ObjectId, SampleBuffer, AUDIO_CHUNK_SIZE};

use crate::engine::transport::TransportView;
use crate::library::parameters::ParameterStore;
use crate::library::processor_state::{ProcessorState, RtState};
use crate::library::rt_event::{RtEvent, RtEventSink, RtGarbage};
use crate::plugins::send_return::ReturnBusRegistry;

/// Outcome of processor lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorReturnCode {
    Ok,
    Error,
    ParameterError,
    MemoryError,
    PluginLoadError,
    UnsupportedOperation,
}

/// Coarse classification of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorType {
    Regular,
    Track,
    InternalWrapper,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST CONTROL
// ═══════════════════════════════════════════════════════════════════════════════

/// Narrow interface the engine hands to every processor: a lock-free view of
/// the transport and the named return-bus registry.
#[derive(Clone)]
pub struct HostControl {
    transport: Arc<TransportView>,
    return_buses: Arc<ReturnBusRegistry>,
}

impl HostControl {
    pub fn new(transport: Arc<TransportView>, return_buses: Arc<ReturnBusRegistry>) -> Self {
        Self {
            transport,
            return_buses,
        }
    }

    pub fn transport(&self) -> &TransportView {
        &self.transport
    }

    pub fn return_buses(&self) -> &Arc<ReturnBusRegistry> {
        &self.return_buses
    }
}

impl std::fmt::Debug for HostControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostControl").finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BYPASS RAMPING
// ═══════════════════════════════════════════════════════════════════════════════

/// Time over which bypass toggles crossfade between dry and processed audio.
const BYPASS_RAMP_TIME: f32 = 0.01;

/// Crossfade state machine for click-free bypass toggles.
#[derive(Debug, Clone)]
pub struct BypassManager {
    bypassed: bool,
    ramp_chunks: usize,
    ramp_count: usize,
}

impl BypassManager {
    pub fn new() -> Self {
        Self {
            bypassed: false,
            ramp_chunks: 1,
            ramp_count: 0,
        }
    }

    pub fn set_bypass(&mut self, bypassed: bool, sample_rate: f32) {
        if bypassed != self.bypassed {
            self.bypassed = bypassed;
            self.ramp_chunks =
                ((sample_rate * BYPASS_RAMP_TIME) / AUDIO_CHUNK_SIZE as f32).ceil() as usize;
            self.ramp_count = self.ramp_chunks;
        }
    }

    pub fn bypassed(&self) -> bool {
        self.bypassed
    }

    /// True while the processor should keep running its DSP: either it is
    /// not bypassed, or the crossfade out of the wet signal is not done.
    pub fn should_process(&self) -> bool {
        !self.bypassed || self.ramp_count > 0
    }

    pub fn should_ramp(&self) -> bool {
        self.ramp_count > 0
    }

    /// Wet-gain endpoints for the current chunk and advance the ramp.
    pub fn next_ramp(&mut self) -> (f32, f32) {
        if self.ramp_count == 0 {
            let level = if self.bypassed { 0.0 } else { 1.0 };
            return (level, level);
        }
        let total = self.ramp_chunks as f32;
        let from = self.ramp_count as f32 / total;
        self.ramp_count -= 1;
        let to = self.ramp_count as f32 / total;
        if self.bypassed {
            (from, to)
        } else {
            (1.0 - from, 1.0 - to)
        }
    }

    /// Crossfade the dry input against the processed audio already in
    /// `output`.
    pub fn crossfade_output(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let (from, to) = self.next_ramp();
        output.ramp(from, to);
        output.add_with_ramp(input, 1.0 - from, 1.0 - to);
    }
}

impl Default for BypassManager {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSOR DATA
// ═══════════════════════════════════════════════════════════════════════════════

/// Common state embedded by every processor implementation.
pub struct ProcessorData {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub enabled: bool,
    pub current_input_channels: usize,
    pub current_output_channels: usize,
    pub max_input_channels: usize,
    pub max_output_channels: usize,
    pub active_rt_processing: bool,
    pub event_output: Option<RtEventSink>,
    pub store: Arc<ParameterStore>,
    pub bypass: BypassManager,
    pub host: HostControl,
    pub sample_rate: f32,
}

impl ProcessorData {
    pub fn new(id: ObjectId, store: Arc<ParameterStore>, host: HostControl) -> Self {
        Self {
            id,
            name: String::new(),
            label: String::new(),
            enabled: false,
            current_input_channels: 2,
            current_output_channels: 2,
            max_input_channels: 2,
            max_output_channels: 2,
            active_rt_processing: false,
            event_output: None,
            store,
            bypass: BypassManager::new(),
            host,
            sample_rate: 0.0,
        }
    }

    /// Emit an event through the configured output, silently dropping it if
    /// the processor is not wired into a track.
    #[inline]
    pub fn output_event(&self, event: RtEvent) {
        if let Some(output) = &self.event_output {
            if output.push(event).is_err() {
                // Queue full: the event is lost, which is preferable to
                // blocking the audio thread
            }
        }
    }

    /// Apply generic event handling shared by all processors. Returns true
    /// if the event was consumed.
    pub fn process_generic_event(&mut self, event: RtEvent) -> bool {
        match event {
            RtEvent::FloatParameterChange(e)
            | RtEvent::IntParameterChange(e)
            | RtEvent::BoolParameterChange(e) => {
                if let Some(index) = self.store.index_of(e.parameter_id) {
                    self.store.set_normalized(index, e.value);
                }
                true
            }
            RtEvent::StringPropertyChange {
                property_id, value, ..
            } => {
                match self.store.swap_property_value(property_id, *value) {
                    Some(old) => self.output_event(RtEvent::Delete(RtGarbage::String(Box::new(old)))),
                    None => {}
                }
                true
            }
            RtEvent::DataPropertyChange { value, .. } => {
                // No generic storage for blobs; send it back for disposal
                self.output_event(RtEvent::Delete(RtGarbage::Blob(value)));
                true
            }
            RtEvent::SetBypass { bypassed, .. } => {
                self.store.set_bypassed(bypassed);
                self.bypass.set_bypass(bypassed, self.sample_rate);
                true
            }
            RtEvent::SetState { state, .. } => {
                self.apply_rt_state(&state);
                self.output_event(RtEvent::Delete(RtGarbage::State(state)));
                true
            }
            _ => false,
        }
    }

    fn apply_rt_state(&mut self, state: &RtState) {
        if let Some(bypassed) = state.bypassed {
            self.store.set_bypassed(bypassed);
            self.bypass.set_bypass(bypassed, self.sample_rate);
        }
        for &(parameter_id, value) in &state.parameters {
            if let Some(index) = self.store.index_of(parameter_id) {
                self.store.set_normalized(index, value);
            }
        }
    }
}

impl std::fmt::Debug for ProcessorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorData")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSOR TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Abstract audio node.
///
/// `process_audio` and `process_event` run on the audio thread and must be
/// allocation-free; everything else is non-RT unless noted.
pub trait Processor: Send {
    fn data(&self) -> &ProcessorData;
    fn data_mut(&mut self) -> &mut ProcessorData;

    /// One-time setup at the given sample rate.
    fn init(&mut self, sample_rate: f32) -> ProcessorReturnCode;

    /// Sample-rate change while not processing.
    fn configure(&mut self, sample_rate: f32) {
        self.data_mut().sample_rate = sample_rate;
    }

    /// Produce one chunk of audio. RT.
    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer);

    /// Apply one event. RT.
    fn process_event(&mut self, event: RtEvent) {
        self.data_mut().process_generic_event(event);
    }

    fn processor_type(&self) -> ProcessorType {
        ProcessorType::Regular
    }

    // Identity

    fn id(&self) -> ObjectId {
        self.data().id
    }

    fn name(&self) -> &str {
        &self.data().name
    }

    fn set_name(&mut self, name: &str) {
        self.data_mut().name = name.to_string();
    }

    fn label(&self) -> &str {
        &self.data().label
    }

    // Channel configuration

    fn input_channels(&self) -> usize {
        self.data().current_input_channels
    }

    fn output_channels(&self) -> usize {
        self.data().current_output_channels
    }

    fn max_input_channels(&self) -> usize {
        self.data().max_input_channels
    }

    fn max_output_channels(&self) -> usize {
        self.data().max_output_channels
    }

    fn set_input_channels(&mut self, channels: usize) {
        let data = self.data_mut();
        data.current_input_channels = channels.min(data.max_input_channels);
    }

    fn set_output_channels(&mut self, channels: usize) {
        let data = self.data_mut();
        data.current_output_channels = channels.min(data.max_output_channels);
    }

    // Run state

    fn enabled(&self) -> bool {
        self.data().enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.data_mut().enabled = enabled;
    }

    fn bypassed(&self) -> bool {
        self.data().store.bypassed()
    }

    fn set_bypassed(&mut self, bypassed: bool) {
        let data = self.data_mut();
        data.store.set_bypassed(bypassed);
        let sample_rate = data.sample_rate;
        data.bypass.set_bypass(bypassed, sample_rate);
    }

    // Event wiring

    fn set_event_output(&mut self, output: Option<RtEventSink>) {
        self.data_mut().event_output = output;
    }

    fn active_rt_processing(&self) -> bool {
        self.data().active_rt_processing
    }

    fn set_active_rt_processing(&mut self, active: bool) {
        self.data_mut().active_rt_processing = active;
    }

    // Parameters. Non-RT queries served from the shared store.

    fn parameter_store(&self) -> &Arc<ParameterStore> {
        &self.data().store
    }

    /// Normalized [0, 1] value of a parameter.
    fn parameter_value(&self, parameter_id: ObjectId) -> Option<f32> {
        let store = &self.data().store;
        store.index_of(parameter_id).map(|i| store.normalized_value(i))
    }

    /// Domain value (e.g. dB) of a parameter.
    fn parameter_value_in_domain(&self, parameter_id: ObjectId) -> Option<f32> {
        let store = &self.data().store;
        store.index_of(parameter_id).map(|i| store.domain_value(i))
    }

    /// Display-formatted value of a parameter.
    fn parameter_value_formatted(&self, parameter_id: ObjectId) -> Option<String> {
        let store = &self.data().store;
        let index = store.index_of(parameter_id)?;
        Some(store.descriptor_at(index).format_value(store.domain_value(index)))
    }

    /// Non-RT only.
    fn property_value(&self, property_id: ObjectId) -> Option<String> {
        self.data().store.property_value(property_id)
    }

    /// Non-RT only.
    fn set_property_value(&mut self, property_id: ObjectId, value: String) -> ProcessorReturnCode {
        match self.data().store.swap_property_value(property_id, value) {
            Some(_) => ProcessorReturnCode::Ok,
            None => ProcessorReturnCode::ParameterError,
        }
    }

    // State

    fn save_state(&self) -> ProcessorState {
        let store = &self.data().store;
        ProcessorState {
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
        }
    }

    /// Apply a state snapshot. With `realtime_running` the caller routes the
    /// RT-applicable part through a `SetState` event instead.
    fn set_state(&mut self, state: &ProcessorState, realtime_running: bool) -> ProcessorReturnCode {
        if realtime_running {
            return ProcessorReturnCode::UnsupportedOperation;
        }
        let data = self.data_mut();
        data.apply_rt_state(&RtState::from(state));
        for (property_id, value) in &state.properties {
            data.store.swap_property_value(*property_id, value.clone());
        }
        ProcessorReturnCode::Ok
    }

    // Programs

    fn supports_programs(&self) -> bool {
        false
    }

    fn program_count(&self) -> usize {
        0
    }

    fn current_program(&self) -> usize {
        0
    }

    fn set_program(&mut self, _program: usize) -> ProcessorReturnCode {
        ProcessorReturnCode::UnsupportedOperation
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::library::parameters::{Direction, ParameterStore, PreProcessor};
    use crate::library::rt_event::RtEventFifo;
    use sushi_core::ObjectIdSource;

    pub fn test_host_control() -> HostControl {
        HostControl::new(
            Arc::new(TransportView::new()),
            Arc::new(ReturnBusRegistry::new()),
        )
    }

    /// Minimal processor used by container and engine tests.
    pub struct DummyProcessor {
        data: ProcessorData,
        pub gain_index: crate::library::parameters::ParameterIndex,
    }

    impl DummyProcessor {
        pub fn new(ids: &ObjectIdSource, host: HostControl) -> Self {
            let mut builder = ParameterStore::builder();
            let gain_index = builder.register_float_parameter(
                ids,
                "gain",
                "Gain",
                "dB",
                0.0,
                -120.0,
                24.0,
                Direction::Automatable,
                PreProcessor::DbToLin,
            );
            let mut data = ProcessorData::new(ids.next(), builder.build(), host);
            data.label = "Dummy".to_string();
            Self { data, gain_index }
        }
    }

    impl Processor for DummyProcessor {
        fn data(&self) -> &ProcessorData {
            &self.data
        }

        fn data_mut(&mut self) -> &mut ProcessorData {
            &mut self.data
        }

        fn init(&mut self, sample_rate: f32) -> ProcessorReturnCode {
            self.data.sample_rate = sample_rate;
            ProcessorReturnCode::Ok
        }

        fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
            output.replace(input);
        }
    }

    #[test]
    fn test_generic_parameter_event() {
        let ids = ObjectIdSource::new();
        let mut processor = DummyProcessor::new(&ids, test_host_control());
        processor.init(48000.0);

        let parameter_id = processor.parameter_store().descriptors()[0].id;
        processor.process_event(RtEvent::parameter_change(processor.id(), 0, parameter_id, 1.0));
        let store = processor.parameter_store();
        assert_eq!(store.normalized_value(processor.gain_index), 1.0);
    }

    #[test]
    fn test_bypass_state() {
        let ids = ObjectIdSource::new();
        let mut processor = DummyProcessor::new(&ids, test_host_control());
        processor.init(48000.0);
        assert!(!processor.bypassed());
        processor.set_bypassed(true);
        assert!(processor.bypassed());
    }

    #[test]
    fn test_string_property_returns_old_value_for_deletion() {
        let ids = ObjectIdSource::new();
        let mut builder = ParameterStore::builder();
        let prop_id = builder.register_property(&ids, "dest", "Destination", "initial");
        let mut data = ProcessorData::new(ids.next(), builder.build(), test_host_control());

        let sink = Arc::new(RtEventFifo::new(8));
        data.event_output = Some(sink.clone());

        data.process_generic_event(RtEvent::StringPropertyChange {
            processor_id: data.id,
            sample_offset: 0,
            property_id: prop_id,
            value: Box::new("updated".to_string()),
        });

        assert_eq!(data.store.property_value(prop_id).as_deref(), Some("updated"));
        match sink.pop() {
            Some(RtEvent::Delete(RtGarbage::String(old))) => assert_eq!(*old, "initial"),
            other => panic!("expected deletion envelope, got {:?}", other),
        }
    }

    #[test]
    fn test_save_state_roundtrip() {
        let ids = ObjectIdSource::new();
        let mut processor = DummyProcessor::new(&ids, test_host_control());
        processor.init(48000.0);
        processor
            .parameter_store()
            .set_normalized(processor.gain_index, 0.25);

        let state = processor.save_state();
        processor
            .parameter_store()
            .set_normalized(processor.gain_index, 0.9);
        processor.set_state(&state, false);
        assert_eq!(
            processor.parameter_store().normalized_value(processor.gain_index),
            0.25
        );
    }
}
