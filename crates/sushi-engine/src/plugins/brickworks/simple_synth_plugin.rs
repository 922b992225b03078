//! Minimal monophonic synth
//!
//! One sine oscillator driven by note on/off events through a linear ADSR
//! envelope. Mainly here to exercise keyboard event routing end to end.

use sushi_core::{ObjectIdSource, SampleBuffer, AUDIO_CHUNK_SIZE};
use sushi_dsp::AdsrEnvelope;

use crate::library::parameters::{Direction, ParameterIndex, ParameterStore, PreProcessor};
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};
use crate::library::rt_event::RtEvent;

pub const PLUGIN_UID: &str = "sushi.brickworks.simple_synth";
const DEFAULT_LABEL: &str = "Simple Synth";

pub struct SimpleSynthPlugin {
    data: ProcessorData,
    attack: ParameterIndex,
    decay: ParameterIndex,
    sustain: ParameterIndex,
    release: ParameterIndex,
    volume: ParameterIndex,
    envelope: AdsrEnvelope,
    phase: f32,
    phase_increment: f32,
    current_note: Option<i32>,
    velocity_gain: f32,
}

impl SimpleSynthPlugin {
    pub fn new(host: HostControl, ids: &ObjectIdSource) -> Self {
        let mut builder = ParameterStore::builder();
        let attack = builder.register_float_parameter(
            ids, "attack", "Attack", "s", 0.05, 0.0, 5.0,
            Direction::Automatable, PreProcessor::Linear,
        );
        let decay = builder.register_float_parameter(
            ids, "decay", "Decay", "s", 0.2, 0.0, 5.0,
            Direction::Automatable, PreProcessor::Linear,
        );
        let sustain = builder.register_float_parameter(
            ids, "sustain", "Sustain", "", 0.5, 0.0, 1.0,
            Direction::Automatable, PreProcessor::Linear,
        );
        let release = builder.register_float_parameter(
            ids, "release", "Release", "s", 0.2, 0.0, 5.0,
            Direction::Automatable, PreProcessor::Linear,
        );
        let volume = builder.register_float_parameter(
            ids, "volume", "Volume", "dB", 0.0, -120.0, 24.0,
            Direction::Automatable, PreProcessor::DbToLin,
        );

        let mut data = ProcessorData::new(ids.next(), builder.build(), host);
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();
        data.max_input_channels = 0;
        data.max_output_channels = 2;
        data.current_input_channels = 0;

        Self {
            data,
            attack,
            decay,
            sustain,
            release,
            volume,
            envelope: AdsrEnvelope::new(),
            phase: 0.0,
            phase_increment: 0.0,
            current_note: None,
            velocity_gain: 1.0,
        }
    }

    fn update_envelope_parameters(&mut self) {
        let store = &self.data.store;
        self.envelope.set_parameters(
            store.processed_value(self.attack),
            store.processed_value(self.decay),
            store.processed_value(self.sustain),
            store.processed_value(self.release),
        );
    }
}

impl Processor for SimpleSynthPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn init(&mut self, sample_rate: f32) -> ProcessorReturnCode {
        self.data.sample_rate = sample_rate;
        self.envelope.set_sample_rate(sample_rate);
        self.update_envelope_parameters();
        ProcessorReturnCode::Ok
    }

    fn configure(&mut self, sample_rate: f32) {
        self.data.sample_rate = sample_rate;
        self.envelope.set_sample_rate(sample_rate);
        self.update_envelope_parameters();
        self.envelope.reset();
    }

    fn process_event(&mut self, event: RtEvent) {
        match event {
            RtEvent::NoteOn(e) => {
                let frequency = 440.0 * 2.0_f32.powf((e.note - 69) as f32 / 12.0);
                self.phase_increment =
                    2.0 * std::f32::consts::PI * frequency / self.data.sample_rate;
                self.current_note = Some(e.note);
                self.velocity_gain = e.velocity;
                self.update_envelope_parameters();
                self.envelope.gate(true);
            }
            RtEvent::NoteOff(e) => {
                if self.current_note == Some(e.note) {
                    self.current_note = None;
                    self.envelope.gate(false);
                }
            }
            other => {
                self.data.process_generic_event(other);
            }
        }
    }

    fn process_audio(&mut self, _input: &SampleBuffer, output: &mut SampleBuffer) {
        if self.envelope.finished() || self.data.bypass.bypassed() {
            output.clear();
            return;
        }

        let volume = self.data.store.processed_value(self.volume) * self.velocity_gain;
        let channels = self.data.current_output_channels.min(output.channel_count());

        for n in 0..AUDIO_CHUNK_SIZE {
            let level = self.envelope.tick(1);
            let sample = self.phase.sin() * level * volume;
            self.phase += self.phase_increment;
            for channel in 0..channels {
                output.channel_mut(channel)[n] = sample;
            }
        }
        if self.phase > 2.0 * std::f32::consts::PI {
            self.phase -= 2.0 * std::f32::consts::PI;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::processor::tests::test_host_control;

    const SAMPLE_RATE: f32 = 48000.0;

    fn make_synth() -> SimpleSynthPlugin {
        let ids = ObjectIdSource::new();
        let mut synth = SimpleSynthPlugin::new(test_host_control(), &ids);
        synth.init(SAMPLE_RATE);
        synth.set_output_channels(2);
        synth
    }

    #[test]
    fn test_silent_without_notes() {
        let mut synth = make_synth();
        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        synth.process_audio(&input, &mut output);
        assert_eq!(output.peak(), 0.0);
    }

    #[test]
    fn test_note_on_produces_audio_and_note_off_releases() {
        let mut synth = make_synth();
        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);

        synth.process_event(RtEvent::note_on(0, 0, 0, 60, 1.0));
        synth.process_audio(&input, &mut output);
        assert!(output.peak() > 0.0, "note on should produce audio");

        synth.process_event(RtEvent::note_off(0, 0, 0, 60, 1.0));
        // Render longer than decay + release
        let store = synth.parameter_store().clone();
        let total_release = store.processed_value(synth.decay) + store.processed_value(synth.release);
        let chunks = (total_release * SAMPLE_RATE) as usize / AUDIO_CHUNK_SIZE + 2;
        for _ in 0..chunks {
            synth.process_audio(&input, &mut output);
        }
        assert_eq!(output.peak(), 0.0, "envelope should have fully released");
    }

    #[test]
    fn test_output_stays_finite_under_stress() {
        let mut synth = make_synth();
        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);

        for i in 0..128 {
            let note = (i * 37) % 128;
            for descriptor in synth.parameter_store().descriptors().to_vec() {
                synth.process_event(RtEvent::parameter_change(
                    0,
                    0,
                    descriptor.id,
                    (i as f32 / 128.0 + 0.1).min(1.0),
                ));
            }
            synth.process_event(RtEvent::note_on(0, 0, 0, note, 1.0));
            synth.process_audio(&input, &mut output);
            for &sample in output.channel(0) {
                assert!(sample.is_finite());
            }
        }
    }
}
