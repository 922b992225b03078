//! Low frequency oscillator exposed through an output parameter

use sushi_core::{ObjectIdSource, SampleBuffer, AUDIO_CHUNK_SIZE};

use crate::library::parameters::{Direction, ParameterIndex, ParameterStore, PreProcessor};
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};
use crate::library::rt_event::RtEvent;

pub const PLUGIN_UID: &str = "sushi.testing.lfo";
const DEFAULT_LABEL: &str = "Lfo";

pub struct LfoPlugin {
    data: ProcessorData,
    freq: ParameterIndex,
    out: ParameterIndex,
    phase: f32,
    buffers_per_second: f32,
}

impl LfoPlugin {
    pub fn new(host: HostControl, ids: &ObjectIdSource) -> Self {
        let mut builder = ParameterStore::builder();
        let freq = builder.register_float_parameter(
            ids,
            "freq",
            "Frequency",
            "Hz",
            1.0,
            0.001,
            10.0,
            Direction::Automatable,
            PreProcessor::Linear,
        );
        let out = builder.register_float_parameter(
            ids,
            "out",
            "Lfo Out",
            "",
            0.5,
            0.0,
            1.0,
            Direction::Output,
            PreProcessor::Linear,
        );
        let mut data = ProcessorData::new(ids.next(), builder.build(), host);
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();
        Self {
            data,
            freq,
            out,
            phase: 0.0,
            buffers_per_second: 1.0,
        }
    }
}

impl Processor for LfoPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn init(&mut self, sample_rate: f32) -> ProcessorReturnCode {
        self.configure(sample_rate);
        ProcessorReturnCode::Ok
    }

    fn configure(&mut self, sample_rate: f32) {
        self.data.sample_rate = sample_rate;
        self.buffers_per_second = sample_rate / AUDIO_CHUNK_SIZE as f32;
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        output.replace(input);
        self.phase += self.data.store.processed_value(self.freq) * std::f32::consts::PI
            / self.buffers_per_second;
        let value = (self.phase.sin() + 1.0) * 0.5;
        self.data.store.set_normalized(self.out, value);
        let parameter_id = self.data.store.descriptor_at(self.out).id;
        self.data
            .output_event(RtEvent::parameter_change(self.data.id, 0, parameter_id, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::processor::tests::test_host_control;

    #[test]
    fn test_output_parameter_oscillates() {
        let ids = ObjectIdSource::new();
        let mut plugin = LfoPlugin::new(test_host_control(), &ids);
        plugin.init(48000.0);
        plugin.data.store.set_domain(plugin.freq, 10.0);

        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        let mut values = Vec::new();
        for _ in 0..100 {
            plugin.process_audio(&input, &mut output);
            values.push(plugin.data.store.normalized_value(plugin.out));
        }
        let min = values.iter().cloned().fold(f32::MAX, f32::min);
        let max = values.iter().cloned().fold(f32::MIN, f32::max);
        assert!(max - min > 0.1, "lfo output should move, got {}..{}", min, max);
    }
}
