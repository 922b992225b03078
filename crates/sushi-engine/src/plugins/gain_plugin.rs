//! Gain plugin

use sushi_core::{ObjectIdSource, SampleBuffer};

use crate::library::parameters::{Direction, ParameterIndex, ParameterStore, PreProcessor};
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};

pub const PLUGIN_UID: &str = "sushi.testing.gain";
const DEFAULT_LABEL: &str = "Gain";

pub struct GainPlugin {
    data: ProcessorData,
    gain: ParameterIndex,
}

impl GainPlugin {
    pub fn new(host: HostControl, ids: &ObjectIdSource) -> Self {
        let mut builder = ParameterStore::builder();
        let gain = builder.register_float_parameter(
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
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();
        Self { data, gain }
    }
}

impl Processor for GainPlugin {
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
        let gain = self.data.store.processed_value(self.gain);
        if !self.data.bypass.bypassed() {
            output.clear();
            output.add_with_gain(input, gain);
        } else {
            output.replace(input);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::processor::tests::test_host_control;
    use approx::assert_relative_eq;

    #[test]
    fn test_gain_in_db_is_applied() {
        let ids = ObjectIdSource::new();
        let mut plugin = GainPlugin::new(test_host_control(), &ids);
        plugin.init(48000.0);

        plugin.data.store.set_domain(plugin.gain, 6.0);

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(1.0);
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);
        assert_relative_eq!(output.channel(0)[0], 1.9952623, epsilon = 1e-4);
    }

    #[test]
    fn test_bypass_passes_dry_signal() {
        let ids = ObjectIdSource::new();
        let mut plugin = GainPlugin::new(test_host_control(), &ids);
        plugin.init(48000.0);
        plugin.data.store.set_domain(plugin.gain, -12.0);
        plugin.set_bypassed(true);
        // Let the crossfade finish
        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.5);
        let mut output = SampleBuffer::new(2);
        for _ in 0..20 {
            plugin.process_audio(&input, &mut output);
        }
        assert_relative_eq!(output.channel(0)[0], 0.5, epsilon = 1e-6);
    }
}
