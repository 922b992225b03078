//! Single-band peaking equalizer

use sushi_core::{ObjectIdSource, SampleBuffer, AUDIO_CHUNK_SIZE};
use sushi_dsp::{calc_biquad_peak, BiquadFilter};

use crate::library::parameters::{Direction, ParameterIndex, ParameterStore, PreProcessor};
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};

pub const PLUGIN_UID: &str = "sushi.testing.equalizer";
const DEFAULT_LABEL: &str = "Equalizer";

const MAX_CHANNELS_SUPPORTED: usize = 2;

pub struct EqualizerPlugin {
    data: ProcessorData,
    frequency: ParameterIndex,
    gain: ParameterIndex,
    q: ParameterIndex,
    filters: [BiquadFilter; MAX_CHANNELS_SUPPORTED],
}

impl EqualizerPlugin {
    pub fn new(host: HostControl, ids: &ObjectIdSource) -> Self {
        let mut builder = ParameterStore::builder();
        let frequency = builder.register_float_parameter(
            ids,
            "frequency",
            "Frequency",
            "Hz",
            1000.0,
            20.0,
            20000.0,
            Direction::Automatable,
            PreProcessor::Linear,
        );
        let gain = builder.register_float_parameter(
            ids,
            "gain",
            "Gain",
            "dB",
            0.0,
            -24.0,
            24.0,
            Direction::Automatable,
            PreProcessor::DbToLin,
        );
        let q = builder.register_float_parameter(
            ids,
            "q",
            "Q",
            "",
            1.0,
            0.0,
            10.0,
            Direction::Automatable,
            PreProcessor::Linear,
        );

        let mut data = ProcessorData::new(ids.next(), builder.build(), host);
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();
        data.max_input_channels = MAX_CHANNELS_SUPPORTED;
        data.max_output_channels = MAX_CHANNELS_SUPPORTED;

        Self {
            data,
            frequency,
            gain,
            q,
            filters: Default::default(),
        }
    }

    fn reset_filters(&mut self) {
        for filter in &mut self.filters {
            filter.set_smoothing(AUDIO_CHUNK_SIZE);
            filter.reset();
        }
    }
}

impl Processor for EqualizerPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn init(&mut self, sample_rate: f32) -> ProcessorReturnCode {
        self.data.sample_rate = sample_rate;
        self.reset_filters();
        ProcessorReturnCode::Ok
    }

    fn configure(&mut self, sample_rate: f32) {
        self.data.sample_rate = sample_rate;
        self.reset_filters();
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.data.enabled = enabled;
        self.reset_filters();
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let frequency = self.data.store.processed_value(self.frequency);
        let gain = self.data.store.processed_value(self.gain);
        let q = self.data.store.processed_value(self.q);

        if !self.data.bypass.bypassed() {
            // Recalculate coefficients once per chunk for a predictable cpu
            // load; the filter smooths towards them per sample
            let coefficients = calc_biquad_peak(self.data.sample_rate, frequency, q, gain);
            for (channel, filter) in self
                .filters
                .iter_mut()
                .enumerate()
                .take(self.data.current_input_channels)
            {
                filter.set_coefficients(coefficients);
                filter.process(input.channel(channel), output.channel_mut(channel));
            }
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
    fn test_unity_gain_at_default_settings() {
        let ids = ObjectIdSource::new();
        let mut plugin = EqualizerPlugin::new(test_host_control(), &ids);
        plugin.init(48000.0);
        plugin.set_input_channels(1);

        // 0 dB peaking filter is an allpass regardless of frequency and q
        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.5);
        let mut output = SampleBuffer::new(2);
        for _ in 0..50 {
            plugin.process_audio(&input, &mut output);
        }
        assert_relative_eq!(output.channel(0)[AUDIO_CHUNK_SIZE - 1], 0.5, epsilon = 1e-3);
    }
}
