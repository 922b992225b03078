//! Saturation waveshaper
//!
//! Antialiased tanh saturation with a bias control, processed at 2x
//! oversampling: each input sample is shaped together with a linearly
//! interpolated midpoint and the pair averaged back down.

use sushi_core::{ObjectIdSource, SampleBuffer, MAX_TRACK_CHANNELS};

use crate::library::parameters::{Direction, ParameterIndex, ParameterStore, PreProcessor};
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};

pub const PLUGIN_UID: &str = "sushi.brickworks.saturation";
const DEFAULT_LABEL: &str = "Saturation";

pub struct SaturationPlugin {
    data: ProcessorData,
    bias: ParameterIndex,
    gain: ParameterIndex,
    previous_sample: [f32; MAX_TRACK_CHANNELS],
}

impl SaturationPlugin {
    pub fn new(host: HostControl, ids: &ObjectIdSource) -> Self {
        let mut builder = ParameterStore::builder();
        let bias = builder.register_float_parameter(
            ids,
            "bias",
            "Bias",
            "",
            0.0,
            -2.5,
            2.5,
            Direction::Automatable,
            PreProcessor::Linear,
        );
        let gain = builder.register_float_parameter(
            ids,
            "gain",
            "Gain",
            "",
            1.0,
            0.1,
            10.0,
            Direction::Automatable,
            PreProcessor::CubicWarp,
        );

        let mut data = ProcessorData::new(ids.next(), builder.build(), host);
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();
        data.max_input_channels = MAX_TRACK_CHANNELS;
        data.max_output_channels = MAX_TRACK_CHANNELS;

        Self {
            data,
            bias,
            gain,
            previous_sample: [0.0; MAX_TRACK_CHANNELS],
        }
    }

    fn reset(&mut self) {
        self.previous_sample = [0.0; MAX_TRACK_CHANNELS];
    }
}

#[inline]
fn shape(x: f32, gain: f32, bias: f32) -> f32 {
    (gain * x + bias).tanh() - bias.tanh()
}

impl Processor for SaturationPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn init(&mut self, sample_rate: f32) -> ProcessorReturnCode {
        self.data.sample_rate = sample_rate;
        self.reset();
        ProcessorReturnCode::Ok
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.data.enabled = enabled;
        self.reset();
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let bias = self.data.store.processed_value(self.bias);
        let gain = self.data.store.processed_value(self.gain);

        if self.data.bypass.should_process() {
            let channels = self.data.current_input_channels.min(input.channel_count());
            for channel in 0..channels {
                let mut previous = self.previous_sample[channel];
                let in_samples = input.channel(channel);
                let out_samples = output.channel_mut(channel);
                for (out, &x) in out_samples.iter_mut().zip(in_samples) {
                    let midpoint = 0.5 * (previous + x);
                    *out = 0.5 * (shape(midpoint, gain, bias) + shape(x, gain, bias));
                    previous = x;
                }
                self.previous_sample[channel] = previous;
            }
            if self.data.bypass.should_ramp() {
                self.data.bypass.crossfade_output(input, output);
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
    use sushi_core::AUDIO_CHUNK_SIZE;

    #[test]
    fn test_output_is_bounded_and_nonlinear() {
        let ids = ObjectIdSource::new();
        let mut plugin = SaturationPlugin::new(test_host_control(), &ids);
        plugin.init(48000.0);
        plugin.data.store.set_domain(plugin.gain, 10.0);

        let mut input = SampleBuffer::new(2);
        for (n, sample) in input.channel_mut(0).iter_mut().enumerate() {
            *sample = 2.0 * (2.0 * std::f32::consts::PI * n as f32 / 32.0).sin();
        }
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);

        for &sample in output.channel(0) {
            assert!(sample.abs() <= 1.0 + 1e-6);
        }
        // Heavy drive squares the wave, so the output is not a scaled copy
        let ratio = output.channel(0)[8] / input.channel(0)[8];
        let ratio_2 = output.channel(0)[4] / input.channel(0)[4];
        assert!((ratio - ratio_2).abs() > 0.01);
    }

    #[test]
    fn test_silence_stays_silent_with_bias() {
        let ids = ObjectIdSource::new();
        let mut plugin = SaturationPlugin::new(test_host_control(), &ids);
        plugin.init(48000.0);
        plugin.data.store.set_domain(plugin.bias, 1.5);

        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);
        // The resting bias offset is subtracted out
        for &sample in &output.channel(0)[..AUDIO_CHUNK_SIZE] {
            assert!(sample.abs() < 1e-6);
        }
    }
}
