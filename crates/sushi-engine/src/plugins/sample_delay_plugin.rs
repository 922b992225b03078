//! Integer sample delay

use sushi_core::{ObjectIdSource, SampleBuffer, AUDIO_CHUNK_SIZE, MAX_TRACK_CHANNELS};

use crate::library::parameters::{Direction, ParameterIndex, ParameterStore};
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};

pub const PLUGIN_UID: &str = "sushi.testing.sample_delay";
const DEFAULT_LABEL: &str = "Sample delay";

/// One second at 48 kHz.
pub const MAX_DELAY: usize = 48000;

pub struct SampleDelayPlugin {
    data: ProcessorData,
    sample_delay: ParameterIndex,
    delaylines: Vec<Vec<f32>>,
    write_idx: usize,
}

impl SampleDelayPlugin {
    pub fn new(host: HostControl, ids: &ObjectIdSource) -> Self {
        let mut builder = ParameterStore::builder();
        let sample_delay = builder.register_int_parameter(
            ids,
            "sample_delay",
            "Sample delay",
            "samples",
            0,
            0,
            (MAX_DELAY - 1) as i32,
            Direction::Automatable,
        );
        let mut data = ProcessorData::new(ids.next(), builder.build(), host);
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();
        data.max_input_channels = MAX_TRACK_CHANNELS;
        data.max_output_channels = MAX_TRACK_CHANNELS;

        // Delay lines for the full channel count up front, so channel
        // changes never allocate on the audio thread
        Self {
            data,
            sample_delay,
            delaylines: vec![vec![0.0; MAX_DELAY]; MAX_TRACK_CHANNELS],
            write_idx: 0,
        }
    }

    fn reset(&mut self) {
        for line in &mut self.delaylines {
            line.fill(0.0);
        }
    }
}

impl Processor for SampleDelayPlugin {
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

    fn set_enabled(&mut self, enabled: bool) {
        self.data.enabled = enabled;
        if !enabled {
            self.reset();
        }
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let delay = self.data.store.processed_value(self.sample_delay).round() as usize % MAX_DELAY;
        let read_idx = (self.write_idx + MAX_DELAY - delay) % MAX_DELAY;

        if !self.data.bypass.bypassed() {
            let channels = self
                .data
                .current_input_channels
                .min(input.channel_count())
                .min(output.channel_count());
            for channel in 0..channels {
                let line = &mut self.delaylines[channel];
                let mut write = self.write_idx;
                let mut read = read_idx;
                let in_samples = input.channel(channel);
                let out_samples = output.channel_mut(channel);
                for n in 0..AUDIO_CHUNK_SIZE {
                    line[write] = in_samples[n];
                    out_samples[n] = line[read];
                    write = (write + 1) % MAX_DELAY;
                    read = (read + 1) % MAX_DELAY;
                }
            }
            self.write_idx = (self.write_idx + AUDIO_CHUNK_SIZE) % MAX_DELAY;
        } else {
            output.replace(input);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::processor::tests::test_host_control;

    #[test]
    fn test_delay_shifts_signal() {
        let ids = ObjectIdSource::new();
        let mut plugin = SampleDelayPlugin::new(test_host_control(), &ids);
        plugin.init(48000.0);
        plugin.data.store.set_domain(plugin.sample_delay, 10.0);

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0)[0] = 1.0;
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);

        assert_eq!(output.channel(0)[0], 0.0);
        assert_eq!(output.channel(0)[10], 1.0);
    }

    #[test]
    fn test_zero_delay_is_identity() {
        let ids = ObjectIdSource::new();
        let mut plugin = SampleDelayPlugin::new(test_host_control(), &ids);
        plugin.init(48000.0);

        let mut input = SampleBuffer::new(1);
        for (n, sample) in input.channel_mut(0).iter_mut().enumerate() {
            *sample = n as f32;
        }
        let mut output = SampleBuffer::new(1);
        plugin.process_audio(&input, &mut output);
        assert_eq!(output.channel(0), input.channel(0));
    }
}
