//! Sums all input channels to mono on every output channel

use sushi_core::{ObjectIdSource, SampleBuffer, MAX_TRACK_CHANNELS};

use crate::library::parameters::ParameterStore;
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};

pub const PLUGIN_UID: &str = "sushi.testing.mono_summing";
const DEFAULT_LABEL: &str = "Mono summing";

pub struct MonoSummingPlugin {
    data: ProcessorData,
}

impl MonoSummingPlugin {
    pub fn new(host: HostControl, ids: &ObjectIdSource) -> Self {
        let mut data = ProcessorData::new(ids.next(), ParameterStore::builder().build(), host);
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();
        data.max_input_channels = MAX_TRACK_CHANNELS;
        data.max_output_channels = MAX_TRACK_CHANNELS;
        Self { data }
    }
}

impl Processor for MonoSummingPlugin {
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
        if !self.data.bypass.bypassed() {
            let in_channels = self.data.current_input_channels.min(input.channel_count());
            let out_channels = self
                .data
                .current_output_channels
                .min(output.channel_count());

            output.clear();
            if out_channels == 0 {
                return;
            }
            for channel in 0..in_channels {
                output.add_channel_with_gain(0, input, channel, 1.0);
            }
            for channel in 1..out_channels {
                output.copy_channel(channel, 0);
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

    #[test]
    fn test_channels_are_summed() {
        let ids = ObjectIdSource::new();
        let mut plugin = MonoSummingPlugin::new(test_host_control(), &ids);
        plugin.init(48000.0);
        plugin.set_input_channels(2);
        plugin.set_output_channels(2);

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.25);
        input.channel_mut(1).fill(0.5);
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);

        assert_eq!(output.channel(0)[0], 0.75);
        assert_eq!(output.channel(1)[0], 0.75);
    }
}
