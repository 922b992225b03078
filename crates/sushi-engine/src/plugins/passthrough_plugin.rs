//! Passthrough plugin, mostly useful for testing the host

use sushi_core::{ObjectIdSource, SampleBuffer};

use crate::library::parameters::ParameterStore;
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};

pub const PLUGIN_UID: &str = "sushi.testing.passthrough";
const DEFAULT_LABEL: &str = "Passthrough";

pub struct PassthroughPlugin {
    data: ProcessorData,
}

impl PassthroughPlugin {
    pub fn new(host: HostControl, ids: &ObjectIdSource) -> Self {
        let mut data = ProcessorData::new(ids.next(), ParameterStore::builder().build(), host);
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();
        Self { data }
    }
}

impl Processor for PassthroughPlugin {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::processor::tests::test_host_control;

    #[test]
    fn test_audio_passes_unchanged() {
        let ids = ObjectIdSource::new();
        let mut plugin = PassthroughPlugin::new(test_host_control(), &ids);
        plugin.init(48000.0);

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.42);
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);
        assert_eq!(output.channel(0), input.channel(0));
    }
}
