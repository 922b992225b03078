//! Aux return: plays back the audio accumulated on its named bus

use std::sync::Arc;

use sushi_core::{ObjectIdSource, SampleBuffer};

use crate::library::parameters::ParameterStore;
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};
use crate::plugins::send_return::{ReturnBus, MAX_SEND_CHANNELS};

pub const PLUGIN_UID: &str = "sushi.testing.return";
const DEFAULT_LABEL: &str = "Return";

pub struct ReturnPlugin {
    data: ProcessorData,
    bus: Option<Arc<ReturnBus>>,
    registered_name: Option<String>,
}

impl ReturnPlugin {
    pub fn new(host: HostControl, ids: &ObjectIdSource) -> Self {
        let mut data = ProcessorData::new(ids.next(), ParameterStore::builder().build(), host);
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();
        data.max_input_channels = MAX_SEND_CHANNELS;
        data.max_output_channels = MAX_SEND_CHANNELS;
        Self {
            data,
            bus: None,
            registered_name: None,
        }
    }
}

impl Processor for ReturnPlugin {
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

    /// The bus is keyed by the instance name, so sends address this return
    /// by the name it was created under.
    fn set_name(&mut self, name: &str) {
        if let Some(old_name) = self.registered_name.take() {
            self.data.host.return_buses().unregister(&old_name);
        }
        self.data.name = name.to_string();
        self.bus = Some(self.data.host.return_buses().register(name));
        self.registered_name = Some(name.to_string());
    }

    fn process_audio(&mut self, _input: &SampleBuffer, output: &mut SampleBuffer) {
        let Some(bus) = &self.bus else {
            output.clear();
            return;
        };
        if self.data.bypass.should_process() {
            let now = self.data.host.transport().current_process_time();
            bus.read_output(output, now);
            if self.data.bypass.should_ramp() {
                let (from, to) = self.data.bypass.next_ramp();
                output.ramp(from, to);
            }
        } else {
            output.clear();
        }
    }
}

impl Drop for ReturnPlugin {
    fn drop(&mut self) {
        if let Some(name) = self.registered_name.take() {
            self.data.host.return_buses().unregister(&name);
        }
    }
}
