//! Aux send: taps the chain signal into a named return bus

use std::sync::Arc;

use sushi_core::{ObjectIdSource, SampleBuffer, AUDIO_CHUNK_SIZE, ObjectId};
use sushi_dsp::{ValueSmoother, GAIN_SMOOTHING_TIME};

use crate::library::parameters::{Direction, ParameterIndex, ParameterStore, PreProcessor};
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};
use crate::library::rt_event::RtEvent;
use crate::plugins::send_return::{ReturnBus, MAX_SEND_CHANNELS};

pub const PLUGIN_UID: &str = "sushi.testing.send";
const DEFAULT_LABEL: &str = "Send";
const DEFAULT_DEST: &str = "No destination";

pub struct SendPlugin {
    data: ProcessorData,
    gain: ParameterIndex,
    channel_count: ParameterIndex,
    start_channel: ParameterIndex,
    dest_channel: ParameterIndex,
    dest_property_id: ObjectId,
    destination: Option<Arc<ReturnBus>>,
    gain_smoother: ValueSmoother,
}

impl SendPlugin {
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
        let channel_count = builder.register_int_parameter(
            ids,
            "channel_count",
            "Channel count",
            "",
            MAX_SEND_CHANNELS as i32,
            0,
            MAX_SEND_CHANNELS as i32,
            Direction::Automatable,
        );
        let start_channel = builder.register_int_parameter(
            ids,
            "start_channel",
            "Start channel",
            "",
            0,
            0,
            MAX_SEND_CHANNELS as i32 - 1,
            Direction::Automatable,
        );
        let dest_channel = builder.register_int_parameter(
            ids,
            "dest_channel",
            "Destination channel",
            "",
            0,
            0,
            MAX_SEND_CHANNELS as i32 - 1,
            Direction::Automatable,
        );
        let dest_property_id =
            builder.register_property(ids, "destination_name", "destination name", DEFAULT_DEST);

        let mut data = ProcessorData::new(ids.next(), builder.build(), host);
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();

        Self {
            data,
            gain,
            channel_count,
            start_channel,
            dest_channel,
            dest_property_id,
            destination: None,
            gain_smoother: ValueSmoother::new(1.0),
        }
    }

    fn rebind_destination(&mut self) {
        let name = self
            .data
            .store
            .property_value(self.dest_property_id)
            .unwrap_or_default();
        self.destination = self.data.host.return_buses().lookup(&name);
    }
}

impl Processor for SendPlugin {
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
        self.gain_smoother
            .set_lag_time(GAIN_SMOOTHING_TIME, sample_rate / AUDIO_CHUNK_SIZE as f32);
    }

    fn process_event(&mut self, event: RtEvent) {
        let is_destination_change = matches!(
            &event,
            RtEvent::StringPropertyChange { property_id, .. } if *property_id == self.dest_property_id
        );
        self.data.process_generic_event(event);
        if is_destination_change {
            // Lookup is a spinlocked hash probe, no allocation
            self.rebind_destination();
        }
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        output.replace(input);

        let Some(destination) = &self.destination else {
            return;
        };
        if self.data.bypass.should_process() {
            let store = &self.data.store;
            let gain = store.processed_value(self.gain);
            self.gain_smoother.set(gain);

            let start_channel = store.processed_value(self.start_channel).round() as usize;
            let dest_channel = store.processed_value(self.dest_channel).round() as usize;
            let channels = (store.processed_value(self.channel_count).round() as usize)
                .min(input.channel_count().saturating_sub(start_channel));
            if channels == 0 {
                return;
            }

            let now = self.data.host.transport().current_process_time();

            if self.data.bypass.should_ramp() {
                // Bypass recently toggled: fold the crossfade into the send
                let (ramp_start, ramp_end) = self.data.bypass.next_ramp();
                let start = ramp_start * self.gain_smoother.value();
                let end = ramp_end * self.gain_smoother.next_value();
                destination.send_audio_with_ramp(
                    input, start_channel, channels, dest_channel, start, end, now,
                );
            } else if self.gain_smoother.stationary() {
                destination.send_audio(input, start_channel, channels, dest_channel, gain, now);
            } else {
                let start = self.gain_smoother.value();
                let end = self.gain_smoother.next_value();
                destination.send_audio_with_ramp(
                    input, start_channel, channels, dest_channel, start, end, now,
                );
            }
        }
    }

}
