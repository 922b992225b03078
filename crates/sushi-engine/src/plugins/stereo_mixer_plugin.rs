//! Stereo mixer
//!
//! Routes two input channels to the stereo output with independent pan,
//! gain and phase invert per channel. Uses the same pan law as the tracks
//! but scaled by 1/K so the default settings are an exact passthrough.

use sushi_core::{ObjectIdSource, SampleBuffer};
use sushi_dsp::{ValueSmoother, GAIN_SMOOTHING_TIME};

use crate::engine::track::{calc_l_r_gain, PAN_GAIN_3_DB};
use crate::library::parameters::{Direction, ParameterIndex, ParameterStore, PreProcessor};
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};

pub const PLUGIN_UID: &str = "sushi.testing.stereo_mixer";
const DEFAULT_LABEL: &str = "Stereo Mixer";

const MAX_CHANNELS_SUPPORTED: usize = 2;

/// Track pan law scaled to unity gain at the default passthrough setting.
fn calc_mixer_l_r_gain(gain: f32, pan: f32) -> (f32, f32) {
    let (left, right) = calc_l_r_gain(gain, pan);
    (left / PAN_GAIN_3_DB, right / PAN_GAIN_3_DB)
}

pub struct StereoMixerPlugin {
    data: ProcessorData,
    ch1_pan: ParameterIndex,
    ch1_gain: ParameterIndex,
    ch1_invert_phase: ParameterIndex,
    ch2_pan: ParameterIndex,
    ch2_gain: ParameterIndex,
    ch2_invert_phase: ParameterIndex,
    ch1_left: ValueSmoother,
    ch1_right: ValueSmoother,
    ch2_left: ValueSmoother,
    ch2_right: ValueSmoother,
}

impl StereoMixerPlugin {
    pub fn new(host: HostControl, ids: &ObjectIdSource) -> Self {
        let mut builder = ParameterStore::builder();
        let ch1_pan = builder.register_float_parameter(
            ids, "ch1_pan", "Channel 1 Pan", "", -1.0, -1.0, 1.0,
            Direction::Automatable, PreProcessor::Linear,
        );
        let ch1_gain = builder.register_float_parameter(
            ids, "ch1_gain", "Channel 1 Gain", "", 0.0, -120.0, 24.0,
            Direction::Automatable, PreProcessor::DbToLin,
        );
        let ch1_invert_phase = builder.register_float_parameter(
            ids, "ch1_invert_phase", "Channel 1 Invert Phase", "", 0.0, 0.0, 1.0,
            Direction::Automatable, PreProcessor::Linear,
        );
        let ch2_pan = builder.register_float_parameter(
            ids, "ch2_pan", "Channel 2 Pan", "", 1.0, -1.0, 1.0,
            Direction::Automatable, PreProcessor::Linear,
        );
        let ch2_gain = builder.register_float_parameter(
            ids, "ch2_gain", "Channel 2 Gain", "", 0.0, -120.0, 24.0,
            Direction::Automatable, PreProcessor::DbToLin,
        );
        let ch2_invert_phase = builder.register_float_parameter(
            ids, "ch2_invert_phase", "Channel 2 Invert Phase", "", 0.0, 0.0, 1.0,
            Direction::Automatable, PreProcessor::Linear,
        );

        let mut data = ProcessorData::new(ids.next(), builder.build(), host);
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();
        data.max_input_channels = MAX_CHANNELS_SUPPORTED;
        data.max_output_channels = MAX_CHANNELS_SUPPORTED;

        let mut plugin = Self {
            data,
            ch1_pan,
            ch1_gain,
            ch1_invert_phase,
            ch2_pan,
            ch2_gain,
            ch2_invert_phase,
            ch1_left: ValueSmoother::new(1.0),
            ch1_right: ValueSmoother::new(0.0),
            ch2_left: ValueSmoother::new(0.0),
            ch2_right: ValueSmoother::new(1.0),
        };
        plugin.ch1_left.set_direct(1.0);
        plugin.ch1_right.set_direct(0.0);
        plugin.ch2_left.set_direct(0.0);
        plugin.ch2_right.set_direct(1.0);
        plugin
    }
}

impl Processor for StereoMixerPlugin {
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
        let update_rate = sample_rate / sushi_core::AUDIO_CHUNK_SIZE as f32;
        for smoother in [
            &mut self.ch1_left,
            &mut self.ch1_right,
            &mut self.ch2_left,
            &mut self.ch2_right,
        ] {
            smoother.set_lag_time(GAIN_SMOOTHING_TIME, update_rate);
        }
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        output.clear();

        let store = &self.data.store;
        let invert_ch1 = if store.processed_value(self.ch1_invert_phase) > 0.5 { -1.0 } else { 1.0 };
        let (ch1_left, ch1_right) = calc_mixer_l_r_gain(
            store.processed_value(self.ch1_gain) * invert_ch1,
            store.processed_value(self.ch1_pan),
        );
        self.ch1_left.set(ch1_left);
        self.ch1_right.set(ch1_right);

        let invert_ch2 = if store.processed_value(self.ch2_invert_phase) > 0.5 { -1.0 } else { 1.0 };
        let (ch2_left, ch2_right) = calc_mixer_l_r_gain(
            store.processed_value(self.ch2_gain) * invert_ch2,
            store.processed_value(self.ch2_pan),
        );
        self.ch2_left.set(ch2_left);
        self.ch2_right.set(ch2_right);

        if !self.data.bypass.bypassed() {
            if input.channel_count() >= 2 {
                if self.ch1_left.stationary()
                    && self.ch1_right.stationary()
                    && self.ch2_left.stationary()
                    && self.ch2_right.stationary()
                {
                    output.add_channel_with_gain(0, input, 0, ch1_left);
                    output.add_channel_with_gain(1, input, 0, ch1_right);
                    output.add_channel_with_gain(0, input, 1, ch2_left);
                    output.add_channel_with_gain(1, input, 1, ch2_right);
                } else {
                    output.add_channel_with_ramp(0, input, 0, self.ch1_left.value(), self.ch1_left.next_value());
                    output.add_channel_with_ramp(1, input, 0, self.ch1_right.value(), self.ch1_right.next_value());
                    output.add_channel_with_ramp(0, input, 1, self.ch2_left.value(), self.ch2_left.next_value());
                    output.add_channel_with_ramp(1, input, 1, self.ch2_right.value(), self.ch2_right.next_value());
                }
            } else {
                // Mono input passes straight through
                output.add(input);
            }
        } else {
            output.replace(input);
        }
    }
}
