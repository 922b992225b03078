//! Peak meter with clip detection
//!
//! Passes audio through untouched and reports per-channel levels as OUTPUT
//! parameters normalised to a -120..+24 dB window. Peaks update immediately,
//! decays are smoothed by a one-pole with a 250 ms fall time, and a clip
//! indicator latches for five seconds.

use std::time::Duration;

use sushi_core::{ObjectIdSource, SampleBuffer, AUDIO_CHUNK_SIZE};
use sushi_dsp::ValueSmoother;

use crate::library::parameters::{Direction, ParameterIndex, ParameterStore, PreProcessor};
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};
use crate::library::rt_event::RtEvent;

pub const PLUGIN_UID: &str = "sushi.testing.peakmeter";
const DEFAULT_LABEL: &str = "Peak Meter";

const MAX_METERED_CHANNELS: usize = 2;

const DEFAULT_REFRESH_RATE: f32 = 25.0;
/// Time for the meters to fall roughly 10 dB.
const REFRESH_TIME: Duration = Duration::from_millis(250);
const CLIP_HOLD_TIME: Duration = Duration::from_secs(5);

// Output parameter range
const OUTPUT_MIN_DB: f32 = -120.0;
const OUTPUT_MAX_DB: f32 = 24.0;
const OUTPUT_MIN_GAIN: f32 = 1.0e-6;

/// Convert linear gain to the normalised dB window of the output parameters.
fn to_normalised_db(gain: f32) -> f32 {
    let db = 20.0 * gain.max(OUTPUT_MIN_GAIN).log10();
    ((db - OUTPUT_MIN_DB) / (OUTPUT_MAX_DB - OUTPUT_MIN_DB)).clamp(0.0, 1.0)
}

pub struct PeakMeterPlugin {
    data: ProcessorData,
    link_channels: ParameterIndex,
    peaks_only: ParameterIndex,
    update_rate: ParameterIndex,
    update_rate_id: sushi_core::ObjectId,
    levels: [ParameterIndex; MAX_METERED_CHANNELS],
    clips: [ParameterIndex; MAX_METERED_CHANNELS],
    smoothers: [ValueSmoother; MAX_METERED_CHANNELS],
    clipped: [bool; MAX_METERED_CHANNELS],
    clip_hold_count: [usize; MAX_METERED_CHANNELS],
    clip_hold_samples: usize,
    refresh_interval: usize,
    sample_count: usize,
    peak_hysteresis: bool,
}

impl PeakMeterPlugin {
    pub fn new(host: HostControl, ids: &ObjectIdSource) -> Self {
        let mut builder = ParameterStore::builder();
        let link_channels =
            builder.register_bool_parameter(ids, "link_channels", "Link Channels 1 & 2", false, Direction::Automatable);
        let peaks_only =
            builder.register_bool_parameter(ids, "peaks_only", "Peaks Only", false, Direction::Automatable);
        let update_rate = builder.register_float_parameter(
            ids,
            "update_rate",
            "Update Rate",
            "/s",
            DEFAULT_REFRESH_RATE,
            0.1,
            DEFAULT_REFRESH_RATE,
            Direction::Automatable,
            PreProcessor::Linear,
        );

        let levels = [0, 1].map(|channel| {
            builder.register_float_parameter(
                ids,
                &format!("level_{}", channel),
                &format!("Level ch {}", channel),
                "dB",
                OUTPUT_MIN_DB,
                OUTPUT_MIN_DB,
                OUTPUT_MAX_DB,
                Direction::Output,
                PreProcessor::DbToLin,
            )
        });
        let clips = [0, 1].map(|channel| {
            builder.register_bool_parameter(
                ids,
                &format!("clip_{}", channel),
                &format!("Clip ch {}", channel),
                false,
                Direction::Output,
            )
        });

        let store = builder.build();
        let update_rate_id = store.descriptors()[2].id;
        let mut data = ProcessorData::new(ids.next(), store, host);
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();
        data.max_input_channels = MAX_METERED_CHANNELS;
        data.max_output_channels = MAX_METERED_CHANNELS;

        Self {
            data,
            link_channels,
            peaks_only,
            update_rate,
            update_rate_id,
            levels,
            clips,
            smoothers: Default::default(),
            clipped: [false; MAX_METERED_CHANNELS],
            clip_hold_count: [0; MAX_METERED_CHANNELS],
            clip_hold_samples: 0,
            refresh_interval: 0,
            sample_count: 0,
            peak_hysteresis: false,
        }
    }

    fn update_refresh_interval(&mut self, rate: f32, sample_rate: f32) {
        self.refresh_interval = (sample_rate / rate).round() as usize;
        self.clip_hold_samples = (sample_rate * CLIP_HOLD_TIME.as_secs_f32()) as usize;
        let update_rate = sample_rate / AUDIO_CHUNK_SIZE as f32;
        for smoother in &mut self.smoothers {
            smoother.set_lag_time(REFRESH_TIME, update_rate);
        }
    }

    fn set_output_and_notify(&self, index: ParameterIndex, value: f32) {
        self.data.store.set_normalized(index, value);
        let parameter_id = self.data.store.descriptor_at(index).id;
        self.data
            .output_event(RtEvent::parameter_change(self.data.id, 0, parameter_id, value));
    }

    fn process_peak_detection(&mut self, input: &SampleBuffer, linked: bool, peaks_only: bool) {
        let channels = MAX_METERED_CHANNELS.min(input.channel_count());
        let mut peak = [0.0_f32; MAX_METERED_CHANNELS];
        for (channel, value) in peak.iter_mut().enumerate().take(channels) {
            *value = input.calc_peak_value(channel);
        }

        if linked && channels > 1 {
            let max_peak = peak[0].max(peak[1]);
            peak[0] = max_peak;
            peak[1] = max_peak;
        }

        self.sample_count += AUDIO_CHUNK_SIZE;
        let mut update = false;
        if self.sample_count > self.refresh_interval {
            self.sample_count -= self.refresh_interval;
            update = true;
            if peaks_only {
                update = self.peak_hysteresis;
            }
        }

        for channel in 0..channels {
            let value = peak[channel];
            let level_id = self.levels[channel];
            if value > self.smoothers[channel].value() {
                // Instantaneous peaks register immediately, decays are
                // rate-limited through the smoother
                self.smoothers[channel].set_direct(value);
                self.peak_hysteresis = true;
            } else {
                self.smoothers[channel].set(value);
            }
            if update {
                let normalised = to_normalised_db(self.smoothers[channel].value());
                self.set_output_and_notify(level_id, normalised);
                self.peak_hysteresis = false;
            }
            self.smoothers[channel].next_value();
        }
    }

    fn process_clip_detection(&mut self, input: &SampleBuffer, linked: bool) {
        let channels = MAX_METERED_CHANNELS.min(input.channel_count());
        let mut clipped_ch = [false; MAX_METERED_CHANNELS];
        for (channel, clipped) in clipped_ch.iter_mut().enumerate().take(channels) {
            *clipped = input.count_clipped_samples(channel) > 0;
        }

        if linked && channels > 1 {
            let any = clipped_ch[0] || clipped_ch[1];
            clipped_ch[0] = any;
            clipped_ch[1] = any;
        }

        for channel in 0..channels {
            if clipped_ch[channel] {
                self.clip_hold_count[channel] = 0;
                if !self.clipped[channel] {
                    self.clipped[channel] = true;
                    self.set_output_and_notify(self.clips[channel], 1.0);
                }
            } else if self.clipped[channel] && self.clip_hold_count[channel] > self.clip_hold_samples
            {
                self.clipped[channel] = false;
                self.set_output_and_notify(self.clips[channel], 0.0);
            }
            self.clip_hold_count[channel] += AUDIO_CHUNK_SIZE;
        }
    }
}

impl Processor for PeakMeterPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn init(&mut self, sample_rate: f32) -> ProcessorReturnCode {
        self.data.sample_rate = sample_rate;
        self.update_refresh_interval(DEFAULT_REFRESH_RATE, sample_rate);
        ProcessorReturnCode::Ok
    }

    fn configure(&mut self, sample_rate: f32) {
        self.data.sample_rate = sample_rate;
        let rate = self.data.store.processed_value(self.update_rate);
        self.update_refresh_interval(rate, sample_rate);
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        output.replace(input);

        let linked = self.data.store.bool_value(self.link_channels);
        let peaks_only = self.data.store.bool_value(self.peaks_only);
        self.process_peak_detection(input, linked, peaks_only);
        self.process_clip_detection(input, linked);
    }

    fn process_event(&mut self, event: RtEvent) {
        let update_rate_changed = matches!(
            &event,
            RtEvent::FloatParameterChange(e) if e.parameter_id == self.update_rate_id
        );
        self.data.process_generic_event(event);
        if update_rate_changed {
            let rate = self.data.store.processed_value(self.update_rate);
            let sample_rate = self.data.sample_rate;
            self.update_refresh_interval(rate, sample_rate);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::processor::tests::test_host_control;

    const SAMPLE_RATE: f32 = 48000.0;

    fn make_plugin() -> PeakMeterPlugin {
        let ids = ObjectIdSource::new();
        let mut plugin = PeakMeterPlugin::new(test_host_control(), &ids);
        plugin.init(SAMPLE_RATE);
        plugin
    }

    #[test]
    fn test_audio_passes_through() {
        let mut plugin = make_plugin();
        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.3);
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);
        assert_eq!(output.channel(0), input.channel(0));
    }

    #[test]
    fn test_level_output_follows_signal() {
        let mut plugin = make_plugin();
        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(1.0);
        let mut output = SampleBuffer::new(2);

        // Run for longer than one refresh interval
        let chunks = plugin.refresh_interval / AUDIO_CHUNK_SIZE + 2;
        for _ in 0..chunks {
            plugin.process_audio(&input, &mut output);
        }
        // 0 dB input: normalised level = 120/144
        let level = plugin.data.store.normalized_value(plugin.levels[0]);
        assert!((level - 120.0 / 144.0).abs() < 0.01, "level was {}", level);
    }

    #[test]
    fn test_clip_latch_holds_for_five_seconds() {
        let mut plugin = make_plugin();
        let mut input = SampleBuffer::new(2);
        input.channel_mut(0)[0] = 1.5;
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);

        assert_eq!(plugin.data.store.normalized_value(plugin.clips[0]), 1.0);

        // Safe levels for just under five seconds: still latched
        input.clear();
        let chunks_per_second = SAMPLE_RATE as usize / AUDIO_CHUNK_SIZE;
        for _ in 0..(4 * chunks_per_second) {
            plugin.process_audio(&input, &mut output);
        }
        assert_eq!(plugin.data.store.normalized_value(plugin.clips[0]), 1.0);

        // Past the hold time the latch releases
        for _ in 0..(2 * chunks_per_second) {
            plugin.process_audio(&input, &mut output);
        }
        assert_eq!(plugin.data.store.normalized_value(plugin.clips[0]), 0.0);
    }
}
