//! Internal plugins
//!
//! The built-in processor set, addressable by stable UID strings through
//! [`create_internal_plugin`].

pub mod brickworks;
pub mod equalizer_plugin;
pub mod gain_plugin;
pub mod lfo_plugin;
pub mod mono_summing_plugin;
pub mod passthrough_plugin;
pub mod peak_meter_plugin;
pub mod return_plugin;
pub mod sample_delay_plugin;
pub mod send_plugin;
pub mod send_return;
pub mod stereo_mixer_plugin;
pub mod wav_writer_plugin;

use sushi_core::ObjectIdSource;

use crate::library::processor::{HostControl, Processor};

/// Instantiate an internal plugin by its UID. Returns None for unknown UIDs.
pub fn create_internal_plugin(
    uid: &str,
    host: HostControl,
    ids: &ObjectIdSource,
) -> Option<Box<dyn Processor>> {
    match uid {
        passthrough_plugin::PLUGIN_UID => {
            Some(Box::new(passthrough_plugin::PassthroughPlugin::new(host, ids)))
        }
        gain_plugin::PLUGIN_UID => Some(Box::new(gain_plugin::GainPlugin::new(host, ids))),
        equalizer_plugin::PLUGIN_UID => {
            Some(Box::new(equalizer_plugin::EqualizerPlugin::new(host, ids)))
        }
        peak_meter_plugin::PLUGIN_UID => {
            Some(Box::new(peak_meter_plugin::PeakMeterPlugin::new(host, ids)))
        }
        lfo_plugin::PLUGIN_UID => Some(Box::new(lfo_plugin::LfoPlugin::new(host, ids))),
        sample_delay_plugin::PLUGIN_UID => {
            Some(Box::new(sample_delay_plugin::SampleDelayPlugin::new(host, ids)))
        }
        mono_summing_plugin::PLUGIN_UID => {
            Some(Box::new(mono_summing_plugin::MonoSummingPlugin::new(host, ids)))
        }
        stereo_mixer_plugin::PLUGIN_UID => {
            Some(Box::new(stereo_mixer_plugin::StereoMixerPlugin::new(host, ids)))
        }
        send_plugin::PLUGIN_UID => Some(Box::new(send_plugin::SendPlugin::new(host, ids))),
        return_plugin::PLUGIN_UID => Some(Box::new(return_plugin::ReturnPlugin::new(host, ids))),
        wav_writer_plugin::PLUGIN_UID => {
            Some(Box::new(wav_writer_plugin::WavWriterPlugin::new(host, ids)))
        }
        brickworks::saturation_plugin::PLUGIN_UID => {
            Some(Box::new(brickworks::saturation_plugin::SaturationPlugin::new(host, ids)))
        }
        brickworks::simple_synth_plugin::PLUGIN_UID => {
            Some(Box::new(brickworks::simple_synth_plugin::SimpleSynthPlugin::new(host, ids)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::processor::tests::test_host_control;

    #[test]
    fn test_factory_knows_all_uids() {
        let ids = ObjectIdSource::new();
        let uids = [
            "sushi.testing.passthrough",
            "sushi.testing.gain",
            "sushi.testing.equalizer",
            "sushi.testing.peakmeter",
            "sushi.testing.lfo",
            "sushi.testing.sample_delay",
            "sushi.testing.mono_summing",
            "sushi.testing.stereo_mixer",
            "sushi.testing.send",
            "sushi.testing.return",
            "sushi.testing.wav_writer",
            "sushi.brickworks.saturation",
            "sushi.brickworks.simple_synth",
        ];
        for uid in uids {
            let plugin = create_internal_plugin(uid, test_host_control(), &ids);
            assert!(plugin.is_some(), "factory missing uid {}", uid);
            assert_eq!(plugin.unwrap().name(), uid);
        }
        assert!(create_internal_plugin("sushi.testing.unknown", test_host_control(), &ids).is_none());
    }
}
