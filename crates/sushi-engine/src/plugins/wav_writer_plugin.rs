//! Wav file writer
//!
//! The audio thread pushes samples into a lock-free ring; a dedicated
//! writer thread drains it and writes the file with hound. Arming and
//! disarming happens through the `recording` parameter, the target path
//! through the `destination_file` property.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sushi_core::{ObjectId, ObjectIdSource, Sample, SampleBuffer, SpscFifo, AUDIO_CHUNK_SIZE};

use crate::library::parameters::{Direction, ParameterIndex, ParameterStore, PreProcessor};
use crate::library::processor::{HostControl, Processor, ProcessorData, ProcessorReturnCode};

pub const PLUGIN_UID: &str = "sushi.testing.wav_writer";
const DEFAULT_LABEL: &str = "Wav writer";

const WRITER_CHANNELS: usize = 2;
/// About 1.4 s of stereo audio at 48 kHz.
const RING_BUFFER_SIZE: usize = 1 << 17;
const WRITER_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct WavWriterPlugin {
    data: ProcessorData,
    recording: ParameterIndex,
    #[allow(dead_code)]
    write_speed: ParameterIndex,
    dest_property_id: ObjectId,
    ring: Arc<SpscFifo<Sample>>,
    stop_flag: Arc<AtomicBool>,
    writer_started: bool,
}

impl WavWriterPlugin {
    pub fn new(host: HostControl, ids: &ObjectIdSource) -> Self {
        let mut builder = ParameterStore::builder();
        let recording =
            builder.register_bool_parameter(ids, "recording", "Recording", false, Direction::Automatable);
        let write_speed = builder.register_float_parameter(
            ids,
            "write_speed",
            "Write Speed",
            "writes/s",
            10.0,
            1.0,
            100.0,
            Direction::Automatable,
            PreProcessor::Linear,
        );
        let dest_property_id =
            builder.register_property(ids, "destination_file", "Destination file", "");

        let mut data = ProcessorData::new(ids.next(), builder.build(), host);
        data.name = PLUGIN_UID.to_string();
        data.label = DEFAULT_LABEL.to_string();
        data.max_input_channels = WRITER_CHANNELS;
        data.max_output_channels = WRITER_CHANNELS;

        Self {
            data,
            recording,
            write_speed,
            dest_property_id,
            ring: Arc::new(SpscFifo::new(RING_BUFFER_SIZE)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            writer_started: false,
        }
    }
}

impl Processor for WavWriterPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn init(&mut self, sample_rate: f32) -> ProcessorReturnCode {
        self.data.sample_rate = sample_rate;
        if !self.writer_started {
            let worker = WriterWorker {
                ring: self.ring.clone(),
                store: self.data.store.clone(),
                recording: self.recording,
                dest_property_id: self.dest_property_id,
                stop_flag: self.stop_flag.clone(),
                sample_rate: sample_rate as u32,
            };
            if let Err(e) = std::thread::Builder::new()
                .name("wav_writer".to_string())
                .spawn(move || worker.run())
            {
                log::error!("Failed to start wav writer thread: {}", e);
                return ProcessorReturnCode::Error;
            }
            self.writer_started = true;
        }
        ProcessorReturnCode::Ok
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        output.replace(input);

        if self.data.store.bool_value(self.recording) {
            // Interleave into the ring; overflow drops samples rather than
            // stalling the audio thread
            for n in 0..AUDIO_CHUNK_SIZE {
                for channel in 0..WRITER_CHANNELS {
                    let sample = if channel < input.channel_count() {
                        input.channel(channel)[n]
                    } else {
                        0.0
                    };
                    if self.ring.push(sample).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

impl Drop for WavWriterPlugin {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
    }
}

struct WriterWorker {
    ring: Arc<SpscFifo<Sample>>,
    store: Arc<ParameterStore>,
    recording: ParameterIndex,
    dest_property_id: ObjectId,
    stop_flag: Arc<AtomicBool>,
    sample_rate: u32,
}

impl WriterWorker {
    fn run(self) {
        let spec = hound::WavSpec {
            channels: WRITER_CHANNELS as u16,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer: Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>> = None;

        loop {
            let stopping = self.stop_flag.load(Ordering::Acquire);
            let armed = self.store.bool_value(self.recording) && !stopping;

            if armed && writer.is_none() {
                let path = self
                    .store
                    .property_value(self.dest_property_id)
                    .unwrap_or_default();
                if path.is_empty() {
                    log::warn!("Wav writer armed without a destination file");
                } else {
                    match hound::WavWriter::create(&path, spec) {
                        Ok(w) => {
                            log::info!("Wav writer recording to {}", path);
                            writer = Some(w);
                        }
                        Err(e) => log::error!("Failed to open {}: {}", path, e),
                    }
                }
            }

            if let Some(w) = writer.as_mut() {
                while let Some(sample) = self.ring.pop() {
                    if let Err(e) = w.write_sample(sample) {
                        log::error!("Wav write failed: {}", e);
                        break;
                    }
                }
            } else {
                // Nothing to write to; discard so the ring never backs up
                while self.ring.pop().is_some() {}
            }

            if (!armed || stopping) && writer.is_some() {
                if let Some(w) = writer.take() {
                    if let Err(e) = w.finalize() {
                        log::error!("Failed to finalize wav file: {}", e);
                    }
                }
            }

            if stopping {
                break;
            }
            std::thread::sleep(WRITER_POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::processor::tests::test_host_control;

    #[test]
    fn test_records_audio_to_file() {
        let ids = ObjectIdSource::new();
        let mut plugin = WavWriterPlugin::new(test_host_control(), &ids);

        let path = std::env::temp_dir().join("sushi_wav_writer_test.wav");
        let _ = std::fs::remove_file(&path);
        plugin
            .data
            .store
            .swap_property_value(plugin.dest_property_id, path.to_str().unwrap().to_string());

        plugin.init(48000.0);
        plugin.data.store.set_normalized(plugin.recording, 1.0);

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.5);
        let mut output = SampleBuffer::new(2);
        for _ in 0..8 {
            plugin.process_audio(&input, &mut output);
        }
        assert_eq!(output.channel(0)[0], 0.5);

        // Give the writer thread time to open the file and drain the ring,
        // then disarm and let it finalize
        std::thread::sleep(Duration::from_millis(300));
        plugin.data.store.set_normalized(plugin.recording, 0.0);
        std::thread::sleep(Duration::from_millis(300));
        drop(plugin);

        let reader = hound::WavReader::open(&path).expect("wav file was written");
        assert_eq!(reader.spec().channels, 2);
        assert!(reader.len() >= 8 * AUDIO_CHUNK_SIZE as u32);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_not_recording_passes_audio_only() {
        let ids = ObjectIdSource::new();
        let mut plugin = WavWriterPlugin::new(test_host_control(), &ids);
        plugin.init(48000.0);

        let mut input = SampleBuffer::new(2);
        input.channel_mut(1).fill(-0.25);
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);
        assert_eq!(output.channel(1)[0], -0.25);
        assert!(plugin.ring.is_empty());
    }
}
