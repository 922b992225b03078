//! Transport: time, tempo and play state
//!
//! The engine calls `set_time()` exactly once at the top of every chunk;
//! everything musical (beats, bars) is derived from the sample count there.
//! Tempo and signature changes are chunk-quantized: they take effect at the
//! next chunk start, not sample-accurately.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use portable_atomic::AtomicF32;
use serde::{Deserialize, Serialize};

use sushi_core::{Time, AUDIO_CHUNK_SIZE};

use crate::library::rt_event::RtEvent;

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS & VALUE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

pub const MIN_TEMPO: f32 = 20.0;
pub const MAX_TEMPO: f32 = 400.0;
pub const DEFAULT_TEMPO: f32 = 120.0;

/// Time signature (e.g. 4/4, 6/8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: i32,
    pub denominator: i32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlayingMode {
    #[default]
    Stopped,
    Playing,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SyncMode {
    #[default]
    Internal,
    Midi,
    AbletonLink,
}

/// Play-state transition visible to processors for exactly one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStateChange {
    Unchanged,
    Starting,
    Stopping,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCK-FREE VIEW
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of the transport readable from any thread without locks.
/// Updated by the audio thread once per chunk.
pub struct TransportView {
    process_time_ns: AtomicU64,
    sample_count: AtomicI64,
    tempo: AtomicF32,
    playing: AtomicBool,
    state_change: std::sync::atomic::AtomicU8,
}

impl TransportView {
    pub fn new() -> Self {
        Self {
            process_time_ns: AtomicU64::new(0),
            sample_count: AtomicI64::new(0),
            tempo: AtomicF32::new(DEFAULT_TEMPO),
            playing: AtomicBool::new(false),
            state_change: std::sync::atomic::AtomicU8::new(0),
        }
    }

    fn update(
        &self,
        time: Time,
        samples: i64,
        tempo: f32,
        playing: bool,
        state_change: PlayStateChange,
    ) {
        self.process_time_ns
            .store(time.as_nanos() as u64, Ordering::Relaxed);
        self.sample_count.store(samples, Ordering::Relaxed);
        self.tempo.store(tempo, Ordering::Relaxed);
        self.playing.store(playing, Ordering::Relaxed);
        let encoded = match state_change {
            PlayStateChange::Unchanged => 0,
            PlayStateChange::Starting => 1,
            PlayStateChange::Stopping => 2,
        };
        self.state_change.store(encoded, Ordering::Relaxed);
    }

    pub fn current_process_time(&self) -> Time {
        Time::from_nanos(self.process_time_ns.load(Ordering::Relaxed))
    }

    pub fn current_samples(&self) -> i64 {
        self.sample_count.load(Ordering::Relaxed)
    }

    pub fn current_tempo(&self) -> f32 {
        self.tempo.load(Ordering::Relaxed)
    }

    pub fn playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    /// Play-state transition of the chunk most recently processed.
    pub fn current_state_change(&self) -> PlayStateChange {
        match self.state_change.load(Ordering::Relaxed) {
            1 => PlayStateChange::Starting,
            2 => PlayStateChange::Stopping,
            _ => PlayStateChange::Unchanged,
        }
    }
}

impl Default for TransportView {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

/// The musical clock, owned by the audio domain.
pub struct Transport {
    sample_count: i64,
    time: Time,
    latency: Time,
    sample_rate: f32,
    tempo: f32,
    time_signature: TimeSignature,
    playmode: PlayingMode,
    pending_playmode: PlayingMode,
    sync_mode: SyncMode,
    state_change: PlayStateChange,
    beat_count: f64,
    beats_per_chunk: f64,
    beats_per_bar: f64,
    current_bar_beat_count: f64,
    bar_start_beat_count: f64,
    view: Arc<TransportView>,
}

impl Transport {
    pub fn new(sample_rate: f32, view: Arc<TransportView>) -> Self {
        let mut transport = Self {
            sample_count: 0,
            time: Time::ZERO,
            latency: Time::ZERO,
            sample_rate,
            tempo: DEFAULT_TEMPO,
            time_signature: TimeSignature::default(),
            playmode: PlayingMode::Stopped,
            pending_playmode: PlayingMode::Stopped,
            sync_mode: SyncMode::Internal,
            state_change: PlayStateChange::Unchanged,
            beat_count: 0.0,
            beats_per_chunk: 0.0,
            beats_per_bar: 4.0,
            current_bar_beat_count: 0.0,
            bar_start_beat_count: 0.0,
            view,
        };
        transport.update_internals();
        transport
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.update_internals();
    }

    pub fn set_latency(&mut self, latency: Time) {
        self.latency = latency;
    }

    /// Called exactly once per chunk by the engine before anything renders.
    pub fn set_time(&mut self, timestamp: Time, samples: i64) {
        self.time = timestamp + self.latency;
        let prev_samples = self.sample_count;
        self.update_internals();

        // A missed callback is assumed to still advance the sample count by
        // an even multiple of the chunk size
        let chunks_passed = (samples - prev_samples) / AUDIO_CHUNK_SIZE as i64;
        self.sample_count = samples;

        self.state_change = match (self.playmode, self.pending_playmode) {
            (a, b) if a == b => PlayStateChange::Unchanged,
            (PlayingMode::Stopped, _) => PlayStateChange::Starting,
            (_, PlayingMode::Stopped) => PlayStateChange::Stopping,
            _ => PlayStateChange::Unchanged,
        };
        self.playmode = self.pending_playmode;

        self.current_bar_beat_count += chunks_passed as f64 * self.beats_per_chunk;
        if self.current_bar_beat_count > self.beats_per_bar {
            self.current_bar_beat_count %= self.beats_per_bar;
            self.bar_start_beat_count += self.beats_per_bar;
        }
        self.beat_count += chunks_passed as f64 * self.beats_per_chunk;

        self.view.update(
            self.time,
            samples,
            self.tempo,
            self.playing(),
            self.state_change,
        );
    }

    /// Set the tempo. With `realtime_running` the change arrives through the
    /// control queue instead and is applied by `process_event`.
    pub fn set_tempo(&mut self, tempo: f32, realtime_running: bool) {
        if !realtime_running {
            self.tempo = tempo.clamp(MIN_TEMPO, MAX_TEMPO);
            self.update_internals();
        }
    }

    /// Invalid signatures (non-positive fields) are rejected silently.
    pub fn set_time_signature(&mut self, signature: TimeSignature, realtime_running: bool) {
        if signature.numerator <= 0 || signature.denominator <= 0 {
            return;
        }
        if !realtime_running {
            self.time_signature = signature;
            self.update_internals();
        }
    }

    pub fn set_playing_mode(&mut self, mode: PlayingMode, realtime_running: bool) {
        if !realtime_running {
            self.pending_playmode = mode;
        }
    }

    pub fn set_sync_mode(&mut self, mode: SyncMode, realtime_running: bool) {
        if !realtime_running {
            self.sync_mode = mode;
        }
    }

    /// Apply a transport control event on the audio thread.
    pub fn process_event(&mut self, event: RtEvent) {
        match event {
            RtEvent::Tempo { tempo } => {
                self.tempo = tempo.clamp(MIN_TEMPO, MAX_TEMPO);
                self.update_internals();
            }
            RtEvent::TimeSignature { signature } => {
                if signature.numerator > 0 && signature.denominator > 0 {
                    self.time_signature = signature;
                    self.update_internals();
                }
            }
            RtEvent::PlayingMode { mode } => self.pending_playmode = mode,
            RtEvent::SyncMode { mode } => self.sync_mode = mode,
            _ => {}
        }
    }

    pub fn current_samples(&self) -> i64 {
        self.sample_count
    }

    pub fn current_process_time(&self) -> Time {
        self.time
    }

    pub fn current_tempo(&self) -> f32 {
        self.tempo
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn playing_mode(&self) -> PlayingMode {
        self.playmode
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn playing(&self) -> bool {
        self.playmode != PlayingMode::Stopped
    }

    /// Play-state transition for the current chunk.
    pub fn current_state_change(&self) -> PlayStateChange {
        self.state_change
    }

    /// Total beat count at an offset in samples within the current chunk.
    pub fn current_beats(&self, sample_offset: usize) -> f64 {
        self.beat_count
            + self.beats_per_chunk * sample_offset as f64 / AUDIO_CHUNK_SIZE as f64
    }

    /// Position within the current bar at an offset within the chunk.
    pub fn current_bar_beats(&self, sample_offset: usize) -> f64 {
        let offset = self.beats_per_chunk * sample_offset as f64 / AUDIO_CHUNK_SIZE as f64;
        (self.current_bar_beat_count + offset) % self.beats_per_bar
    }

    pub fn current_bar_start_beats(&self) -> f64 {
        self.bar_start_beat_count
    }

    fn update_internals(&mut self) {
        debug_assert!(self.sample_rate > 0.0);
        self.beats_per_chunk =
            self.tempo as f64 / 60.0 * AUDIO_CHUNK_SIZE as f64 / self.sample_rate as f64;
        // Time signatures are remapped to quarter notes the way most DAWs do
        // it: 3/4 and 6/8 are identical and beat-synced with 4/4
        self.beats_per_bar =
            4.0 * self.time_signature.numerator as f64 / self.time_signature.denominator as f64;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Duration;

    const SAMPLE_RATE: f32 = 48000.0;

    fn make_transport() -> Transport {
        Transport::new(SAMPLE_RATE, Arc::new(TransportView::new()))
    }

    #[test]
    fn test_beats_in_common_time_at_120_bpm() {
        let mut transport = make_transport();
        transport.set_tempo(120.0, false);

        transport.set_time(Duration::from_secs(1), 48000);
        assert_relative_eq!(transport.current_beats(0), 2.0, epsilon = 1e-6);

        // One second later the bar wraps; give it one extra chunk so the
        // wrap point is unambiguous
        transport.set_time(Duration::from_secs(2), 96000);
        transport.set_time(
            Duration::from_secs(2) + sushi_core::chunk_duration(SAMPLE_RATE),
            96000 + AUDIO_CHUNK_SIZE as i64,
        );
        assert_relative_eq!(transport.current_bar_start_beats(), 4.0, epsilon = 1e-6);
        assert!(transport.current_bar_beats(0) < 0.01);
    }

    #[test]
    fn test_beats_in_six_eight_at_180_bpm() {
        let mut transport = make_transport();
        transport.set_tempo(180.0, false);
        transport.set_time_signature(
            TimeSignature {
                numerator: 6,
                denominator: 8,
            },
            false,
        );

        // 6/8 is remapped to 3 quarter-note beats per bar
        transport.set_time(Duration::from_millis(500), 24000);
        assert_relative_eq!(transport.current_beats(0), 1.5, epsilon = 0.01);
    }

    #[test]
    fn test_tempo_is_clamped() {
        let mut transport = make_transport();
        transport.set_tempo(1000.0, false);
        assert_eq!(transport.current_tempo(), MAX_TEMPO);
        transport.set_tempo(1.0, false);
        assert_eq!(transport.current_tempo(), MIN_TEMPO);
    }

    #[test]
    fn test_invalid_time_signature_rejected() {
        let mut transport = make_transport();
        transport.set_time_signature(
            TimeSignature {
                numerator: 0,
                denominator: 4,
            },
            false,
        );
        assert_eq!(transport.time_signature(), TimeSignature::default());
    }

    #[test]
    fn test_state_change_latch() {
        let mut transport = make_transport();
        transport.set_playing_mode(PlayingMode::Playing, false);

        transport.set_time(Duration::ZERO, 0);
        assert_eq!(transport.current_state_change(), PlayStateChange::Starting);
        assert!(transport.playing());

        transport.set_time(sushi_core::chunk_duration(SAMPLE_RATE), AUDIO_CHUNK_SIZE as i64);
        assert_eq!(transport.current_state_change(), PlayStateChange::Unchanged);

        transport.set_playing_mode(PlayingMode::Stopped, false);
        transport.set_time(Duration::from_millis(10), 2 * AUDIO_CHUNK_SIZE as i64);
        assert_eq!(transport.current_state_change(), PlayStateChange::Stopping);
    }

    #[test]
    fn test_transport_event_application() {
        let mut transport = make_transport();
        transport.process_event(RtEvent::Tempo { tempo: 140.0 });
        assert_eq!(transport.current_tempo(), 140.0);

        transport.process_event(RtEvent::SyncMode {
            mode: SyncMode::Midi,
        });
        assert_eq!(transport.sync_mode(), SyncMode::Midi);
    }

    #[test]
    fn test_view_is_updated() {
        let view = Arc::new(TransportView::new());
        let mut transport = Transport::new(SAMPLE_RATE, view.clone());
        transport.set_playing_mode(PlayingMode::Playing, false);
        transport.set_time(Duration::from_millis(100), 4800);

        assert_eq!(view.current_samples(), 4800);
        assert!(view.playing());
        assert_eq!(view.current_process_time(), Duration::from_millis(100));
    }
}
