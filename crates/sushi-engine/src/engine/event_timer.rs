//! Mapping between wall-clock timestamps and sample offsets within a chunk
//!
//! The audio frontend stamps each incoming chunk; the engine stamps each
//! outgoing one. Events scheduled in between get sub-chunk sample offsets
//! from those two anchors. Written by the audio thread, read by the
//! dispatcher, hence the atomics.

use std::sync::atomic::{AtomicU64, Ordering};

use sushi_core::{chunk_duration, Time, AUDIO_CHUNK_SIZE};

pub struct EventTimer {
    chunk_time_ns: AtomicU64,
    incoming_chunk_time_ns: AtomicU64,
    outgoing_chunk_time_ns: AtomicU64,
}

impl EventTimer {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            chunk_time_ns: AtomicU64::new(chunk_duration(sample_rate).as_nanos() as u64),
            incoming_chunk_time_ns: AtomicU64::new(0),
            outgoing_chunk_time_ns: AtomicU64::new(0),
        }
    }

    pub fn set_sample_rate(&self, sample_rate: f32) {
        self.chunk_time_ns
            .store(chunk_duration(sample_rate).as_nanos() as u64, Ordering::Relaxed);
    }

    /// Timestamp of the chunk currently entering the engine.
    pub fn set_incoming_time(&self, timestamp: Time) {
        self.incoming_chunk_time_ns
            .store(timestamp.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Timestamp of the chunk most recently produced by the engine.
    pub fn set_outgoing_time(&self, timestamp: Time) {
        self.outgoing_chunk_time_ns
            .store(timestamp.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Offset within the current chunk for an event due at `timestamp`, or
    /// None if it falls beyond this chunk.
    pub fn sample_offset_from_realtime(&self, timestamp: Time) -> Option<u32> {
        let incoming = self.incoming_chunk_time_ns.load(Ordering::Relaxed);
        let chunk_time = self.chunk_time_ns.load(Ordering::Relaxed);
        let timestamp = timestamp.as_nanos() as u64;

        // Events from the past land at offset zero
        let diff = timestamp.saturating_sub(incoming);
        if diff < chunk_time {
            Some((AUDIO_CHUNK_SIZE as u64 * diff / chunk_time) as u32)
        } else {
            None
        }
    }

    /// Wall-clock time of a sample offset within the outgoing chunk.
    pub fn real_time_from_sample_offset(&self, offset: usize) -> Time {
        let outgoing = self.outgoing_chunk_time_ns.load(Ordering::Relaxed);
        let chunk_time = self.chunk_time_ns.load(Ordering::Relaxed);
        Time::from_nanos(outgoing + offset as u64 * chunk_time / AUDIO_CHUNK_SIZE as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE_RATE: f32 = 48000.0;

    #[test]
    fn test_offset_within_chunk() {
        let timer = EventTimer::new(SAMPLE_RATE);
        timer.set_incoming_time(Duration::from_millis(10));

        // Exactly at chunk start
        assert_eq!(
            timer.sample_offset_from_realtime(Duration::from_millis(10)),
            Some(0)
        );
        // Half a chunk in (chunk is 4/3 ms at 48 kHz)
        let offset = timer
            .sample_offset_from_realtime(Duration::from_millis(10) + Duration::from_nanos(666_666))
            .unwrap();
        assert!((31..=33).contains(&(offset as i32)), "offset was {}", offset);
    }

    #[test]
    fn test_past_events_clamp_to_zero() {
        let timer = EventTimer::new(SAMPLE_RATE);
        timer.set_incoming_time(Duration::from_millis(10));
        assert_eq!(
            timer.sample_offset_from_realtime(Duration::from_millis(5)),
            Some(0)
        );
    }

    #[test]
    fn test_future_events_are_deferred() {
        let timer = EventTimer::new(SAMPLE_RATE);
        timer.set_incoming_time(Duration::from_millis(10));
        assert_eq!(
            timer.sample_offset_from_realtime(Duration::from_millis(12)),
            None
        );
    }

    #[test]
    fn test_real_time_from_offset() {
        let timer = EventTimer::new(SAMPLE_RATE);
        timer.set_outgoing_time(Duration::from_millis(20));
        let t = timer.real_time_from_sample_offset(AUDIO_CHUNK_SIZE / 2);
        assert_eq!(t, Duration::from_millis(20) + Duration::from_nanos(666_666));
    }
}
