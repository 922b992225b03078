//! Timestamps with nanosecond granularity
//!
//! All engine timestamps are durations since an arbitrary process-local
//! monotonic epoch, so they can be compared and subtracted freely.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Timestamp type used for event and transport times.
pub type Time = Duration;

/// Zero timestamp constant.
pub const IMMEDIATE_PROCESS: Time = Duration::ZERO;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Current monotonic time relative to the process epoch.
///
/// Not for use on the audio thread; the audio callback receives its time from
/// the host and must stay off the system clock.
pub fn monotonic_time() -> Time {
    epoch().elapsed()
}

/// Duration of one audio chunk at the given sample rate.
#[inline]
pub fn chunk_duration(sample_rate: f32) -> Time {
    Duration::from_nanos((1e9_f64 * crate::AUDIO_CHUNK_SIZE as f64 / sample_rate as f64).round() as u64)
}
