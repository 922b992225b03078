//! sushi-core: shared types, constants and lock-free primitives
//!
//! Foundation crate for the Sushi engine. Everything here is either plain
//! data or wait-free, so it can be used from the audio thread without
//! restrictions.

mod buffer;
mod fifo;
mod id;
mod rt;
mod time;

pub use buffer::*;
pub use fifo::*;
pub use id::*;
pub use rt::*;
pub use time::*;

/// Audio sample type used throughout the engine.
pub type Sample = f32;

/// The number of samples processed in one chunk. Compile-time constant to
/// give the optimizer fixed loop bounds in every DSP inner loop.
pub const AUDIO_CHUNK_SIZE: usize = 64;

/// Maximum number of audio channels on a single track.
pub const MAX_TRACK_CHANNELS: usize = 8;

/// Maximum number of stereo buses on a multibus track.
pub const MAX_TRACK_BUSES: usize = MAX_TRACK_CHANNELS / 2;

/// Maximum number of processors chained on one track.
pub const TRACK_MAX_PROCESSORS: usize = 32;

/// Number of control voltage ports in each direction.
pub const MAX_ENGINE_CV_IO_PORTS: usize = 4;

/// Number of gate ports in each direction.
pub const MAX_ENGINE_GATE_PORTS: usize = 8;

/// Highest note number addressable through a gate connection.
pub const MAX_ENGINE_GATE_NOTE_NO: i32 = 127;

/// Convert a decibel value to linear gain.
#[inline]
pub fn db_to_lin(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a linear gain value to decibels.
#[inline]
pub fn lin_to_db(gain: f32) -> f32 {
    if gain <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * gain.log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_db_conversion() {
        assert_relative_eq!(db_to_lin(0.0), 1.0);
        assert_relative_eq!(db_to_lin(6.0), 1.9952623, epsilon = 1e-5);
        assert_relative_eq!(lin_to_db(db_to_lin(-36.5)), -36.5, epsilon = 1e-4);
        assert_eq!(lin_to_db(0.0), f32::NEG_INFINITY);
    }
}
