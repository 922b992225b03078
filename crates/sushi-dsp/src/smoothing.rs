//! Parameter Value Smoothing
//!
//! One-pole lag filter advanced once per audio chunk. Prevents zipper noise
//! from abrupt parameter changes: the chunk-rate value pair
//! (`value()`, `next_value()`) feeds the per-sample gain ramps in
//! `SampleBuffer`.

use std::time::Duration;

use sushi_core::Time;

/// Default lag for gain-style parameters.
pub const GAIN_SMOOTHING_TIME: Time = Duration::from_millis(20);

/// Number of filter time constants fitted inside the configured lag time, so
/// the smoother is within ~5% of its target when the lag has elapsed.
const LAG_TIME_CONSTANTS: f32 = 3.0;

/// Snap-to-target threshold.
const STATIONARY_THRESHOLD: f32 = 1.0e-6;

/// One-pole lag smoother stepped at chunk rate.
///
/// `set()` only moves the target; `next_value()` advances one step. Callers
/// check `stationary()` to pick between a flat gain and a ramp.
#[derive(Debug, Clone)]
pub struct ValueSmoother {
    current: f32,
    target: f32,
    coeff: f32,
}

impl ValueSmoother {
    /// Create a smoother at rest on `value` with a default coefficient;
    /// call [`set_lag_time`](Self::set_lag_time) before use.
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            coeff: 0.0,
        }
    }

    /// Configure the lag. `update_rate` is the number of steps per second,
    /// i.e. `sample_rate / AUDIO_CHUNK_SIZE` for chunk-stepped smoothers.
    pub fn set_lag_time(&mut self, lag: Time, update_rate: f32) {
        let lag_steps = (lag.as_secs_f32() * update_rate).max(1.0);
        self.coeff = (-LAG_TIME_CONSTANTS / lag_steps).exp();
    }

    /// Set a new target to ramp towards.
    #[inline]
    pub fn set(&mut self, target: f32) {
        self.target = target;
    }

    /// Jump to a value immediately.
    #[inline]
    pub fn set_direct(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    /// Current value without advancing.
    #[inline]
    pub fn value(&self) -> f32 {
        self.current
    }

    /// Advance one step towards the target and return the new value.
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        self.current = self.target + (self.current - self.target) * self.coeff;
        if (self.current - self.target).abs() < STATIONARY_THRESHOLD {
            self.current = self.target;
        }
        self.current
    }

    /// True when the current value has reached the target.
    #[inline]
    pub fn stationary(&self) -> bool {
        (self.current - self.target).abs() < STATIONARY_THRESHOLD
    }
}

impl Default for ValueSmoother {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const UPDATE_RATE: f32 = 48000.0 / 64.0;

    #[test]
    fn test_set_direct() {
        let mut smoother = ValueSmoother::new(0.0);
        smoother.set_lag_time(GAIN_SMOOTHING_TIME, UPDATE_RATE);
        smoother.set_direct(1.0);
        assert_eq!(smoother.value(), 1.0);
        assert!(smoother.stationary());
    }

    #[test]
    fn test_ramp_towards_target() {
        let mut smoother = ValueSmoother::new(0.0);
        smoother.set_lag_time(GAIN_SMOOTHING_TIME, UPDATE_RATE);
        smoother.set(1.0);
        assert!(!smoother.stationary());

        let first = smoother.next_value();
        assert!(first > 0.0 && first < 1.0);

        let second = smoother.next_value();
        assert!(second > first);
    }

    #[test]
    fn test_converges_within_lag_time() {
        let mut smoother = ValueSmoother::new(0.0);
        smoother.set_lag_time(GAIN_SMOOTHING_TIME, UPDATE_RATE);
        smoother.set(1.0);

        let steps = (GAIN_SMOOTHING_TIME.as_secs_f32() * UPDATE_RATE).ceil() as usize;
        for _ in 0..steps {
            smoother.next_value();
        }
        assert_relative_eq!(smoother.value(), 1.0, epsilon = 0.06);
    }
}
