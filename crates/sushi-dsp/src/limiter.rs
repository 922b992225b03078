//! True-peak master limiter
//!
//! Brick wall "ear saving" limiter that keeps the output from ever exceeding
//! 0 dB, with true-peak detection over a 4x polyphase upsampling of the
//! signal to bound inter-sample overshoot. Instant attack by default, which
//! can distort the attack portion of a signal.

use sushi_core::{Sample, AUDIO_CHUNK_SIZE};

/// Polyphase interpolation filters, calculated with a windowed sinc method.
/// Good enough for true peak detection at low latency; not meant as a
/// listening-quality resampler.
const FILTER_COEFFS: [[f32; 4]; 4] = [
    [
        -0.066_159_47,
        0.192_394_33,
        0.973_392_07,
        -1.689_951_8e-8,
    ],
    [
        -0.092_436_92,
        0.479_615_24,
        0.779_610_81,
        -0.083_578_56,
    ],
    [
        -0.083_578_56,
        0.779_610_81,
        0.479_615_21,
        -0.092_436_91,
    ],
    [
        -1.689_952e-8,
        0.973_392_13,
        0.192_394_32,
        -0.066_159_47,
    ],
];

const UPSAMPLING_FACTOR: usize = 4;

const THRESHOLD_GAIN: f32 = 1.0;
const RELEASE_TIME_MS: f32 = 100.0;
const ATTACK_TIME_MS: f32 = 0.0;

/// Exponentials never reach their target, so the gain-reduction target is
/// overshot by this ratio and the overshoot reversed when checking whether
/// the intended level was reached. 1.6 correlates well with the attack time
/// over a range of settings.
const ATTACK_RATIO: f32 = 1.6;

/// 4x polyphase interpolator over one chunk.
#[derive(Debug, Clone)]
pub struct UpSampler {
    delay_line: [f32; 4],
    write_idx: usize,
}

impl UpSampler {
    pub fn new() -> Self {
        Self {
            delay_line: [0.0; 4],
            write_idx: 0,
        }
    }

    /// Reset the interpolator before processing starts.
    pub fn reset(&mut self) {
        self.delay_line.fill(0.0);
    }

    /// Interpolate one chunk to 4x the original sample rate. `output` must
    /// hold `4 * AUDIO_CHUNK_SIZE` samples.
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        for (sample_idx, &sample) in input.iter().enumerate().take(AUDIO_CHUNK_SIZE) {
            self.delay_line[self.write_idx] = sample;
            for (phase, coeffs) in FILTER_COEFFS.iter().enumerate() {
                let mut upsampled = 0.0;
                for (j, &coeff) in coeffs.iter().enumerate() {
                    // Fast index wrapping for power-of-two circular buffers
                    let read_idx = self.write_idx.wrapping_sub(j) & 0b11;
                    upsampled += coeff * self.delay_line[read_idx];
                }
                output[UPSAMPLING_FACTOR * sample_idx + phase] = upsampled;
            }
            self.write_idx = (self.write_idx + 1) & 0b11;
        }
    }
}

impl Default for UpSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// True-peak brick wall limiter with a fixed 0 dB threshold.
#[derive(Debug, Clone)]
pub struct MasterLimiter {
    gain_reduction: f32,
    gain_reduction_target: f32,
    release_time_ms: f32,
    release_coeff: f32,
    attack_time_ms: f32,
    attack_coeff: f32,
    up_sampler: UpSampler,
    up_sampled: [f32; UPSAMPLING_FACTOR * AUDIO_CHUNK_SIZE],
}

impl MasterLimiter {
    pub fn new() -> Self {
        Self::with_times(RELEASE_TIME_MS, ATTACK_TIME_MS)
    }

    pub fn with_times(release_time_ms: f32, attack_time_ms: f32) -> Self {
        Self {
            gain_reduction: 0.0,
            gain_reduction_target: 0.0,
            release_time_ms,
            release_coeff: 0.0,
            attack_time_ms,
            attack_coeff: 0.0,
            up_sampler: UpSampler::new(),
            up_sampled: [0.0; UPSAMPLING_FACTOR * AUDIO_CHUNK_SIZE],
        }
    }

    /// Recalculate time coefficients for the sample rate and reset the gain
    /// reduction and the upsampler.
    pub fn init(&mut self, sample_rate: f32) {
        self.release_coeff = if self.release_time_ms > 0.0 {
            (-1.0 / (0.001 * sample_rate * self.release_time_ms)).exp()
        } else {
            0.0
        };
        self.attack_coeff = if self.attack_time_ms > 0.0 {
            (-1.0 / (0.001 * sample_rate * self.attack_time_ms)).exp()
        } else {
            0.0
        };
        self.gain_reduction = 0.0;
        self.gain_reduction_target = 0.0;
        self.up_sampler.reset();
    }

    /// Process one chunk, limiting the output to 0 dB. `input` and `output`
    /// may be the same channel processed in place by the caller copying
    /// through a scratch slice.
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        self.up_sampler.process(input, &mut self.up_sampled);

        for sample_idx in 0..AUDIO_CHUNK_SIZE {
            // Highest peak across the original sample and its upsampled
            // neighbours
            let mut true_peak = input[sample_idx].abs();
            for upsampled_idx in 0..UPSAMPLING_FACTOR {
                true_peak = true_peak
                    .max(self.up_sampled[UPSAMPLING_FACTOR * sample_idx + upsampled_idx].abs());
            }

            if true_peak > THRESHOLD_GAIN {
                self.gain_reduction_target = self
                    .gain_reduction_target
                    .max((1.0 - 1.0 / true_peak) * ATTACK_RATIO);
            }

            if self.gain_reduction_target > self.gain_reduction {
                self.gain_reduction = (self.gain_reduction - self.gain_reduction_target)
                    * self.attack_coeff
                    + self.gain_reduction_target;
                if self.gain_reduction >= self.gain_reduction_target / ATTACK_RATIO {
                    self.gain_reduction_target = 0.0;
                }
            } else {
                self.gain_reduction *= self.release_coeff;
            }

            output[sample_idx] = input[sample_idx] * (1.0 - self.gain_reduction);
        }
    }
}

impl Default for MasterLimiter {
    fn default() -> Self {
        Self::new()
    }
}
