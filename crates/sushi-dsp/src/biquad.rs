//! Biquad filter with coefficient smoothing
//!
//! Five-coefficient direct form II filter. Coefficient updates are smoothed
//! per sample through independent one-pole filters so an audio-rate parameter
//! sweep does not step the transfer function once per chunk.

use std::f64::consts::PI;

use sushi_core::Sample;

const NUMBER_OF_BIQUAD_COEF: usize = 5;

/// Time constants fitted into one buffer length of coefficient smoothing.
const TIME_CONSTANTS_IN_SMOOTHING_FILTER: f32 = 3.0;

/// Normalized biquad coefficients (a0 divided out).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Coefficients {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct OnePoleCoefficients {
    /// Input gain (1 - feedback)
    b0: f32,
    /// Feedback coefficient
    a0: f32,
}

#[inline]
fn process_one_pole(coefficients: OnePoleCoefficients, input: f32, register: &mut f32) -> f32 {
    *register = coefficients.b0 * input + coefficients.a0 * *register;
    *register
}

/// Peaking EQ coefficients. `gain` is linear; the dB conversion is done by
/// the parameter preprocessor upstream.
pub fn calc_biquad_peak(sample_rate: f32, frequency: f32, q: f32, gain: f32) -> Coefficients {
    let a = (gain as f64).sqrt();
    let w0 = 2.0 * PI * frequency as f64 / sample_rate as f64;
    let w0_cos = w0.cos();
    let w0_sin = w0.sin();
    let alpha = 0.5 * w0_sin / q.max(0.1) as f64;
    let a0 = 1.0 + alpha / a;

    Coefficients {
        a1: (-2.0 * w0_cos / a0) as f32,
        a2: ((1.0 - alpha / a) / a0) as f32,
        b0: ((1.0 + alpha * a) / a0) as f32,
        b1: (-2.0 * w0_cos / a0) as f32,
        b2: ((1.0 - alpha * a) / a0) as f32,
    }
}

/// First-order style lowpass coefficients used for smoothing duties.
pub fn calc_biquad_lowpass(sample_rate: f32, frequency: f32) -> Coefficients {
    let w0 = 2.0 * PI * frequency as f64 / sample_rate as f64;
    let w0_cos = w0.cos();
    let w0_sin = w0.sin();
    let alpha = w0_sin;
    let a0 = 1.0 + alpha;

    Coefficients {
        a1: (-2.0 * w0_cos / a0) as f32,
        a2: ((1.0 - alpha) / a0) as f32,
        b0: ((1.0 - w0_cos) * 2.0 / a0) as f32,
        b1: ((1.0 - w0_cos) / a0) as f32,
        b2: ((1.0 - w0_cos) * 2.0 / a0) as f32,
    }
}

/// Biquad filter instance with smoothed coefficient updates.
#[derive(Debug, Clone, Default)]
pub struct BiquadFilter {
    coefficients: Coefficients,
    coefficient_targets: Coefficients,
    smoothing: OnePoleCoefficients,
    smoothing_registers: [f32; NUMBER_OF_BIQUAD_COEF],
    z1: f32,
    z2: f32,
}

impl BiquadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coefficients(coefficients: Coefficients) -> Self {
        Self {
            coefficient_targets: coefficients,
            ..Self::default()
        }
    }

    /// Clear everything time-dependent and snap coefficients to their
    /// targets.
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
        self.coefficients = self.coefficient_targets;
        self.smoothing_registers = [
            self.coefficient_targets.b0,
            self.coefficient_targets.b1,
            self.coefficient_targets.b2,
            self.coefficient_targets.a1,
            self.coefficient_targets.a2,
        ];
    }

    /// Configure coefficient smoothing for the given buffer length.
    ///
    /// Coefficient changes run through one-pole lowpass filters whose time
    /// constant matches a fixed number of samples. The cutoff is low and not
    /// critical, so a time constant from an analog prototype is good enough
    /// without a bilinear transform.
    pub fn set_smoothing(&mut self, buffer_size: usize) {
        let feedback =
            (-2.0 * std::f32::consts::PI * TIME_CONSTANTS_IN_SMOOTHING_FILTER / buffer_size as f32)
                .exp();
        self.smoothing = OnePoleCoefficients {
            b0: 1.0 - feedback,
            a0: feedback,
        };
    }

    /// Set new coefficient targets to smooth towards.
    pub fn set_coefficients(&mut self, coefficients: Coefficients) {
        self.coefficient_targets = coefficients;
    }

    /// Process a block of samples.
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        let smoothing = self.smoothing;
        for (out, &x) in output.iter_mut().zip(input) {
            self.coefficients.b0 = process_one_pole(
                smoothing,
                self.coefficient_targets.b0,
                &mut self.smoothing_registers[0],
            );
            self.coefficients.b1 = process_one_pole(
                smoothing,
                self.coefficient_targets.b1,
                &mut self.smoothing_registers[1],
            );
            self.coefficients.b2 = process_one_pole(
                smoothing,
                self.coefficient_targets.b2,
                &mut self.smoothing_registers[2],
            );
            self.coefficients.a1 = process_one_pole(
                smoothing,
                self.coefficient_targets.a1,
                &mut self.smoothing_registers[3],
            );
            self.coefficients.a2 = process_one_pole(
                smoothing,
                self.coefficient_targets.a2,
                &mut self.smoothing_registers[4],
            );

            let y = self.coefficients.b0 * x + self.z1;
            self.z1 = self.coefficients.b1 * x - self.coefficients.a1 * y + self.z2;
            self.z2 = self.coefficients.b2 * x - self.coefficients.a2 * y;
            *out = y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sushi_core::AUDIO_CHUNK_SIZE;

    const SAMPLE_RATE: f32 = 48000.0;

    #[test]
    fn test_silent_input_produces_silent_output() {
        let mut filter = BiquadFilter::new();
        filter.set_smoothing(AUDIO_CHUNK_SIZE);
        filter.set_coefficients(calc_biquad_peak(SAMPLE_RATE, 1000.0, 1.0, 2.0));
        filter.reset();

        let input = [0.0; AUDIO_CHUNK_SIZE];
        let mut output = [1.0; AUDIO_CHUNK_SIZE];
        filter.process(&input, &mut output);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_lowpass_settles_on_its_dc_gain() {
        let coefficients = calc_biquad_lowpass(SAMPLE_RATE, 1000.0);
        let mut filter = BiquadFilter::with_coefficients(coefficients);
        filter.set_smoothing(AUDIO_CHUNK_SIZE);
        filter.reset();

        let dc_gain = (coefficients.b0 + coefficients.b1 + coefficients.b2)
            / (1.0 + coefficients.a1 + coefficients.a2);

        let input = [1.0; AUDIO_CHUNK_SIZE];
        let mut output = [0.0; AUDIO_CHUNK_SIZE];
        // Run enough chunks for the filter to settle on the DC value
        for _ in 0..200 {
            filter.process(&input, &mut output);
        }
        assert_relative_eq!(output[AUDIO_CHUNK_SIZE - 1], dc_gain, epsilon = 1e-2);
    }

    #[test]
    fn test_coefficient_smoothing_is_monotonic() {
        let mut filter = BiquadFilter::new();
        filter.set_smoothing(AUDIO_CHUNK_SIZE);
        filter.reset();

        let target = calc_biquad_peak(SAMPLE_RATE, 2000.0, 0.7, 4.0);
        filter.set_coefficients(target);

        let input = [0.0; AUDIO_CHUNK_SIZE];
        let mut output = [0.0; AUDIO_CHUNK_SIZE];
        let mut previous = filter.coefficients.b0;
        let chunks = TIME_CONSTANTS_IN_SMOOTHING_FILTER.ceil() as usize + 1;
        for _ in 0..chunks {
            filter.process(&input, &mut output);
            assert!(filter.coefficients.b0 >= previous);
            previous = filter.coefficients.b0;
        }
        assert_relative_eq!(filter.coefficients.b0, target.b0, epsilon = 1e-3);
    }

    #[test]
    fn test_reset_snaps_to_targets() {
        let target = calc_biquad_peak(SAMPLE_RATE, 500.0, 1.0, 0.5);
        let mut filter = BiquadFilter::with_coefficients(target);
        filter.set_smoothing(AUDIO_CHUNK_SIZE);
        filter.reset();
        assert_eq!(filter.coefficients, target);
    }
}
