//! Envelope generators for audio processors

/// Lower bound on attack, decay and release times. Avoids divisions by zero
/// without branching in the per-sample path.
pub const SHORTEST_ENVELOPE_TIME: f32 = 1.0e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvelopeState {
    Off,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Basic linear-slope ADSR envelope.
#[derive(Debug, Clone)]
pub struct AdsrEnvelope {
    attack_factor: f32,
    decay_factor: f32,
    sustain_level: f32,
    release_factor: f32,
    current_level: f32,
    sample_rate: f32,
    state: EnvelopeState,
}

impl AdsrEnvelope {
    pub fn new() -> Self {
        Self {
            attack_factor: 0.0,
            decay_factor: 0.0,
            sustain_level: 1.0,
            release_factor: 0.1,
            current_level: 0.0,
            sample_rate: 44100.0,
            state: EnvelopeState::Off,
        }
    }

    /// Set envelope parameters. Times in seconds, sustain as a 0-1 level.
    pub fn set_parameters(&mut self, attack: f32, decay: f32, sustain: f32, release: f32) {
        let attack = attack.max(SHORTEST_ENVELOPE_TIME);
        let decay = decay.max(SHORTEST_ENVELOPE_TIME);
        let release = release.max(SHORTEST_ENVELOPE_TIME);

        self.attack_factor = 1.0 / (self.sample_rate * attack);
        self.decay_factor = (1.0 - sustain) / (self.sample_rate * decay);
        self.sustain_level = sustain;
        self.release_factor = sustain / (self.sample_rate * release);
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    /// Advance the envelope by `samples` and return the new level.
    pub fn tick(&mut self, samples: usize) -> f32 {
        match self.state {
            EnvelopeState::Off => {}
            EnvelopeState::Attack => {
                self.current_level += samples as f32 * self.attack_factor;
                if self.current_level >= 1.0 {
                    self.state = EnvelopeState::Decay;
                    self.current_level = 1.0;
                }
            }
            EnvelopeState::Decay => {
                self.current_level -= samples as f32 * self.decay_factor;
                if self.current_level <= self.sustain_level {
                    self.state = EnvelopeState::Sustain;
                    self.current_level = self.sustain_level;
                }
            }
            EnvelopeState::Sustain => {
                // Fixed level, waiting for gate off
            }
            EnvelopeState::Release => {
                self.current_level -= samples as f32 * self.release_factor;
                if self.current_level < 0.0 {
                    self.state = EnvelopeState::Off;
                    self.current_level = 0.0;
                }
            }
        }
        self.current_level
    }

    /// Current level without advancing.
    pub fn level(&self) -> f32 {
        self.current_level
    }

    /// Gate signal: `true` restarts the envelope in the attack phase,
    /// `false` enters the release phase.
    pub fn gate(&mut self, gate: bool) {
        if gate {
            self.state = EnvelopeState::Attack;
            self.current_level = 0.0;
        } else {
            // Entering release from attack or decay: rescale the release
            // factor so the slope from the current level stays correct
            if self.state != EnvelopeState::Sustain && self.sustain_level > 0.0 {
                self.release_factor *= self.current_level / self.sustain_level;
            }
            self.state = EnvelopeState::Release;
        }
    }

    /// True when the release phase has finished.
    pub fn finished(&self) -> bool {
        self.state == EnvelopeState::Off
    }

    /// Reset to zero immediately, bypassing any release phase.
    pub fn reset(&mut self) {
        self.state = EnvelopeState::Off;
        self.current_level = 0.0;
    }
}

impl Default for AdsrEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SAMPLE_RATE: f32 = 48000.0;

    fn make_envelope() -> AdsrEnvelope {
        let mut env = AdsrEnvelope::new();
        env.set_sample_rate(SAMPLE_RATE);
        env.set_parameters(0.01, 0.01, 0.5, 0.01);
        env
    }

    #[test]
    fn test_full_cycle() {
        let mut env = make_envelope();
        assert!(env.finished());

        env.gate(true);
        // Half the attack time
        let level = env.tick((SAMPLE_RATE * 0.005) as usize);
        assert_relative_eq!(level, 0.5, epsilon = 1e-3);

        // Finish attack, run through decay to sustain
        env.tick((SAMPLE_RATE * 0.005) as usize);
        env.tick((SAMPLE_RATE * 0.02) as usize);
        assert_relative_eq!(env.level(), 0.5, epsilon = 1e-3);
        assert!(!env.finished());

        env.gate(false);
        env.tick((SAMPLE_RATE * 0.02) as usize);
        assert_eq!(env.level(), 0.0);
        assert!(env.finished());
    }

    #[test]
    fn test_release_slope_rescaled_from_attack() {
        let mut env = make_envelope();
        env.gate(true);
        // Release before reaching sustain; level is mid-attack
        env.tick((SAMPLE_RATE * 0.004) as usize);
        let level_at_release = env.level();
        assert!(level_at_release < 1.0);

        env.gate(false);
        // Half the release time should roughly halve the level
        env.tick((SAMPLE_RATE * 0.005) as usize);
        assert_relative_eq!(env.level(), level_at_release * 0.5, epsilon = 1e-2);
    }

    #[test]
    fn test_zero_times_are_clamped() {
        let mut env = AdsrEnvelope::new();
        env.set_sample_rate(SAMPLE_RATE);
        env.set_parameters(0.0, 0.0, 0.5, 0.0);
        env.gate(true);
        let level = env.tick(1);
        assert!(level.is_finite());
        assert!(level >= 1.0 || level > 0.0);
    }
}
