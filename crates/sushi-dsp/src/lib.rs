//! sushi-dsp: DSP building blocks for the Sushi engine
//!
//! Small, allocation-free processors shared by the engine core and the
//! internal plugins:
//! - One-pole value smoothing for zipper-free parameter changes
//! - Biquad filter with coefficient smoothing
//! - Linear ADSR envelope
//! - True-peak master limiter with 4x polyphase upsampling

mod biquad;
mod envelopes;
mod limiter;
mod smoothing;

pub use biquad::*;
pub use envelopes::*;
pub use limiter::*;
pub use smoothing::*;
