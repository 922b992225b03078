//! Brickworks-style exemplar plugins

pub mod saturation_plugin;
pub mod simple_synth_plugin;
