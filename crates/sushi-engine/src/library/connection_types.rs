//! Connection records for audio, CV and gate routing

use serde::{Deserialize, Serialize};
use sushi_core::ObjectId;

/// Routes one engine audio channel to or from one track channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConnection {
    pub engine_channel: usize,
    pub track_channel: usize,
    pub track: ObjectId,
}

/// Routes a CV input to a processor parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvConnection {
    pub processor_id: ObjectId,
    pub parameter_id: ObjectId,
    pub cv_id: usize,
}

/// Routes a gate input to note on/off events on a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConnection {
    pub processor_id: ObjectId,
    pub gate_id: usize,
    pub note_no: i32,
    pub channel: i32,
}
