//! Off-RT processor state snapshots

use serde::{Deserialize, Serialize};
use sushi_core::ObjectId;

/// Complete persisted state of one processor. The engine defines the
/// contents, not a container format; serialization of the surrounding
/// document is up to the embedding application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessorState {
    pub program: Option<i32>,
    pub bypassed: Option<bool>,
    /// (parameter id, normalized value) pairs
    pub parameters: Vec<(ObjectId, f32)>,
    /// (property id, value) pairs
    pub properties: Vec<(ObjectId, String)>,
    /// Opaque plugin-specific data
    #[serde(with = "serde_bytes_opt", default)]
    pub binary_data: Option<Vec<u8>>,
}

impl ProcessorState {
    pub fn has_only_rt_state(&self) -> bool {
        self.program.is_none() && self.properties.is_empty() && self.binary_data.is_none()
    }
}

// Serialize the blob as a plain byte vector without pulling in a dedicated
// bytes crate.
mod serde_bytes_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        value.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<Vec<u8>>::deserialize(d)
    }
}

/// The subset of a state snapshot that can be applied on the audio thread.
#[derive(Debug, Clone, Default)]
pub struct RtState {
    pub bypassed: Option<bool>,
    pub parameters: Vec<(ObjectId, f32)>,
}

impl From<&ProcessorState> for RtState {
    fn from(state: &ProcessorState) -> Self {
        Self {
            bypassed: state.bypassed,
            parameters: state.parameters.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rt_state_subset() {
        let state = ProcessorState {
            program: Some(2),
            bypassed: Some(true),
            parameters: vec![(1, 0.5), (2, 0.25)],
            properties: vec![(3, "file.wav".to_string())],
            binary_data: None,
        };
        assert!(!state.has_only_rt_state());

        let rt_state = RtState::from(&state);
        assert_eq!(rt_state.bypassed, Some(true));
        assert_eq!(rt_state.parameters.len(), 2);
    }
}
