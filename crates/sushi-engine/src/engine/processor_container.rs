//! Thread-safe registry of processors and their track assignments
//!
//! The registry stores descriptive handles, not the audio objects: the
//! processors themselves are owned by the RT domain (engine slots and track
//! chains). Three maps under independent mutexes, locked only on non-RT
//! threads; query methods return value copies so callers are decoupled from
//! concurrent mutations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use sushi_core::ObjectId;

use crate::engine::track::TrackType;
use crate::library::parameters::ParameterStore;

/// Shared descriptive handle for a registered processor. Parameter values
/// are readable through the store without involving the RT domain.
#[derive(Debug)]
pub struct ProcessorInfo {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub track_type: Option<TrackType>,
    pub channels: usize,
    pub parameters: Arc<ParameterStore>,
}

impl ProcessorInfo {
    pub fn is_track(&self) -> bool {
        self.track_type.is_some()
    }
}

#[derive(Default)]
pub struct ProcessorContainer {
    by_name: Mutex<HashMap<String, Arc<ProcessorInfo>>>,
    by_id: Mutex<HashMap<ObjectId, Arc<ProcessorInfo>>>,
    by_track: Mutex<HashMap<ObjectId, Vec<Arc<ProcessorInfo>>>>,
}

impl ProcessorContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor. Rejects duplicate names.
    pub fn add_processor(&self, info: Arc<ProcessorInfo>) -> bool {
        let mut by_name = self.by_name.lock();
        if by_name.contains_key(&info.name) {
            return false;
        }
        by_name.insert(info.name.clone(), info.clone());
        self.by_id.lock().insert(info.id, info);
        true
    }

    /// Register a track, which also gets an (empty) chain entry.
    pub fn add_track(&self, info: Arc<ProcessorInfo>) -> bool {
        debug_assert!(info.is_track());
        if !self.add_processor(info.clone()) {
            return false;
        }
        self.by_track.lock().insert(info.id, Vec::new());
        true
    }

    /// Remove a processor from the registry. It must not be on a track.
    pub fn remove_processor(&self, id: ObjectId) -> bool {
        let info = match self.by_id.lock().remove(&id) {
            Some(info) => info,
            None => return false,
        };
        self.by_name.lock().remove(&info.name);
        true
    }

    pub fn remove_track(&self, track_id: ObjectId) -> bool {
        self.by_track.lock().remove(&track_id);
        self.remove_processor(track_id)
    }

    /// Mirror a processor's position in a track chain.
    pub fn add_to_track(
        &self,
        info: Arc<ProcessorInfo>,
        track_id: ObjectId,
        before_id: Option<ObjectId>,
    ) -> bool {
        let mut by_track = self.by_track.lock();
        let chain = match by_track.get_mut(&track_id) {
            Some(chain) => chain,
            None => return false,
        };
        match before_id {
            Some(before_id) => match chain.iter().position(|p| p.id == before_id) {
                Some(position) => {
                    chain.insert(position, info);
                    true
                }
                None => false,
            },
            None => {
                chain.push(info);
                true
            }
        }
    }

    pub fn remove_from_track(&self, processor_id: ObjectId, track_id: ObjectId) -> bool {
        let mut by_track = self.by_track.lock();
        if let Some(chain) = by_track.get_mut(&track_id) {
            if let Some(position) = chain.iter().position(|p| p.id == processor_id) {
                chain.remove(position);
                return true;
            }
        }
        false
    }

    pub fn processor_exists(&self, id: ObjectId) -> bool {
        self.by_id.lock().contains_key(&id)
    }

    pub fn processor(&self, id: ObjectId) -> Option<Arc<ProcessorInfo>> {
        self.by_id.lock().get(&id).cloned()
    }

    pub fn processor_by_name(&self, name: &str) -> Option<Arc<ProcessorInfo>> {
        self.by_name.lock().get(name).cloned()
    }

    pub fn track(&self, track_id: ObjectId) -> Option<Arc<ProcessorInfo>> {
        self.processor(track_id).filter(|info| info.is_track())
    }

    /// The track a processor currently sits on, if any.
    pub fn track_of(&self, processor_id: ObjectId) -> Option<ObjectId> {
        self.by_track
            .lock()
            .iter()
            .find(|(_, chain)| chain.iter().any(|p| p.id == processor_id))
            .map(|(&track_id, _)| track_id)
    }

    pub fn all_processors(&self) -> Vec<Arc<ProcessorInfo>> {
        self.by_id.lock().values().cloned().collect()
    }

    /// Processors on a track in chain order.
    pub fn processors_on_track(&self, track_id: ObjectId) -> Vec<Arc<ProcessorInfo>> {
        self.by_track
            .lock()
            .get(&track_id)
            .cloned()
            .unwrap_or_default()
    }

    /// All tracks sorted by id, i.e. in creation order.
    pub fn all_tracks(&self) -> Vec<Arc<ProcessorInfo>> {
        let by_track = self.by_track.lock();
        let by_id = self.by_id.lock();
        let mut tracks: Vec<_> = by_track
            .keys()
            .filter_map(|id| by_id.get(id).cloned())
            .collect();
        tracks.sort_by_key(|info| info.id);
        tracks
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::parameters::ParameterStore;

    fn make_info(id: ObjectId, name: &str, track: bool) -> Arc<ProcessorInfo> {
        Arc::new(ProcessorInfo {
            id,
            name: name.to_string(),
            label: name.to_string(),
            track_type: track.then_some(TrackType::Regular),
            channels: 2,
            parameters: ParameterStore::builder().build(),
        })
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let container = ProcessorContainer::new();
        assert!(container.add_processor(make_info(1, "gain", false)));
        assert!(!container.add_processor(make_info(2, "gain", false)));
        assert!(container.processor_by_name("gain").is_some());
        assert_eq!(container.processor_by_name("gain").unwrap().id, 1);
    }

    #[test]
    fn test_track_chain_ordering() {
        let container = ProcessorContainer::new();
        container.add_track(make_info(10, "track", true));
        container.add_processor(make_info(1, "a", false));
        container.add_processor(make_info(2, "b", false));
        container.add_processor(make_info(3, "c", false));

        assert!(container.add_to_track(container.processor(1).unwrap(), 10, None));
        assert!(container.add_to_track(container.processor(2).unwrap(), 10, None));
        // Insert c before b
        assert!(container.add_to_track(container.processor(3).unwrap(), 10, Some(2)));

        let chain: Vec<ObjectId> = container
            .processors_on_track(10)
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(chain, vec![1, 3, 2]);

        assert_eq!(container.track_of(3), Some(10));
        assert!(container.remove_from_track(3, 10));
        assert_eq!(container.track_of(3), None);
        assert!(!container.remove_from_track(3, 10));
    }

    #[test]
    fn test_add_to_unknown_track_fails() {
        let container = ProcessorContainer::new();
        container.add_processor(make_info(1, "a", false));
        assert!(!container.add_to_track(container.processor(1).unwrap(), 99, None));
    }

    #[test]
    fn test_all_tracks_sorted_by_creation() {
        let container = ProcessorContainer::new();
        container.add_track(make_info(5, "t5", true));
        container.add_track(make_info(2, "t2", true));
        container.add_track(make_info(9, "t9", true));

        let ids: Vec<ObjectId> = container.all_tracks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn test_remove_cleans_both_maps() {
        let container = ProcessorContainer::new();
        container.add_processor(make_info(1, "a", false));
        assert!(container.remove_processor(1));
        assert!(!container.processor_exists(1));
        assert!(container.processor_by_name("a").is_none());
        assert!(!container.remove_processor(1));
    }
}
