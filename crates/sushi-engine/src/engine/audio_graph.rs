//! The multicore track scheduler
//!
//! Owns every regular track, partitioned across `cpu_cores` slots. With one
//! core, rendering happens inline on the audio thread; with more, a
//! [`WorkerPool`] renders all slots in parallel behind a wake/wait barrier
//! pair. Slots are reserved to capacity up front so adding and removing
//! tracks never allocates on the audio thread.

use std::sync::Arc;

use sushi_core::ObjectId;

use crate::engine::track::Track;
use crate::engine::worker_pool::{CoreSlot, WorkerPool, WorkerPoolConfig};
use crate::library::processor::Processor;
use crate::library::rt_event::{RtEvent, RtEventFifo, RtEventSink};

const EVENT_OUTPUT_FIFO_SIZE: usize = 512;

pub struct AudioGraph {
    slots: Vec<Arc<CoreSlot>>,
    event_outputs: Vec<RtEventSink>,
    cores: usize,
    current_core: usize,
    worker_pool: Option<WorkerPool>,
}

impl AudioGraph {
    /// Non-RT: build the graph and start the workers when `cpu_cores > 1`.
    pub fn new(cpu_cores: usize, max_tracks_per_core: usize, config: WorkerPoolConfig) -> Self {
        assert!(cpu_cores > 0);

        let slots: Vec<Arc<CoreSlot>> = (0..cpu_cores)
            .map(|_| Arc::new(CoreSlot::new(max_tracks_per_core)))
            .collect();
        let event_outputs: Vec<RtEventSink> = (0..cpu_cores)
            .map(|_| Arc::new(RtEventFifo::new(EVENT_OUTPUT_FIFO_SIZE)))
            .collect();

        let worker_pool = if cpu_cores > 1 {
            Some(WorkerPool::new(slots.clone(), config))
        } else {
            None
        };

        Self {
            slots,
            event_outputs,
            cores: cpu_cores,
            current_core: 0,
            worker_pool,
        }
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    pub fn event_outputs(&self) -> &[RtEventSink] {
        &self.event_outputs
    }

    /// Add a track to the next core, round robin. Fails when that core slot
    /// is full. RT-safe: slots never grow beyond their reservation.
    pub fn add(&mut self, track: Box<Track>) -> Result<(), Box<Track>> {
        let core = self.current_core;
        match self.add_to_core(track, core) {
            Ok(()) => {
                self.current_core = (core + 1) % self.cores;
                Ok(())
            }
            Err(track) => Err(track),
        }
    }

    /// Add a track pinned to a specific core.
    pub fn add_to_core(&mut self, mut track: Box<Track>, core: usize) -> Result<(), Box<Track>> {
        assert!(core < self.cores);
        // SAFETY: graph mutations run on the audio thread while the workers
        // are parked
        let tracks = unsafe { self.slots[core].tracks_mut() };
        if tracks.len() >= tracks.capacity() {
            return Err(track);
        }
        track.set_event_output(Some(self.event_outputs[core].clone()));
        tracks.push(track);
        Ok(())
    }

    /// Remove a track by id, returning ownership of it.
    pub fn remove(&mut self, track_id: ObjectId) -> Option<Box<Track>> {
        for slot in &self.slots {
            // SAFETY: see add_to_core
            let tracks = unsafe { slot.tracks_mut() };
            if let Some(position) = tracks.iter().position(|t| t.id() == track_id) {
                let mut track = tracks.remove(position);
                track.set_event_output(None);
                return Some(track);
            }
        }
        None
    }

    /// Mutable access to a track by id. Audio-thread only, workers parked.
    pub fn track_mut(&mut self, track_id: ObjectId) -> Option<&mut Track> {
        for slot in &self.slots {
            // SAFETY: see add_to_core
            let tracks = unsafe { slot.tracks_mut() };
            if let Some(track) = tracks.iter_mut().find(|t| t.id() == track_id) {
                return Some(track);
            }
        }
        None
    }

    /// Route an event to a processor chained on any track. Returns false if
    /// no track holds it.
    pub fn process_event_for(&mut self, processor_id: ObjectId, event: RtEvent) -> bool {
        for slot in &self.slots {
            // SAFETY: see add_to_core
            let tracks = unsafe { slot.tracks_mut() };
            for track in tracks.iter_mut() {
                if track.has_processor(processor_id) {
                    return track.process_event_for(processor_id, event);
                }
            }
        }
        false
    }

    /// Render every track once. Called from the audio thread per chunk.
    pub fn render(&mut self) {
        match &self.worker_pool {
            None => {
                // SAFETY: single core, no workers exist
                let tracks = unsafe { self.slots[0].tracks_mut() };
                for track in tracks.iter_mut() {
                    track.render();
                }
            }
            Some(pool) => pool.wakeup_and_wait(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::track::TrackType;
    use crate::library::performance_timer::PerformanceTimer;
    use crate::library::processor::tests::test_host_control;
    use crate::library::processor::Processor;
    use sushi_core::ObjectIdSource;

    fn make_track(ids: &ObjectIdSource) -> Box<Track> {
        let mut track = Box::new(Track::new(
            test_host_control(),
            ids,
            PerformanceTimer::new(),
            2,
            true,
            TrackType::Regular,
        ));
        track.init(48000.0);
        track
    }

    #[test]
    fn test_round_robin_assignment() {
        let ids = ObjectIdSource::new();
        let mut graph = AudioGraph::new(1, 2, WorkerPoolConfig::default());

        let t1 = make_track(&ids);
        let t2 = make_track(&ids);
        let t3 = make_track(&ids);
        let id1 = t1.id();

        assert!(graph.add(t1).is_ok());
        assert!(graph.add(t2).is_ok());
        // Slot capacity of 2 reached
        assert!(graph.add(t3).is_err());

        assert!(graph.track_mut(id1).is_some());
        let removed = graph.remove(id1).unwrap();
        assert_eq!(removed.id(), id1);
        assert!(graph.remove(id1).is_none());
    }

    #[test]
    fn test_single_core_render() {
        let ids = ObjectIdSource::new();
        let mut graph = AudioGraph::new(1, 4, WorkerPoolConfig::default());

        let mut track = make_track(&ids);
        let track_id = track.id();
        track.input_channel_mut(0).fill(1.0);
        graph.add(track).ok().unwrap();

        graph.render();
        let track = graph.track_mut(track_id).unwrap();
        assert!(track.output_channel(0)[0] > 0.9);
    }

    #[test]
    fn test_multicore_render_and_per_core_events() {
        let ids = ObjectIdSource::new();
        let mut graph = AudioGraph::new(2, 2, WorkerPoolConfig::default());

        let t1 = make_track(&ids);
        let t2 = make_track(&ids);
        let id1 = t1.id();
        let id2 = t2.id();
        graph.add(t1).ok().unwrap();
        graph.add(t2).ok().unwrap();

        // Send one keyboard event to each track; nothing consumes them so
        // each core's event output ends up with exactly one event
        graph
            .track_mut(id1)
            .unwrap()
            .process_event(RtEvent::note_on(id1, 0, 0, 60, 1.0));
        graph
            .track_mut(id2)
            .unwrap()
            .process_event(RtEvent::note_on(id2, 0, 0, 62, 1.0));

        graph.render();

        for output in graph.event_outputs() {
            assert_eq!(output.len(), 1);
        }
    }
}
