//! Real-time worker pool for multicore rendering
//!
//! One worker thread per core parks on a barrier. Each chunk the audio
//! thread wakes all workers, every worker renders the tracks in its own
//! core slot, and the audio thread waits on the completion barrier. There
//! is exactly one producer of wake signals (the audio thread), so the whole
//! cycle is two barrier waits and no locks.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;

use crate::engine::track::Track;

/// Tracks assigned to one rendering core.
///
/// Accessed mutably from two places that are never concurrent: the worker
/// thread between the wake and done barriers, and the audio thread outside
/// that window (graph mutations happen while the workers are parked).
pub struct CoreSlot {
    tracks: UnsafeCell<Vec<Box<Track>>>,
}

// SAFETY: access alternates between the audio thread and one worker thread,
// sequenced by the barrier protocol described above.
unsafe impl Sync for CoreSlot {}
unsafe impl Send for CoreSlot {}

impl CoreSlot {
    pub fn new(capacity: usize) -> Self {
        Self {
            tracks: UnsafeCell::new(Vec::with_capacity(capacity)),
        }
    }

    /// Audio-thread access to the slot contents. Callers must hold the
    /// "workers parked" side of the barrier protocol.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn tracks_mut(&self) -> &mut Vec<Box<Track>> {
        &mut *self.tracks.get()
    }
}

/// Platform capability description for the workers. On Apple targets the
/// audio backend can provide a workgroup derived from (sample rate, chunk
/// size, device); rendering works without it.
#[derive(Debug, Clone, Default)]
pub struct WorkerPoolConfig {
    pub sample_rate: f32,
    pub device_name: Option<String>,
}

pub struct WorkerPool {
    start: Arc<Barrier>,
    done: Arc<Barrier>,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn one realtime-priority worker per slot.
    pub fn new(slots: Vec<Arc<CoreSlot>>, config: WorkerPoolConfig) -> Self {
        let worker_count = slots.len();
        let start = Arc::new(Barrier::new(worker_count + 1));
        let done = Arc::new(Barrier::new(worker_count + 1));
        let running = Arc::new(AtomicBool::new(true));

        let workers = slots
            .into_iter()
            .enumerate()
            .map(|(core, slot)| {
                let start = Arc::clone(&start);
                let done = Arc::clone(&done);
                let running = Arc::clone(&running);
                let config = config.clone();
                std::thread::Builder::new()
                    .name(format!("rt_worker_{}", core))
                    .spawn(move || worker_loop(core, slot, start, done, running, config))
                    .expect("spawning render worker thread")
            })
            .collect();

        Self {
            start,
            done,
            running,
            workers,
        }
    }

    /// Wake all workers and block until every core slot has rendered. Called
    /// from the audio thread once per chunk.
    pub fn wakeup_and_wait(&self) {
        self.start.wait();
        self.done.wait();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        // Release the workers from the start barrier so they observe the
        // stop flag and exit
        self.start.wait();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    core: usize,
    slot: Arc<CoreSlot>,
    start: Arc<Barrier>,
    done: Arc<Barrier>,
    running: Arc<AtomicBool>,
    config: WorkerPoolConfig,
) {
    set_realtime_priority(core);
    join_device_workgroup(&config);

    loop {
        start.wait();
        if !running.load(Ordering::Acquire) {
            break;
        }
        let _rt_flag = sushi_core::ThreadRtFlag::new();
        // SAFETY: between the start and done barriers this worker is the
        // only thread touching its slot
        let tracks = unsafe { slot.tracks_mut() };
        for track in tracks.iter_mut() {
            track.render();
        }
        done.wait();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// THREAD PRIORITY
// ═══════════════════════════════════════════════════════════════════════════════

/// Best effort: elevate the current thread to realtime scheduling. Failure
/// is logged and rendering continues at normal priority.
#[cfg(unix)]
fn set_realtime_priority(core: usize) {
    // SCHED_FIFO needs CAP_SYS_NICE (or an audio-group rtprio limit)
    let param = libc::sched_param { sched_priority: 70 };
    let result = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if result == 0 {
        log::info!("Render worker {} running with realtime priority", core);
    } else {
        log::warn!(
            "Failed to set realtime priority for render worker {} (non-fatal): {}",
            core,
            std::io::Error::from_raw_os_error(result)
        );
    }
}

#[cfg(not(unix))]
fn set_realtime_priority(core: usize) {
    log::debug!("Realtime priority not supported on this platform (worker {})", core);
}

#[cfg(target_os = "macos")]
fn join_device_workgroup(config: &WorkerPoolConfig) {
    // The CoreAudio workgroup handle comes from the audio backend, which is
    // an external collaborator; without one the workers simply run with the
    // priority set above
    log::debug!(
        "No audio workgroup provided for device {:?} at {} Hz",
        config.device_name,
        config.sample_rate
    );
}

#[cfg(not(target_os = "macos"))]
fn join_device_workgroup(_config: &WorkerPoolConfig) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::track::TrackType;
    use crate::library::performance_timer::PerformanceTimer;
    use crate::library::processor::tests::test_host_control;
    use crate::library::processor::Processor;
    use sushi_core::ObjectIdSource;

    #[test]
    fn test_pool_renders_all_slots() {
        let ids = ObjectIdSource::new();
        let slots: Vec<Arc<CoreSlot>> = (0..2).map(|_| Arc::new(CoreSlot::new(4))).collect();

        for slot in &slots {
            let mut track = Box::new(Track::new(
                test_host_control(),
                &ids,
                PerformanceTimer::new(),
                2,
                true,
                TrackType::Regular,
            ));
            track.init(48000.0);
            track.input_channel_mut(0).fill(0.5);
            // SAFETY: workers are not running yet
            unsafe { slot.tracks_mut() }.push(track);
        }

        let pool = WorkerPool::new(slots.clone(), WorkerPoolConfig::default());
        pool.wakeup_and_wait();

        for slot in &slots {
            let tracks = unsafe { slot.tracks_mut() };
            assert!(tracks[0].output_channel(0)[0] > 0.4);
        }
        drop(pool);
    }
}
