//! Per-processor performance timing
//!
//! The audio thread measures how long each processor takes relative to one
//! chunk's wall-clock budget (`AUDIO_CHUNK_SIZE / sample_rate`) and pushes
//! raw log points into a lock-free queue. A background thread drains the
//! queue once per second and aggregates avg/min/max per id. Disabled timing
//! costs one atomic load per measurement site.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use portable_atomic::AtomicF32;

use sushi_core::{SpscFifo, AUDIO_CHUNK_SIZE};

/// Pseudo id used for the engine's own process_chunk timing.
pub const ENGINE_TIMING_ID: u32 = u32::MAX;

const TIMING_LOG_QUEUE_SIZE: usize = 4096;
const AGGREGATION_INTERVAL: Duration = Duration::from_secs(1);

/// Aggregated timings for one id, as fractions of the chunk budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessTimings {
    pub avg_case: f32,
    pub min_case: f32,
    pub max_case: f32,
}

impl Default for ProcessTimings {
    fn default() -> Self {
        Self {
            avg_case: 0.0,
            min_case: f32::MAX,
            max_case: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TimingLogPoint {
    id: u32,
    delta_time: f32,
}

struct TimingNode {
    timings: ProcessTimings,
    count: u64,
}

/// Shared performance timer. Clone the `Arc` into everything that measures.
pub struct PerformanceTimer {
    enabled: AtomicBool,
    /// Chunk budget in seconds, set from the sample rate
    period: AtomicF32,
    queue: SpscFifo<TimingLogPoint>,
    records: Mutex<HashMap<u32, TimingNode>>,
    worker_running: AtomicBool,
}

impl PerformanceTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(false),
            period: AtomicF32::new(AUDIO_CHUNK_SIZE as f32 / 48000.0),
            queue: SpscFifo::new(TIMING_LOG_QUEUE_SIZE),
            records: Mutex::new(HashMap::new()),
            worker_running: AtomicBool::new(false),
        })
    }

    pub fn set_timing_period(&self, sample_rate: f32) {
        self.period
            .store(AUDIO_CHUNK_SIZE as f32 / sample_rate, Ordering::Relaxed);
    }

    pub fn enable(self: &Arc<Self>, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if enabled && !self.worker_running.swap(true, Ordering::SeqCst) {
            let timer = Arc::clone(self);
            std::thread::Builder::new()
                .name("timing_aggregator".to_string())
                .spawn(move || timer.worker_loop())
                .expect("spawning the timing aggregator thread");
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// RT: start a measurement. Returns None when timing is disabled.
    #[inline]
    pub fn start_timer(&self) -> Option<Instant> {
        if self.enabled() {
            Some(Instant::now())
        } else {
            None
        }
    }

    /// RT: finish a measurement and log it under `id`.
    #[inline]
    pub fn stop_timer(&self, start: Option<Instant>, id: u32) {
        if let Some(start) = start {
            let fraction = start.elapsed().as_secs_f32() / self.period.load(Ordering::Relaxed);
            // Full queue drops the sample, never blocks
            let _ = self.queue.push(TimingLogPoint {
                id,
                delta_time: fraction,
            });
        }
    }

    pub fn timings_for(&self, id: u32) -> Option<ProcessTimings> {
        self.records.lock().get(&id).map(|node| node.timings)
    }

    /// Reset accumulated timings for one id.
    pub fn clear_timings(&self, id: u32) {
        if let Some(node) = self.records.lock().get_mut(&id) {
            node.timings = ProcessTimings::default();
            node.count = 0;
        }
    }

    /// Write all records to a file, one line per id.
    pub fn save_all_to_file(&self, path: &str) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        writeln!(file, "id\tavg\tmin\tmax (fractions of chunk budget)")?;
        let records = self.records.lock();
        let mut ids: Vec<_> = records.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let t = records[&id].timings;
            writeln!(file, "{}\t{:.5}\t{:.5}\t{:.5}", id, t.avg_case, t.min_case, t.max_case)?;
        }
        Ok(())
    }

    fn worker_loop(self: Arc<Self>) {
        log::debug!("Timing aggregation thread started");
        while self.enabled() {
            self.drain_queue();
            std::thread::sleep(AGGREGATION_INTERVAL);
        }
        self.drain_queue();
        self.worker_running.store(false, Ordering::SeqCst);
        log::debug!("Timing aggregation thread stopped");
    }

    fn drain_queue(&self) {
        let mut records = self.records.lock();
        while let Some(point) = self.queue.pop() {
            let node = records.entry(point.id).or_insert(TimingNode {
                timings: ProcessTimings::default(),
                count: 0,
            });
            let timings = &mut node.timings;
            timings.min_case = timings.min_case.min(point.delta_time);
            timings.max_case = timings.max_case.max(point.delta_time);
            timings.avg_case =
                (timings.avg_case * node.count as f32 + point.delta_time) / (node.count + 1) as f32;
            node.count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_timer_returns_none() {
        let timer = PerformanceTimer::new();
        assert!(timer.start_timer().is_none());
    }

    #[test]
    fn test_records_aggregate() {
        let timer = PerformanceTimer::new();
        timer.enabled.store(true, Ordering::Relaxed);
        timer.set_timing_period(48000.0);

        for _ in 0..4 {
            let start = timer.start_timer();
            assert!(start.is_some());
            timer.stop_timer(start, 7);
        }
        timer.drain_queue();

        let timings = timer.timings_for(7).unwrap();
        assert!(timings.max_case >= timings.min_case);
        assert!(timings.avg_case > 0.0);
        assert!(timer.timings_for(8).is_none());

        timer.clear_timings(7);
        assert_eq!(timer.timings_for(7).unwrap().max_case, 0.0);
    }

    #[test]
    fn test_save_to_file() {
        let timer = PerformanceTimer::new();
        timer.enabled.store(true, Ordering::Relaxed);
        let start = timer.start_timer();
        timer.stop_timer(start, 1);
        timer.drain_queue();

        let path = std::env::temp_dir().join("sushi_timings_test.txt");
        timer.save_all_to_file(path.to_str().unwrap()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.lines().count() >= 2);
        std::fs::remove_file(path).ok();
    }
}
