//! Shared bus plumbing for the send and return plugins
//!
//! A send on one track and a return on another may render on different
//! cores in the same chunk, so the bus accumulator is double buffered and
//! guarded by a spinlock: senders add into the active input buffer, the
//! return reads the other one, and whoever touches the bus first in a new
//! chunk (identified by the transport's process time) swaps the pair.

use std::collections::HashMap;
use std::sync::Arc;

use sushi_core::{SampleBuffer, SpinLock, Time, MAX_TRACK_CHANNELS};

pub const MAX_SEND_CHANNELS: usize = MAX_TRACK_CHANNELS;

struct BusBuffers {
    buffers: [SampleBuffer; 2],
    active_in: usize,
    last_swap: Option<Time>,
}

impl BusBuffers {
    /// Swap the buffer pair once per chunk and clear the new input side.
    fn maybe_swap(&mut self, now: Time) {
        if self.last_swap != Some(now) {
            self.active_in = 1 - self.active_in;
            self.buffers[self.active_in].clear();
            self.last_swap = Some(now);
        }
    }
}

/// One named return bus.
pub struct ReturnBus {
    state: SpinLock<BusBuffers>,
}

impl ReturnBus {
    fn new() -> Self {
        Self {
            state: SpinLock::new(BusBuffers {
                buffers: [
                    SampleBuffer::new(MAX_SEND_CHANNELS),
                    SampleBuffer::new(MAX_SEND_CHANNELS),
                ],
                active_in: 0,
                last_swap: None,
            }),
        }
    }

    /// RT: mix `channels` channels of `input`, starting at `start_channel`,
    /// into the bus at `dest_channel` with a flat gain.
    pub fn send_audio(
        &self,
        input: &SampleBuffer,
        start_channel: usize,
        channels: usize,
        dest_channel: usize,
        gain: f32,
        now: Time,
    ) {
        let mut state = self.state.lock();
        state.maybe_swap(now);
        let active_in = state.active_in;
        let buffer = &mut state.buffers[active_in];
        let channels = channels.min(MAX_SEND_CHANNELS.saturating_sub(dest_channel));
        for c in 0..channels {
            buffer.add_channel_with_gain(dest_channel + c, input, start_channel + c, gain);
        }
    }

    /// RT: like [`send_audio`](Self::send_audio) with a gain ramp over the
    /// chunk.
    pub fn send_audio_with_ramp(
        &self,
        input: &SampleBuffer,
        start_channel: usize,
        channels: usize,
        dest_channel: usize,
        start_gain: f32,
        end_gain: f32,
        now: Time,
    ) {
        let mut state = self.state.lock();
        state.maybe_swap(now);
        let active_in = state.active_in;
        let buffer = &mut state.buffers[active_in];
        let channels = channels.min(MAX_SEND_CHANNELS.saturating_sub(dest_channel));
        for c in 0..channels {
            buffer.add_channel_with_ramp(
                dest_channel + c,
                input,
                start_channel + c,
                start_gain,
                end_gain,
            );
        }
    }

    /// RT: read the completed side of the bus into `output`.
    pub fn read_output(&self, output: &mut SampleBuffer, now: Time) {
        let mut state = self.state.lock();
        state.maybe_swap(now);
        let active_out = 1 - state.active_in;
        output.replace(&state.buffers[active_out]);
    }
}

/// Registry mapping return-plugin names to their buses.
///
/// Mutations (register/unregister) happen on non-RT threads; the send
/// plugin's RT lookup is a spinlocked hash probe with no allocation.
pub struct ReturnBusRegistry {
    buses: SpinLock<HashMap<String, Arc<ReturnBus>>>,
}

impl ReturnBusRegistry {
    pub fn new() -> Self {
        Self {
            buses: SpinLock::new(HashMap::new()),
        }
    }

    /// Non-RT: create or fetch the bus for a return plugin name.
    pub fn register(&self, name: &str) -> Arc<ReturnBus> {
        let mut buses = self.buses.lock();
        buses
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ReturnBus::new()))
            .clone()
    }

    pub fn unregister(&self, name: &str) {
        self.buses.lock().remove(name);
    }

    /// RT-safe lookup by name; returns None when no return with that name
    /// is registered.
    pub fn lookup(&self, name: &str) -> Option<Arc<ReturnBus>> {
        self.buses.lock().get(name).cloned()
    }
}

impl Default for ReturnBusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_send_is_readable_after_swap() {
        let bus = ReturnBus::new();
        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.5);

        let t0 = Duration::from_millis(1);
        let t1 = Duration::from_millis(2);

        bus.send_audio(&input, 0, 2, 0, 2.0, t0);

        // Same chunk: the sent audio is still on the input side
        let mut output = SampleBuffer::new(2);
        bus.read_output(&mut output, t0);
        assert_eq!(output.channel(0)[0], 0.0);

        // Next chunk the buffers swap and the audio appears
        bus.read_output(&mut output, t1);
        assert_eq!(output.channel(0)[0], 1.0);
    }

    #[test]
    fn test_registry_roundtrip() {
        let registry = ReturnBusRegistry::new();
        assert!(registry.lookup("verb").is_none());

        let bus = registry.register("verb");
        let found = registry.lookup("verb").unwrap();
        assert!(Arc::ptr_eq(&bus, &found));

        registry.unregister("verb");
        assert!(registry.lookup("verb").is_none());
    }
}
