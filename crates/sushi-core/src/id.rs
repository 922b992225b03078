//! Unique id allocation for processors, parameters and events

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Identifier for engine objects (processors, parameters). Monotonically
/// allocated, never reused.
pub type ObjectId = u32;

/// Identifier correlating asynchronous events with their completion acks.
pub type EventId = u64;

/// Allocator for [`ObjectId`]s.
///
/// Kept as an instance rather than a process-global so engines under test can
/// be given their own counter and produce deterministic ids.
#[derive(Debug)]
pub struct ObjectIdSource {
    counter: AtomicU32,
}

impl ObjectIdSource {
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }

    /// Allocate the next id. Safe to call from any thread.
    #[inline]
    pub fn next(&self) -> ObjectId {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ObjectIdSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a process-unique event id.
#[inline]
pub fn next_event_id() -> EventId {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_and_unique() {
        let source = ObjectIdSource::new();
        let first = source.next();
        let second = source.next();
        assert_eq!(second, first + 1);

        let e1 = next_event_id();
        let e2 = next_event_id();
        assert!(e2 > e1);
    }
}
