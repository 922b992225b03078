//! Correlating RT completion acks back to non-RT callers

use std::sync::Arc;
use std::time::Duration;

use sushi_core::EventId;

use crate::library::rt_event::{EventStatus, RtEvent, RtEventFifo};

const MAX_RETRIES: u32 = 100;

struct Node {
    id: EventId,
    status: bool,
}

/// Polls the control-out queue for the ack matching a given event id,
/// buffering acks that belong to other waiters.
pub struct AsyncEventReceiver {
    queue: Arc<RtEventFifo>,
    receive_list: Vec<Node>,
}

impl AsyncEventReceiver {
    pub fn new(queue: Arc<RtEventFifo>) -> Self {
        Self {
            queue,
            receive_list: Vec::new(),
        }
    }

    /// Wait for the ack of event `id`, polling up to `timeout`. Returns true
    /// iff the event came back with HandledOk.
    pub fn wait_for_response(&mut self, id: EventId, timeout: Duration) -> bool {
        for _ in 0..MAX_RETRIES {
            while let Some(event) = self.queue.pop() {
                if let RtEvent::Ack { event_id, status } = event {
                    let handled_ok = status == EventStatus::HandledOk;
                    if event_id == id {
                        if !handled_ok {
                            log::error!("RtEvent with id {} returned with error", id);
                        }
                        return handled_ok;
                    }
                    self.receive_list.push(Node {
                        id: event_id,
                        status: handled_ok,
                    });
                }
            }
            if let Some(position) = self.receive_list.iter().position(|node| node.id == id) {
                return self.receive_list.swap_remove(position).status;
            }
            std::thread::sleep(timeout / MAX_RETRIES);
        }
        log::warn!("Waiting for RtEvent with id {} timed out", id);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_ack_returns_status() {
        let queue = Arc::new(RtEventFifo::new(16));
        let mut receiver = AsyncEventReceiver::new(queue.clone());

        queue
            .push(RtEvent::Ack {
                event_id: 1,
                status: EventStatus::HandledOk,
            })
            .unwrap();
        assert!(receiver.wait_for_response(1, Duration::from_millis(10)));

        queue
            .push(RtEvent::Ack {
                event_id: 2,
                status: EventStatus::NotHandled,
            })
            .unwrap();
        assert!(!receiver.wait_for_response(2, Duration::from_millis(10)));
    }

    #[test]
    fn test_non_matching_acks_are_buffered() {
        let queue = Arc::new(RtEventFifo::new(16));
        let mut receiver = AsyncEventReceiver::new(queue.clone());

        queue
            .push(RtEvent::Ack {
                event_id: 7,
                status: EventStatus::HandledOk,
            })
            .unwrap();
        queue
            .push(RtEvent::Ack {
                event_id: 8,
                status: EventStatus::HandledOk,
            })
            .unwrap();

        assert!(receiver.wait_for_response(8, Duration::from_millis(10)));
        // The ack for 7 was buffered and is found without a new queue entry
        assert!(receiver.wait_for_response(7, Duration::from_millis(10)));
    }

    #[test]
    fn test_timeout_returns_false() {
        let queue = Arc::new(RtEventFifo::new(16));
        let mut receiver = AsyncEventReceiver::new(queue.clone());
        assert!(!receiver.wait_for_response(99, Duration::from_millis(20)));
    }
}
