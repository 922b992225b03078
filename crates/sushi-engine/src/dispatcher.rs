//! The non-RT event dispatcher
//!
//! One worker thread owns the control-plane event loop: it forwards posted
//! events into the RT queues, drains the RT output queue, frees deletion
//! envelopes, executes async work, feeds the parameter manager and fans
//! notifications out to registered listeners. The audio thread never talks
//! to the outside world except through the queues this loop services.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use sushi_core::{monotonic_time, Time};

use crate::engine::audio_engine::AudioEngine;
use crate::engine::parameter_manager::ParameterManager;
use crate::library::event::{
    AudioGraphNotification, Event, EventBody, EventCompletionStatus, EventPoster,
};
use crate::library::rt_event::RtEvent;

const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(1);
const EVENT_CHANNEL_SIZE: usize = 1024;

/// Interval between outgoing notifications for any one parameter.
const PARAMETER_UPDATE_RATE: Duration = Duration::from_millis(40);

/// Receives converted notification events from the dispatcher loop.
pub trait NotificationListener: Send {
    fn notification(&self, event: &Event);
}

/// Cloneable posting handle into the dispatcher loop.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: Sender<Event>,
}

impl EventPoster for DispatcherHandle {
    fn post(&self, event: Event) {
        if self.sender.try_send(event).is_err() {
            log::warn!("Event dispatcher queue full, dropping event");
        }
    }
}

type Listeners = Arc<Mutex<Vec<Box<dyn NotificationListener>>>>;

pub struct EventDispatcher {
    sender: Sender<Event>,
    running: Arc<AtomicBool>,
    listeners: Listeners,
    worker: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Start the dispatcher loop for an engine. Also registers itself as the
    /// engine's notification sink.
    pub fn new(engine: Arc<AudioEngine>) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(EVENT_CHANNEL_SIZE);
        let running = Arc::new(AtomicBool::new(true));
        let listeners: Listeners = Arc::new(Mutex::new(Vec::new()));

        engine.shared().attach_notification_sender(sender.clone());

        let worker = {
            let running = Arc::clone(&running);
            let loop_state = DispatcherLoop {
                engine,
                receiver,
                parameter_manager: ParameterManager::new(PARAMETER_UPDATE_RATE),
                listeners: Arc::clone(&listeners),
                current_rt_time: Time::ZERO,
            };
            std::thread::Builder::new()
                .name("event_dispatcher".to_string())
                .spawn(move || loop_state.run(running))
                .expect("spawning the event dispatcher thread")
        };

        Self {
            sender,
            running,
            listeners,
            worker: Some(worker),
        }
    }

    /// Post an event for asynchronous processing.
    pub fn post_event(&self, event: Event) {
        if self.sender.try_send(event).is_err() {
            log::warn!("Event dispatcher queue full, dropping event");
        }
    }

    /// Register a sink for outbound notification events.
    pub fn add_listener(&self, listener: Box<dyn NotificationListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn poster(&self) -> DispatcherHandle {
        DispatcherHandle {
            sender: self.sender.clone(),
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct DispatcherLoop {
    engine: Arc<AudioEngine>,
    receiver: Receiver<Event>,
    parameter_manager: ParameterManager,
    listeners: Listeners,
    current_rt_time: Time,
}

impl DispatcherLoop {
    fn run(mut self, running: Arc<AtomicBool>) {
        log::debug!("Event dispatcher started");
        while running.load(Ordering::Acquire) {
            while let Ok(event) = self.receiver.try_recv() {
                self.process_posted_event(event);
            }
            self.drain_rt_output();
            let container = self.engine.processor_container().clone();
            self.parameter_manager.output_parameter_notifications(
                &ListenerPoster {
                    listeners: &self.listeners,
                },
                &container,
                monotonic_time(),
            );
            std::thread::sleep(DISPATCH_POLL_INTERVAL);
        }
        // Final sweep so no deletion envelopes outlive the loop
        self.drain_rt_output();
        log::debug!("Event dispatcher stopped");
    }

    fn process_posted_event(&mut self, event: Event) {
        if event.maps_to_rt_event() {
            self.forward_to_rt(event);
            return;
        }
        match &event.body {
            EventBody::AsyncWork {
                processor_id,
                callback,
            } => {
                let status = callback(*processor_id, event.event_id);
                let _ = self.engine.send_rt_event(RtEvent::AsyncWorkCompletion {
                    event_id: event.event_id,
                    processor_id: *processor_id,
                    return_status: status,
                });
            }
            EventBody::AudioGraphNotification(notification) => {
                self.track_graph_change(*notification);
                self.notify_listeners(&event);
            }
            _ => self.notify_listeners(&event),
        }
    }

    fn forward_to_rt(&mut self, event: Event) {
        // Engine-level transport changes go through the engine so the
        // non-RT transport mirror stays consistent
        match &event.body {
            EventBody::SetEngineTempo(tempo) => {
                self.engine.set_tempo(*tempo);
                Self::complete(event, EventCompletionStatus::Ok);
                return;
            }
            EventBody::SetEngineTimeSignature(signature) => {
                self.engine.set_time_signature(*signature);
                Self::complete(event, EventCompletionStatus::Ok);
                return;
            }
            EventBody::SetEnginePlayingMode(mode) => {
                self.engine.set_transport_mode(*mode);
                Self::complete(event, EventCompletionStatus::Ok);
                return;
            }
            EventBody::SetEngineSyncMode(mode) => {
                self.engine.set_tempo_sync_mode(*mode);
                Self::complete(event, EventCompletionStatus::Ok);
                return;
            }
            _ => {}
        }

        let sample_offset = self
            .engine
            .event_timer()
            .sample_offset_from_realtime(event.timestamp)
            .unwrap_or(0);
        let mut event = event;
        let completion_cb = event.completion_cb.take();
        match event.to_rt_event(sample_offset) {
            Some(rt_event) => {
                let status = match self.engine.send_rt_event(rt_event) {
                    Ok(()) => EventCompletionStatus::Ok,
                    Err(_) => EventCompletionStatus::QueueFull,
                };
                if let Some(callback) = completion_cb {
                    callback(status);
                }
            }
            None => {
                if let Some(callback) = completion_cb {
                    callback(EventCompletionStatus::Error);
                }
            }
        }
    }

    fn complete(mut event: Event, status: EventCompletionStatus) {
        if let Some(callback) = event.completion_cb.take() {
            callback(status);
        }
    }

    fn drain_rt_output(&mut self) {
        let main_out = self.engine.shared().main_out_queue.clone();
        while let Some(rt_event) = main_out.pop() {
            match rt_event {
                RtEvent::Delete(garbage) => {
                    // Freed here, off the audio thread
                    drop(garbage);
                }
                RtEvent::Synchronisation { time } => {
                    self.current_rt_time = time;
                    self.engine.event_timer().set_outgoing_time(time);
                }
                RtEvent::FloatParameterChange(e)
                | RtEvent::IntParameterChange(e)
                | RtEvent::BoolParameterChange(e) => {
                    self.parameter_manager.mark_parameter_changed(
                        e.processor_id,
                        e.parameter_id,
                        monotonic_time(),
                    );
                }
                RtEvent::AsyncWork {
                    event_id,
                    processor_id,
                    callback,
                } => {
                    let status = callback(processor_id, event_id);
                    let _ = self.engine.send_rt_event(RtEvent::AsyncWorkCompletion {
                        event_id,
                        processor_id,
                        return_status: status,
                    });
                }
                RtEvent::ClipNotification { channel, input } => {
                    log::warn!(
                        "Clipping detected on engine {} channel {}",
                        if input { "input" } else { "output" },
                        channel
                    );
                    if let Some(event) = Event::from_rt_event(
                        RtEvent::ClipNotification { channel, input },
                        self.current_rt_time,
                    ) {
                        self.notify_listeners(&event);
                    }
                }
                other => {
                    if let Some(event) = Event::from_rt_event(other, self.current_rt_time) {
                        self.notify_listeners(&event);
                    }
                }
            }
        }
    }

    fn track_graph_change(&mut self, notification: AudioGraphNotification) {
        let container = self.engine.processor_container();
        match notification {
            AudioGraphNotification::ProcessorCreated { processor_id } => {
                self.parameter_manager.track_parameters(container, processor_id);
            }
            AudioGraphNotification::TrackCreated { track_id } => {
                self.parameter_manager.track_parameters(container, track_id);
            }
            AudioGraphNotification::ProcessorDeleted { processor_id } => {
                self.parameter_manager.untrack_parameters(processor_id);
            }
            AudioGraphNotification::TrackDeleted { track_id } => {
                self.parameter_manager.untrack_parameters(track_id);
            }
            _ => {}
        }
    }

    fn notify_listeners(&self, event: &Event) {
        for listener in self.listeners.lock().iter() {
            listener.notification(event);
        }
    }
}

struct ListenerPoster<'a> {
    listeners: &'a Listeners,
}

impl EventPoster for ListenerPoster<'_> {
    fn post(&self, event: Event) {
        for listener in self.listeners.lock().iter() {
            listener.notification(&event);
        }
    }
}
