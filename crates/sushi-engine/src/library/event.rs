//! Non-RT events
//!
//! Heap-allocated events used outside the audio thread: external control
//! changes on their way in, notifications on their way out. Events that have
//! an RT representation convert through [`Event::to_rt_event`] and
//! [`Event::from_rt_event`] at the domain boundary.

use sushi_core::{next_event_id, EventId, ObjectId, Time};

use crate::engine::transport::{PlayingMode, SyncMode, TimeSignature};
use crate::library::rt_event::{AsyncWorkCallback, KeyboardRtEvent, RtEvent};

/// Anything that accepts non-RT events for processing, normally the
/// dispatcher's input side.
pub trait EventPoster: Send + Sync {
    fn post(&self, event: Event);
}

/// Status passed to completion callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCompletionStatus {
    Ok,
    Error,
    QueueFull,
    Timeout,
}

/// Callback invoked by the dispatcher once an event has been processed.
pub type EventCompletionCallback = Box<dyn FnOnce(EventCompletionStatus) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardSubtype {
    NoteOn,
    NoteOff,
    NoteAftertouch,
    Aftertouch,
    PitchBend,
    Modulation,
}

/// Notifications about the audio graph emitted after mutations complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioGraphNotification {
    ProcessorCreated { processor_id: ObjectId },
    ProcessorDeleted { processor_id: ObjectId },
    ProcessorAddedToTrack { processor_id: ObjectId, track_id: ObjectId },
    ProcessorRemovedFromTrack { processor_id: ObjectId, track_id: ObjectId },
    TrackCreated { track_id: ObjectId },
    TrackDeleted { track_id: ObjectId },
}

/// Event payloads.
#[derive(Debug)]
pub enum EventBody {
    Keyboard {
        subtype: KeyboardSubtype,
        processor_id: ObjectId,
        channel: i32,
        note: i32,
        value: f32,
    },
    ParameterChange {
        processor_id: ObjectId,
        parameter_id: ObjectId,
        normalized_value: f32,
    },
    PropertyChange {
        processor_id: ObjectId,
        property_id: ObjectId,
        value: String,
    },
    SetProcessorBypass {
        processor_id: ObjectId,
        bypassed: bool,
    },
    SetEngineTempo(f32),
    SetEngineTimeSignature(TimeSignature),
    SetEnginePlayingMode(PlayingMode),
    SetEngineSyncMode(SyncMode),
    AsyncWork {
        processor_id: ObjectId,
        callback: AsyncWorkCallback,
    },
    // Notifications, produced from RT events
    ParameterChangeNotification {
        processor_id: ObjectId,
        parameter_id: ObjectId,
        normalized_value: f32,
        domain_value: f32,
        formatted_value: String,
    },
    PropertyChangeNotification {
        processor_id: ObjectId,
        property_id: ObjectId,
        value: String,
    },
    ClippingNotification {
        channel: usize,
        input: bool,
    },
    AudioGraphNotification(AudioGraphNotification),
    EngineTimingNotification {
        average: f32,
        min: f32,
        max: f32,
    },
    AsyncWorkCompletion {
        processor_id: ObjectId,
        work_event_id: EventId,
        return_status: i32,
    },
}

/// A non-RT event: a timestamped payload with an id and an optional
/// completion callback.
pub struct Event {
    pub timestamp: Time,
    pub event_id: EventId,
    pub completion_cb: Option<EventCompletionCallback>,
    pub body: EventBody,
}

impl Event {
    pub fn new(body: EventBody, timestamp: Time) -> Self {
        Self {
            timestamp,
            event_id: next_event_id(),
            completion_cb: None,
            body,
        }
    }

    pub fn with_completion_cb(mut self, callback: EventCompletionCallback) -> Self {
        self.completion_cb = Some(callback);
        self
    }

    /// True if this event has an RT representation and should be forwarded
    /// into the audio domain.
    pub fn maps_to_rt_event(&self) -> bool {
        matches!(
            self.body,
            EventBody::Keyboard { .. }
                | EventBody::ParameterChange { .. }
                | EventBody::PropertyChange { .. }
                | EventBody::SetProcessorBypass { .. }
                | EventBody::SetEngineTempo(_)
                | EventBody::SetEngineTimeSignature(_)
                | EventBody::SetEnginePlayingMode(_)
                | EventBody::SetEngineSyncMode(_)
        )
    }

    /// Serialize for RT delivery at the given offset within the next chunk.
    /// Heap payloads transfer their ownership into the returned event.
    pub fn to_rt_event(self, sample_offset: u32) -> Option<RtEvent> {
        match self.body {
            EventBody::Keyboard {
                subtype,
                processor_id,
                channel,
                note,
                value,
            } => Some(match subtype {
                KeyboardSubtype::NoteOn => {
                    RtEvent::note_on(processor_id, sample_offset, channel, note, value)
                }
                KeyboardSubtype::NoteOff => {
                    RtEvent::note_off(processor_id, sample_offset, channel, note, value)
                }
                KeyboardSubtype::NoteAftertouch => {
                    RtEvent::note_aftertouch(processor_id, sample_offset, channel, note, value)
                }
                KeyboardSubtype::Aftertouch => {
                    RtEvent::Aftertouch(crate::library::rt_event::KeyboardCommonRtEvent {
                        processor_id,
                        sample_offset,
                        channel,
                        value,
                    })
                }
                KeyboardSubtype::PitchBend => RtEvent::pitch_bend(processor_id, sample_offset, channel, value),
                KeyboardSubtype::Modulation => {
                    RtEvent::Modulation(crate::library::rt_event::KeyboardCommonRtEvent {
                        processor_id,
                        sample_offset,
                        channel,
                        value,
                    })
                }
            }),
            EventBody::ParameterChange {
                processor_id,
                parameter_id,
                normalized_value,
            } => Some(RtEvent::parameter_change(
                processor_id,
                sample_offset,
                parameter_id,
                normalized_value,
            )),
            EventBody::PropertyChange {
                processor_id,
                property_id,
                value,
            } => Some(RtEvent::StringPropertyChange {
                processor_id,
                sample_offset,
                property_id,
                value: Box::new(value),
            }),
            EventBody::SetProcessorBypass {
                processor_id,
                bypassed,
            } => Some(RtEvent::SetBypass {
                processor_id,
                bypassed,
            }),
            EventBody::SetEngineTempo(tempo) => Some(RtEvent::Tempo { tempo }),
            EventBody::SetEngineTimeSignature(signature) => {
                Some(RtEvent::TimeSignature { signature })
            }
            EventBody::SetEnginePlayingMode(mode) => Some(RtEvent::PlayingMode { mode }),
            EventBody::SetEngineSyncMode(mode) => Some(RtEvent::SyncMode { mode }),
            _ => None,
        }
    }

    /// Build an owned event from an RT event received from the audio domain.
    pub fn from_rt_event(rt_event: RtEvent, timestamp: Time) -> Option<Event> {
        let keyboard = |subtype, e: KeyboardRtEvent| EventBody::Keyboard {
            subtype,
            processor_id: e.processor_id,
            channel: e.channel,
            note: e.note,
            value: e.velocity,
        };
        let body = match rt_event {
            RtEvent::NoteOn(e) => keyboard(KeyboardSubtype::NoteOn, e),
            RtEvent::NoteOff(e) => keyboard(KeyboardSubtype::NoteOff, e),
            RtEvent::NoteAftertouch(e) => keyboard(KeyboardSubtype::NoteAftertouch, e),
            RtEvent::Aftertouch(e) => EventBody::Keyboard {
                subtype: KeyboardSubtype::Aftertouch,
                processor_id: e.processor_id,
                channel: e.channel,
                note: 0,
                value: e.value,
            },
            RtEvent::PitchBend(e) => EventBody::Keyboard {
                subtype: KeyboardSubtype::PitchBend,
                processor_id: e.processor_id,
                channel: e.channel,
                note: 0,
                value: e.value,
            },
            RtEvent::Modulation(e) => EventBody::Keyboard {
                subtype: KeyboardSubtype::Modulation,
                processor_id: e.processor_id,
                channel: e.channel,
                note: 0,
                value: e.value,
            },
            RtEvent::ClipNotification { channel, input } => {
                EventBody::ClippingNotification { channel, input }
            }
            RtEvent::AsyncWorkCompletion {
                event_id,
                processor_id,
                return_status,
            } => EventBody::AsyncWorkCompletion {
                processor_id,
                work_event_id: event_id,
                return_status,
            },
            _ => return None,
        };
        Some(Event::new(body, timestamp))
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("event_id", &self.event_id)
            .field("timestamp", &self.timestamp)
            .field("body", &self.body)
            .finish()
    }
}
