//! RT events
//!
//! Everything that crosses into or out of the audio thread in-band travels
//! as an `RtEvent`. The type is a sum type with exhaustive matching: each
//! variant carries only its own fields and the compiler checks the total
//! size against the cache-line budget below.
//!
//! Heap-carrying variants (property strings, state snapshots, processor and
//! track instances) move ownership through the queue. Whatever the RT side
//! has observed and no longer needs comes back wrapped in [`RtEvent::Delete`]
//! so the non-RT dispatcher can free it; the audio thread itself never
//! allocates or frees.

use sushi_core::{EventId, ObjectId, Time};

use crate::engine::track::Track;
use crate::engine::transport::{PlayingMode, SyncMode, TimeSignature};
use crate::library::connection_types::AudioConnection;
use crate::library::processor::Processor;
use crate::library::processor_state::RtState;

/// Upper bound for the size of one event. Two cache lines' worth of headroom
/// would defeat the point of a copyable event type.
pub const RT_EVENT_SIZE_LIMIT: usize = 64;

const _: () = assert!(std::mem::size_of::<RtEvent>() <= RT_EVENT_SIZE_LIMIT);

/// Opaque binary payload for data properties.
#[derive(Debug)]
pub struct BlobData(pub Box<[u8]>);

/// Keyboard event payload with a note number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyboardRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub channel: i32,
    pub note: i32,
    pub velocity: f32,
}

/// Keyboard event payload with a single continuous value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyboardCommonRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub channel: i32,
    pub value: f32,
}

/// Parameter change payload shared by the float/int/bool variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterChangeRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub parameter_id: ObjectId,
    pub value: f32,
}

/// Result of handling a returnable event on the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    HandledOk,
    NotHandled,
}

/// Function executed by the non-RT worker on behalf of a processor.
pub type AsyncWorkCallback = fn(processor_id: ObjectId, event_id: EventId) -> i32;

/// A processor instance in flight between the domains.
pub struct ProcessorInstance(pub Box<dyn Processor>);

impl std::fmt::Debug for ProcessorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProcessorInstance(id={})", self.0.id())
    }
}

/// A track instance in flight between the domains.
pub struct TrackInstance(pub Box<Track>);

impl std::fmt::Debug for TrackInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TrackInstance(id={})", self.0.id())
    }
}

/// Heap objects returned from the RT domain for destruction.
pub enum RtGarbage {
    String(Box<String>),
    Blob(BlobData),
    State(Box<RtState>),
    Processor(Box<dyn Processor>),
    Track(Box<Track>),
}

impl std::fmt::Debug for RtGarbage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RtGarbage::String(_) => "String",
            RtGarbage::Blob(_) => "Blob",
            RtGarbage::State(_) => "State",
            RtGarbage::Processor(_) => "Processor",
            RtGarbage::Track(_) => "Track",
        };
        write!(f, "RtGarbage::{}", name)
    }
}

/// All in-band RT messages.
#[derive(Debug)]
pub enum RtEvent {
    // Keyboard
    NoteOn(KeyboardRtEvent),
    NoteOff(KeyboardRtEvent),
    NoteAftertouch(KeyboardRtEvent),
    Aftertouch(KeyboardCommonRtEvent),
    PitchBend(KeyboardCommonRtEvent),
    Modulation(KeyboardCommonRtEvent),
    WrappedMidi {
        processor_id: ObjectId,
        sample_offset: u32,
        midi_data: [u8; 4],
    },

    // Parameters and properties
    FloatParameterChange(ParameterChangeRtEvent),
    IntParameterChange(ParameterChangeRtEvent),
    BoolParameterChange(ParameterChangeRtEvent),
    StringPropertyChange {
        processor_id: ObjectId,
        sample_offset: u32,
        property_id: ObjectId,
        value: Box<String>,
    },
    DataPropertyChange {
        processor_id: ObjectId,
        sample_offset: u32,
        property_id: ObjectId,
        value: BlobData,
    },
    SetBypass {
        processor_id: ObjectId,
        bypassed: bool,
    },
    SetState {
        processor_id: ObjectId,
        state: Box<RtState>,
    },

    // Transport
    Tempo {
        tempo: f32,
    },
    TimeSignature {
        signature: TimeSignature,
    },
    PlayingMode {
        mode: PlayingMode,
    },
    SyncMode {
        mode: SyncMode,
    },
    TimingTick {
        sample_offset: u32,
        tick_count: i64,
    },

    // Graph mutations, acknowledged on the control-out queue
    InsertProcessor {
        event_id: EventId,
        processor: ProcessorInstance,
    },
    RemoveProcessor {
        event_id: EventId,
        processor_id: ObjectId,
    },
    AddProcessorToTrack {
        event_id: EventId,
        processor_id: ObjectId,
        track_id: ObjectId,
        before_id: Option<ObjectId>,
    },
    RemoveProcessorFromTrack {
        event_id: EventId,
        processor_id: ObjectId,
        track_id: ObjectId,
    },
    AddTrack {
        event_id: EventId,
        track: TrackInstance,
    },
    RemoveTrack {
        event_id: EventId,
        track_id: ObjectId,
    },
    AddAudioConnection {
        event_id: EventId,
        input_connection: bool,
        connection: AudioConnection,
    },
    RemoveAudioConnection {
        event_id: EventId,
        input_connection: bool,
        connection: AudioConnection,
    },

    // Notifications and CV
    ClipNotification {
        channel: usize,
        input: bool,
    },
    CvEvent {
        processor_id: ObjectId,
        cv_id: usize,
        value: f32,
    },
    GateEvent {
        processor_id: ObjectId,
        gate_no: usize,
        value: bool,
    },
    Synchronisation {
        time: Time,
    },

    // Async work and cross-domain bookkeeping
    AsyncWork {
        event_id: EventId,
        processor_id: ObjectId,
        callback: AsyncWorkCallback,
    },
    AsyncWorkCompletion {
        event_id: EventId,
        processor_id: ObjectId,
        return_status: i32,
    },
    Ack {
        event_id: EventId,
        status: EventStatus,
    },
    Delete(RtGarbage),
}

impl RtEvent {
    pub fn note_on(processor_id: ObjectId, sample_offset: u32, channel: i32, note: i32, velocity: f32) -> Self {
        RtEvent::NoteOn(KeyboardRtEvent { processor_id, sample_offset, channel, note, velocity })
    }

    pub fn note_off(processor_id: ObjectId, sample_offset: u32, channel: i32, note: i32, velocity: f32) -> Self {
        RtEvent::NoteOff(KeyboardRtEvent { processor_id, sample_offset, channel, note, velocity })
    }

    pub fn note_aftertouch(processor_id: ObjectId, sample_offset: u32, channel: i32, note: i32, velocity: f32) -> Self {
        RtEvent::NoteAftertouch(KeyboardRtEvent { processor_id, sample_offset, channel, note, velocity })
    }

    pub fn pitch_bend(processor_id: ObjectId, sample_offset: u32, channel: i32, value: f32) -> Self {
        RtEvent::PitchBend(KeyboardCommonRtEvent { processor_id, sample_offset, channel, value })
    }

    pub fn parameter_change(processor_id: ObjectId, sample_offset: u32, parameter_id: ObjectId, value: f32) -> Self {
        RtEvent::FloatParameterChange(ParameterChangeRtEvent { processor_id, sample_offset, parameter_id, value })
    }

    /// The processor an event is routed to, for events that target one.
    pub fn processor_id(&self) -> Option<ObjectId> {
        match self {
            RtEvent::NoteOn(e) | RtEvent::NoteOff(e) | RtEvent::NoteAftertouch(e) => {
                Some(e.processor_id)
            }
            RtEvent::Aftertouch(e) | RtEvent::PitchBend(e) | RtEvent::Modulation(e) => {
                Some(e.processor_id)
            }
            RtEvent::WrappedMidi { processor_id, .. } => Some(*processor_id),
            RtEvent::FloatParameterChange(e)
            | RtEvent::IntParameterChange(e)
            | RtEvent::BoolParameterChange(e) => Some(e.processor_id),
            RtEvent::StringPropertyChange { processor_id, .. }
            | RtEvent::DataPropertyChange { processor_id, .. }
            | RtEvent::SetBypass { processor_id, .. }
            | RtEvent::SetState { processor_id, .. }
            | RtEvent::CvEvent { processor_id, .. }
            | RtEvent::GateEvent { processor_id, .. }
            | RtEvent::AsyncWork { processor_id, .. }
            | RtEvent::AsyncWorkCompletion { processor_id, .. } => Some(*processor_id),
            _ => None,
        }
    }

    /// True for events that flow through the track keyboard event bus.
    pub fn is_keyboard_event(&self) -> bool {
        matches!(
            self,
            RtEvent::NoteOn(_)
                | RtEvent::NoteOff(_)
                | RtEvent::NoteAftertouch(_)
                | RtEvent::Aftertouch(_)
                | RtEvent::PitchBend(_)
                | RtEvent::Modulation(_)
                | RtEvent::WrappedMidi { .. }
        )
    }

    /// True for engine control events handled at the top of the chunk.
    pub fn is_engine_control_event(&self) -> bool {
        matches!(
            self,
            RtEvent::Tempo { .. }
                | RtEvent::TimeSignature { .. }
                | RtEvent::PlayingMode { .. }
                | RtEvent::SyncMode { .. }
                | RtEvent::InsertProcessor { .. }
                | RtEvent::RemoveProcessor { .. }
                | RtEvent::AddProcessorToTrack { .. }
                | RtEvent::RemoveProcessorFromTrack { .. }
                | RtEvent::AddTrack { .. }
                | RtEvent::RemoveTrack { .. }
                | RtEvent::AddAudioConnection { .. }
                | RtEvent::RemoveAudioConnection { .. }
        )
    }

    /// Re-stamp a keyboard event with a new source processor id, used when a
    /// track forwards unconsumed events upwards.
    pub fn with_processor_id(self, processor_id: ObjectId) -> Self {
        match self {
            RtEvent::NoteOn(e) => RtEvent::NoteOn(KeyboardRtEvent { processor_id, ..e }),
            RtEvent::NoteOff(e) => RtEvent::NoteOff(KeyboardRtEvent { processor_id, ..e }),
            RtEvent::NoteAftertouch(e) => {
                RtEvent::NoteAftertouch(KeyboardRtEvent { processor_id, ..e })
            }
            RtEvent::Aftertouch(e) => RtEvent::Aftertouch(KeyboardCommonRtEvent { processor_id, ..e }),
            RtEvent::PitchBend(e) => RtEvent::PitchBend(KeyboardCommonRtEvent { processor_id, ..e }),
            RtEvent::Modulation(e) => RtEvent::Modulation(KeyboardCommonRtEvent { processor_id, ..e }),
            RtEvent::WrappedMidi { sample_offset, midi_data, .. } => RtEvent::WrappedMidi {
                processor_id,
                sample_offset,
                midi_data,
            },
            other => other,
        }
    }
}

/// Queue type used for all RT event traffic.
pub type RtEventFifo = sushi_core::SpscFifo<RtEvent>;

/// Shared handle to an RT event queue, used as processor event output.
pub type RtEventSink = std::sync::Arc<RtEventFifo>;
