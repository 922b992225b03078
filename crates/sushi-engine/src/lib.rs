//! sushi-engine: headless real-time audio plugin host core
//!
//! Hosts a graph of audio processors (tracks containing plugin chains),
//! drives them from a fixed-size chunk callback and exposes control through
//! an asynchronous, dual-domain event system:
//!
//! - `library`: the shared data model - events, processors, parameters
//! - `engine`: the running machinery - transport, tracks, graph, engine
//! - `dispatcher`: the non-RT event loop
//! - `plugins`: the internal plugin set
//!
//! The audio thread never allocates, never frees and never blocks on a
//! mutex; everything crossing the RT boundary moves through the lock-free
//! queues in `sushi-core`.

pub mod dispatcher;
pub mod engine;
pub mod library;
pub mod plugins;

pub use dispatcher::{DispatcherHandle, EventDispatcher, NotificationListener};
pub use library::event::{Event, EventBody, EventPoster};
pub use engine::audio_engine::{
    AudioEngine, ControlBuffer, EngineError, EngineReturnStatus, PluginInfo, PluginType,
};
pub use engine::transport::{PlayStateChange, PlayingMode, SyncMode, TimeSignature, Transport};
pub use library::processor::{Processor, ProcessorReturnCode};
pub use library::rt_event::RtEvent;
