//! remotecodec Host Library
//!
//! Everything that runs next to the decoder:
//! - Decoding capability abstraction and format-based registry
//! - Per-session matching engine (slot pool, sample queue, state machine)
//! - Media host service answering channel requests
//! - In-process connector for tests and the demo binary

pub mod capability;
pub mod engine;
pub mod service;

pub use capability::{
    CapabilityError, CapabilityEvent, CapabilityRegistry, DecodingCapability, EventSink,
    LoopbackCapability, Slot,
};
pub use engine::{EngineError, EngineSnapshot, EngineState, SessionEngineHandle};
pub use service::{HostLink, LocalConnector, MediaHost};
