//! Broadcasting module for real-time engine event streaming.
//!
//! Observers (a UI layer, an IPC bridge, tests) subscribe to a single
//! broadcast channel; the engine sends change notifications after every
//! mutation worth surfacing. Sending with no receivers is fine.

pub mod events;

pub use events::{EngineEvent, EngineEventBroadcaster};
