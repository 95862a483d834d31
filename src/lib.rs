//! Core library for the multi-room voice-chat network engine: frame
//! transport, wire message codec, request correlator, room registry,
//! dispatch engine, audio pipeline, and device abstraction.

pub mod audio;
pub mod buffers;
pub mod client;
pub mod correlator;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod server;
