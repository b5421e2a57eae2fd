//! Voice Trainer Service Library Crate
//!
//! Everything the trainer needs around the core session: environment
//! configuration, the WebSocket connection to the voice service, and the
//! microphone and playback collaborators. The `trainer` binary is a thin
//! wrapper around this library.

pub mod audio;
pub mod config;
pub mod transport;
