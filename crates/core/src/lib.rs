//! Core of the voice training session: the binary frame codec for the
//! realtime voice service, the session state machine that drives a training
//! dialog, and the generation adapter that writes instructor replies.
//!
//! Nothing in here owns a socket. The service crate supplies a
//! [`transport::Transport`] and feeds decoded frames to
//! [`session::Session::route`].

pub mod chunker;
pub mod codec;
pub mod config;
pub mod event;
pub mod generation;
pub mod history;
pub mod llm_client;
pub mod playback;
pub mod prompts;
pub mod session;
pub mod speaker;
pub mod transport;
