//! Client for the OpenAI Realtime speech-to-speech API.
//!
//! This crate owns exactly one upstream WebSocket connection per session:
//! it performs the authenticated handshake, delivers the initial session
//! configuration, appends caller audio to the input buffer, and yields the
//! server's event stream as typed [`UpstreamEvent`]s. Connection lifetime
//! policy (when to drain, when to tear down) belongs to the caller.

pub mod client;
pub mod config;
pub mod error;

pub use client::{
    Connection, MessageSink, MessageStream, UpstreamEvent, UpstreamReceiver, UpstreamSender,
    WireError, WireMessage, connect, DEFAULT_ENDPOINT,
};
pub use config::{AudioCoding, Modality, SessionConfig, TurnDetectionMode, Voice};
pub use error::UpstreamError;
