//! Voko Relay Library Crate
//!
//! This library contains all the core logic for the Voko media relay:
//! configuration, the session registry, the HTTP surface (health and call
//! setup), and the WebSocket session bridge between the telephony media
//! stream and the realtime AI endpoint. The `relay` binary is a thin
//! wrapper around this library.

pub mod config;
pub mod handlers;
pub mod registry;
pub mod router;
pub mod state;
pub mod twiml;
pub mod ws;
