//! Media-Stream Session Handling
//!
//! This module contains the core logic of the relay: bridging one telephony
//! media stream to one realtime AI connection. It is structured into
//! submodules:
//!
//! - `protocol`: the telephony frame codec — decoding inbound media-stream
//!   events and encoding outbound media frames.
//! - `session`: the session bridge — lifecycle state machine, the two pump
//!   loops, and the liveness keeper.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
