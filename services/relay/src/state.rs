//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the immutable
//! configuration and the session registry shared by all handlers.

use crate::{config::Config, registry::SessionRegistry};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
}
