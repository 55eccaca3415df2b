//! Process-wide accounting of active media sessions.
//!
//! The registry is injected into each session bridge through the shared
//! application state; nothing else is global. It intentionally exposes only
//! registration, removal, and a count for observability.

use std::collections::HashSet;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct SessionRegistry {
    active: Mutex<HashSet<Uuid>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a session as active. Returns `false` if the id was already
    /// present, which would indicate an accounting bug.
    pub async fn register(&self, id: Uuid) -> bool {
        self.active.lock().await.insert(id)
    }

    /// Removes a session. Returns `true` only for the call that actually
    /// removed the id, so teardown paths can assert exactly-once semantics.
    pub async fn unregister(&self, id: Uuid) -> bool {
        self.active.lock().await.remove(&id)
    }

    /// Number of currently active sessions.
    pub async fn count(&self) -> usize {
        self.active.lock().await.len()
    }
}
