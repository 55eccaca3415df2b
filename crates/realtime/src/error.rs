use tokio_tungstenite::tungstenite;

/// Errors surfaced by the upstream realtime connection.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The realtime endpoint could not be reached or rejected the handshake.
    /// Fatal for the session; there is no retry at this layer.
    #[error("failed to connect to the realtime endpoint: {0}")]
    Connect(#[source] tungstenite::Error),

    /// The connect request itself could not be built.
    #[error("invalid connect request: {0}")]
    BadRequest(#[from] tungstenite::http::header::InvalidHeaderValue),

    /// The initial `session.update` could not be delivered within the retry
    /// bound. Without it the model would run with default behavior, so this
    /// is fatal for the session.
    #[error("session configuration not delivered after {attempts} attempts")]
    ConfigurationFailed {
        attempts: u32,
        #[source]
        source: tungstenite::Error,
    },

    /// A client event failed to serialize.
    #[error("failed to serialize client event: {0}")]
    Encode(#[from] serde_json::Error),
}
