//! Connection handshake and the two directional halves of the realtime link.

use async_openai::types::realtime::{
    ClientEvent, InputAudioBufferAppendEvent, ServerEvent,
};
use futures_util::{
    Sink, SinkExt, Stream, StreamExt,
    stream::{SplitSink, SplitStream},
};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, client::IntoClientRequest, protocol::Message},
};
use tracing::{debug, info, warn};

use crate::{config::SessionConfig, error::UpstreamError};

/// Base URL of the realtime endpoint; the model is appended as a query
/// parameter at connect time.
pub const DEFAULT_ENDPOINT: &str = "wss://api.openai.com/v1/realtime";

/// Delivery attempts for the initial `session.update`, no backoff.
const CONFIG_SEND_ATTEMPTS: u32 = 3;

/// Raw WebSocket message type used on the wire.
pub type WireMessage = Message;
/// Raw WebSocket error type used on the wire.
pub type WireError = tungstenite::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Anything the sending half can be driven over. Real connections use the
/// split tungstenite sink; tests substitute scripted sinks.
pub trait MessageSink: Sink<WireMessage, Error = WireError> + Unpin {}
impl<T: Sink<WireMessage, Error = WireError> + Unpin> MessageSink for T {}

/// Anything the receiving half can be driven over.
pub trait MessageStream: Stream<Item = Result<WireMessage, WireError>> + Unpin {}
impl<T: Stream<Item = Result<WireMessage, WireError>> + Unpin> MessageStream for T {}

/// Performs the authenticated WebSocket handshake with the realtime endpoint.
///
/// There is deliberately no retry here: a session whose upstream connection
/// cannot be established never starts.
pub async fn connect(
    endpoint: &str,
    model: &str,
    api_key: &SecretString,
) -> Result<Connection, UpstreamError> {
    let url = format!("{endpoint}?model={model}");
    let mut request = url
        .into_client_request()
        .map_err(UpstreamError::Connect)?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", api_key.expose_secret()).parse()?,
    );
    request
        .headers_mut()
        .insert("OpenAI-Beta", "realtime=v1".parse()?);

    let (ws_stream, _) = connect_async(request)
        .await
        .map_err(UpstreamError::Connect)?;
    info!(%endpoint, %model, "connected to realtime endpoint");
    Ok(Connection { inner: ws_stream })
}

/// An established upstream connection, exclusively owned by one session.
pub struct Connection {
    inner: WsStream,
}

impl Connection {
    /// Splits the connection into its two directional halves so each pump
    /// loop can own one exclusively.
    pub fn split(self) -> (UpstreamSender, UpstreamReceiver) {
        let (sink, stream) = self.inner.split();
        (
            UpstreamSender { sink, open: true },
            UpstreamReceiver { stream },
        )
    }
}

/// The sending half: session configuration and input audio.
pub struct UpstreamSender<S = SplitSink<WsStream, Message>> {
    sink: S,
    open: bool,
}

impl<S: MessageSink> UpstreamSender<S> {
    /// Wraps an arbitrary message sink as the sending half. `connect` +
    /// `split` is the normal path; this exists for driving the sender over
    /// scripted transports.
    pub fn from_sink(sink: S) -> Self {
        UpstreamSender { sink, open: true }
    }

    /// Delivers the initial session configuration, retrying transient send
    /// failures up to a fixed bound with no backoff. Exhausting the bound is
    /// fatal for the session: the model would otherwise run with default
    /// voice and instructions.
    pub async fn send_session_config(
        &mut self,
        config: &SessionConfig,
    ) -> Result<(), UpstreamError> {
        let payload = serde_json::to_string(&config.to_update_event())?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sink.send(Message::Text(payload.clone().into())).await {
                Ok(()) => {
                    debug!(attempt, "session configuration delivered");
                    return Ok(());
                }
                Err(source) if attempt >= CONFIG_SEND_ATTEMPTS => {
                    self.open = false;
                    return Err(UpstreamError::ConfigurationFailed {
                        attempts: attempt,
                        source,
                    });
                }
                Err(error) => {
                    warn!(attempt, %error, "session configuration send failed, retrying");
                }
            }
        }
    }

    /// Forwards an opaque audio payload as an `input_audio_buffer.append`
    /// event. Returns `false` when the connection is no longer open, in
    /// which case nothing was sent and the caller should drain the session.
    /// Never errors: a failed send marks the connection closed instead.
    pub async fn append_audio(&mut self, payload: &str) -> bool {
        if !self.open {
            return false;
        }
        let event = ClientEvent::InputAudioBufferAppend(InputAudioBufferAppendEvent {
            audio: payload.to_owned(),
            event_id: None,
        });
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, "dropping unencodable audio append event");
                return true;
            }
        };
        match self.sink.send(Message::Text(text.into())).await {
            Ok(()) => true,
            Err(error) => {
                info!(%error, "upstream send failed, marking connection closed");
                self.open = false;
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Best-effort close of the sending half; failures are swallowed.
    pub async fn close(&mut self) {
        self.open = false;
        let _ = self.sink.close().await;
    }
}

/// Events the relay acts on. Everything else the server sends is logged and
/// dropped before it reaches the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// A chunk of response audio (`response.audio.delta`), still in the
    /// opaque encoding negotiated at session setup.
    AudioDelta(String),
    /// The model finished a response (`response.done`).
    ResponseCompleted,
    /// The endpoint acknowledged the session configuration
    /// (`session.updated`).
    SessionUpdated,
}

enum Decoded {
    Event(UpstreamEvent),
    /// Frame dropped, stream continues.
    Skip,
    /// The server reported an error or closed; the sequence ends here.
    Terminal,
}

fn decode_server_event(text: &str) -> Decoded {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(error) => {
            warn!(%error, "dropping unparseable upstream frame");
            return Decoded::Skip;
        }
    };
    let event_type = match value.get("type").and_then(serde_json::Value::as_str) {
        Some(event_type) => event_type.to_owned(),
        None => {
            warn!("dropping upstream frame without a `type` field");
            return Decoded::Skip;
        }
    };
    match serde_json::from_value::<ServerEvent>(value) {
        Ok(ServerEvent::ResponseAudioDelta(event)) => {
            Decoded::Event(UpstreamEvent::AudioDelta(event.delta))
        }
        Ok(ServerEvent::ResponseDone(_)) => Decoded::Event(UpstreamEvent::ResponseCompleted),
        Ok(ServerEvent::SessionUpdated(_)) => Decoded::Event(UpstreamEvent::SessionUpdated),
        Ok(ServerEvent::Error(event)) => {
            warn!(message = %event.error.message, "realtime endpoint reported an error");
            Decoded::Terminal
        }
        Ok(_) => {
            debug!(event = %event_type, "ignoring upstream event");
            Decoded::Skip
        }
        Err(_) => {
            debug!(event = %event_type, "ignoring unrecognized upstream event");
            Decoded::Skip
        }
    }
}

/// The receiving half: a lazy, finite sequence of upstream events. The
/// sequence ends when the server closes, errors, or reports an `error`
/// event; it is not restartable.
pub struct UpstreamReceiver<S = SplitStream<WsStream>> {
    stream: S,
}

impl<S: MessageStream> UpstreamReceiver<S> {
    pub fn from_stream(stream: S) -> Self {
        UpstreamReceiver { stream }
    }

    /// Yields the next actionable event, or `None` once the sequence ends.
    pub async fn next(&mut self) -> Option<UpstreamEvent> {
        while let Some(item) = self.stream.next().await {
            match item {
                Ok(Message::Text(text)) => match decode_server_event(&text) {
                    Decoded::Event(event) => return Some(event),
                    Decoded::Skip => continue,
                    Decoded::Terminal => return None,
                },
                Ok(Message::Close(frame)) => {
                    info!(?frame, "realtime endpoint closed the connection");
                    return None;
                }
                Ok(_) => continue,
                Err(error) => {
                    info!(%error, "realtime connection errored");
                    return None;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudioCoding, Modality, TurnDetectionMode, Voice};
    use futures_util::stream;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A sink that fails the first `failures` sends and records the rest.
    struct ScriptedSink {
        failures: usize,
        sent: Vec<String>,
        closed: bool,
    }

    impl ScriptedSink {
        fn new(failures: usize) -> Self {
            ScriptedSink {
                failures,
                sent: Vec::new(),
                closed: false,
            }
        }
    }

    impl Sink<WireMessage> for ScriptedSink {
        type Error = WireError;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), WireError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: WireMessage) -> Result<(), WireError> {
            let this = self.get_mut();
            if this.failures > 0 {
                this.failures -= 1;
                return Err(WireError::ConnectionClosed);
            }
            if let WireMessage::Text(text) = item {
                this.sent.push(text.to_string());
            }
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), WireError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), WireError>> {
            self.get_mut().closed = true;
            Poll::Ready(Ok(()))
        }
    }

    fn sender_over(sink: ScriptedSink) -> UpstreamSender<ScriptedSink> {
        UpstreamSender::from_sink(sink)
    }

    fn sample_config() -> SessionConfig {
        SessionConfig {
            model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
            voice: Voice::Alloy,
            instructions: "Test instructions".to_string(),
            temperature: 0.8,
            modalities: vec![Modality::Text, Modality::Audio],
            input_audio: AudioCoding::G711Ulaw,
            output_audio: AudioCoding::G711Ulaw,
            turn_detection: TurnDetectionMode::ServerVad,
        }
    }

    const DELTA_FRAME: &str = r#"{"type":"response.audio.delta","event_id":"event_1","response_id":"resp_1","item_id":"item_1","output_index":0,"content_index":0,"delta":"QUJD"}"#;
    const ERROR_FRAME: &str = r#"{"type":"error","event_id":"event_2","error":{"type":"invalid_request_error","code":"bad_session","message":"boom","param":null,"event_id":null}}"#;
    const UPDATED_FRAME: &str = r#"{"type":"session.updated","event_id":"event_3","session":{"model":"gpt-4o-realtime-preview-2024-10-01"}}"#;

    #[tokio::test]
    async fn session_config_is_delivered_on_first_attempt() {
        let mut sender = sender_over(ScriptedSink::new(0));
        sender
            .send_session_config(&sample_config())
            .await
            .expect("delivery should succeed");
        assert_eq!(sender.sink.sent.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&sender.sink.sent[0]).unwrap();
        assert_eq!(value["type"], "session.update");
    }

    #[tokio::test]
    async fn session_config_retries_transient_failures() {
        let mut sender = sender_over(ScriptedSink::new(2));
        sender
            .send_session_config(&sample_config())
            .await
            .expect("third attempt should succeed");
        assert_eq!(sender.sink.sent.len(), 1);
        assert!(sender.is_open());
    }

    #[tokio::test]
    async fn session_config_gives_up_after_three_attempts() {
        let mut sender = sender_over(ScriptedSink::new(3));
        let err = sender
            .send_session_config(&sample_config())
            .await
            .expect_err("all attempts should fail");
        match err {
            UpstreamError::ConfigurationFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected ConfigurationFailed, got {other:?}"),
        }
        assert!(!sender.is_open());
        assert!(sender.sink.sent.is_empty());
    }

    #[tokio::test]
    async fn append_audio_wraps_payload() {
        let mut sender = sender_over(ScriptedSink::new(0));
        assert!(sender.append_audio("WFlZ").await);
        let value: serde_json::Value = serde_json::from_str(&sender.sink.sent[0]).unwrap();
        assert_eq!(value["type"], "input_audio_buffer.append");
        assert_eq!(value["audio"], "WFlZ");
    }

    #[tokio::test]
    async fn append_audio_after_close_is_a_noop() {
        let mut sender = sender_over(ScriptedSink::new(0));
        sender.close().await;
        assert!(sender.sink.closed);
        assert!(!sender.append_audio("WFlZ").await);
        assert!(sender.sink.sent.is_empty());
    }

    #[tokio::test]
    async fn append_audio_marks_connection_closed_on_failure() {
        let mut sender = sender_over(ScriptedSink::new(1));
        assert!(!sender.append_audio("WFlZ").await);
        assert!(!sender.is_open());
        // Later appends are no-ops rather than further send attempts.
        assert!(!sender.append_audio("WFlZ").await);
        assert!(sender.sink.sent.is_empty());
    }

    #[tokio::test]
    async fn receiver_yields_deltas_and_ends_on_close() {
        let frames = vec![
            Ok(WireMessage::Text(DELTA_FRAME.into())),
            Ok(WireMessage::Text(UPDATED_FRAME.into())),
            Ok(WireMessage::Close(None)),
        ];
        let mut receiver = UpstreamReceiver::from_stream(stream::iter(frames));
        assert_eq!(
            receiver.next().await,
            Some(UpstreamEvent::AudioDelta("QUJD".to_string()))
        );
        assert_eq!(receiver.next().await, Some(UpstreamEvent::SessionUpdated));
        assert_eq!(receiver.next().await, None);
        assert_eq!(receiver.next().await, None);
    }

    #[tokio::test]
    async fn receiver_terminates_on_error_event() {
        let frames = vec![
            Ok(WireMessage::Text(ERROR_FRAME.into())),
            Ok(WireMessage::Text(DELTA_FRAME.into())),
        ];
        let mut receiver = UpstreamReceiver::from_stream(stream::iter(frames));
        assert_eq!(receiver.next().await, None);
    }

    #[tokio::test]
    async fn receiver_skips_unactionable_frames() {
        let frames = vec![
            Ok(WireMessage::Text(r#"{"type":"rate_limits.updated"}"#.into())),
            Ok(WireMessage::Text(r#"{"no_type_field":true}"#.into())),
            Ok(WireMessage::Text("not json at all".into())),
            Ok(WireMessage::Text(DELTA_FRAME.into())),
        ];
        let mut receiver = UpstreamReceiver::from_stream(stream::iter(frames));
        assert_eq!(
            receiver.next().await,
            Some(UpstreamEvent::AudioDelta("QUJD".to_string()))
        );
    }

    #[tokio::test]
    async fn receiver_ends_on_transport_error() {
        let frames = vec![Err(WireError::ConnectionClosed)];
        let mut receiver = UpstreamReceiver::from_stream(stream::iter(frames));
        assert_eq!(receiver.next().await, None);
    }
}
