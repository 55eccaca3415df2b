//! The session bridge: one telephony media stream bound to one realtime AI
//! connection for the life of a call.
//!
//! Each session runs three tasks — the telephony→AI pump, the AI→telephony
//! pump, and the liveness keeper — under a small supervisor that awaits the
//! first pump to finish, cancels the rest, and tears both transports down
//! together.

use crate::{
    state::AppState,
    ws::protocol::{self, TelephonyFrame},
};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::{
    sync::Mutex,
    task::{JoinError, JoinHandle},
};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use uuid::Uuid;
use voko_realtime::{
    DEFAULT_ENDPOINT, MessageSink, MessageStream, UpstreamEvent, UpstreamReceiver, UpstreamSender,
};

/// Interval between pings on the telephony-facing transport.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// How long teardown waits for the surviving tasks to stop.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of a session. Transitions are forward-only; `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Phase {
    Connecting,
    HandshakeSent,
    Active,
    Draining,
    Closed,
}

/// State shared between the supervisor and the three session tasks. The
/// stream identifier is written exactly once, by the inbound pump; everyone
/// else only reads it.
pub(crate) struct SessionShared {
    pub(crate) id: Uuid,
    stream_sid: OnceLock<String>,
    phase: Mutex<Phase>,
    created: Instant,
    last_activity: Mutex<Instant>,
}

impl SessionShared {
    fn new() -> Self {
        SessionShared {
            id: Uuid::new_v4(),
            stream_sid: OnceLock::new(),
            phase: Mutex::new(Phase::Connecting),
            created: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Advances the lifecycle. Regressions are ignored so teardown paths can
    /// set `Closed` unconditionally.
    async fn set_phase(&self, next: Phase) {
        let mut phase = self.phase.lock().await;
        if next > *phase {
            debug!(from = ?*phase, to = ?next, "session phase change");
            *phase = next;
        }
    }

    async fn phase(&self) -> Phase {
        *self.phase.lock().await
    }

    /// Records the stream identifier from the provider's `start` frame.
    /// Returns `false` for duplicate `start` frames, which leave the
    /// original identifier in place.
    fn mark_started(&self, stream_sid: String) -> bool {
        self.stream_sid.set(stream_sid).is_ok()
    }

    fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.get().map(String::as_str)
    }

    async fn touch(&self) {
        *self.last_activity.lock().await = Instant::now();
    }

    fn age(&self) -> Duration {
        self.created.elapsed()
    }

    async fn idle(&self) -> Duration {
        self.last_activity.lock().await.elapsed()
    }
}

/// Axum handler to upgrade an HTTP connection to the media-stream WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Entry point for one telephony connection: registers the session, runs the
/// bridge, and guarantees the registry entry is removed exactly once.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session = Arc::new(SessionShared::new());
    let span = info_span!(
        "media_session",
        session_id = %session.id,
        stream_sid = tracing::field::Empty
    );
    async {
        state.registry.register(session.id).await;
        let active_sessions = state.registry.count().await;
        info!(
            active_sessions,
            "Telephony media stream connected"
        );

        if let Err(error) = run_bridge(socket, &state, &session).await {
            error!(error = ?error, "Session ended with error");
        }

        session.set_phase(Phase::Closed).await;
        if !state.registry.unregister(session.id).await {
            warn!("Session was not registered at close");
        }
        let phase = session.phase().await;
        let active_sessions = state.registry.count().await;
        let idle_for = session.idle().await;
        info!(
            phase = ?phase,
            active_sessions,
            call_duration = ?session.age(),
            idle_for = ?idle_for,
            "Session closed"
        );
    }
    .instrument(span)
    .await;
}

enum FirstDone {
    Inbound(Result<anyhow::Result<()>, JoinError>),
    Outbound(Result<anyhow::Result<()>, JoinError>),
}

/// Establishes the upstream leg and supervises the session tasks.
///
/// Failure before the handshake is delivered is fatal: the session moves
/// straight to `Closed` without starting a pump loop.
async fn run_bridge(
    socket: WebSocket,
    state: &AppState,
    session: &Arc<SessionShared>,
) -> anyhow::Result<()> {
    let config = state.config.session_config();

    let connection = match voko_realtime::connect(
        DEFAULT_ENDPOINT,
        &config.model,
        &state.config.openai_api_key,
    )
    .await
    {
        Ok(connection) => connection,
        Err(error) => {
            session.set_phase(Phase::Closed).await;
            return Err(anyhow::Error::new(error).context("realtime connection failed"));
        }
    };
    let (mut upstream_tx, upstream_rx) = connection.split();

    if let Err(error) = upstream_tx.send_session_config(&config).await {
        session.set_phase(Phase::Closed).await;
        return Err(anyhow::Error::new(error).context("session configuration failed"));
    }
    session.set_phase(Phase::HandshakeSent).await;

    let (socket_tx, socket_rx) = socket.split();
    let telephony_tx = Arc::new(Mutex::new(socket_tx));

    let mut inbound = tokio::spawn(
        pump_inbound(socket_rx, upstream_tx, session.clone()).in_current_span(),
    );
    let mut outbound = tokio::spawn(
        pump_outbound(upstream_rx, telephony_tx.clone(), session.clone()).in_current_span(),
    );
    let keeper = tokio::spawn(keepalive(telephony_tx.clone()).in_current_span());
    session.set_phase(Phase::Active).await;

    // Whichever pump stops first — disconnect, upstream close, or failure —
    // drains the whole session. No frame is forwarded past this point.
    let first = tokio::select! {
        result = &mut inbound => FirstDone::Inbound(result),
        result = &mut outbound => FirstDone::Outbound(result),
    };
    session.set_phase(Phase::Draining).await;
    keeper.abort();

    match first {
        FirstDone::Inbound(result) => {
            log_pump_result("telephony->ai", result);
            outbound.abort();
            drain_pump("ai->telephony", outbound).await;
        }
        FirstDone::Outbound(result) => {
            log_pump_result("ai->telephony", result);
            inbound.abort();
            drain_pump("telephony->ai", inbound).await;
        }
    }
    let _ = tokio::time::timeout(DRAIN_GRACE, keeper).await;

    // Both transports are released here; close failures are swallowed.
    {
        let mut sink = telephony_tx.lock().await;
        let _ = sink.close().await;
    }
    session.set_phase(Phase::Closed).await;
    Ok(())
}

fn log_pump_result(pump: &str, result: Result<anyhow::Result<()>, JoinError>) {
    match result {
        Ok(Ok(())) => debug!(pump, "pump finished"),
        Ok(Err(error)) => error!(pump, error = ?error, "pump failed"),
        Err(join_error) if join_error.is_cancelled() => debug!(pump, "pump cancelled"),
        Err(join_error) => error!(pump, error = %join_error, "pump task panicked"),
    }
}

async fn drain_pump(pump: &str, handle: JoinHandle<anyhow::Result<()>>) {
    match tokio::time::timeout(DRAIN_GRACE, handle).await {
        Ok(result) => log_pump_result(pump, result),
        Err(_) => warn!(pump, "pump did not stop within the grace period"),
    }
}

/// Telephony→AI pump: reads inbound frames in arrival order and forwards
/// media payloads upstream. `start` records the stream identifier; a closed
/// upstream connection or a `stop` frame ends the pump so the supervisor can
/// drain the session. Malformed and control frames are dropped and the loop
/// continues.
async fn pump_inbound<R, S>(
    mut rx: R,
    mut upstream: UpstreamSender<S>,
    session: Arc<SessionShared>,
) -> anyhow::Result<()>
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
    S: MessageSink,
{
    while let Some(item) = rx.next().await {
        let message = match item {
            Ok(message) => message,
            Err(error) => {
                info!(%error, "telephony socket errored");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                session.touch().await;
                match protocol::decode_inbound(text.as_str()) {
                    Ok(TelephonyFrame::Start { stream_sid }) => {
                        if session.mark_started(stream_sid.clone()) {
                            tracing::Span::current().record("stream_sid", stream_sid.as_str());
                            info!(%stream_sid, "media stream started");
                        } else {
                            warn!(%stream_sid, "duplicate start frame ignored");
                        }
                    }
                    Ok(TelephonyFrame::Media { payload }) => {
                        if !upstream.append_audio(&payload).await {
                            info!("upstream connection closed, stopping inbound pump");
                            break;
                        }
                    }
                    Ok(TelephonyFrame::Stop) => {
                        info!("stop frame received");
                        break;
                    }
                    Ok(TelephonyFrame::Control { event }) => {
                        debug!(%event, "ignoring control frame");
                    }
                    Err(error) => {
                        warn!(%error, "dropping malformed telephony frame");
                    }
                }
            }
            Message::Close(_) => {
                info!("telephony socket closed");
                break;
            }
            Message::Binary(_) => debug!("ignoring binary frame"),
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    // Nudge the AI side to drain promptly; errors here are uninteresting.
    upstream.close().await;
    Ok(())
}

/// AI→Telephony pump: forwards response audio in the order received. Frames
/// arriving before the stream identifier is known are dropped — every
/// outbound frame must carry the identifier, and this relay deliberately
/// does not buffer early audio.
async fn pump_outbound<S, W>(
    mut upstream: UpstreamReceiver<S>,
    telephony_tx: Arc<Mutex<W>>,
    session: Arc<SessionShared>,
) -> anyhow::Result<()>
where
    S: MessageStream,
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    while let Some(event) = upstream.next().await {
        match event {
            UpstreamEvent::AudioDelta(payload) => {
                session.touch().await;
                let Some(stream_sid) = session.stream_sid() else {
                    warn!("dropping AI audio received before the stream identifier is known");
                    continue;
                };
                let frame = protocol::encode_outbound(&payload, Some(stream_sid))?;
                let mut sink = telephony_tx.lock().await;
                if let Err(error) = sink.send(Message::Text(frame.into())).await {
                    info!(%error, "telephony send failed, stopping outbound pump");
                    break;
                }
            }
            UpstreamEvent::ResponseCompleted => debug!("ai response completed"),
            UpstreamEvent::SessionUpdated => info!("realtime session configuration acknowledged"),
        }
    }
    Ok(())
}

/// Liveness keeper: pings the telephony transport on a fixed interval so the
/// provider does not drop an idle call. A failed ping ends the keeper
/// silently; only pump failures drain the session.
async fn keepalive<W>(telephony_tx: Arc<Mutex<W>>)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let mut sink = telephony_tx.lock().await;
        if let Err(error) = sink.send(Message::Ping(Vec::new().into())).await {
            debug!(%error, "keepalive ping failed, stopping");
            break;
        }
        trace!("keepalive ping sent");
    }
}
