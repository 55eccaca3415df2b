//! Telephony media-stream frame codec.
//!
//! The provider speaks small JSON envelopes over its WebSocket: an `event`
//! field names the frame type, `start` carries the stream identifier, and
//! `media` carries an opaque base64 audio payload. The codec is a pure
//! transform in both directions; the audio payload is never decoded, only
//! re-wrapped, so it round-trips byte-identical.

use serde::Serialize;

/// Codec failures. A malformed frame is dropped by the caller and the
/// session continues; a missing stream identifier means the outbound frame
/// cannot be addressed yet.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed telephony frame: {0}")]
    MalformedFrame(String),
    #[error("stream identifier not yet known")]
    MissingStreamIdentifier,
}

/// An inbound frame after decoding. Only `start`, `media` and `stop` drive
/// the relay; every other event name is surfaced as `Control` so the bridge
/// can log and drop it without ending the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyFrame {
    Start { stream_sid: String },
    Media { payload: String },
    Stop,
    Control { event: String },
}

/// Decodes one inbound text frame.
pub fn decode_inbound(raw: &str) -> Result<TelephonyFrame, CodecError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| CodecError::MalformedFrame(e.to_string()))?;
    let event = value
        .get("event")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CodecError::MalformedFrame("missing `event` field".to_string()))?;

    match event {
        "start" => {
            let stream_sid = value
                .pointer("/start/streamSid")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| {
                    CodecError::MalformedFrame("start frame without start.streamSid".to_string())
                })?;
            Ok(TelephonyFrame::Start {
                stream_sid: stream_sid.to_owned(),
            })
        }
        "media" => {
            let payload = value
                .pointer("/media/payload")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| {
                    CodecError::MalformedFrame("media frame without media.payload".to_string())
                })?;
            Ok(TelephonyFrame::Media {
                payload: payload.to_owned(),
            })
        }
        "stop" => Ok(TelephonyFrame::Stop),
        other => Ok(TelephonyFrame::Control {
            event: other.to_owned(),
        }),
    }
}

#[derive(Serialize)]
struct OutboundMedia<'a> {
    event: &'static str,
    #[serde(rename = "streamSid")]
    stream_sid: &'a str,
    media: OutboundPayload<'a>,
}

#[derive(Serialize)]
struct OutboundPayload<'a> {
    payload: &'a str,
}

/// Encodes one outbound media frame addressed to the active stream. Fails
/// when the stream identifier is not yet known — every outbound frame must
/// carry it.
pub fn encode_outbound(payload: &str, stream_sid: Option<&str>) -> Result<String, CodecError> {
    let stream_sid = stream_sid.ok_or(CodecError::MissingStreamIdentifier)?;
    serde_json::to_string(&OutboundMedia {
        event: "media",
        stream_sid,
        media: OutboundPayload { payload },
    })
    .map_err(|e| CodecError::MalformedFrame(e.to_string()))
}
