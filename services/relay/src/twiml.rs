//! Rendering of the call-setup markup returned to the telephony provider.
//!
//! When a call comes in, the provider fetches instructions from us; the
//! document below tells it to say a short greeting and then open its media
//! stream against our WebSocket endpoint.

/// Path the telephony provider connects its media stream to.
pub const MEDIA_STREAM_PATH: &str = "/media-stream";

/// Turns an externally reachable base URL into the media-stream connect-back
/// address. The provider requires a secure WebSocket, so the scheme is always
/// forced to `wss` regardless of what the base carried.
pub fn stream_url(public_base: &str) -> String {
    let base = public_base.trim_end_matches('/');
    let host = base
        .strip_prefix("https://")
        .or_else(|| base.strip_prefix("http://"))
        .or_else(|| base.strip_prefix("wss://"))
        .or_else(|| base.strip_prefix("ws://"))
        .unwrap_or(base);
    format!("wss://{host}{MEDIA_STREAM_PATH}")
}

/// Renders the voice-response document: a one second pause, the spoken
/// greeting, then a `<Connect><Stream>` pointing back at this relay. The
/// connection timeout and reconnect bound ride along as stream parameters.
pub fn connect_stream(
    greeting: &str,
    stream_url: &str,
    connect_timeout_secs: u64,
    max_reconnects: u32,
) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Pause length="1"/>
  <Say>{greeting}</Say>
  <Connect>
    <Stream url="{url}">
      <Parameter name="connectTimeout" value="{timeout}"/>
      <Parameter name="maxReconnects" value="{reconnects}"/>
    </Stream>
  </Connect>
</Response>"#,
        greeting = escape_text(greeting),
        url = escape_text(stream_url),
        timeout = connect_timeout_secs,
        reconnects = max_reconnects,
    )
}

fn escape_text(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
