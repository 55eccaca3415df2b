//! Immutable per-session configuration for the realtime connection.

use async_openai::types::realtime::{
    self as oai_realtime, ClientEvent, SessionUpdateEvent,
};

/// Voices supported by the realtime endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Voice {
    Alloy,
    Echo,
    Shimmer,
}

impl Voice {
    /// Parses a voice name as it appears in configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "alloy" => Some(Voice::Alloy),
            "echo" => Some(Voice::Echo),
            "shimmer" => Some(Voice::Shimmer),
            _ => None,
        }
    }
}

/// Audio encodings the relay can tag on the session. The payload itself is
/// never inspected here; this only tells the endpoint what it will receive
/// and must produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioCoding {
    Pcm16,
    G711Ulaw,
    G711Alaw,
}

/// How the endpoint decides the caller has finished a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnDetectionMode {
    /// Server-side voice activity detection.
    ServerVad,
    /// No automatic turn detection.
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modality {
    Text,
    Audio,
}

/// Everything the upstream session needs to know, fixed at connect time and
/// never mutated for the life of the session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub model: String,
    pub voice: Voice,
    pub instructions: String,
    pub temperature: f32,
    pub modalities: Vec<Modality>,
    pub input_audio: AudioCoding,
    pub output_audio: AudioCoding,
    pub turn_detection: TurnDetectionMode,
}

impl SessionConfig {
    /// Builds the `session.update` client event that configures the session.
    pub fn to_update_event(&self) -> ClientEvent {
        let session = oai_realtime::SessionResource {
            model: Some(self.model.clone()),
            modalities: Some(self.modalities.iter().map(|m| m.wire_name().to_string()).collect()),
            voice: Some(self.voice.to_realtime()),
            instructions: Some(self.instructions.clone()),
            temperature: Some(self.temperature),
            input_audio_format: Some(self.input_audio.to_realtime()),
            output_audio_format: Some(self.output_audio.to_realtime()),
            turn_detection: self.turn_detection.to_realtime(),
            ..Default::default()
        };
        ClientEvent::SessionUpdate(SessionUpdateEvent {
            session,
            event_id: None,
        })
    }
}

impl Voice {
    fn to_realtime(self) -> oai_realtime::RealtimeVoice {
        match self {
            Voice::Alloy => oai_realtime::RealtimeVoice::Alloy,
            Voice::Echo => oai_realtime::RealtimeVoice::Echo,
            Voice::Shimmer => oai_realtime::RealtimeVoice::Shimmer,
        }
    }
}

impl AudioCoding {
    fn to_realtime(self) -> oai_realtime::AudioFormat {
        match self {
            AudioCoding::Pcm16 => oai_realtime::AudioFormat::PCM16,
            AudioCoding::G711Ulaw => oai_realtime::AudioFormat::G711ULAW,
            AudioCoding::G711Alaw => oai_realtime::AudioFormat::G711ALAW,
        }
    }
}

impl TurnDetectionMode {
    fn to_realtime(self) -> Option<oai_realtime::TurnDetection> {
        match self {
            TurnDetectionMode::ServerVad => Some(oai_realtime::TurnDetection::ServerVAD {
                threshold: 0.5,
                prefix_padding_ms: 200,
                silence_duration_ms: 700,
                interrupt_response: Some(true),
                create_response: Some(true),
            }),
            TurnDetectionMode::Disabled => None,
        }
    }
}

impl Modality {
    fn wire_name(self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Audio => "audio",
        }
    }
}
