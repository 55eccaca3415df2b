use secrecy::SecretString;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;
use voko_realtime::{AudioCoding, Modality, SessionConfig, TurnDetectionMode, Voice};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

const DEFAULT_INSTRUCTIONS: &str = "You are a friendly and helpful AI phone assistant. \
    Keep your responses concise and conversational - you're on a phone call. \
    Be warm and natural, like talking to a friend. \
    Respond in 1-2 sentences at most unless the user asks for more detail.";

const DEFAULT_GREETING: &str = "Welcome! Connecting you to the assistant now.";

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: SecretString,
    /// Externally reachable base URL used to build the media-stream
    /// connect-back address. When unset, the request's `Host` header is used.
    pub public_base_url: Option<String>,
    pub realtime_model: String,
    pub voice: Voice,
    pub instructions: String,
    pub temperature: f32,
    pub greeting: String,
    pub stream_connect_timeout: Duration,
    pub stream_max_reconnects: u32,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        // The realtime credential is the only fatal startup requirement.
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .ok()
            .filter(|url| !url.is_empty());

        let realtime_model =
            std::env::var("REALTIME_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let voice_str = std::env::var("REALTIME_VOICE").unwrap_or_else(|_| "alloy".to_string());
        let voice = Voice::from_name(&voice_str).ok_or_else(|| {
            ConfigError::InvalidValue(
                "REALTIME_VOICE".to_string(),
                format!("'{}' is not a supported voice", voice_str),
            )
        })?;

        let instructions = std::env::var("PERSONA_INSTRUCTIONS")
            .unwrap_or_else(|_| DEFAULT_INSTRUCTIONS.to_string());

        let temperature_str =
            std::env::var("REALTIME_TEMPERATURE").unwrap_or_else(|_| "0.8".to_string());
        let temperature = temperature_str.parse::<f32>().map_err(|e| {
            ConfigError::InvalidValue("REALTIME_TEMPERATURE".to_string(), e.to_string())
        })?;

        let greeting = std::env::var("CALL_GREETING").unwrap_or_else(|_| DEFAULT_GREETING.to_string());

        let timeout_str =
            std::env::var("STREAM_CONNECT_TIMEOUT_SECS").unwrap_or_else(|_| "10".to_string());
        let stream_connect_timeout = timeout_str
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| {
                ConfigError::InvalidValue("STREAM_CONNECT_TIMEOUT_SECS".to_string(), e.to_string())
            })?;

        let reconnects_str =
            std::env::var("STREAM_MAX_RECONNECTS").unwrap_or_else(|_| "3".to_string());
        let stream_max_reconnects = reconnects_str.parse::<u32>().map_err(|e| {
            ConfigError::InvalidValue("STREAM_MAX_RECONNECTS".to_string(), e.to_string())
        })?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            public_base_url,
            realtime_model,
            voice,
            instructions,
            temperature,
            greeting,
            stream_connect_timeout,
            stream_max_reconnects,
            log_level,
        })
    }

    /// Builds the immutable per-session configuration handed to the upstream
    /// connector. The telephony leg carries G.711 mu-law, so the session is
    /// tagged with it on both directions; the relay itself never decodes the
    /// payload.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.realtime_model.clone(),
            voice: self.voice,
            instructions: self.instructions.clone(),
            temperature: self.temperature,
            modalities: vec![Modality::Text, Modality::Audio],
            input_audio: AudioCoding::G711Ulaw,
            output_audio: AudioCoding::G711Ulaw,
            turn_detection: TurnDetectionMode::ServerVad,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("PUBLIC_BASE_URL");
            env::remove_var("REALTIME_MODEL");
            env::remove_var("REALTIME_VOICE");
            env::remove_var("PERSONA_INSTRUCTIONS");
            env::remove_var("REALTIME_TEMPERATURE");
            env::remove_var("CALL_GREETING");
            env::remove_var("STREAM_CONNECT_TIMEOUT_SECS");
            env::remove_var("STREAM_MAX_RECONNECTS");
            env::remove_var("RUST_LOG");
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.openai_api_key.expose_secret(), "test-openai-key");
        assert_eq!(config.public_base_url, None);
        assert_eq!(config.realtime_model, DEFAULT_MODEL);
        assert_eq!(config.voice, Voice::Alloy);
        assert_eq!(config.instructions, DEFAULT_INSTRUCTIONS);
        assert_eq!(config.temperature, 0.8);
        assert_eq!(config.greeting, DEFAULT_GREETING);
        assert_eq!(config.stream_connect_timeout, Duration::from_secs(10));
        assert_eq!(config.stream_max_reconnects, 3);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("OPENAI_API_KEY", "custom-key");
            env::set_var("PUBLIC_BASE_URL", "https://relay.example.com");
            env::set_var("REALTIME_MODEL", "gpt-4o-realtime-preview");
            env::set_var("REALTIME_VOICE", "shimmer");
            env::set_var("PERSONA_INSTRUCTIONS", "Answer in short sentences.");
            env::set_var("REALTIME_TEMPERATURE", "0.6");
            env::set_var("CALL_GREETING", "Hello caller");
            env::set_var("STREAM_CONNECT_TIMEOUT_SECS", "20");
            env::set_var("STREAM_MAX_RECONNECTS", "5");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(
            config.public_base_url,
            Some("https://relay.example.com".to_string())
        );
        assert_eq!(config.realtime_model, "gpt-4o-realtime-preview");
        assert_eq!(config.voice, Voice::Shimmer);
        assert_eq!(config.instructions, "Answer in short sentences.");
        assert_eq!(config.temperature, 0.6);
        assert_eq!(config.greeting, "Hello caller");
        assert_eq!(config.stream_connect_timeout, Duration::from_secs(20));
        assert_eq!(config.stream_max_reconnects, 5);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_api_key_is_fatal() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "OPENAI_API_KEY"),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_empty_api_key_is_fatal() {
        clear_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "OPENAI_API_KEY"),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_voice() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("REALTIME_VOICE", "contralto");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "REALTIME_VOICE"),
            _ => panic!("Expected InvalidValue for REALTIME_VOICE"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_session_config_uses_telephony_audio_coding() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");
        let session = config.session_config();

        assert_eq!(session.input_audio, AudioCoding::G711Ulaw);
        assert_eq!(session.output_audio, AudioCoding::G711Ulaw);
        assert_eq!(session.turn_detection, TurnDetectionMode::ServerVad);
        assert_eq!(session.modalities, vec![Modality::Text, Modality::Audio]);
        assert_eq!(session.model, DEFAULT_MODEL);
    }
}
