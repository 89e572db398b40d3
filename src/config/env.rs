use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{RealtimeSettings, ServerConfig, SessionSettings, SpeechSettings, TlsConfig};
use crate::core::realtime::OverflowPolicy;

/// Read a variable, treating unset and empty the same.
pub(super) fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Parse a variable, failing with a message that names it.
pub(super) fn parse_var<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| -> Box<dyn std::error::Error> {
                format!("Invalid {name} value '{raw}': {e}").into()
            }),
        None => Ok(None),
    }
}

/// Parse a boolean variable ("true"/"false"/"1"/"0"/"yes"/"no").
fn parse_bool(name: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    match var(name).map(|v| v.trim().to_lowercase()) {
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(Some(true)),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(Some(false)),
        Some(v) => Err(format!("Invalid {name} value '{v}': expected true or false").into()),
        None => Ok(None),
    }
}

fn load_tls() -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    match (var("TLS_CERT_PATH"), var("TLS_KEY_PATH")) {
        (Some(cert), Some(key)) => Ok(Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        })),
        (None, None) => Ok(None),
        _ => Err("Both TLS_CERT_PATH and TLS_KEY_PATH must be set to enable TLS".into()),
    }
}

fn load_realtime() -> Result<RealtimeSettings, Box<dyn std::error::Error>> {
    let mut realtime = RealtimeSettings {
        endpoint: var("AZURE_OPENAI_REALTIME_ENDPOINT"),
        deployment: var("AZURE_OPENAI_REALTIME_DEPLOYMENT"),
        api_key: var("AZURE_OPENAI_REALTIME_API_KEY"),
        ..Default::default()
    };

    if let Some(version) = var("AZURE_OPENAI_REALTIME_API_VERSION") {
        realtime.api_version = version;
    }
    if let Some(voice) = var("REALTIME_VOICE") {
        realtime.voice = voice;
    }
    if let Some(instructions) = var("REALTIME_INSTRUCTIONS") {
        realtime.instructions = instructions;
    }
    if let Some(model) = var("REALTIME_TRANSCRIPTION_MODEL") {
        realtime.transcription_model = model;
    }
    if let Some(threshold) = parse_var::<f32>("REALTIME_VAD_THRESHOLD")? {
        realtime.turn_detection.threshold = threshold;
    }
    if let Some(padding) = parse_var::<u32>("REALTIME_VAD_PREFIX_PADDING_MS")? {
        realtime.turn_detection.prefix_padding_ms = padding;
    }
    if let Some(silence) = parse_var::<u32>("REALTIME_VAD_SILENCE_DURATION_MS")? {
        realtime.turn_detection.silence_duration_ms = silence;
    }
    if let Some(create) = parse_bool("REALTIME_VAD_CREATE_RESPONSE")? {
        realtime.turn_detection.create_response = create;
    }

    Ok(realtime)
}

fn load_session() -> Result<SessionSettings, Box<dyn std::error::Error>> {
    let mut session = SessionSettings::default();

    if let Some(idle) = parse_var("AUDIO_PUMP_IDLE_MS")? {
        session.audio_pump_idle_ms = idle;
    }
    if let Some(capacity) = parse_var("AUDIO_QUEUE_CAPACITY")? {
        session.audio_queue_capacity = capacity;
    }
    if let Some(policy) = parse_var::<OverflowPolicy>("AUDIO_QUEUE_OVERFLOW")? {
        session.audio_queue_overflow = policy;
    }
    if let Some(timeout) = parse_var("HANDSHAKE_TIMEOUT_MS")? {
        session.handshake_timeout_ms = timeout;
    }
    if let Some(timeout) = parse_var("TEARDOWN_TIMEOUT_MS")? {
        session.teardown_timeout_ms = timeout;
    }

    Ok(session)
}

fn load_speech() -> SpeechSettings {
    let mut speech = SpeechSettings {
        subscription_key: var("AZURE_SPEECH_SUBSCRIPTION_KEY"),
        region: var("AZURE_SPEECH_REGION"),
        token_base_url: var("AZURE_SPEECH_TOKEN_BASE_URL"),
        relay_base_url: var("AZURE_SPEECH_RELAY_BASE_URL"),
        ..Default::default()
    };

    if let Some(voice) = var("AZURE_SPEECH_TTS_VOICE") {
        speech.tts_voice = voice;
    }
    if let Some(character) = var("AZURE_SPEECH_AVATAR_CHARACTER") {
        speech.avatar_character = character;
    }
    if let Some(style) = var("AZURE_SPEECH_AVATAR_STYLE") {
        speech.avatar_style = style;
    }

    speech
}

/// Build a configuration from environment variables over defaults.
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();

    if let Some(host) = var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse_var("PORT")? {
        config.port = port;
    }
    config.tls = load_tls()?;
    config.realtime = load_realtime()?;
    config.session = load_session()?;
    config.speech = load_speech();

    config.cors_allowed_origins = var("CORS_ALLOWED_ORIGINS");
    if let Some(rps) = parse_var("RATE_LIMIT_REQUESTS_PER_SECOND")? {
        config.rate_limit_requests_per_second = rps;
    }
    if let Some(burst) = parse_var("RATE_LIMIT_BURST_SIZE")? {
        config.rate_limit_burst_size = burst;
    }
    config.max_websocket_connections = parse_var("MAX_WEBSOCKET_CONNECTIONS")?;
    if let Some(per_ip) = parse_var("MAX_CONNECTIONS_PER_IP")? {
        config.max_connections_per_ip = per_ip;
    }

    Ok(config)
}
