use serde::Deserialize;
use std::path::PathBuf;

use crate::core::realtime::OverflowPolicy;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   tls:
///     enabled: true
///     cert_path: "/etc/gateway/cert.pem"
///     key_path: "/etc/gateway/key.pem"
///
/// realtime:
///   endpoint: "https://my-resource.openai.azure.com"
///   deployment: "gpt-4o-realtime-preview"
///   api_key: "your-api-key"
///   api_version: "2024-10-01-preview"
///   voice: "alloy"
///   instructions: "You are a helpful assistant."
///   transcription_model: "whisper-1"
///   modalities: ["text", "audio"]
///   turn_detection:
///     threshold: 0.5
///     prefix_padding_ms: 300
///     silence_duration_ms: 500
///     create_response: true
///
/// session:
///   audio_pump_idle_ms: 100
///   audio_queue_capacity: 512
///   audio_queue_overflow: "drop_oldest"
///   handshake_timeout_ms: 10000
///   teardown_timeout_ms: 5000
///
/// speech:
///   subscription_key: "your-speech-key"
///   region: "westus2"
///   tts_voice: "en-US-AvaMultilingualNeural"
///   avatar_character: "lisa"
///   avatar_style: "casual-sitting"
///
/// security:
///   cors_allowed_origins: "https://example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub session: Option<SessionYaml>,
    pub speech: Option<SpeechYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Realtime deployment from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_key: Option<String>,
    pub api_version: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub input_audio_format: Option<String>,
    pub output_audio_format: Option<String>,
    pub transcription_model: Option<String>,
    pub modalities: Option<Vec<String>>,
    pub turn_detection: Option<TurnDetectionYaml>,
}

/// Server VAD parameters from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TurnDetectionYaml {
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
    pub create_response: Option<bool>,
}

/// Session limits from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub audio_pump_idle_ms: Option<u64>,
    pub audio_queue_capacity: Option<usize>,
    pub audio_queue_overflow: Option<OverflowPolicy>,
    pub handshake_timeout_ms: Option<u64>,
    pub teardown_timeout_ms: Option<u64>,
}

/// Azure Speech avatar settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SpeechYaml {
    pub subscription_key: Option<String>,
    pub region: Option<String>,
    pub tts_voice: Option<String>,
    pub avatar_character: Option<String>,
    pub avatar_style: Option<String>,
    pub token_base_url: Option<String>,
    pub relay_base_url: Option<String>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    pub rate_limit_requests_per_second: Option<u32>,
    /// Maximum burst size for rate limiting
    pub rate_limit_burst_size: Option<u32>,
    /// Maximum concurrent WebSocket connections
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
