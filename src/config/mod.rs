//! Configuration module for the realtime chat gateway
//!
//! Server configuration comes from `.env` files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use realtime_chat_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroize;

use crate::core::realtime::config::DEFAULT_AUDIO_FORMAT;
use crate::core::realtime::{
    DEFAULT_AUDIO_QUEUE_CAPACITY, OverflowPolicy, RealtimeResult, SessionTiming,
    TurnDetectionConfig, UpstreamConfig,
};

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Default realtime protocol version.
pub const DEFAULT_API_VERSION: &str = "2024-10-01-preview";
pub const DEFAULT_VOICE: &str = "alloy";
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant.";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

pub const DEFAULT_TTS_VOICE: &str = "en-US-AvaMultilingualNeural";
pub const DEFAULT_AVATAR_CHARACTER: &str = "lisa";
pub const DEFAULT_AVATAR_STYLE: &str = "casual-sitting";

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Azure OpenAI realtime deployment settings.
///
/// Endpoint, deployment and key are optional here; a session that starts
/// without them fails with a configuration error instead of the server
/// refusing to boot.
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_key: Option<String>,
    pub api_version: String,
    pub voice: String,
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub transcription_model: String,
    pub turn_detection: TurnDetectionConfig,
    /// Modalities requested for each response
    pub modalities: Vec<String>,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            deployment: None,
            api_key: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            input_audio_format: DEFAULT_AUDIO_FORMAT.to_string(),
            output_audio_format: DEFAULT_AUDIO_FORMAT.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            turn_detection: TurnDetectionConfig::default(),
            modalities: vec!["text".to_string(), "audio".to_string()],
        }
    }
}

/// Per-session runtime limits.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Audio pump pause when the queue is empty
    pub audio_pump_idle_ms: u64,
    /// Fragments held per session before the overflow policy applies
    pub audio_queue_capacity: usize,
    pub audio_queue_overflow: OverflowPolicy,
    /// Bound on connecting and on waiting for `session.created`
    pub handshake_timeout_ms: u64,
    /// Bound on awaiting a stopped session's teardown
    pub teardown_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            audio_pump_idle_ms: 100,
            audio_queue_capacity: DEFAULT_AUDIO_QUEUE_CAPACITY,
            audio_queue_overflow: OverflowPolicy::default(),
            handshake_timeout_ms: 10_000,
            teardown_timeout_ms: 5_000,
        }
    }
}

impl SessionSettings {
    pub fn timing(&self) -> SessionTiming {
        SessionTiming {
            idle_interval: Duration::from_millis(self.audio_pump_idle_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
        }
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

/// Azure Speech settings used by the avatar configuration endpoint.
#[derive(Debug, Clone)]
pub struct SpeechSettings {
    /// Azure Speech Services subscription key
    /// (Azure Portal → Speech resource → Keys and Endpoint → Key 1 or Key 2)
    pub subscription_key: Option<String>,
    /// Azure region where the Speech resource is deployed (e.g., "westus2")
    pub region: Option<String>,
    pub tts_voice: String,
    pub avatar_character: String,
    pub avatar_style: String,
    /// Overrides `https://{region}.api.cognitive.microsoft.com`
    pub token_base_url: Option<String>,
    /// Overrides `https://{region}.tts.speech.microsoft.com`
    pub relay_base_url: Option<String>,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            subscription_key: None,
            region: None,
            tts_voice: DEFAULT_TTS_VOICE.to_string(),
            avatar_character: DEFAULT_AVATAR_CHARACTER.to_string(),
            avatar_style: DEFAULT_AVATAR_STYLE.to_string(),
            token_base_url: None,
            relay_base_url: None,
        }
    }
}

impl SpeechSettings {
    /// Key and region, if both are configured and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let key = self.subscription_key.as_deref().filter(|k| !k.is_empty())?;
        let region = self.region.as_deref().filter(|r| !r.is_empty())?;
        Some((key, region))
    }

    /// URL of the short-lived token endpoint for `region`.
    pub fn token_url(&self, region: &str) -> String {
        let base = self
            .token_base_url
            .clone()
            .unwrap_or_else(|| format!("https://{region}.api.cognitive.microsoft.com"));
        format!("{}/sts/v1.0/issueToken", base.trim_end_matches('/'))
    }

    /// URL of the avatar ICE relay token endpoint for `region`.
    pub fn relay_url(&self, region: &str) -> String {
        let base = self
            .relay_base_url
            .clone()
            .unwrap_or_else(|| format!("https://{region}.tts.speech.microsoft.com"));
        format!(
            "{}/cognitiveservices/avatar/relay/token/v1",
            base.trim_end_matches('/')
        )
    }
}

/// Server configuration
///
/// Contains all configuration needed to run the gateway:
/// - Server settings (host, port, TLS)
/// - Realtime upstream deployment
/// - Session limits
/// - Azure Speech avatar settings
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    pub realtime: RealtimeSettings,
    pub session: SessionSettings,
    pub speech: SpeechSettings,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            realtime: RealtimeSettings::default(),
            session: SessionSettings::default(),
            speech: SpeechSettings::default(),
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }
}

/// Zeroize secret fields when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        if let Some(ref mut key) = self.realtime.api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.speech.subscription_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// The `.env` file is loaded in `main` before this is called, so its values
    /// are visible here as regular environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = env::load_from_env()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Build the immutable upstream configuration for one session.
    ///
    /// Fails with `InvalidConfiguration` when the deployment is not fully
    /// configured.
    pub fn upstream_config(&self) -> RealtimeResult<UpstreamConfig> {
        let realtime = &self.realtime;
        let config = UpstreamConfig {
            endpoint: realtime.endpoint.clone().unwrap_or_default(),
            deployment: realtime.deployment.clone().unwrap_or_default(),
            api_key: realtime.api_key.clone().unwrap_or_default(),
            api_version: realtime.api_version.clone(),
            voice: realtime.voice.clone(),
            instructions: realtime.instructions.clone(),
            input_audio_format: realtime.input_audio_format.clone(),
            output_audio_format: realtime.output_audio_format.clone(),
            transcription_model: realtime.transcription_model.clone(),
            turn_detection: realtime.turn_detection.clone(),
            modalities: realtime.modalities.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}
