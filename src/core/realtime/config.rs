//! Upstream session configuration.
//!
//! An `UpstreamConfig` is built once per session from server settings and is
//! never mutated while the session runs.

use url::Url;
use zeroize::Zeroize;

use super::base::{RealtimeError, RealtimeResult};

/// Path of the realtime endpoint on an Azure OpenAI resource.
pub const REALTIME_PATH: &str = "/openai/realtime";

/// Header carrying the resource key.
pub const API_KEY_HEADER: &str = "api-key";

/// Default audio format for both directions.
pub const DEFAULT_AUDIO_FORMAT: &str = "pcm16";

/// Server-side voice activity detection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnDetectionConfig {
    /// Activation threshold (0.0 - 1.0)
    pub threshold: f32,
    /// Audio kept before detected speech, in ms
    pub prefix_padding_ms: u32,
    /// Silence that ends a turn, in ms
    pub silence_duration_ms: u32,
    /// Whether the upstream starts a response at the end of each user turn
    pub create_response: bool,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            create_response: true,
        }
    }
}

/// Immutable configuration of one upstream session.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`
    pub endpoint: String,
    /// Deployment (model) name
    pub deployment: String,
    /// Resource key
    pub api_key: String,
    /// Protocol version, e.g. `2024-10-01-preview`
    pub api_version: String,
    pub voice: String,
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    /// Model used to transcribe user audio
    pub transcription_model: String,
    pub turn_detection: TurnDetectionConfig,
    /// Modalities requested for responses
    pub modalities: Vec<String>,
}

impl Drop for UpstreamConfig {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl UpstreamConfig {
    /// Check that everything needed to open the upstream connection is present.
    pub fn validate(&self) -> RealtimeResult<()> {
        let required = [
            ("endpoint", &self.endpoint),
            ("deployment", &self.deployment),
            ("api key", &self.api_key),
            ("api version", &self.api_version),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "missing realtime {}",
                missing.join(", ")
            )));
        }

        self.ws_url().map(|_| ())
    }

    /// Build the WebSocket URL for this session.
    ///
    /// `https` endpoints map to `wss` and `http` endpoints to `ws`; any path on
    /// the configured endpoint is replaced.
    pub fn ws_url(&self) -> RealtimeResult<Url> {
        let mut url = Url::parse(self.endpoint.trim()).map_err(|e| {
            RealtimeError::InvalidConfiguration(format!("invalid realtime endpoint: {e}"))
        })?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(RealtimeError::InvalidConfiguration(format!(
                    "unsupported endpoint scheme: {other}"
                )));
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            RealtimeError::InvalidConfiguration("cannot rewrite endpoint scheme".to_string())
        })?;

        url.set_path(REALTIME_PATH);
        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", &self.api_version)
            .append_pair("deployment", &self.deployment);

        Ok(url)
    }
}

#[cfg(test)]
pub(crate) fn test_upstream_config(endpoint: &str) -> UpstreamConfig {
    UpstreamConfig {
        endpoint: endpoint.to_string(),
        deployment: "gpt-4o-realtime-preview".to_string(),
        api_key: "test-key".to_string(),
        api_version: "2024-10-01-preview".to_string(),
        voice: "alloy".to_string(),
        instructions: "You are a helpful assistant.".to_string(),
        input_audio_format: DEFAULT_AUDIO_FORMAT.to_string(),
        output_audio_format: DEFAULT_AUDIO_FORMAT.to_string(),
        transcription_model: "whisper-1".to_string(),
        turn_detection: TurnDetectionConfig::default(),
        modalities: vec!["text".to_string(), "audio".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_from_https_endpoint() {
        let config = test_upstream_config("https://my-resource.openai.azure.com");
        let url = config.ws_url().unwrap();
        assert_eq!(
            url.as_str(),
            "wss://my-resource.openai.azure.com/openai/realtime?api-version=2024-10-01-preview&deployment=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_ws_url_replaces_path_and_query() {
        let config = test_upstream_config("http://127.0.0.1:9000/some/path?x=1");
        let url = config.ws_url().unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), REALTIME_PATH);
        assert_eq!(url.port(), Some(9000));
        assert!(!url.as_str().contains("x=1"));
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let mut config = test_upstream_config("");
        config.api_key = String::new();

        let err = config.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("endpoint"));
        assert!(message.contains("api key"));
        assert!(!message.contains("deployment"));
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let config = test_upstream_config("ftp://example.com");
        assert!(matches!(
            config.validate(),
            Err(RealtimeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_turn_detection_defaults() {
        let td = TurnDetectionConfig::default();
        assert_eq!(td.threshold, 0.5);
        assert_eq!(td.prefix_padding_ms, 300);
        assert_eq!(td.silence_duration_ms, 500);
        assert!(td.create_response);
    }
}
