use std::path::PathBuf;

use super::yaml::{
    RealtimeYaml, SecurityYaml, ServerYaml, SessionYaml, SpeechYaml, YamlConfig,
};
use super::{ServerConfig, TlsConfig, env};

/// Build the environment configuration and apply YAML values on top.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = env::load_from_env()?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        apply_server(&mut config, server)?;
    }
    if let Some(realtime) = yaml.realtime {
        apply_realtime(&mut config, realtime);
    }
    if let Some(session) = yaml.session {
        apply_session(&mut config, session);
    }
    if let Some(speech) = yaml.speech {
        apply_speech(&mut config, speech);
    }
    if let Some(security) = yaml.security {
        apply_security(&mut config, security);
    }

    Ok(config)
}

fn apply_server(
    config: &mut ServerConfig,
    server: ServerYaml,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(host) = server.host {
        config.host = host;
    }
    if let Some(port) = server.port {
        config.port = port;
    }
    if let Some(tls) = server.tls {
        if tls.enabled == Some(false) {
            config.tls = None;
        } else {
            match (tls.cert_path, tls.key_path) {
                (Some(cert), Some(key)) => {
                    config.tls = Some(TlsConfig {
                        cert_path: PathBuf::from(cert),
                        key_path: PathBuf::from(key),
                    });
                }
                (None, None) if tls.enabled.is_none() => {}
                _ => return Err("TLS requires both server.tls.cert_path and server.tls.key_path".into()),
            }
        }
    }
    Ok(())
}

fn apply_realtime(config: &mut ServerConfig, yaml: RealtimeYaml) {
    let realtime = &mut config.realtime;
    if yaml.endpoint.is_some() {
        realtime.endpoint = yaml.endpoint;
    }
    if yaml.deployment.is_some() {
        realtime.deployment = yaml.deployment;
    }
    if yaml.api_key.is_some() {
        realtime.api_key = yaml.api_key;
    }
    if let Some(version) = yaml.api_version {
        realtime.api_version = version;
    }
    if let Some(voice) = yaml.voice {
        realtime.voice = voice;
    }
    if let Some(instructions) = yaml.instructions {
        realtime.instructions = instructions;
    }
    if let Some(format) = yaml.input_audio_format {
        realtime.input_audio_format = format;
    }
    if let Some(format) = yaml.output_audio_format {
        realtime.output_audio_format = format;
    }
    if let Some(model) = yaml.transcription_model {
        realtime.transcription_model = model;
    }
    if let Some(modalities) = yaml.modalities {
        realtime.modalities = modalities;
    }
    if let Some(td) = yaml.turn_detection {
        let turn_detection = &mut realtime.turn_detection;
        if let Some(threshold) = td.threshold {
            turn_detection.threshold = threshold;
        }
        if let Some(padding) = td.prefix_padding_ms {
            turn_detection.prefix_padding_ms = padding;
        }
        if let Some(silence) = td.silence_duration_ms {
            turn_detection.silence_duration_ms = silence;
        }
        if let Some(create) = td.create_response {
            turn_detection.create_response = create;
        }
    }
}

fn apply_session(config: &mut ServerConfig, yaml: SessionYaml) {
    let session = &mut config.session;
    if let Some(idle) = yaml.audio_pump_idle_ms {
        session.audio_pump_idle_ms = idle;
    }
    if let Some(capacity) = yaml.audio_queue_capacity {
        session.audio_queue_capacity = capacity;
    }
    if let Some(policy) = yaml.audio_queue_overflow {
        session.audio_queue_overflow = policy;
    }
    if let Some(timeout) = yaml.handshake_timeout_ms {
        session.handshake_timeout_ms = timeout;
    }
    if let Some(timeout) = yaml.teardown_timeout_ms {
        session.teardown_timeout_ms = timeout;
    }
}

fn apply_speech(config: &mut ServerConfig, yaml: SpeechYaml) {
    let speech = &mut config.speech;
    if yaml.subscription_key.is_some() {
        speech.subscription_key = yaml.subscription_key;
    }
    if yaml.region.is_some() {
        speech.region = yaml.region;
    }
    if let Some(voice) = yaml.tts_voice {
        speech.tts_voice = voice;
    }
    if let Some(character) = yaml.avatar_character {
        speech.avatar_character = character;
    }
    if let Some(style) = yaml.avatar_style {
        speech.avatar_style = style;
    }
    if yaml.token_base_url.is_some() {
        speech.token_base_url = yaml.token_base_url;
    }
    if yaml.relay_base_url.is_some() {
        speech.relay_base_url = yaml.relay_base_url;
    }
}

fn apply_security(config: &mut ServerConfig, yaml: SecurityYaml) {
    if yaml.cors_allowed_origins.is_some() {
        config.cors_allowed_origins = yaml.cors_allowed_origins;
    }
    if let Some(rps) = yaml.rate_limit_requests_per_second {
        config.rate_limit_requests_per_second = rps;
    }
    if let Some(burst) = yaml.rate_limit_burst_size {
        config.rate_limit_burst_size = burst;
    }
    if yaml.max_websocket_connections.is_some() {
        config.max_websocket_connections = yaml.max_websocket_connections;
    }
    if let Some(per_ip) = yaml.max_connections_per_ip {
        config.max_connections_per_ip = per_ip;
    }
}
