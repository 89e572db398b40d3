use super::{ServerConfig, TlsConfig};

/// Validate a fully merged configuration.
///
/// Realtime deployment settings are checked when a session starts, not here.
pub(super) fn validate(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_tls(&config.tls)?;
    validate_session(config)?;
    validate_security(config)?;
    Ok(())
}

/// Check that TLS files exist when TLS is enabled.
pub(super) fn validate_tls(tls: &Option<TlsConfig>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(tls) = tls else {
        return Ok(());
    };
    if !tls.cert_path.exists() {
        return Err(format!(
            "TLS certificate file not found: {}",
            tls.cert_path.display()
        )
        .into());
    }
    if !tls.key_path.exists() {
        return Err(format!("TLS key file not found: {}", tls.key_path.display()).into());
    }
    Ok(())
}

pub(super) fn validate_session(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let session = &config.session;
    if session.audio_queue_capacity == 0 {
        return Err("session.audio_queue_capacity must be greater than 0".into());
    }
    if session.audio_pump_idle_ms == 0 {
        return Err("session.audio_pump_idle_ms must be greater than 0".into());
    }
    if session.handshake_timeout_ms == 0 {
        return Err("session.handshake_timeout_ms must be greater than 0".into());
    }
    if session.teardown_timeout_ms == 0 {
        return Err("session.teardown_timeout_ms must be greater than 0".into());
    }
    let threshold = config.realtime.turn_detection.threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(format!(
            "realtime.turn_detection.threshold must be between 0.0 and 1.0, got {threshold}"
        )
        .into());
    }
    Ok(())
}

pub(super) fn validate_security(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.rate_limit_requests_per_second == 0 {
        return Err("rate_limit_requests_per_second must be greater than 0".into());
    }
    if config.rate_limit_burst_size == 0 {
        return Err("rate_limit_burst_size must be greater than 0".into());
    }
    if config.max_websocket_connections == Some(0) {
        return Err("max_websocket_connections must be greater than 0 when set".into());
    }
    if config.max_connections_per_ip == 0 {
        return Err("max_connections_per_ip must be greater than 0".into());
    }
    Ok(())
}
