//! Avatar configuration endpoint.
//!
//! Hands the browser what it needs to open the talking-avatar stream: a
//! short-lived speech token, the ICE relay server credentials and the
//! configured voice and avatar look.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvatarConfigResponse {
    pub token: String,
    pub region: String,
    pub ice_server_url: String,
    pub ice_server_username: String,
    pub ice_server_password: String,
    pub tts_voice: String,
    pub avatar_character: String,
    pub avatar_style: String,
}

/// Body of the avatar relay token endpoint
#[derive(Debug, Deserialize)]
struct RelayTokenResponse {
    #[serde(rename = "Urls", alias = "urls", default)]
    urls: Vec<String>,
    #[serde(rename = "Username", alias = "username", default)]
    username: String,
    #[serde(rename = "Password", alias = "password", default)]
    password: String,
}

#[derive(Debug, Error)]
enum CredentialError {
    #[error("speech service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay token response has no ICE server URL")]
    NoIceServer,
}

/// GET /api/avatar/config
pub async fn get_avatar_config(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<AvatarConfigResponse>> {
    let speech = &state.config.speech;
    let Some((key, region)) = speech.credentials() else {
        return Err(AppError::bad_request("Azure Speech configuration missing."));
    };

    match fetch_credentials(&state.http_client, speech.token_url(region), speech.relay_url(region), key).await {
        Ok((token, relay)) => {
            info!(region, "Issued avatar configuration");
            let ice_server_url = relay.urls.into_iter().next().unwrap_or_default();
            Ok(Json(AvatarConfigResponse {
                token,
                region: region.to_string(),
                ice_server_url,
                ice_server_username: relay.username,
                ice_server_password: relay.password,
                tts_voice: speech.tts_voice.clone(),
                avatar_character: speech.avatar_character.clone(),
                avatar_style: speech.avatar_style.clone(),
            }))
        }
        Err(e) => {
            error!(region, error = %e, "Error getting avatar config");
            Err(AppError::internal("Failed to retrieve avatar configuration."))
        }
    }
}

async fn fetch_credentials(
    client: &reqwest::Client,
    token_url: String,
    relay_url: String,
    key: &str,
) -> Result<(String, RelayTokenResponse), CredentialError> {
    let token = fetch_token(client, &token_url, key).await?;
    let relay = fetch_relay(client, &relay_url, key).await?;
    Ok((token, relay))
}

async fn fetch_token(client: &reqwest::Client, url: &str, key: &str) -> Result<String, CredentialError> {
    let token = client
        .post(url)
        .header(SUBSCRIPTION_KEY_HEADER, key)
        .header(reqwest::header::CONTENT_LENGTH, 0)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(token)
}

async fn fetch_relay(
    client: &reqwest::Client,
    url: &str,
    key: &str,
) -> Result<RelayTokenResponse, CredentialError> {
    let relay: RelayTokenResponse = client
        .get(url)
        .header(SUBSCRIPTION_KEY_HEADER, key)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    if relay.urls.is_empty() {
        return Err(CredentialError::NoIceServer);
    }
    Ok(relay)
}
