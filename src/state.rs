//! Shared application state.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::config::ServerConfig;
use crate::core::realtime::{UpstreamConnector, WsConnector};
use crate::core::session::SessionRegistry;
use crate::handlers::chat::ClientHub;

/// Why a WebSocket connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("global WebSocket connection limit reached")]
    GlobalLimitReached,
    #[error("per-IP WebSocket connection limit reached")]
    PerIpLimitReached,
}

/// State shared by every handler.
pub struct AppState {
    pub config: ServerConfig,
    /// Live upstream sessions keyed by connection identity
    pub sessions: Arc<SessionRegistry>,
    /// Outbound channels of every connected client
    pub hub: Arc<ClientHub>,
    /// Opens upstream realtime connections
    pub connector: Arc<dyn UpstreamConnector>,
    /// Client for outbound HTTP calls (avatar credentials)
    pub http_client: reqwest::Client,

    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, usize>,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_connector(config, Arc::new(WsConnector::new()))
    }

    /// Build state with a specific upstream connector.
    pub fn with_connector(config: ServerConfig, connector: Arc<dyn UpstreamConnector>) -> Arc<Self> {
        let sessions = Arc::new(SessionRegistry::new(
            config.session.audio_queue_capacity,
            config.session.audio_queue_overflow,
        ));

        Arc::new(Self {
            config,
            sessions,
            hub: Arc::new(ClientHub::new()),
            connector,
            http_client: reqwest::Client::new(),
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Reserve a WebSocket slot for `ip`.
    ///
    /// Both limits are checked and incremented atomically with respect to
    /// other callers for the same IP.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let per_ip_limit = self.config.max_connections_per_ip as usize;
        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= per_ip_limit {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        if let Some(max) = self.config.max_websocket_connections {
            let reserved = self
                .ws_connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                    (count < max).then_some(count + 1)
                });
            if reserved.is_err() {
                drop(per_ip);
                self.ip_connections.remove_if(&ip, |_, count| *count == 0);
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        } else {
            self.ws_connections.fetch_add(1, Ordering::AcqRel);
        }

        *per_ip += 1;
        debug!(ip = %ip, per_ip = *per_ip, "WebSocket connection slot acquired");
        Ok(())
    }

    /// Return a slot taken by `try_acquire_connection`.
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
        if let Some(mut count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn limited_config(global: Option<usize>, per_ip: u32) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.max_websocket_connections = global;
        config.max_connections_per_ip = per_ip;
        config
    }

    #[tokio::test]
    async fn test_connection_tracking_basic() {
        let state = AppState::new(limited_config(Some(10), 3)).await;
        let ip: IpAddr = Ipv4Addr::new(192, 168, 1, 100).into();

        assert_eq!(state.ws_connection_count(), 0);
        assert_eq!(state.ip_connection_count(&ip), 0);

        for expected in 1..=3 {
            assert!(state.try_acquire_connection(ip).is_ok());
            assert_eq!(state.ip_connection_count(&ip), expected);
        }

        assert_eq!(
            state.try_acquire_connection(ip),
            Err(ConnectionLimitError::PerIpLimitReached)
        );
        assert_eq!(state.ws_connection_count(), 3);

        state.release_connection(ip);
        assert_eq!(state.ws_connection_count(), 2);
        assert!(state.try_acquire_connection(ip).is_ok());
    }

    #[tokio::test]
    async fn test_global_connection_limit() {
        let state = AppState::new(limited_config(Some(5), 10)).await;
        let ips: Vec<IpAddr> = (1..=6)
            .map(|i| Ipv4Addr::new(192, 168, 1, i).into())
            .collect();

        for ip in &ips[0..5] {
            assert!(state.try_acquire_connection(*ip).is_ok());
        }
        assert_eq!(
            state.try_acquire_connection(ips[5]),
            Err(ConnectionLimitError::GlobalLimitReached)
        );
        assert_eq!(state.ip_connection_count(&ips[5]), 0);

        state.release_connection(ips[0]);
        assert_eq!(state.ip_connection_count(&ips[0]), 0);
        assert!(state.try_acquire_connection(ips[5]).is_ok());
    }

    #[tokio::test]
    async fn test_unlimited_global_connections() {
        let state = AppState::new(limited_config(None, 100)).await;
        let ip: IpAddr = Ipv4Addr::LOCALHOST.into();
        for _ in 0..50 {
            assert!(state.try_acquire_connection(ip).is_ok());
        }
        assert_eq!(state.ws_connection_count(), 50);

        // releasing more than acquired never underflows
        for _ in 0..60 {
            state.release_connection(ip);
        }
        assert_eq!(state.ws_connection_count(), 0);
    }
}
