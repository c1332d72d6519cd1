use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::error::ConfigError;

// Logging is on in debug builds; release builds only log when RUST_LOG asks for it.
#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

/// Default filter used by [`crate::logger::init`] when `RUST_LOG` is unset.
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "peercall=debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "peercall=info,webrtc=error";

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_BATCH_WINDOW_MS: u64 = 500;
pub const DEFAULT_RECONNECT_GRACE_SECS: u64 = 10;

/// Public STUN servers used when nothing else is configured
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig::stun("default-stun", "stun:stun.l.google.com:19302"),
        ServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
    ]
});

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    Stun,
    Turn,
}

/// One STUN or TURN server entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IceServerKind,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: &str, url: &str) -> Self {
        Self {
            id: id.into(),
            kind: IceServerKind::Stun,
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    /// URL with a `stun:`/`turn:` scheme, added from `kind` when missing.
    pub fn ice_url(&self) -> String {
        if self.url.starts_with("turn:")
            || self.url.starts_with("turns:")
            || self.url.starts_with("stun:")
        {
            return self.url.clone();
        }
        let scheme = match self.kind {
            IceServerKind::Turn => "turn:",
            IceServerKind::Stun => "stun:",
        };
        format!("{scheme}{}", self.url)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl(self.id.clone()));
        }
        if self.kind == IceServerKind::Turn
            && (self.username.is_none() || self.credential.is_none())
        {
            return Err(ConfigError::MissingTurnCredentials(self.id.clone()));
        }
        Ok(())
    }

    pub fn to_rtc(&self) -> RTCIceServer {
        RTCIceServer {
            urls: vec![self.ice_url()],
            username: self.username.clone().unwrap_or_default(),
            credential: self.credential.clone().unwrap_or_default(),
        }
    }
}

/// Runtime settings for the call engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CallConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
    /// Local candidates sent per batch before the window expires
    pub candidate_batch_size: usize,
    pub candidate_batch_window_ms: u64,
    /// How long a disconnected call may recover before the UI is told it failed
    pub reconnect_grace_secs: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            ice_candidate_pool_size: 10,
            candidate_batch_size: DEFAULT_BATCH_SIZE,
            candidate_batch_window_ms: DEFAULT_BATCH_WINDOW_MS,
            reconnect_grace_secs: DEFAULT_RECONNECT_GRACE_SECS,
        }
    }
}

impl CallConfig {
    /// Parses and validates a JSON config. Missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: CallConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice_servers {
            server.validate()?;
        }
        if self.candidate_batch_size == 0 {
            return Err(ConfigError::Zero("candidate_batch_size"));
        }
        if self.candidate_batch_window_ms == 0 {
            return Err(ConfigError::Zero("candidate_batch_window_ms"));
        }
        Ok(())
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.candidate_batch_window_ms)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_secs)
    }

    /// ICE servers for the peer connection; falls back to the public STUN pair.
    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        let servers = if self.ice_servers.is_empty() {
            &*DEFAULT_ICE_SERVERS
        } else {
            &self.ice_servers
        };
        servers.iter().map(ServerConfig::to_rtc).collect()
    }
}
