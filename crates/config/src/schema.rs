//! Config schema: one section per gateway concern.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
};

/// Root configuration.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Render each new pairing code as a QR block on stderr.
    pub print_qr: bool,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub credentials: CredentialsConfig,
    pub transport: TransportConfig,
    pub reconnect: ReconnectConfig,
    pub hub: HubConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            print_qr: true,
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            credentials: CredentialsConfig::default(),
            transport: TransportConfig::default(),
            reconnect: ReconnectConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Reject values that would make the gateway misbehave at runtime.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reconnect.multiplier < 1.0 || !self.reconnect.multiplier.is_finite() {
            anyhow::bail!(
                "reconnect.multiplier must be a finite number >= 1.0, got {}",
                self.reconnect.multiplier
            );
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            anyhow::bail!("reconnect.max_delay_ms must not be below reconnect.initial_delay_ms");
        }
        if self.hub.subscriber_buffer == 0 {
            anyhow::bail!("hub.subscriber_buffer must be at least 1");
        }
        if self.transport.event_buffer == 0 {
            anyhow::bail!("transport.event_buffer must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: wagate_protocol::DEFAULT_PORT,
        }
    }
}

/// Shared-secret protection of the Control API and push channel.
///
/// No key means open access.
#[derive(Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(serialize_with = "serialize_option_secret")]
    pub api_key: Option<Secret<String>>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AuthConfig {
    /// The configured key, treating an empty string as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_ref()
            .map(|k| k.expose_secret().as_str())
            .filter(|k| !k.is_empty())
    }
}

pub fn serialize_option_secret<S: Serializer>(
    value: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Directory holding persisted session credentials.
    /// Defaults to `~/.wagate/credentials`.
    pub dir: Option<PathBuf>,
}

impl CredentialsConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("credentials"))
    }
}

/// How to launch the protocol sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// How long a send waits for the sidecar's acknowledgement.
    pub send_timeout_ms: u64,
    /// Capacity of the transport event queue.
    pub event_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            send_timeout_ms: 30_000,
            event_buffer: 256,
        }
    }
}

impl TransportConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Backoff applied between reconnect attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Frames buffered per subscriber before new events are skipped for it.
    pub subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
        }
    }
}
