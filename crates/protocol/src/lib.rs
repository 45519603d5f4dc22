//! Wire format for the gateway's Control API and Event Push Channel.
//!
//! Push frames are plain JSON objects tagged by `type`; there is no envelope
//! versioning, no replay and no acknowledgement. HTTP bodies are equally flat.

use serde::{Deserialize, Serialize};

/// Header carrying the shared secret, when one is configured.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Path of the WebSocket push channel.
pub const EVENTS_PATH: &str = "/events";

/// Default port of the gateway HTTP server.
pub const DEFAULT_PORT: u16 = 3001;

pub mod errors {
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const MISSING_TO_TEXT: &str = "missing to/text";
    pub const NOT_CONNECTED: &str = "not connected";
    pub const SEND_FAILED: &str = "send failed";
    pub const INTERNAL: &str = "internal error";
}

// ── Push events ──────────────────────────────────────────────────────────────

/// An event pushed to every subscriber of the push channel.
///
/// Serialized once per publish; every subscriber receives identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GatewayEvent {
    /// A new pairing code is waiting to be scanned.
    Qr { data: String },
    /// The transport connection went up or down.
    Status { data: ConnectionStatus },
    /// An inbound text message from a remote party.
    Message { from: String, text: String },
}

impl GatewayEvent {
    pub fn qr(code: impl Into<String>) -> Self {
        Self::Qr { data: code.into() }
    }

    pub fn status(status: ConnectionStatus) -> Self {
        Self::Status { data: status }
    }

    pub fn message(from: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Message {
            from: from.into(),
            text: text.into(),
        }
    }

    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Qr { .. } => "qr",
            Self::Status { .. } => "status",
            Self::Message { .. } => "message",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of the single transport session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Disconnected,
    Connecting,
    AwaitingPairing,
    Active,
}

impl SessionPhase {
    /// Only an active session counts as connected for status reporting.
    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Active => ConnectionStatus::Connected,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

// ── HTTP bodies ──────────────────────────────────────────────────────────────

/// Body of `POST /send`. Both fields are optional at the wire level so that a
/// missing field is reported as a client error rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl SendRequest {
    pub fn new(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: Some(to.into()),
            text: Some(text.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkReply {
    pub ok: bool,
}

impl OkReply {
    pub const OK: Self = Self { ok: true };
}

/// How far an accepted send is known to have travelled.
///
/// The gateway only ever learns that the transport took the message; remote
/// receipt is never confirmed, so `Accepted` is the sole reported value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    Accepted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReply {
    pub ok: bool,
    pub delivery: Delivery,
}

impl SendReply {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            delivery: Delivery::Accepted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub status: ConnectionStatus,
    pub phase: SessionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Body of `GET /qr`; `qr` serializes as `null` when no code is pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrReply {
    pub qr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}

impl ErrorReply {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
