//! Transport Session boundary.
//!
//! The messaging protocol itself (framing, handshake, multi-device pairing,
//! encoding) lives outside this workspace. The gateway sees it only through
//! [`Transport::open`], the resulting [`TransportSession`] and its stream of
//! [`TransportEvent`]s. Credential rotation arrives on the same stream.

#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod sidecar;

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
};

pub use {
    sidecar::{SidecarConfig, SidecarTransport},
    wagate_credentials::AuthState,
};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn transport process `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport session is closed")]
    Closed,

    #[error("transport rejected the request: {0}")]
    Rejected(String),

    #[error("transport did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport protocol error: {0}")]
    Protocol(String),
}

/// Something the transport reports about its session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A pairing code to present to the user.
    Qr(String),
    /// The session is authenticated and live.
    Opened,
    /// The session ended; the handle that produced it is dead.
    Closed { reason: Option<String> },
    Message(InboundMessage),
    /// The transport rotated its key material; persist it.
    CredentialsUpdated(AuthState),
}

/// An inbound message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Remote chat identifier the message came from.
    #[serde(default)]
    pub from: String,
    /// Set for echoes of messages this session sent itself.
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub message: Option<MessageContent>,
}

impl InboundMessage {
    pub fn text(from: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            from_me: false,
            message: Some(MessageContent {
                conversation: Some(text.into()),
                extended_text_message: None,
            }),
        }
    }

    /// The readable text of the message, if it has any.
    ///
    /// Plain conversation text wins over extended text; empty strings count
    /// as no text.
    pub fn body_text(&self) -> Option<&str> {
        let content = self.message.as_ref()?;
        content
            .conversation
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| {
                content
                    .extended_text_message
                    .as_ref()
                    .and_then(|e| e.text.as_deref())
                    .filter(|t| !t.is_empty())
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedText>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

/// A freshly opened session together with its event stream.
pub struct TransportConnection {
    pub session: Arc<dyn TransportSession>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens transport sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session. `None` credentials start a fresh pairing flow.
    async fn open(&self, auth: Option<AuthState>) -> Result<TransportConnection, TransportError>;
}

/// One live transport session.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Hand a text message to the transport.
    ///
    /// `Ok` means the transport accepted the message, nothing more: remote
    /// delivery is never confirmed through this call.
    async fn send_text(&self, to: &str, text: &str) -> Result<(), TransportError>;

    /// Tear the session down. No further events are produced afterwards.
    async fn close(&self);
}
