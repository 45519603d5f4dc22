//! Translation of operator commands into session controller calls.

use std::sync::Arc;

use {
    axum::{
        Json,
        response::{IntoResponse, Response},
    },
    tracing::{error, info},
};

use wagate_protocol::{OkReply, QrReply, SendReply, SendRequest, StatusReply};

use crate::{
    error::GatewayError,
    session::SessionController,
    shutdown::{Shutdown, ShutdownReason},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SendMessage { to: String, text: String },
    GetStatus,
    GetPairingCode,
    Reset,
}

impl Command {
    /// Validate a send request. Both fields must be present and non-empty.
    pub fn send_message(request: SendRequest) -> Result<Self, GatewayError> {
        match (request.to, request.text) {
            (Some(to), Some(text)) if !to.is_empty() && !text.is_empty() => {
                Ok(Self::SendMessage { to, text })
            },
            _ => Err(GatewayError::missing_to_text()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Status(StatusReply),
    PairingCode(QrReply),
    Sent(SendReply),
    ResetDone,
}

impl IntoResponse for CommandReply {
    fn into_response(self) -> Response {
        match self {
            Self::Status(reply) => Json(reply).into_response(),
            Self::PairingCode(reply) => Json(reply).into_response(),
            Self::Sent(reply) => Json(reply).into_response(),
            Self::ResetDone => Json(OkReply::OK).into_response(),
        }
    }
}

#[derive(Clone)]
pub struct CommandBridge {
    controller: Arc<SessionController>,
    shutdown: Shutdown,
}

impl CommandBridge {
    pub fn new(controller: Arc<SessionController>, shutdown: Shutdown) -> Self {
        Self {
            controller,
            shutdown,
        }
    }

    pub async fn execute(&self, command: Command) -> Result<CommandReply, GatewayError> {
        match command {
            Command::GetStatus => Ok(CommandReply::Status(self.status())),
            Command::GetPairingCode => Ok(CommandReply::PairingCode(self.pairing_code())),
            Command::SendMessage { to, text } => {
                self.controller.send(&to, &text).await?;
                Ok(CommandReply::Sent(SendReply::accepted()))
            },
            Command::Reset => {
                self.reset().await?;
                Ok(CommandReply::ResetDone)
            },
        }
    }

    pub fn status(&self) -> StatusReply {
        self.controller.state().to_reply()
    }

    pub fn pairing_code(&self) -> QrReply {
        QrReply {
            qr: self.controller.pairing_code(),
        }
    }

    /// Reset the session and ask the process to exit. A supervisor restarts
    /// it into a fresh pairing flow.
    async fn reset(&self) -> Result<(), GatewayError> {
        match self.controller.reset().await {
            Ok(()) => {
                info!("reset requested, shutting down");
                self.shutdown.trigger(ShutdownReason::Reset);
                Ok(())
            },
            Err(e) => {
                error!(error = %e, "reset could not clear credentials");
                self.shutdown
                    .trigger(ShutdownReason::Fatal(format!("reset failed: {e}")));
                Err(e)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        wagate_credentials::{CredentialStore, MemoryCredentialStore},
        wagate_protocol::{ConnectionStatus, SessionPhase},
        wagate_transport::{Transport, TransportEvent, mock::MockTransport},
    };

    use crate::hub::BroadcastHub;

    fn bridge() -> (CommandBridge, Arc<MockTransport>, Shutdown) {
        let transport = MockTransport::new();
        let shutdown = Shutdown::new();
        let controller = Arc::new(SessionController::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(MemoryCredentialStore::new()) as Arc<dyn CredentialStore>,
            Arc::new(BroadcastHub::default()),
            shutdown.clone(),
        ));
        (
            CommandBridge::new(controller, shutdown.clone()),
            transport,
            shutdown,
        )
    }

    #[test]
    fn send_validation() {
        assert!(Command::send_message(SendRequest::new("1@s", "hi")).is_ok());

        for request in [
            SendRequest::default(),
            SendRequest {
                to: Some("1@s".into()),
                text: None,
            },
            SendRequest {
                to: None,
                text: Some("hi".into()),
            },
            SendRequest::new("", "hi"),
            SendRequest::new("1@s", ""),
        ] {
            let err = Command::send_message(request).unwrap_err();
            assert_eq!(err.public_message(), "missing to/text");
        }
    }

    #[tokio::test]
    async fn status_and_pairing_code_before_start() {
        let (bridge, _transport, _shutdown) = bridge();

        let CommandReply::Status(status) = bridge.execute(Command::GetStatus).await.unwrap() else {
            panic!("expected status reply");
        };
        assert_eq!(status.status, ConnectionStatus::Disconnected);
        assert_eq!(status.phase, SessionPhase::Disconnected);

        assert_eq!(
            bridge.execute(Command::GetPairingCode).await.unwrap(),
            CommandReply::PairingCode(QrReply { qr: None })
        );
    }

    #[tokio::test]
    async fn send_while_disconnected_is_rejected() {
        let (bridge, transport, _shutdown) = bridge();
        let err = bridge
            .execute(Command::SendMessage {
                to: "1@s".into(),
                text: "hi".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected));
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn send_when_active_is_accepted() {
        let (bridge, transport, _shutdown) = bridge();
        bridge.controller.start().await.unwrap();
        let session = transport.latest().unwrap();
        session.emit(TransportEvent::Opened).await;
        let mut rx = bridge.controller.subscribe_state();
        rx.wait_for(|s| s.phase == SessionPhase::Active).await.unwrap();

        let reply = bridge
            .execute(Command::SendMessage {
                to: "1@s".into(),
                text: "hi".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply, CommandReply::Sent(SendReply::accepted()));
        assert_eq!(session.sent().len(), 1);
    }

    #[tokio::test]
    async fn reset_requests_shutdown() {
        let (bridge, _transport, shutdown) = bridge();
        bridge.controller.start().await.unwrap();

        assert_eq!(
            bridge.execute(Command::Reset).await.unwrap(),
            CommandReply::ResetDone
        );
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Reset));
        assert_eq!(bridge.status().phase, SessionPhase::Disconnected);
    }
}
