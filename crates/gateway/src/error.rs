use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    tracing::warn,
};

use {
    wagate_credentials::CredentialError,
    wagate_protocol::{ErrorReply, errors},
    wagate_transport::TransportError,
};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No active transport session to act on.
    #[error("not connected")]
    NotConnected,

    #[error("{0}")]
    InvalidParams(String),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("credential store failure: {0}")]
    Credentials(#[from] CredentialError),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn missing_to_text() -> Self {
        Self::InvalidParams(errors::MISSING_TO_TEXT.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidParams(_) => StatusCode::BAD_REQUEST,
            Self::Transport(_) | Self::Credentials(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    /// The message clients see. Internal detail stays in the logs.
    pub fn public_message(&self) -> &str {
        match self {
            Self::NotConnected => errors::NOT_CONNECTED,
            Self::InvalidParams(msg) => msg,
            Self::Transport(_) => errors::SEND_FAILED,
            Self::Credentials(_) | Self::Internal(_) => errors::INTERNAL,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(error = %self, status = status.as_u16(), "request failed");
        }
        (status, Json(ErrorReply::new(self.public_message()))).into_response()
    }
}
