use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Request, State},
        http::{HeaderMap, StatusCode},
        middleware::Next,
        response::{IntoResponse, Response},
    },
    subtle::ConstantTimeEq,
    tracing::warn,
};

use wagate_protocol::{API_KEY_HEADER, ErrorReply, errors};

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    KeyMissing,
    KeyMismatch,
}

impl AuthFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::KeyMissing => "key_missing",
            Self::KeyMismatch => "key_mismatch",
        }
    }
}

/// Shared-secret check on the `x-api-key` header.
///
/// With no key configured every request is let through.
#[derive(Clone, Default)]
pub struct ApiKeyAuth {
    key: Option<Arc<str>>,
}

impl std::fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuth")
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ApiKeyAuth {
    /// Empty keys count as no key.
    pub fn new(key: Option<&str>) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }

    pub fn is_open(&self) -> bool {
        self.key.is_none()
    }

    pub fn verify(&self, provided: Option<&str>) -> Result<(), AuthFailure> {
        let Some(expected) = &self.key else {
            return Ok(());
        };
        let provided = provided.ok_or(AuthFailure::KeyMissing)?;
        if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            Err(AuthFailure::KeyMismatch)
        }
    }

    pub fn check(&self, headers: &HeaderMap) -> Result<(), AuthFailure> {
        let provided = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        self.verify(provided)
    }
}

/// Middleware guarding every route it is layered on.
pub async fn require_api_key(
    State(auth): State<ApiKeyAuth>,
    request: Request,
    next: Next,
) -> Response {
    match auth.check(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(failure) => {
            warn!(
                path = %request.uri().path(),
                reason = failure.reason(),
                "rejected unauthenticated request"
            );
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorReply::new(errors::UNAUTHORIZED)),
            )
                .into_response()
        },
    }
}
