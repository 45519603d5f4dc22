//! Client for a running gateway.
//!
//! [`GatewayClient`] wraps the Control API and the push channel. The push
//! channel has no replay, so [`GatewayClient::listen`] simply resubscribes
//! after a fixed pause whenever the connection drops.

mod events;

use std::time::Duration;

use {
    reqwest::{Method, RequestBuilder, StatusCode},
    serde::de::DeserializeOwned,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    url::Url,
};

use wagate_protocol::{
    API_KEY_HEADER, ErrorReply, EVENTS_PATH, GatewayEvent, OkReply, QrReply, SendReply,
    SendRequest, StatusReply,
};

pub use events::EventStream;

/// Pause between push channel reconnects.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid gateway url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-success status.
    #[error("gateway returned {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("push channel error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid frame: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// True for the 503 the gateway returns while no session is active.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::Api { status, .. } if *status == StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Clone)]
pub struct GatewayClient {
    base: Url,
    api_key: Option<String>,
    http: reqwest::Client,
    retry_delay: Duration,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base", &self.base.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl GatewayClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, ClientError> {
        let mut base = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl {
                url: base_url.to_string(),
                reason: "scheme must be http or https".into(),
            });
        }
        // Endpoints resolve relative to the base, so keep any path prefix
        // (a gateway mounted under `/wa`) as a directory.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            api_key: api_key.filter(|k| !k.is_empty()),
            http: reqwest::Client::new(),
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        let relative = path.trim_start_matches('/');
        self.base.join(relative).map_err(|e| ClientError::InvalidUrl {
            url: format!("{}{path}", self.base),
            reason: e.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let mut req = self.http.request(method, self.endpoint(path)?);
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }
        Ok(req)
    }

    async fn execute<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorReply>(&body)
            .map(|e| e.error)
            .unwrap_or(body);
        Err(ClientError::Api { status, message })
    }

    /// Liveness of the gateway process, independent of the session.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let reply: OkReply = self.execute(self.request(Method::GET, "/health")?).await?;
        Ok(reply.ok)
    }

    pub async fn status(&self) -> Result<StatusReply, ClientError> {
        self.execute(self.request(Method::GET, "/status")?).await
    }

    /// The pending pairing code, if the session is waiting to be paired.
    pub async fn pairing_code(&self) -> Result<Option<String>, ClientError> {
        let reply: QrReply = self.execute(self.request(Method::GET, "/qr")?).await?;
        Ok(reply.qr)
    }

    pub async fn send(&self, to: &str, text: &str) -> Result<SendReply, ClientError> {
        let req = self
            .request(Method::POST, "/send")?
            .json(&SendRequest::new(to, text));
        self.execute(req).await
    }

    /// Ask the gateway to wipe its credentials and exit.
    pub async fn reset(&self) -> Result<(), ClientError> {
        let _: OkReply = self.execute(self.request(Method::POST, "/reset")?).await?;
        Ok(())
    }

    /// Open the push channel. Only events published after this call
    /// resolves are delivered.
    pub async fn subscribe(&self) -> Result<EventStream, ClientError> {
        let mut url = self.endpoint(EVENTS_PATH)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|()| ClientError::InvalidUrl {
            url: url.to_string(),
            reason: format!("cannot switch scheme to {scheme}"),
        })?;
        EventStream::connect(url.as_str(), self.api_key.as_deref()).await
    }

    /// Deliver push events to `on_event` until `cancel` fires, resubscribing
    /// after every disconnect.
    pub async fn listen<F>(&self, mut on_event: F, cancel: CancellationToken)
    where
        F: FnMut(GatewayEvent),
    {
        loop {
            match self.subscribe().await {
                Ok(mut stream) => {
                    info!(url = %self.base, "listening for gateway events");
                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            event = stream.next_event() => match event {
                                Some(Ok(event)) => on_event(event),
                                Some(Err(e)) => {
                                    warn!(error = %e, "push channel failed");
                                    break;
                                },
                                None => {
                                    debug!("push channel closed");
                                    break;
                                },
                            },
                        }
                    }
                },
                Err(e) => warn!(error = %e, "failed to subscribe to gateway events"),
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.retry_delay) => {},
            }
        }
    }
}
