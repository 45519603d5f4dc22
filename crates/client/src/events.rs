use {
    futures::StreamExt,
    tokio::net::TcpStream,
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
    },
    tracing::debug,
};

use wagate_protocol::{API_KEY_HEADER, GatewayEvent};

use crate::ClientError;

/// An open push channel subscription.
pub struct EventStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl EventStream {
    pub(crate) async fn connect(url: &str, api_key: Option<&str>) -> Result<Self, ClientError> {
        let mut request = url.into_client_request()?;
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key).map_err(|e| ClientError::InvalidUrl {
                url: url.to_string(),
                reason: format!("api key is not a valid header value: {e}"),
            })?;
            request.headers_mut().insert(API_KEY_HEADER, value);
        }
        let (ws, _response) = connect_async(request).await?;
        debug!(url, "push channel open");
        Ok(Self { ws })
    }

    /// The next event, or `None` once the gateway closes the channel.
    ///
    /// Frames of an unknown type are skipped so newer gateways do not break
    /// older clients.
    pub async fn next_event(&mut self) -> Option<Result<GatewayEvent, ClientError>> {
        while let Some(msg) = self.ws.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                    Ok(event) => return Some(Ok(event)),
                    Err(e) => debug!(error = %e, "skipping unrecognised frame"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {},
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
