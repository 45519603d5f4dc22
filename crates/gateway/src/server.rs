use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use {
    axum::{
        Json, Router,
        body::Bytes,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        middleware,
        response::IntoResponse,
        routing::{get, post},
    },
    tokio::net::TcpListener,
    tower_http::trace::TraceLayer,
    tracing::{info, warn},
};

use {
    wagate_config::GatewayConfig,
    wagate_credentials::CredentialStore,
    wagate_protocol::{EVENTS_PATH, OkReply, SendRequest},
    wagate_transport::Transport,
};

use crate::{
    auth::{ApiKeyAuth, require_api_key},
    commands::{Command, CommandReply},
    error::GatewayError,
    hub::BroadcastHub,
    reconnect::ReconnectPolicy,
    session::SessionController,
    shutdown::{Shutdown, ShutdownReason},
    state::GatewayState,
    ws::handle_subscriber,
};

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the Control API and push channel router. Everything except
/// `/health` sits behind the API key check.
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let protected = Router::new()
        .route("/status", get(status_handler))
        .route("/qr", get(qr_handler))
        .route("/send", post(send_handler))
        .route("/reset", post(reset_handler))
        .route(EVENTS_PATH, get(events_handler))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `listener` until shutdown is requested, then report why.
pub async fn serve(
    listener: TcpListener,
    state: Arc<GatewayState>,
) -> std::io::Result<ShutdownReason> {
    let shutdown = state.shutdown.clone();
    let app = build_gateway_app(state);
    let signal = {
        let shutdown = shutdown.clone();
        async move {
            shutdown.wait().await;
        }
    };
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal)
    .await?;
    Ok(shutdown.reason().unwrap_or(ShutdownReason::Interrupted))
}

/// Start the gateway: bind, open the transport session and serve until a
/// reset, a fatal error or an interrupt ends the process.
pub async fn start_gateway(
    config: &GatewayConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
) -> anyhow::Result<ShutdownReason> {
    let hub = Arc::new(BroadcastHub::new(config.hub.subscriber_buffer));
    let shutdown = Shutdown::new();
    let controller = Arc::new(
        SessionController::new(transport, credentials, Arc::clone(&hub), shutdown.clone())
            .with_policy(ReconnectPolicy::from(&config.reconnect))
            .with_print_qr(config.print_qr),
    );
    let auth = ApiKeyAuth::new(config.auth.api_key());
    let state = GatewayState::new(Arc::clone(&controller), hub, auth.clone(), shutdown.clone());

    let ip: IpAddr = config.server.bind.parse()?;
    let listener = TcpListener::bind(SocketAddr::new(ip, config.server.port)).await?;
    let addr = listener.local_addr()?;

    // Startup banner.
    let lines = [
        format!("wagate gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("push channel at ws://{addr}{EVENTS_PATH}"),
        format!(
            "auth: {}",
            if auth.is_open() {
                "none"
            } else {
                "api key"
            }
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    if auth.is_open() && !ip.is_loopback() {
        warn!(%addr, "no API key configured on a non-loopback address");
    }

    controller.start().await?;

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.trigger(ShutdownReason::Interrupted);
            }
        }
    });

    let reason = serve(listener, state).await?;
    controller.stop().await;
    info!(%reason, "gateway stopped");
    Ok(reason)
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler() -> impl IntoResponse {
    Json(OkReply::OK)
}

async fn status_handler(State(state): State<Arc<GatewayState>>) -> Result<CommandReply, GatewayError> {
    state.commands.execute(Command::GetStatus).await
}

async fn qr_handler(State(state): State<Arc<GatewayState>>) -> Result<CommandReply, GatewayError> {
    state.commands.execute(Command::GetPairingCode).await
}

async fn send_handler(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> Result<CommandReply, GatewayError> {
    // Unparseable bodies are reported like missing fields.
    let request: SendRequest = serde_json::from_slice(&body).unwrap_or_default();
    let command = Command::send_message(request)?;
    state.commands.execute(command).await
}

async fn reset_handler(State(state): State<Arc<GatewayState>>) -> Result<CommandReply, GatewayError> {
    state.commands.execute(Command::Reset).await
}

async fn events_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let hub = Arc::clone(&state.hub);
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| handle_subscriber(socket, hub, shutdown, addr))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{
            body::Body,
            http::{Request, StatusCode},
        },
        serde_json::{Value, json},
        tower::ServiceExt,
        wagate_credentials::MemoryCredentialStore,
        wagate_protocol::{API_KEY_HEADER, SessionPhase},
        wagate_transport::{TransportEvent, mock::MockTransport},
    };

    const KEY: &str = "test-key";

    fn gateway(key: Option<&str>) -> (Arc<GatewayState>, Arc<MockTransport>) {
        let transport = MockTransport::new();
        let hub = Arc::new(BroadcastHub::default());
        let shutdown = Shutdown::new();
        let controller = Arc::new(SessionController::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(MemoryCredentialStore::new()) as Arc<dyn CredentialStore>,
            Arc::clone(&hub),
            shutdown.clone(),
        ));
        let state = GatewayState::new(controller, hub, ApiKeyAuth::new(key), shutdown);
        (state, transport)
    }

    async fn call(
        state: &Arc<GatewayState>,
        method: &str,
        uri: &str,
        key: Option<&str>,
        body: &str,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            req = req.header(API_KEY_HEADER, key);
        }
        let req = req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = build_gateway_app(Arc::clone(state))
            .oneshot(req)
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_is_open() {
        let (state, _) = gateway(Some(KEY));
        let (status, body) = call(&state, "GET", "/health", None, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn control_routes_require_key() {
        let (state, _) = gateway(Some(KEY));
        for (method, uri) in [
            ("GET", "/status"),
            ("GET", "/qr"),
            ("POST", "/send"),
            ("POST", "/reset"),
            ("GET", "/events"),
        ] {
            let (status, body) = call(&state, method, uri, None, "{}").await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
            assert_eq!(body, json!({"error": "unauthorized"}));

            let (status, _) = call(&state, method, uri, Some("wrong"), "{}").await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
        }
        assert_eq!(state.shutdown.reason(), None);
    }

    #[tokio::test]
    async fn no_key_configured_lets_everything_through() {
        let (state, _) = gateway(None);
        let (status, _) = call(&state, "GET", "/status", None, "").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn status_and_qr_before_pairing() {
        let (state, _) = gateway(Some(KEY));
        let (status, body) = call(&state, "GET", "/status", Some(KEY), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "disconnected", "phase": "disconnected"}));

        let (_, body) = call(&state, "GET", "/qr", Some(KEY), "").await;
        assert_eq!(body, json!({"qr": null}));
    }

    #[tokio::test]
    async fn qr_reflects_pending_pairing_code() {
        let (state, transport) = gateway(Some(KEY));
        state.controller.start().await.unwrap();
        transport
            .latest()
            .unwrap()
            .emit(TransportEvent::Qr("ABC123".into()))
            .await;
        let mut rx = state.controller.subscribe_state();
        rx.wait_for(|s| s.phase == SessionPhase::AwaitingPairing)
            .await
            .unwrap();

        let (_, body) = call(&state, "GET", "/qr", Some(KEY), "").await;
        assert_eq!(body, json!({"qr": "ABC123"}));
        let (_, body) = call(&state, "GET", "/status", Some(KEY), "").await;
        assert_eq!(body["phase"], "awaitingPairing");
        assert_eq!(body["status"], "disconnected");
    }

    #[tokio::test]
    async fn send_validation_errors() {
        let (state, _) = gateway(Some(KEY));
        for body in ["{}", r#"{"to":"1@s"}"#, r#"{"text":"hi"}"#, "not json", ""] {
            let (status, reply) = call(&state, "POST", "/send", Some(KEY), body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(reply, json!({"error": "missing to/text"}));
        }
    }

    #[tokio::test]
    async fn send_without_session_is_unavailable() {
        let (state, _) = gateway(Some(KEY));
        let (status, reply) = call(
            &state,
            "POST",
            "/send",
            Some(KEY),
            r#"{"to":"1@s","text":"hi"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(reply, json!({"error": "not connected"}));
    }

    #[tokio::test]
    async fn send_through_active_session() {
        let (state, transport) = gateway(Some(KEY));
        state.controller.start().await.unwrap();
        let session = transport.latest().unwrap();
        session.emit(TransportEvent::Opened).await;
        let mut rx = state.controller.subscribe_state();
        rx.wait_for(|s| s.phase == SessionPhase::Active).await.unwrap();

        let body = r#"{"to":"1@s","text":"hi"}"#;
        let (status, reply) = call(&state, "POST", "/send", Some(KEY), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, json!({"ok": true, "delivery": "accepted"}));

        session.fail_sends(true);
        let (status, reply) = call(&state, "POST", "/send", Some(KEY), body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply, json!({"error": "send failed"}));
    }

    #[tokio::test]
    async fn reset_replies_then_requests_exit() {
        let (state, _) = gateway(Some(KEY));
        state.controller.start().await.unwrap();

        let (status, reply) = call(&state, "POST", "/reset", Some(KEY), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, json!({"ok": true}));
        assert_eq!(state.shutdown.reason(), Some(ShutdownReason::Reset));
    }
}
