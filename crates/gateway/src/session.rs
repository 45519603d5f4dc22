//! Ownership of the single transport session.
//!
//! The controller is the only component that touches the transport. It keeps
//! at most one live session, tags every session with a generation number and
//! ignores anything reported under a generation that is no longer current.
//! Status readers get a snapshot through a watch channel and never wait on
//! lifecycle work.

use std::{sync::Arc, time::Duration};

use {
    futures::future::BoxFuture,
    tokio::{
        sync::{Mutex, mpsc, watch},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

use {
    wagate_credentials::{AuthState, CredentialError, CredentialStore},
    wagate_protocol::{ConnectionStatus, GatewayEvent, SessionPhase, StatusReply},
    wagate_transport::{InboundMessage, Transport, TransportEvent, TransportSession},
};

use crate::{
    error::GatewayError,
    hub::BroadcastHub,
    qr,
    reconnect::ReconnectPolicy,
    shutdown::{Shutdown, ShutdownReason},
};

pub const RECONNECT_EXHAUSTED: &str = "reconnect attempts exhausted";

/// What status readers see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// Present only while awaiting pairing.
    pub pairing_code: Option<String>,
    pub last_error: Option<String>,
}

impl SessionState {
    fn connecting(last_error: Option<String>) -> Self {
        Self {
            phase: SessionPhase::Connecting,
            pairing_code: None,
            last_error,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.phase.status()
    }

    pub fn to_reply(&self) -> StatusReply {
        StatusReply {
            status: self.status(),
            phase: self.phase,
            last_error: self.last_error.clone(),
        }
    }
}

struct LiveSession {
    generation: u64,
    session: Arc<dyn TransportSession>,
    pump: JoinHandle<()>,
}

impl LiveSession {
    async fn discard(self) {
        self.pump.abort();
        self.session.close().await;
    }
}

#[derive(Default)]
struct Lifecycle {
    generation: u64,
    live: Option<LiveSession>,
    attempts: u32,
}

pub struct SessionController {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    hub: Arc<BroadcastHub>,
    shutdown: Shutdown,
    policy: ReconnectPolicy,
    print_qr: bool,
    lifecycle: Mutex<Lifecycle>,
    state: watch::Sender<SessionState>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        hub: Arc<BroadcastHub>,
        shutdown: Shutdown,
    ) -> Self {
        let (state, _rx) = watch::channel(SessionState::default());
        Self {
            transport,
            credentials,
            hub,
            shutdown,
            policy: ReconnectPolicy::default(),
            print_qr: false,
            lifecycle: Mutex::new(Lifecycle::default()),
            state,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_print_qr(mut self, print_qr: bool) -> Self {
        self.print_qr = print_qr;
        self
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn pairing_code(&self) -> Option<String> {
        self.state.borrow().pairing_code.clone()
    }

    /// Watch state transitions as they happen.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Generation of the most recent session attempt.
    pub async fn generation(&self) -> u64 {
        self.lifecycle.lock().await.generation
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Load stored credentials and open a fresh transport session, discarding
    /// any existing one first.
    ///
    /// Fails only when the credential store cannot be read. A transport that
    /// refuses to open is retried according to the reconnect policy.
    pub async fn start(self: &Arc<Self>) -> Result<(), GatewayError> {
        self.connect(None).await
    }

    /// `expected` is the generation a scheduled reconnect was issued under;
    /// the attempt is dropped if the lifecycle has moved on since.
    async fn connect(self: &Arc<Self>, expected: Option<u64>) -> Result<(), GatewayError> {
        if let Some(expected) = expected {
            let current = self.lifecycle.lock().await.generation;
            if current != expected {
                debug!(expected, current, "reconnect superseded, skipping");
                return Ok(());
            }
        }

        let auth = match self.with_store(|store| store.load()).await {
            Ok(auth) => auth,
            Err(e) => {
                error!(error = %e, "failed to load credentials");
                self.state.send_modify(|s| s.last_error = Some(e.to_string()));
                return Err(e);
            },
        };

        let generation = {
            let mut lc = self.lifecycle.lock().await;
            if let Some(expected) = expected
                && lc.generation != expected
            {
                debug!(
                    expected,
                    current = lc.generation,
                    "reconnect superseded, skipping"
                );
                return Ok(());
            }
            lc.generation += 1;
            if let Some(old) = lc.live.take() {
                debug!(generation = old.generation, "discarding previous session");
                old.discard().await;
            }
            let last_error = self.state.borrow().last_error.clone();
            self.state.send_replace(SessionState::connecting(last_error));
            lc.generation
        };

        info!(
            generation,
            has_credentials = auth.is_some(),
            "opening transport session"
        );
        let opened = self.transport.open(auth).await;

        let mut lc = self.lifecycle.lock().await;
        let superseded = lc.generation != generation;
        match opened {
            Ok(conn) if superseded => {
                debug!(generation, "session opened after being superseded, closing it");
                conn.session.close().await;
            },
            Ok(conn) => {
                let pump = tokio::spawn(Arc::clone(self).pump(generation, conn.events));
                lc.live = Some(LiveSession {
                    generation,
                    session: conn.session,
                    pump,
                });
            },
            Err(e) if superseded => {
                debug!(generation, error = %e, "superseded open failed");
            },
            Err(e) => {
                warn!(generation, error = %e, "failed to open transport session");
                self.state.send_modify(|s| s.last_error = Some(e.to_string()));
                self.schedule_reconnect(&mut lc);
            },
        }
        Ok(())
    }

    async fn pump(self: Arc<Self>, generation: u64, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            let closed = matches!(event, TransportEvent::Closed { .. });
            self.on_transport_event(generation, event).await;
            if closed {
                return;
            }
        }
        self.on_transport_event(generation, TransportEvent::Closed {
            reason: Some("transport event stream ended".into()),
        })
        .await;
    }

    /// Apply an event reported by the session of `generation`.
    ///
    /// Events from any generation other than the live one are dropped.
    pub async fn on_transport_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        let mut lc = self.lifecycle.lock().await;
        if !lc.live.as_ref().is_some_and(|l| l.generation == generation) {
            debug!(generation, current = lc.generation, "dropping event from superseded session");
            return;
        }

        match event {
            TransportEvent::Qr(code) => {
                info!(generation, "pairing code received");
                self.state.send_modify(|s| {
                    s.phase = SessionPhase::AwaitingPairing;
                    s.pairing_code = Some(code.clone());
                });
                if self.print_qr {
                    print_pairing_code(&code);
                }
                self.hub.publish(&GatewayEvent::qr(code)).await;
            },
            TransportEvent::Opened => {
                info!(generation, "transport session active");
                lc.attempts = 0;
                self.state.send_modify(|s| {
                    s.phase = SessionPhase::Active;
                    s.pairing_code = None;
                    s.last_error = None;
                });
                self.hub
                    .publish(&GatewayEvent::status(ConnectionStatus::Connected))
                    .await;
            },
            TransportEvent::Closed { reason } => {
                warn!(
                    generation,
                    reason = reason.as_deref().unwrap_or("unspecified"),
                    "transport session closed"
                );
                // Called from the session's own pump, which ends after this
                // event, so the pump is left to finish rather than aborted.
                if let Some(live) = lc.live.take() {
                    live.session.close().await;
                }
                self.state.send_modify(|s| {
                    s.phase = SessionPhase::Connecting;
                    s.pairing_code = None;
                    if reason.is_some() {
                        s.last_error = reason;
                    }
                });
                self.hub
                    .publish(&GatewayEvent::status(ConnectionStatus::Disconnected))
                    .await;
                self.schedule_reconnect(&mut lc);
            },
            TransportEvent::Message(msg) => self.forward_message(msg).await,
            TransportEvent::CredentialsUpdated(auth) => self.on_credentials_rotated(auth).await,
        }
    }

    async fn forward_message(&self, msg: InboundMessage) {
        if msg.from_me {
            debug!("ignoring message sent by this session");
            return;
        }
        let Some(text) = msg.body_text() else {
            debug!(from = %msg.from, "ignoring message without text");
            return;
        };
        self.hub
            .publish(&GatewayEvent::message(&msg.from, text))
            .await;
    }

    /// Persist rotated key material. A failed save leaves the stored
    /// credentials stale, which the gateway cannot recover from.
    pub async fn on_credentials_rotated(&self, auth: AuthState) {
        match self.with_store(move |store| store.save(&auth)).await {
            Ok(()) => debug!("persisted rotated credentials"),
            Err(e) => {
                error!(error = %e, "failed to persist rotated credentials");
                self.state.send_modify(|s| s.last_error = Some(e.to_string()));
                self.shutdown.trigger(ShutdownReason::Fatal(format!(
                    "credential save failed: {e}"
                )));
            },
        }
    }

    /// Run a credential store call on the blocking pool.
    async fn with_store<T, F>(&self, op: F) -> Result<T, GatewayError>
    where
        F: FnOnce(&dyn CredentialStore) -> Result<T, CredentialError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.credentials);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| GatewayError::Internal(format!("credential task failed: {e}")))?
            .map_err(GatewayError::from)
    }

    fn schedule_reconnect(self: &Arc<Self>, lc: &mut Lifecycle) {
        lc.attempts = lc.attempts.saturating_add(1);
        let attempt = lc.attempts;
        let Some(delay) = self.policy.delay_for(attempt) else {
            error!(attempts = attempt - 1, "{RECONNECT_EXHAUSTED}, giving up");
            self.state.send_modify(|s| {
                s.phase = SessionPhase::Disconnected;
                s.pairing_code = None;
                s.last_error = Some(RECONNECT_EXHAUSTED.into());
            });
            return;
        };
        info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        tokio::spawn(Arc::clone(self).reconnect_after(delay, lc.generation));
    }

    // Boxed so the reconnect -> pump -> reconnect cycle has a nameable type.
    fn reconnect_after(self: Arc<Self>, delay: Duration, generation: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = self.connect(Some(generation)).await {
                self.shutdown
                    .trigger(ShutdownReason::Fatal(format!("reconnect failed: {e}")));
            }
        })
    }

    /// Tear the session down, wipe stored credentials and return to
    /// Disconnected. Pending reconnects are cancelled; nothing reconnects
    /// until [`SessionController::start`] is called again.
    pub async fn reset(&self) -> Result<(), GatewayError> {
        let mut lc = self.lifecycle.lock().await;
        self.teardown(&mut lc).await;
        self.with_store(|store| store.clear()).await?;
        info!("session reset, credentials cleared");
        Ok(())
    }

    /// Close the live session without touching stored credentials.
    pub async fn stop(&self) {
        let mut lc = self.lifecycle.lock().await;
        self.teardown(&mut lc).await;
    }

    async fn teardown(&self, lc: &mut Lifecycle) {
        lc.generation += 1;
        lc.attempts = 0;
        if let Some(live) = lc.live.take() {
            info!(generation = live.generation, "closing transport session");
            live.discard().await;
        }
        let previous = self.state.send_replace(SessionState::default());
        if previous.phase == SessionPhase::Active {
            self.hub
                .publish(&GatewayEvent::status(ConnectionStatus::Disconnected))
                .await;
        }
    }

    /// Hand a text message to the live session.
    ///
    /// Success means the transport accepted the message; nothing is known
    /// about delivery to the recipient.
    pub async fn send(&self, to: &str, text: &str) -> Result<(), GatewayError> {
        if self.state.borrow().phase != SessionPhase::Active {
            return Err(GatewayError::NotConnected);
        }
        let session = {
            let lc = self.lifecycle.lock().await;
            lc.live.as_ref().map(|l| Arc::clone(&l.session))
        }
        .ok_or(GatewayError::NotConnected)?;

        session.send_text(to, text).await?;
        debug!(to, "message accepted by transport");
        Ok(())
    }
}

fn print_pairing_code(code: &str) {
    match qr::render_terminal(code) {
        Ok(block) => eprintln!("\nScan to pair:\n{block}"),
        Err(e) => warn!(error = %e, "failed to render pairing code"),
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        serde_json::json,
        wagate_credentials::MemoryCredentialStore,
        wagate_transport::mock::{MockSession, MockTransport},
    };

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        controller: Arc<SessionController>,
        transport: Arc<MockTransport>,
        store: Arc<MemoryCredentialStore>,
        hub: Arc<BroadcastHub>,
        shutdown: Shutdown,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(MemoryCredentialStore::new(), ReconnectPolicy::immediate())
        }

        fn with(store: MemoryCredentialStore, policy: ReconnectPolicy) -> Self {
            let transport = MockTransport::new();
            let store = Arc::new(store);
            let hub = Arc::new(BroadcastHub::new(16));
            let shutdown = Shutdown::new();
            let controller = Arc::new(
                SessionController::new(
                    Arc::clone(&transport) as Arc<dyn Transport>,
                    Arc::clone(&store) as Arc<dyn CredentialStore>,
                    Arc::clone(&hub),
                    shutdown.clone(),
                )
                .with_policy(policy),
            );
            Self {
                controller,
                transport,
                store,
                hub,
                shutdown,
            }
        }

        async fn wait_phase(&self, phase: SessionPhase) {
            let mut rx = self.controller.subscribe_state();
            tokio::time::timeout(WAIT, rx.wait_for(|s| s.phase == phase))
                .await
                .expect("phase change timed out")
                .unwrap();
        }

        async fn session(&self, n: usize) -> Arc<MockSession> {
            tokio::time::timeout(WAIT, self.transport.wait_for_sessions(n + 1))
                .await
                .expect("open timed out");
            self.transport.session(n).unwrap()
        }

        /// Start and drive the first session to Active.
        async fn active(&self) -> Arc<MockSession> {
            self.controller.start().await.unwrap();
            let session = self.session(0).await;
            assert!(session.emit(TransportEvent::Opened).await);
            self.wait_phase(SessionPhase::Active).await;
            session
        }
    }

    async fn next_frame(rx: &mut mpsc::Receiver<Arc<str>>) -> serde_json::Value {
        let frame = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("no frame")
            .unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn starts_disconnected_then_connecting() {
        let h = Harness::new();
        assert_eq!(h.controller.state(), SessionState::default());

        h.controller.start().await.unwrap();
        assert_eq!(h.controller.state().phase, SessionPhase::Connecting);
        assert_eq!(h.transport.open_count(), 1);
        assert!(h.transport.opened_with(0).is_none());
    }

    #[tokio::test]
    async fn start_uses_stored_credentials() {
        let creds = AuthState::new(json!({"me": "1@s"}));
        let h = Harness::with(
            MemoryCredentialStore::with_state(creds.clone()),
            ReconnectPolicy::immediate(),
        );
        h.controller.start().await.unwrap();
        assert_eq!(h.transport.opened_with(0), Some(creds));
    }

    #[tokio::test]
    async fn qr_moves_to_awaiting_pairing_and_is_broadcast() {
        let h = Harness::new();
        let (_id, mut rx) = h.hub.open_subscription().await;
        h.controller.start().await.unwrap();

        let session = h.session(0).await;
        session.emit(TransportEvent::Qr("ABC123".into())).await;

        assert_eq!(next_frame(&mut rx).await, json!({"type": "qr", "data": "ABC123"}));
        let state = h.controller.state();
        assert_eq!(state.phase, SessionPhase::AwaitingPairing);
        assert_eq!(h.controller.pairing_code().as_deref(), Some("ABC123"));
    }

    #[tokio::test]
    async fn newer_qr_replaces_pairing_code() {
        let h = Harness::new();
        let (_id, mut rx) = h.hub.open_subscription().await;
        h.controller.start().await.unwrap();
        let session = h.session(0).await;

        session.emit(TransportEvent::Qr("first".into())).await;
        session.emit(TransportEvent::Qr("second".into())).await;
        next_frame(&mut rx).await;
        next_frame(&mut rx).await;

        assert_eq!(h.controller.pairing_code().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn opened_clears_pairing_code_and_reports_connected() {
        let h = Harness::new();
        let (_id, mut rx) = h.hub.open_subscription().await;
        h.controller.start().await.unwrap();
        let session = h.session(0).await;

        session.emit(TransportEvent::Qr("ABC".into())).await;
        session.emit(TransportEvent::Opened).await;
        next_frame(&mut rx).await;

        assert_eq!(
            next_frame(&mut rx).await,
            json!({"type": "status", "data": "connected"})
        );
        let state = h.controller.state();
        assert_eq!(state.phase, SessionPhase::Active);
        assert_eq!(state.pairing_code, None);
        assert_eq!(state.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn close_reports_disconnected_and_reconnects_once() {
        let h = Harness::new();
        let first = h.active().await;
        let (_id, mut rx) = h.hub.open_subscription().await;

        first
            .emit(TransportEvent::Closed {
                reason: Some("stream errored".into()),
            })
            .await;

        assert_eq!(
            next_frame(&mut rx).await,
            json!({"type": "status", "data": "disconnected"})
        );
        let second = h.session(1).await;
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(h.controller.state().phase, SessionPhase::Connecting);
        assert_eq!(
            h.controller.state().last_error.as_deref(),
            Some("stream errored")
        );
    }

    #[tokio::test]
    async fn one_reconnect_per_close() {
        let h = Harness::new();
        h.controller.start().await.unwrap();

        for n in 0..3 {
            let session = h.session(n).await;
            session.emit(TransportEvent::Opened).await;
            h.wait_phase(SessionPhase::Active).await;
            session.emit(TransportEvent::Closed { reason: None }).await;
            h.session(n + 1).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.transport.open_count(), 4);
    }

    #[tokio::test]
    async fn superseded_generation_events_are_dropped() {
        let h = Harness::new();
        let first = h.active().await;
        let stale = h.controller.generation().await;

        first.emit(TransportEvent::Closed { reason: None }).await;
        let second = h.session(1).await;
        tokio::time::timeout(WAIT, async {
            while h.controller.generation().await == stale {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // The old session's stream is gone.
        assert!(!first.emit(TransportEvent::Qr("late".into())).await);

        let (_id, mut rx) = h.hub.open_subscription().await;
        h.controller
            .on_transport_event(stale, TransportEvent::Qr("STALE".into()))
            .await;
        h.controller
            .on_transport_event(stale, TransportEvent::Opened)
            .await;
        assert!(rx.try_recv().is_err());
        assert_eq!(h.controller.pairing_code(), None);
        assert_ne!(h.controller.state().phase, SessionPhase::Active);

        second.emit(TransportEvent::Qr("fresh".into())).await;
        assert_eq!(next_frame(&mut rx).await["data"], "fresh");
    }

    #[tokio::test]
    async fn inbound_messages_filtered_and_forwarded() {
        let h = Harness::new();
        let session = h.active().await;
        let (_id, mut rx) = h.hub.open_subscription().await;

        let mut own = InboundMessage::text("1@s", "echo");
        own.from_me = true;
        session.emit(TransportEvent::Message(own)).await;
        session
            .emit(TransportEvent::Message(InboundMessage::text("2@s", "")))
            .await;
        session
            .emit(TransportEvent::Message(InboundMessage::text("3@s", "hello")))
            .await;

        assert_eq!(
            next_frame(&mut rx).await,
            json!({"type": "message", "from": "3@s", "text": "hello"})
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(h.controller.state().phase, SessionPhase::Active);
    }

    #[tokio::test]
    async fn send_requires_active_session() {
        let h = Harness::new();
        h.controller.start().await.unwrap();
        let session = h.session(0).await;

        let err = h.controller.send("1@s", "hi").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected));
        assert!(session.sent().is_empty());
    }

    #[tokio::test]
    async fn send_goes_to_live_session() {
        let h = Harness::new();
        let session = h.active().await;

        h.controller.send("1@s", "hi").await.unwrap();
        assert_eq!(session.sent(), vec![("1@s".to_string(), "hi".to_string())]);

        session.fail_sends(true);
        let err = h.controller.send("1@s", "again").await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[tokio::test]
    async fn rotated_credentials_are_persisted() {
        let h = Harness::new();
        h.controller.start().await.unwrap();
        let session = h.session(0).await;

        let creds = AuthState::new(json!({"noiseKey": "abc"}));
        session
            .emit(TransportEvent::CredentialsUpdated(creds.clone()))
            .await;
        session.emit(TransportEvent::Opened).await;
        h.wait_phase(SessionPhase::Active).await;

        assert_eq!(h.store.current(), Some(creds));
        assert_eq!(h.store.save_count(), 1);
        assert_eq!(h.shutdown.reason(), None);
    }

    #[tokio::test]
    async fn failed_credential_save_is_fatal() {
        let h = Harness::new();
        h.store.fail_saves(true);
        h.controller
            .on_credentials_rotated(AuthState::new(json!({})))
            .await;

        assert!(matches!(h.shutdown.reason(), Some(ShutdownReason::Fatal(_))));
        assert!(h.controller.state().last_error.is_some());
    }

    #[tokio::test]
    async fn reset_wipes_credentials_and_stays_down() {
        let h = Harness::with(
            MemoryCredentialStore::with_state(AuthState::new(json!({"k": 1}))),
            ReconnectPolicy::immediate(),
        );
        let session = h.active().await;
        let (_id, mut rx) = h.hub.open_subscription().await;

        h.controller.reset().await.unwrap();

        assert!(session.is_closed());
        assert_eq!(h.store.current(), None);
        assert_eq!(h.controller.state(), SessionState::default());
        assert_eq!(
            next_frame(&mut rx).await,
            json!({"type": "status", "data": "disconnected"})
        );

        // A close arriving late from the old session changes nothing.
        session.emit(TransportEvent::Closed { reason: None }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.controller.state().phase, SessionPhase::Disconnected);
    }

    #[tokio::test]
    async fn restart_discards_existing_session() {
        let h = Harness::new();
        let first = h.active().await;

        h.controller.start().await.unwrap();
        let second = h.session(1).await;

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(h.controller.state().phase, SessionPhase::Connecting);
    }

    #[tokio::test]
    async fn failed_opens_are_retried() {
        let h = Harness::new();
        h.transport.fail_next_opens(2);
        h.controller.start().await.unwrap();

        let session = h.session(0).await;
        assert_eq!(h.transport.open_count(), 3);
        session.emit(TransportEvent::Opened).await;
        h.wait_phase(SessionPhase::Active).await;
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let h = Harness::with(
            MemoryCredentialStore::new(),
            ReconnectPolicy::immediate().with_max_attempts(2),
        );
        h.transport.fail_next_opens(10);
        h.controller.start().await.unwrap();

        h.wait_phase(SessionPhase::Disconnected).await;
        assert_eq!(h.transport.open_count(), 3);
        assert_eq!(
            h.controller.state().last_error.as_deref(),
            Some(RECONNECT_EXHAUSTED)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_waits_for_backoff() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
        };
        let h = Harness::with(MemoryCredentialStore::new(), policy);
        h.transport.fail_next_opens(1);
        h.controller.start().await.unwrap();
        assert_eq!(h.transport.open_count(), 1);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(h.transport.open_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::time::timeout(WAIT, h.transport.wait_for_opens(2))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_pending_reconnect() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            multiplier: 1.0,
            max_attempts: None,
        };
        let h = Harness::with(MemoryCredentialStore::new(), policy);
        h.transport.fail_next_opens(1);
        h.controller.start().await.unwrap();

        h.controller.reset().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.controller.state().phase, SessionPhase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_reconnect_skips_credential_load() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            multiplier: 1.0,
            max_attempts: None,
        };
        let h = Harness::with(MemoryCredentialStore::new(), policy);
        h.transport.fail_next_opens(1);
        h.controller.start().await.unwrap();

        h.controller.stop().await;
        h.store.fail_loads(true);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.shutdown.reason(), None);
        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.controller.state().last_error, None);
    }

    #[tokio::test]
    async fn lifecycle_proceeds_while_a_send_is_stuck() {
        let h = Harness::with(
            MemoryCredentialStore::with_state(AuthState::new(json!({"k": 1}))),
            ReconnectPolicy::immediate(),
        );
        let first = h.active().await;
        first.stall_sends(true);

        let controller = Arc::clone(&h.controller);
        let send = tokio::spawn(async move { controller.send("1@s", "hi").await });
        tokio::time::timeout(WAIT, async {
            while first.stalled_sends() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("send never reached the transport");

        first.emit(TransportEvent::Closed { reason: None }).await;
        h.session(1).await;
        assert!(first.is_closed());

        tokio::time::timeout(WAIT, h.controller.reset())
            .await
            .expect("reset waited on the stuck send")
            .unwrap();
        assert_eq!(h.store.current(), None);
        assert_eq!(h.controller.state().phase, SessionPhase::Disconnected);

        assert!(!send.is_finished());
        send.abort();
    }
}
