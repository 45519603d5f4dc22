//! Scripted in-process transport for tests.
//!
//! Every `open` creates a [`MockSession`] whose events are pushed by the test
//! through [`MockSession::emit`]; sends are recorded instead of delivered.

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use {
    async_trait::async_trait,
    tokio::sync::{Notify, mpsc},
};

use crate::{
    AuthState, Transport, TransportConnection, TransportError, TransportEvent, TransportSession,
};

#[derive(Default)]
struct MockState {
    opened_with: Vec<Option<AuthState>>,
    sessions: Vec<Arc<MockSession>>,
    failing_opens: usize,
}

#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    opened: Notify,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `n` calls to `open` fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.lock().failing_opens = n;
    }

    /// Number of `open` calls so far, failed ones included.
    pub fn open_count(&self) -> usize {
        self.lock().opened_with.len()
    }

    /// Credentials passed to the `n`th `open` call (0-based).
    pub fn opened_with(&self, n: usize) -> Option<AuthState> {
        self.lock().opened_with.get(n).cloned().flatten()
    }

    pub fn session(&self, n: usize) -> Option<Arc<MockSession>> {
        self.lock().sessions.get(n).cloned()
    }

    pub fn latest(&self) -> Option<Arc<MockSession>> {
        self.lock().sessions.last().cloned()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Wait until `open` has been called at least `n` times.
    pub async fn wait_for_opens(&self, n: usize) {
        loop {
            let notified = self.opened.notified();
            if self.open_count() >= n {
                return;
            }
            notified.await;
        }
    }

    /// Wait until at least `n` sessions have been opened successfully.
    pub async fn wait_for_sessions(&self, n: usize) {
        loop {
            let notified = self.opened.notified();
            if self.session_count() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, auth: Option<AuthState>) -> Result<TransportConnection, TransportError> {
        let result = {
            let mut state = self.lock();
            state.opened_with.push(auth);
            if state.failing_opens > 0 {
                state.failing_opens -= 1;
                Err(TransportError::Rejected("scripted open failure".into()))
            } else {
                let (tx, rx) = mpsc::channel(64);
                let session = Arc::new(MockSession {
                    events: tx,
                    sent: Mutex::new(Vec::new()),
                    fail_sends: AtomicBool::new(false),
                    stall_sends: AtomicBool::new(false),
                    stalled: AtomicUsize::new(0),
                    closed: AtomicBool::new(false),
                });
                state.sessions.push(Arc::clone(&session));
                Ok(TransportConnection {
                    session,
                    events: rx,
                })
            }
        };
        self.opened.notify_waiters();
        result
    }
}

pub struct MockSession {
    events: mpsc::Sender<TransportEvent>,
    sent: Mutex<Vec<(String, String)>>,
    fail_sends: AtomicBool,
    stall_sends: AtomicBool,
    stalled: AtomicUsize,
    closed: AtomicBool,
}

impl MockSession {
    /// Push an event as if the transport produced it. Returns false once the
    /// consumer has dropped the stream.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent sends hang forever, like a transport that stopped
    /// draining its input.
    pub fn stall_sends(&self, stall: bool) {
        self.stall_sends.store(stall, Ordering::SeqCst);
    }

    /// Sends currently parked by [`MockSession::stall_sends`].
    pub fn stalled_sends(&self) -> usize {
        self.stalled.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn send_text(&self, to: &str, text: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("scripted send failure".into()));
        }
        if self.stall_sends.load(Ordering::SeqCst) {
            self.stalled.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((to.to_string(), text.to_string()));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
