//! Sidecar transport: run the protocol engine as a child process and talk
//! newline-delimited JSON over its stdin/stdout.
//!
//! gateway → sidecar:
//! `{"op":"open","auth":…|null}`, `{"op":"send","id":1,"to":…,"text":…}`, `{"op":"close"}`
//!
//! sidecar → gateway:
//! `{"event":"qr","code":…}`, `{"event":"open"}`, `{"event":"close","reason":…}`,
//! `{"event":"message",…}`, `{"event":"creds","auth":…}`,
//! `{"event":"ack","id":1,"ok":true}`

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
        process::{Child, ChildStdin, Command},
        sync::{Mutex, mpsc, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, trace, warn},
};

use crate::{
    AuthState, InboundMessage, Transport, TransportConnection, TransportError, TransportEvent,
    TransportSession,
};

/// How long `close` waits to hand the sidecar its close op before killing it.
const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<(), String>>>>>;

/// How to launch the sidecar process.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub send_timeout: Duration,
    pub event_buffer: usize,
}

impl SidecarConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            send_timeout: Duration::from_secs(30),
            event_buffer: 256,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum SidecarOp<'a> {
    Open { auth: Option<&'a serde_json::Value> },
    Send { id: u64, to: &'a str, text: &'a str },
    Close,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum SidecarFrame {
    Qr {
        code: String,
    },
    Open,
    Close {
        #[serde(default)]
        reason: Option<String>,
    },
    Message(InboundMessage),
    Creds {
        auth: serde_json::Value,
    },
    Ack {
        id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Spawns one sidecar process per opened session.
pub struct SidecarTransport {
    config: SidecarConfig,
}

impl SidecarTransport {
    pub fn new(config: SidecarConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for SidecarTransport {
    async fn open(&self, auth: Option<AuthState>) -> Result<TransportConnection, TransportError> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: self.config.command.clone(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Protocol("sidecar stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Protocol("sidecar stdout not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        write_op(&mut stdin, &SidecarOp::Open {
            auth: auth.as_ref().map(AuthState::as_value),
        })
        .await?;
        debug!(
            command = %self.config.command,
            resumed = auth.is_some(),
            "sidecar session opened"
        );

        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_frames(stdout, events_tx, Arc::clone(&pending)));

        let session = Arc::new(SidecarSession {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            send_timeout: self.config.send_timeout,
            reader: Mutex::new(Some(reader)),
        });

        Ok(TransportConnection {
            session,
            events: events_rx,
        })
    }
}

/// A running sidecar process.
pub struct SidecarSession {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    send_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl TransportSession for SidecarSession {
    async fn send_text(&self, to: &str, text: &str) -> Result<(), TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        // Covers the write as well: a sidecar that stops reading stdin fills
        // the pipe and parks the writer while it holds the stdin lock.
        let exchange = async {
            {
                let mut stdin = self.stdin.lock().await;
                write_op(&mut stdin, &SidecarOp::Send { id, to, text }).await?;
            }
            match rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(TransportError::Rejected(reason)),
                Err(_) => Err(TransportError::Closed),
            }
        };

        let result = tokio::time::timeout(self.send_timeout, exchange)
            .await
            .unwrap_or(Err(TransportError::Timeout(self.send_timeout)));
        if result.is_err() {
            self.pending.lock().await.remove(&id);
        }
        result
    }

    async fn close(&self) {
        let goodbye = tokio::time::timeout(CLOSE_WRITE_TIMEOUT, async {
            let mut stdin = self.stdin.lock().await;
            write_op(&mut stdin, &SidecarOp::Close).await
        })
        .await;
        match goodbye {
            Ok(Ok(())) => {},
            Ok(Err(e)) => trace!(error = %e, "sidecar already gone on close"),
            Err(_) => debug!("sidecar not reading stdin, killing without close op"),
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        self.pending.lock().await.clear();
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            trace!(error = %e, "sidecar kill failed");
        }
    }
}

async fn write_op(stdin: &mut ChildStdin, op: &SidecarOp<'_>) -> Result<(), TransportError> {
    let mut line =
        serde_json::to_string(op).map_err(|e| TransportError::Protocol(e.to_string()))?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

async fn read_frames(
    stdout: impl AsyncRead + Unpin,
    events: mpsc::Sender<TransportEvent>,
    pending: Pending,
) {
    let mut lines = BufReader::new(stdout).lines();
    let reason = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break "sidecar exited".to_string(),
            Err(e) => break format!("sidecar read error: {e}"),
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        trace!(raw = %trimmed, "sidecar -> gateway");

        let frame: SidecarFrame = match serde_json::from_str(trimmed) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "ignoring malformed sidecar frame");
                continue;
            },
        };

        let event = match frame {
            SidecarFrame::Ack { id, ok, error } => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let result = if ok {
                        Ok(())
                    } else {
                        Err(error.unwrap_or_else(|| "send failed".into()))
                    };
                    let _ = tx.send(result);
                } else {
                    debug!(id, "ack for unknown send");
                }
                continue;
            },
            SidecarFrame::Qr { code } => TransportEvent::Qr(code),
            SidecarFrame::Open => TransportEvent::Opened,
            SidecarFrame::Close { reason } => TransportEvent::Closed { reason },
            SidecarFrame::Message(msg) => TransportEvent::Message(msg),
            SidecarFrame::Creds { auth } => TransportEvent::CredentialsUpdated(AuthState::new(auth)),
        };

        let closed = matches!(event, TransportEvent::Closed { .. });
        if events.send(event).await.is_err() {
            debug!("event receiver dropped, stopping sidecar reader");
            return;
        }
        if closed {
            pending.lock().await.clear();
            return;
        }
    };

    // Fail in-flight sends; their receivers observe a dropped sender.
    pending.lock().await.clear();
    let _ = events
        .send(TransportEvent::Closed {
            reason: Some(reason),
        })
        .await;
}

async fn forward_stderr(stderr: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "wagate::sidecar", "{line}");
    }
}
