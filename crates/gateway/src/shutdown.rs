//! Process-wide shutdown signal.
//!
//! The first reason to be triggered wins; later triggers are ignored so a
//! reset that races a Ctrl-C still exits the way the reset asked for.

use std::sync::Arc;

use {tokio::sync::watch, tracing::info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// An operator reset the session; credentials are already wiped.
    Reset,
    /// The gateway cannot continue, e.g. rotated credentials could not be saved.
    Fatal(String),
    /// Interrupted by a signal.
    Interrupted,
}

impl ShutdownReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Reset | Self::Interrupted => 0,
            Self::Fatal(_) => 1,
        }
    }
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reset => f.write_str("reset"),
            Self::Fatal(reason) => write!(f, "fatal: {reason}"),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Returns false when a reason was already recorded.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let mut pending = Some(reason);
        let accepted = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = pending.take();
            true
        });
        if accepted {
            info!(reason = %self.reason().map(|r| r.to_string()).unwrap_or_default(), "shutdown requested");
        }
        accepted
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.tx.borrow().clone()
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return ShutdownReason::Interrupted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_reason_wins() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };

        assert!(shutdown.trigger(ShutdownReason::Reset));
        assert!(!shutdown.trigger(ShutdownReason::Interrupted));

        assert_eq!(waiter.await.unwrap(), ShutdownReason::Reset);
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Reset));
    }

    #[tokio::test]
    async fn wait_after_trigger_returns_immediately() {
        let shutdown = Shutdown::new();
        shutdown.trigger(ShutdownReason::Fatal("disk full".into()));
        let reason = shutdown.wait().await;
        assert_eq!(reason.exit_code(), 1);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ShutdownReason::Reset.exit_code(), 0);
        assert_eq!(ShutdownReason::Interrupted.exit_code(), 0);
    }
}
