//! Fan-out of gateway events to push-channel subscribers.
//!
//! Delivery is best-effort: each subscriber owns a bounded outbox drained by
//! its own write loop, and a subscriber whose outbox is full or closed simply
//! misses the frame. Publishing never waits on a subscriber.

use std::{collections::HashMap, sync::Arc, time::Instant};

use {
    tokio::sync::{RwLock, mpsc},
    tracing::{debug, warn},
};

use wagate_protocol::GatewayEvent;

/// Why a frame could not be handed to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The subscriber is not keeping up.
    Full,
    /// The subscriber's connection is gone.
    Closed,
}

/// Where a subscriber's frames go. Must not block.
pub trait EventSink: Send + Sync {
    fn try_deliver(&self, frame: &Arc<str>) -> Result<(), DeliveryError>;
}

impl EventSink for mpsc::Sender<Arc<str>> {
    fn try_deliver(&self, frame: &Arc<str>) -> Result<(), DeliveryError> {
        self.try_send(Arc::clone(frame)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

struct Subscriber {
    sink: Box<dyn EventSink>,
    connected_at: Instant,
}

/// Outcome of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub skipped: usize,
}

pub struct BroadcastHub {
    subscribers: RwLock<HashMap<String, Subscriber>>,
    buffer: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastHub {
    /// `buffer` is the outbox size handed to subscribers created through
    /// [`BroadcastHub::open_subscription`].
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register a sink under `conn_id`. Only events published afterwards
    /// reach it. Re-subscribing an id replaces its sink.
    pub async fn subscribe(&self, conn_id: impl Into<String>, sink: impl EventSink + 'static) {
        let conn_id = conn_id.into();
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(conn_id.clone(), Subscriber {
            sink: Box::new(sink),
            connected_at: Instant::now(),
        });
        debug!(conn_id = %conn_id, subscribers = subscribers.len(), "subscriber added");
    }

    /// Create a bounded outbox, subscribe it under a fresh id and hand back
    /// the receiving half.
    pub async fn open_subscription(&self) -> (String, mpsc::Receiver<Arc<str>>) {
        let conn_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribe(conn_id.clone(), tx).await;
        (conn_id, rx)
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub async fn unsubscribe(&self, conn_id: &str) -> bool {
        let removed = self.subscribers.write().await.remove(conn_id);
        if let Some(sub) = &removed {
            debug!(
                conn_id,
                duration_secs = sub.connected_at.elapsed().as_secs(),
                "subscriber removed"
            );
        }
        removed.is_some()
    }

    /// Serialize `event` once and offer it to every current subscriber.
    ///
    /// Subscribers that fail delivery are skipped but stay registered; they
    /// leave when their connection handler unsubscribes them.
    pub async fn publish(&self, event: &GatewayEvent) -> PublishReport {
        let frame: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(error = %e, kind = event.kind(), "failed to serialize event");
                return PublishReport::default();
            },
        };

        let subscribers = self.subscribers.read().await;
        let mut report = PublishReport::default();
        for (conn_id, sub) in subscribers.iter() {
            match sub.sink.try_deliver(&frame) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Full) => {
                    warn!(conn_id = %conn_id, kind = event.kind(), "subscriber outbox full, skipping");
                    report.skipped += 1;
                },
                Err(DeliveryError::Closed) => {
                    debug!(conn_id = %conn_id, kind = event.kind(), "subscriber gone, skipping");
                    report.skipped += 1;
                },
            }
        }
        debug!(
            kind = event.kind(),
            delivered = report.delivered,
            skipped = report.skipped,
            "published event"
        );
        report
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}
