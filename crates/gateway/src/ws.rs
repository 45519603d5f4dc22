use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        body::Bytes,
        extract::ws::{Message, WebSocket},
    },
    futures::{SinkExt, StreamExt},
    tracing::{debug, info, trace},
};

use crate::{hub::BroadcastHub, shutdown::Shutdown};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Serve one push-channel subscriber until it disconnects or the gateway
/// shuts down.
///
/// The channel is one-way: frames flow out, and anything the client sends is
/// ignored apart from close frames.
pub async fn handle_subscriber(
    socket: WebSocket,
    hub: Arc<BroadcastHub>,
    shutdown: Shutdown,
    remote_addr: SocketAddr,
) {
    let (conn_id, mut outbox) = hub.open_subscription().await;
    info!(conn_id = %conn_id, remote_ip = %remote_addr.ip(), "push subscriber connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let write_loop = async {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        loop {
            tokio::select! {
                frame = outbox.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                    trace!(conn_id = %conn_id, "sent ping");
                }
            }
        }
    };

    let read_loop = async {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {},
            }
        }
    };

    tokio::select! {
        () = write_loop => debug!(conn_id = %conn_id, "write loop ended"),
        () = read_loop => debug!(conn_id = %conn_id, "client closed"),
        _ = shutdown.wait() => debug!(conn_id = %conn_id, "closing for shutdown"),
    }

    hub.unsubscribe(&conn_id).await;
    info!(conn_id = %conn_id, "push subscriber disconnected");
}
