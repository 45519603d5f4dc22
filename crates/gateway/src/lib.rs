//! Gateway between a single messaging transport session and local clients.
//!
//! Lifecycle:
//! 1. Load credentials and open the transport session
//! 2. Serve the Control API (status, pairing code, send, reset)
//! 3. Fan session events out to push-channel subscribers
//! 4. Reconnect on close with backoff; exit on reset or fatal errors
//!
//! The transport itself is a black box behind `wagate_transport::Transport`.

pub mod auth;
pub mod commands;
pub mod error;
pub mod hub;
pub mod qr;
pub mod reconnect;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod ws;

pub use {
    error::GatewayError,
    server::{build_gateway_app, serve, start_gateway},
    shutdown::{Shutdown, ShutdownReason},
};
