use std::sync::Arc;

use crate::{
    auth::ApiKeyAuth, commands::CommandBridge, hub::BroadcastHub, session::SessionController,
    shutdown::Shutdown,
};

/// Everything the HTTP handlers need, shared behind an `Arc`.
pub struct GatewayState {
    pub controller: Arc<SessionController>,
    pub hub: Arc<BroadcastHub>,
    pub commands: CommandBridge,
    pub auth: ApiKeyAuth,
    pub shutdown: Shutdown,
    pub version: String,
}

impl GatewayState {
    pub fn new(
        controller: Arc<SessionController>,
        hub: Arc<BroadcastHub>,
        auth: ApiKeyAuth,
        shutdown: Shutdown,
    ) -> Arc<Self> {
        Arc::new(Self {
            commands: CommandBridge::new(Arc::clone(&controller), shutdown.clone()),
            controller,
            hub,
            auth,
            shutdown,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}
