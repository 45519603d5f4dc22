//! Configuration loading for the gateway.
//!
//! Files are discovered as `wagate.{toml,yaml,yml,json}`, `${VAR}` placeholders
//! are expanded before parsing, and every section falls back to defaults.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, data_dir, discover_and_load, find_or_default_config_path,
        load_config, set_config_dir, write_config,
    },
    schema::{
        AuthConfig, CredentialsConfig, GatewayConfig, HubConfig, ReconnectConfig, ServerConfig,
        TransportConfig,
    },
};
