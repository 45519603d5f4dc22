use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result},
    clap::Args,
    secrecy::Secret,
    tracing::{error, info},
};

use {
    wagate_config::{GatewayConfig, TransportConfig, discover_and_load, load_config},
    wagate_credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore},
    wagate_gateway::{ShutdownReason, start_gateway},
    wagate_transport::{SidecarConfig, SidecarTransport, Transport},
};

/// Options of `wagate gateway`. Flags win over environment variables, which
/// win over the config file.
#[derive(Args, Debug, Default)]
pub struct GatewayArgs {
    /// Config file to load instead of the discovered one.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long, env = "WAGATE_BIND")]
    pub bind: Option<String>,

    /// Port to listen on.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Command that runs the protocol sidecar.
    #[arg(long, env = "WAGATE_TRANSPORT_CMD")]
    pub transport_cmd: Option<String>,

    /// Directory holding the session credentials.
    #[arg(long)]
    pub credentials_dir: Option<PathBuf>,

    /// Keep credentials in memory only; every restart pairs again.
    #[arg(long)]
    pub ephemeral_credentials: bool,

    /// Do not render pairing codes on stderr.
    #[arg(long)]
    pub no_qr: bool,
}

pub fn resolve_config(args: &GatewayArgs, api_key: Option<&str>) -> Result<GatewayConfig> {
    let mut config = match &args.config {
        Some(path) => {
            load_config(path).with_context(|| format!("loading {}", path.display()))?
        },
        None => discover_and_load(),
    };
    apply_overrides(&mut config, args, api_key);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut GatewayConfig, args: &GatewayArgs, api_key: Option<&str>) {
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        config.auth.api_key = Some(Secret::new(key.to_string()));
    }
    if let Some(cmd) = &args.transport_cmd {
        config.transport.command = Some(cmd.clone());
    }
    if let Some(dir) = &args.credentials_dir {
        config.credentials.dir = Some(dir.clone());
    }
    if args.no_qr {
        config.print_qr = false;
    }
}

fn sidecar_config(transport: &TransportConfig) -> Result<SidecarConfig> {
    let command = transport
        .command
        .clone()
        .filter(|c| !c.trim().is_empty())
        .context("no transport command configured; set transport.command or WAGATE_TRANSPORT_CMD")?;
    Ok(SidecarConfig {
        command,
        args: transport.args.clone(),
        env: transport.env.clone(),
        send_timeout: transport.send_timeout(),
        event_buffer: transport.event_buffer,
    })
}

fn credential_store(config: &GatewayConfig, ephemeral: bool) -> Arc<dyn CredentialStore> {
    if ephemeral {
        info!("credentials are kept in memory only");
        return Arc::new(MemoryCredentialStore::new());
    }
    let dir = config.credentials.resolved_dir();
    info!(dir = %dir.display(), "using credential directory");
    Arc::new(FileCredentialStore::new(dir))
}

/// Run the gateway and return the process exit code.
pub async fn run(args: &GatewayArgs, api_key: Option<&str>) -> Result<i32> {
    let config = resolve_config(args, api_key)?;
    let transport: Arc<dyn Transport> =
        Arc::new(SidecarTransport::new(sidecar_config(&config.transport)?));
    let credentials = credential_store(&config, args.ephemeral_credentials);

    let reason = start_gateway(&config, transport, credentials).await?;
    if let ShutdownReason::Fatal(detail) = &reason {
        error!(detail = %detail, "gateway stopped on a fatal error");
    }
    Ok(reason.exit_code())
}
