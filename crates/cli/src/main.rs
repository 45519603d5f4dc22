mod client_commands;
mod gateway_command;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "wagate", about = "wagate: single-session messaging gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Gateway base URL used by the client commands.
    #[arg(long, global = true, env = "WAGATE_URL", default_value = "http://127.0.0.1:3001")]
    url: String,

    /// Shared API key. The gateway requires it, the client commands send it.
    #[arg(long, global = true, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway.
    Gateway(gateway_command::GatewayArgs),
    /// Show the session status of a running gateway.
    Status,
    /// Show the pending pairing code, rendered as a QR block.
    Qr,
    /// Send a text message through a running gateway.
    Send {
        #[arg(long)]
        to: String,
        #[arg(short = 'm', long)]
        text: String,
    },
    /// Wipe the gateway's credentials; the gateway exits afterwards.
    Reset,
    /// Print push channel events as they arrive.
    Watch,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "wagate starting");

    let api_key = cli.api_key.clone();
    let client = || wagate_client::GatewayClient::new(&cli.url, api_key.clone());

    match cli.command {
        Commands::Gateway(ref args) => {
            let code = gateway_command::run(args, cli.api_key.as_deref()).await?;
            std::process::exit(code);
        },
        Commands::Status => client_commands::status(&client()?).await,
        Commands::Qr => client_commands::qr(&client()?).await,
        Commands::Send { ref to, ref text } => client_commands::send(&client()?, to, text).await,
        Commands::Reset => client_commands::reset(&client()?).await,
        Commands::Watch => client_commands::watch(&client()?).await,
    }
}
