mod carbons_commands;
mod config;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "tandem", about = "Tandem: XMPP message carbons toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides ./tandem.toml and ~/.config/tandem/tandem.toml).
    #[arg(long, global = true, env = "TANDEM_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a stanza from a file through the carbons pipeline and print the
    /// resulting events as JSON lines.
    Inspect {
        /// File holding one `<message/>` stanza.
        file: PathBuf,
        /// Bare JID of the receiving account, used for sender verification.
        #[arg(long)]
        account: Option<String>,
    },
    /// Print the IQ that turns carbons on or off.
    Request {
        #[arg(value_enum)]
        action: carbons_commands::ActionArg,
        /// IQ id (random when omitted).
        #[arg(long)]
        id: Option<String>,
    },
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "tandem starting");

    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::discover_and_load(),
    };

    match cli.command {
        Commands::Inspect { file, account } => {
            carbons_commands::handle_inspect(&config, &file, account).await
        },
        Commands::Request { action, id } => carbons_commands::handle_request(action, id),
    }
}
