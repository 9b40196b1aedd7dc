use clap::{Parser, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use gtasks_mcp_runtime::{McpCommands, RuntimeArgs, run as run_mcp};

const DEFAULT_LOG_FILTER: &str = "gtasks_mcp=info,gtasks_mcp_runtime=info";

#[derive(Parser)]
#[command(
    name = "gtasks-mcp",
    version,
    about = "Google Tasks and Google Calendar MCP server over stdio"
)]
struct Cli {
    #[command(flatten)]
    runtime: RuntimeArgs,

    /// Log line format on stderr
    #[arg(long, value_enum, env = "GTASKS_MCP_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<McpCommands>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    // Stdout carries the protocol; logs go to stderr only.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = cli.runtime.into_config();
    tracing::debug!(
        credentials_path = %config.credentials_path.display(),
        keyfile = %config.local_keyfile_path.display(),
        "runtime configuration"
    );

    let code = run_mcp(config, cli.command.unwrap_or(McpCommands::Serve)).await;
    std::process::exit(code);
}
