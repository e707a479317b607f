use authgate::{commands, config, logging};

use anyhow::Result;
use authgate_core::TokenRequest;
use clap::Parser;
use logging::LogFormat;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "authgate",
    about = "Authenticating reverse-proxy gateway: validates bearer tokens and enforces route policies",
    version
)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Run the gateway
    Serve {
        /// Configuration file
        #[arg(long, short = 'c', default_value = config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Listen address, overriding server.listen
        #[arg(long, short = 'l')]
        listen: Option<SocketAddr>,
    },

    /// Validate the configuration and print the route table
    Check {
        /// Configuration file
        #[arg(long, short = 'c', default_value = config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Print a signed token for local testing
    MintToken {
        /// Configuration file
        #[arg(long, short = 'c', default_value = config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Value of the role claim
        #[arg(long, default_value = "User")]
        role: String,

        /// Value of the scope claim
        #[arg(long, default_value = "api.read")]
        scope: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;

    match cli.command {
        Command::Serve { config, listen } => commands::serve(&config, listen).await,
        Command::Check { config } => commands::check(&config),
        Command::MintToken { config, role, scope } => commands::mint_token(&config, TokenRequest { role, scope }),
    }
}
