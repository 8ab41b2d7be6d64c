//! ChainStream CLI.
//!
//! # Commands
//! ```text
//! chainstream stream          --package <ref> --mint <address> [--start-block N]
//! chainstream inspect-package --package <ref>
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd_inspect;
mod cmd_stream;
mod logging;

use logging::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "chainstream",
    about = "Stream a token's gap-filled price series from a Substreams-style endpoint",
    long_about = "
ChainStream CLI: follow Pump.fun trades for one mint and print a price per block.
Reconnects on transient failures and resumes from the last saved cursor.

ENVIRONMENT VARIABLES:
  CHAINSTREAM_AUTH_TOKEN    API token (required for `stream`)
  CHAINSTREAM_ENDPOINT      Streaming endpoint URL
  CHAINSTREAM_PACKAGE       Package path or URL
  CHAINSTREAM_MINT          Mint address to track
  CHAINSTREAM_CURSOR_FILE   JSON file for cursor persistence
  RUST_LOG                  Overrides --log-level
",
    version
)]
struct Cli {
    /// Log level: trace | debug | info | warn | error
    #[arg(long, global = true, env = "CHAINSTREAM_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream trades for one mint and print the price series
    Stream(cmd_stream::StreamArgs),

    /// Print the modules and message types of a package
    #[command(name = "inspect-package")]
    InspectPackage {
        /// Package path or http(s) URL
        #[arg(long, env = "CHAINSTREAM_PACKAGE")]
        package: String,
        /// Print the package as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&LogConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
        ..LogConfig::default()
    });

    match cli.command {
        Commands::Stream(args) => cmd_stream::run(args).await,
        Commands::InspectPackage { package, json } => cmd_inspect::run(&package, json).await,
    }
}
