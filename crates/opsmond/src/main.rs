//! opsmond: the opsmon daemon.
//!
//! Single binary that assembles the opsmon subsystems:
//! - State store (redb)
//! - Poll loop with HTTP/TCP probes and the proxmox-stats cache
//! - ntfy notifications on UP/DOWN transitions
//! - REST API with report synthesis
//!
//! # Usage
//!
//! ```text
//! opsmond run --config opsmon.toml --checks checks.toml --port 8000 --data-dir /var/lib/opsmon
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "opsmond", about = "opsmon daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the registered checks and serve the API.
    Run {
        /// Monitor settings (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check registry (TOML).
        #[arg(long, default_value = "checks.toml")]
        checks: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8000")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,opsmond=debug,opsmon=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            checks,
            port,
            data_dir,
        } => daemon::run(config, checks, port, data_dir).await,
    }
}
