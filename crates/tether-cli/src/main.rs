//! Tether host CLI
//!
//! Runs native services whose every call goes through the Tether bridge, and
//! inspects the classes the bridge exposes.
//!
//! Logging is controlled by `TETHER_LOG` (env_logger filter syntax, default
//! `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Host for the Tether scripting bridge", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the echo service through the bridge
    Serve {
        /// Config file (defaults to ./tether.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Listen host
        #[arg(long)]
        host: Option<String>,
        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,
        /// Most ready events reported per wait
        #[arg(long)]
        max_event: Option<usize>,
    },

    /// Print the member tables of the exposed native classes
    Classes,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("TETHER_LOG", "info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            max_event,
        } => commands::serve::execute(commands::serve::ServeOptions {
            config,
            host,
            port,
            max_event,
        }),

        Commands::Classes => commands::classes::execute(),
    }
}
