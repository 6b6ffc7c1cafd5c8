use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "touchstone", version, about = "HTTPS and MCP over QUIC on one port")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand)]
pub enum Cmd {
    /// Run the server until SIGINT/SIGTERM
    Serve {
        /// TOML configuration file; missing file means defaults
        #[arg(long, default_value = "touchstone.toml")]
        config: PathBuf,
        /// Overrides `addr` from the configuration
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
}
