use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mediabox")]
#[command(about = "MediaBox media generation service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the API server together with the in-process worker pool
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the API server to (overrides configuration)
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}
