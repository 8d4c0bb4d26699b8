pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "viewsdk")]
#[command(about = "Inspect the view cache and exercise the metrics feed")]
#[command(version)]
pub struct Cli {
    /// Path to viewsdk.toml (defaults to ./viewsdk.toml when present)
    #[arg(long, global = true, env = "VIEWSDK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read and write the persistent cache
    Cache(CacheArgs),
    /// Send one metrics event to the collector
    Track(TrackArgs),
    /// Run a local metrics collector
    Collector(CollectorArgs),
}

#[derive(clap::Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Print the value stored under a key
    Get(CacheGetArgs),
    /// Store a value (JSON, or a plain string when it does not parse)
    Set(CacheSetArgs),
    /// Evict the least recently used half of the entries
    Evict,
}

#[derive(clap::Args)]
pub struct CacheGetArgs {
    pub key: String,
}

#[derive(clap::Args)]
pub struct CacheSetArgs {
    pub key: String,
    pub value: String,
}

#[derive(clap::Args)]
pub struct TrackArgs {
    /// Event name
    pub event: String,

    /// Event property as key=value (repeatable)
    #[arg(long = "prop", value_parser = commands::parse_prop)]
    pub props: Vec<(String, String)>,

    /// Collector URI (overrides the config file)
    #[arg(long)]
    pub uri: Option<String>,

    /// How long to wait for delivery before giving up, in milliseconds
    #[arg(long, default_value = "3000")]
    pub wait_ms: u64,
}

#[derive(clap::Args)]
pub struct CollectorArgs {
    /// Port to listen on
    #[arg(long, default_value = "44080")]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
}
