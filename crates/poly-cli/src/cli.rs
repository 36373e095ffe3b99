use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "poly",
    about = "Polycentric engine: identities, relay sync and state inspection",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file; `poly.toml` is read when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Relay to use instead of the configured defaults. Repeatable.
    #[arg(long = "server", global = true)]
    pub servers: Vec<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a new identity key
    Keygen,
    /// Show the latest clock per process held by the relays
    Head(SystemArgs),
    /// Pull an identity's events and summarize what arrived
    Backfill(SystemArgs),
    /// Pull an identity's events and print its LWW fields
    State(SystemArgs),
    /// Sign and publish events as an identity
    Publish(PublishArgs),
    /// Recent events across the relays
    Explore(FeedArgs),
    /// Search the relays
    Search(SearchArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct SystemArgs {
    /// Identity public key, hex encoded.
    pub system: String,
}

#[derive(Args)]
pub struct PublishArgs {
    /// Secret key, hex encoded.
    #[arg(long)]
    pub key: String,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// Post text. Repeatable.
    #[arg(long = "post")]
    pub posts: Vec<String>,
}

#[derive(Args)]
pub struct FeedArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: u32,
}

#[derive(Args)]
pub struct SearchArgs {
    pub query: String,
    #[arg(long, default_value_t = 20)]
    pub limit: u32,
}
