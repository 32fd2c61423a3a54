//! # Chorus
//!
//! Build resource packs and audition them.
//!
//! # Commands
//!
//! - `chorus pack` - Bundle every file in a directory into a `.pak`
//! - `chorus list` - Print the entry table of a `.pak`
//! - `chorus play` - Play one track through the default output device
//! - `chorus devices` - List output devices
//!
//! Logging follows `RUST_LOG`, e.g. `RUST_LOG=chorus_audio=debug chorus play sfx.pak 3`.

mod pack;
mod play;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Chorus - resource pack builder and player
#[derive(Parser)]
#[command(name = "chorus")]
#[command(about = "Build and play Chorus resource packs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bundle every file in a directory into a pack, sorted by name
    Pack(pack::PackArgs),

    /// Print the entry table of a pack
    List(pack::ListArgs),

    /// Play one track through the default output device
    Play(play::PlayArgs),

    /// List output devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chorus=info,chorus_audio=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Pack(args) => pack::execute(&args),
        Commands::List(args) => pack::list(&args),
        Commands::Play(args) => play::execute(&args),
        Commands::Devices => play::devices(),
    }
}
