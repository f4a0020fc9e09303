//! shardcast CLI: package, download, resolve, and inspect CDN-sharded
//! model repositories.

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shardcast::store::DEFAULT_CACHE_DIR;

use commands::{cache, download, list, pack, resolve};

#[derive(Parser)]
#[command(name = "shardcast")]
#[command(version, about = "Package and resolve CDN-sharded model artifacts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Package artifacts into a flat shard directory + filemap.json
    Pack(pack::PackArgs),
    /// Download filemap contents into a target directory
    Download(download::DownloadArgs),
    /// Reassemble a source into the local cache and print its path
    Resolve(resolve::ResolveArgs),
    /// List manifests and GGUF metadata of a source
    List(list::ListArgs),
    /// Inspect or clear the shard cache
    Cache {
        #[command(subcommand)]
        action: cache::CacheAction,

        /// Cache directory.
        #[arg(long, default_value = DEFAULT_CACHE_DIR)]
        cache_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Pack(args) => pack::run(args),
        Command::Download(args) => download::run(args).await,
        Command::Resolve(args) => resolve::run(args).await,
        Command::List(args) => list::run(args).await,
        Command::Cache { action, cache_dir } => cache::run(action, cache_dir),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}
