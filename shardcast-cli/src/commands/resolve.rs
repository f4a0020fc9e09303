//! `shardcast resolve`: materialize a source into the local cache.

use std::io::Write;
use std::path::PathBuf;

use clap::Args;

use shardcast::resolver::{ResolveOptions, Resolver};
use shardcast::store::DEFAULT_CACHE_DIR;

use super::common::build_store;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// CDN URL root or local package directory.
    pub source: String,

    /// Manifest name to materialize (omit for all files).
    #[arg(short, long)]
    pub manifest: Option<String>,

    /// Verify SHA-256 checksums after reassembly.
    #[arg(long)]
    pub verify_sha256: bool,

    /// Suppress the progress bar.
    #[arg(short, long)]
    pub quiet: bool,

    /// Cache directory (shards, filemap memos, resolved output).
    #[arg(long, default_value = DEFAULT_CACHE_DIR)]
    pub cache_dir: PathBuf,
}

pub async fn run(args: ResolveArgs) -> Result<(), CliError> {
    let store = build_store(&args.cache_dir)?;
    let resolver = Resolver::new(store);

    let mut opts = ResolveOptions {
        manifest: args.manifest,
        verify: args.verify_sha256,
        on_progress: None,
    };
    if !args.quiet {
        opts.on_progress = Some(Box::new(|tick| {
            let filled = (tick.percent / 5) as usize;
            let bar: String = "#".repeat(filled) + &"-".repeat(20 - filled);
            let mib = tick.loaded as f64 / 1048576.0;
            let total_mib = tick.total as f64 / 1048576.0;
            if tick.done {
                eprintln!("\rdone — {:.1} MiB                                        ", total_mib);
            } else {
                eprint!(
                    "\r  [{}] {:3}% — {:.1}/{:.1} MiB — {:.40}",
                    bar, tick.percent, mib, total_mib, tick.file
                );
                std::io::stderr().flush().ok();
            }
        }));
    }

    let out_dir = resolver.resolve(&args.source, &opts).await?;
    println!("Resolved to: {}", out_dir.display());
    Ok(())
}
