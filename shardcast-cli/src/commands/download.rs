//! `shardcast download`: bulk pull of filemap contents.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use shardcast::downloader::{DownloadOptions, Downloader};
use shardcast::reassemble::Reassembler;
use shardcast::store::DEFAULT_CACHE_DIR;
use shardcast::FilemapLoader;

use super::common::{build_store, format_size};
use super::list;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// CDN URL root, local package directory, or a filemap.json location.
    pub source: String,

    /// Target directory.
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Manifest name(s) to download; repeatable, omit for all files.
    #[arg(short, long = "manifest")]
    pub manifests: Vec<String>,

    /// List available manifests and exit.
    #[arg(long)]
    pub list: bool,

    /// Skip SHA-256 verification after writing.
    #[arg(long)]
    pub no_verify: bool,

    /// Shard cache directory.
    #[arg(long, default_value = DEFAULT_CACHE_DIR)]
    pub cache_dir: PathBuf,
}

pub async fn run(args: DownloadArgs) -> Result<(), CliError> {
    if args.list {
        return list::run(list::ListArgs {
            source: args.source,
            cache_dir: args.cache_dir,
        })
        .await;
    }

    let store = build_store(&args.cache_dir)?;
    let downloader = Downloader::new(
        FilemapLoader::new(Arc::clone(&store)),
        Reassembler::new(store),
    );

    let label = if args.manifests.is_empty() {
        "all".to_string()
    } else {
        args.manifests.join(", ")
    };
    println!("Downloading [{}] from {}", label, args.source);

    let report = downloader
        .download(
            &args.source,
            &DownloadOptions {
                output: args.output,
                manifests: args.manifests,
                verify: !args.no_verify,
            },
        )
        .await?;

    println!(
        "Complete: {} new, {} cached, {} verified, {} failed ({})",
        report.downloaded,
        report.cached,
        report.verified,
        report.failed.len(),
        format_size(report.bytes_total),
    );
    for vp in &report.failed {
        eprintln!("  failed: {}", vp);
    }
    println!("Output: {}", report.output.display());

    if report.failed.is_empty() {
        Ok(())
    } else {
        Err(CliError::Run(format!(
            "{} file(s) failed to download",
            report.failed.len()
        )))
    }
}
