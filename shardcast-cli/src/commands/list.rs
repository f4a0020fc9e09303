//! `shardcast list`: show manifests and GGUF metadata of a source.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use shardcast::downloader::Downloader;
use shardcast::reassemble::Reassembler;
use shardcast::store::DEFAULT_CACHE_DIR;
use shardcast::FilemapLoader;

use super::common::{build_store, format_size};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct ListArgs {
    /// CDN URL root, local package directory, or a filemap.json location.
    pub source: String,

    /// Shard cache directory.
    #[arg(long, default_value = DEFAULT_CACHE_DIR)]
    pub cache_dir: PathBuf,
}

pub async fn run(args: ListArgs) -> Result<(), CliError> {
    let store = build_store(&args.cache_dir)?;
    let downloader = Downloader::new(
        FilemapLoader::new(Arc::clone(&store)),
        Reassembler::new(store),
    );

    let (_, filemap) = downloader.load(&args.source).await?;
    println!(
        "Filemap v{}: {} files, {} manifest(s)",
        filemap.version,
        filemap.files.len(),
        filemap.manifests.len()
    );

    if filemap.manifests.is_empty() {
        println!("  (no manifests defined)");
    }
    for (name, manifest) in &filemap.manifests {
        println!(
            "  {:24} {:4} files  {:>10}",
            name,
            manifest.files.len(),
            format_size(manifest.size)
        );
    }

    if !filemap.gguf_metadata.is_empty() {
        println!("\nGGUF metadata:");
        for (key, meta) in &filemap.gguf_metadata {
            let class = meta["classification"].as_str().unwrap_or("?");
            let arch = meta["architecture"].as_str().unwrap_or("?");
            let quant = meta["quantization"].as_str().unwrap_or("?");
            match meta["context_length"].as_u64() {
                Some(ctx) => {
                    println!("  [{}] {}: arch={} quant={} ctx={}", class, key, arch, quant, ctx)
                }
                None => println!("  [{}] {}: arch={} quant={}", class, key, arch, quant),
            }
        }
    }
    Ok(())
}
