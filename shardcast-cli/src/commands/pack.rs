//! `shardcast pack`: package artifacts into shards + filemap.

use std::path::PathBuf;

use clap::Args;

use shardcast::packager::{
    pack, PackConfig, PackError, DEFAULT_CHUNK_SIZE, DEFAULT_GGUF_SHARD_SIZE,
};

use super::common::format_size;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct PackArgs {
    /// Input files and/or directory trees.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output directory for shards and filemap.json.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Byte cap for CDN objects.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Additive run against an existing output directory (SHA-256 dedup).
    #[arg(long)]
    pub merge: bool,

    /// Wipe an existing output directory first.
    #[arg(long, conflicts_with = "merge")]
    pub overwrite: bool,

    /// Explicit manifest name grouping all files of this run.
    #[arg(short, long)]
    pub manifest: Option<String>,

    /// GGUF pre-split threshold in bytes (strictly less than 2 GiB).
    #[arg(long, default_value_t = DEFAULT_GGUF_SHARD_SIZE)]
    pub gguf_shard_size: u64,

    /// Keep GGUF splitter intermediates after packaging.
    #[arg(long)]
    pub keep_intermediates: bool,

    /// Delete original over-sized GGUFs after a successful split.
    #[arg(long)]
    pub remove_originals: bool,

    /// Exclusion pattern (`*` glob), repeatable.
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Plan and report without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Chatty per-file reporting.
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn run(args: PackArgs) -> Result<(), CliError> {
    let config = PackConfig {
        inputs: args.inputs,
        output: args.output,
        chunk_size: args.chunk_size,
        merge: args.merge,
        overwrite: args.overwrite,
        manifest: args.manifest,
        gguf_shard_size: args.gguf_shard_size,
        keep_intermediates: args.keep_intermediates,
        remove_originals: args.remove_originals,
        exclude: args.exclude,
        dry_run: args.dry_run,
        verbose: args.verbose,
    };

    let report = match pack(&config) {
        Ok(report) => report,
        Err(PackError::Collision(collisions)) => {
            eprintln!("CDN filename collision; nothing was published:");
            for collision in &collisions {
                eprintln!("  {} claimed by:", collision.cdn_name);
                for vp in &collision.virtual_paths {
                    eprintln!("    {}", vp);
                }
            }
            return Err(PackError::Collision(collisions).into());
        }
        Err(e) => return Err(e.into()),
    };

    if report.dry_run {
        println!("Dry run: {} files, {}", report.files, format_size(report.bytes_total));
    } else {
        println!(
            "Packaged {} files ({}) into {} CDN objects ({} deduped)",
            report.files,
            format_size(report.bytes_total),
            report.objects_written,
            report.deduped,
        );
    }
    if report.manifests.is_empty() {
        println!("Manifests: (none; consumers use the whole filemap)");
    } else {
        println!("Manifests: {}", report.manifests.join(", "));
    }
    println!("Output: {}", report.output.display());
    Ok(())
}
