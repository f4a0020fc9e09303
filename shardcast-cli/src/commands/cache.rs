//! Cache management CLI commands.

use std::path::PathBuf;

use clap::Subcommand;

use shardcast::CacheLayout;

use super::common::format_size;
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Clear the cache, removing all shards, filemap memos, and resolved files
    Clear,
}

pub fn run(action: CacheAction, cache_dir: PathBuf) -> Result<(), CliError> {
    let layout = CacheLayout::new(cache_dir);

    match action {
        CacheAction::Stats => {
            let stats = layout.stats().map_err(CliError::Cache)?;
            println!("Cache: {}", layout.root().display());
            println!("  Files: {}", stats.files);
            println!("  Size:  {}", format_size(stats.bytes));
            Ok(())
        }
        CacheAction::Clear => {
            let stats = layout.clear().map_err(CliError::Cache)?;
            println!(
                "Cache cleared: {} files, {} freed",
                stats.files,
                format_size(stats.bytes)
            );
            Ok(())
        }
    }
}
