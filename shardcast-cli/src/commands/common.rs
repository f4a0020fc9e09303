//! Shared helpers for CLI commands.

use std::path::Path;
use std::sync::Arc;

use shardcast::store::{HttpFetch, ReqwestFetch};
use shardcast::{CacheLayout, ShardStore};

use crate::error::CliError;

/// Build the shard store all commands run on.
pub fn build_store(cache_dir: &Path) -> Result<Arc<ShardStore>, CliError> {
    let http: Arc<dyn HttpFetch> = Arc::new(ReqwestFetch::new()?);
    Ok(Arc::new(ShardStore::new(
        http,
        CacheLayout::new(cache_dir.to_path_buf()),
    )))
}

/// Human-readable byte count (binary units).
pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;

    let bytes = bytes as f64;
    if bytes >= GIB {
        format!("{:.2} GiB", bytes / GIB)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes / MIB)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes / KIB)
    } else {
        format!("{} B", bytes)
    }
}
