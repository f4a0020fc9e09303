//! Byte-splitting of over-sized deliverables into CDN-sized shards.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::filemap::ShardRef;

use super::error::PackError;

/// Shard name for piece `index` of `basename`.
pub fn shard_name(basename: &str, index: usize) -> String {
    format!("{}.shard.{:03}", basename, index)
}

/// Split `input` into `chunk_size`-byte shards written to `output_dir`.
///
/// Shards are fixed-size except the last, named `{basename}.shard.NNN` in
/// order, each hashed while written. Returns the shard list for the
/// filemap entry.
pub fn split_file(
    input: &Path,
    basename: &str,
    output_dir: &Path,
    chunk_size: u64,
) -> Result<Vec<ShardRef>, PackError> {
    let mut reader = File::open(input).map_err(|e| PackError::io(input, e))?;
    let mut shards = Vec::new();
    let mut buffer = vec![0u8; chunk_size as usize];
    let mut offset = 0u64;
    let mut index = 0usize;

    loop {
        let filled = read_up_to(&mut reader, &mut buffer).map_err(|e| PackError::io(input, e))?;
        if filled == 0 {
            break;
        }
        let chunk = &buffer[..filled];

        let name = shard_name(basename, index);
        let shard_path = output_dir.join(&name);
        let mut out = File::create(&shard_path).map_err(|e| PackError::io(&shard_path, e))?;
        out.write_all(chunk).map_err(|e| PackError::io(&shard_path, e))?;

        let mut hasher = Sha256::new();
        hasher.update(chunk);
        shards.push(ShardRef {
            file: name,
            offset,
            size: filled as u64,
            sha256: Some(format!("{:x}", hasher.finalize())),
        });

        offset += filled as u64;
        index += 1;
    }

    debug!(
        input = %input.display(),
        shards = shards.len(),
        bytes = offset,
        "byte-split complete"
    );
    Ok(shards)
}

/// Fill `buffer` as far as the reader allows; returns bytes read (0 at EOF).
fn read_up_to(reader: &mut impl Read, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Copy an unsharded deliverable to its flat CDN name.
pub fn copy_flat(input: &Path, output_dir: &Path, basename: &str) -> Result<PathBuf, PackError> {
    let dest = output_dir.join(basename);
    std::fs::copy(input, &dest).map_err(|e| PackError::io(&dest, e))?;
    Ok(dest)
}
