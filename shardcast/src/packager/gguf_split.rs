//! Pre-splitting of over-sized GGUF files via the external splitter.
//!
//! CDN byte-shards are opaque to llama.cpp, but GGUF's own split format
//! (`model-00001-of-00003.gguf`) keeps every part loadable. Inputs above
//! the configured threshold are run through `llama-gguf-split` before
//! byte-sharding; inputs already split upstream are detected by name and
//! grouped under their logical source.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use super::error::PackError;

/// External splitter binary.
pub const SPLITTER_TOOL: &str = "llama-gguf-split";

fn split_part_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<base>.+)-(?P<idx>\d{5})-of-(?P<total>\d{5})\.gguf$").expect("split regex"))
}

/// Parse a GGUF split-part filename.
///
/// `model-00002-of-00005.gguf` → (`model`, 2, 5).
pub fn parse_split_part(name: &str) -> Option<(String, u32, u32)> {
    let captures = split_part_re().captures(name)?;
    let idx = captures["idx"].parse().ok()?;
    let total = captures["total"].parse().ok()?;
    Some((captures["base"].to_string(), idx, total))
}

/// Logical GGUF name a split part belongs to, shared by all its parts.
///
/// Non-split GGUF names are their own logical group.
pub fn logical_gguf_name(name: &str) -> Option<String> {
    if !name.ends_with(".gguf") {
        return None;
    }
    match parse_split_part(name) {
        Some((base, _, _)) => Some(format!("{}.gguf", base)),
        None => Some(name.to_string()),
    }
}

/// Verify the external splitter is runnable.
pub fn check_splitter_available() -> Result<(), PackError> {
    match Command::new(SPLITTER_TOOL).arg("--help").output() {
        Ok(_) => Ok(()),
        Err(e) => Err(PackError::MissingTool {
            tool: SPLITTER_TOOL.to_string(),
            reason: format!(
                "{} (install llama.cpp tools or lower --gguf-shard-size)",
                e
            ),
        }),
    }
}

/// Split `input` into same-format GGUF parts no larger than `max_size`.
///
/// Parts are written next to `out_prefix`; the produced part paths are
/// returned sorted by index.
pub fn split_gguf(input: &Path, max_size: u64, out_prefix: &Path) -> Result<Vec<PathBuf>, PackError> {
    info!(
        input = %input.display(),
        max_size,
        "pre-splitting over-sized GGUF"
    );

    let output = Command::new(SPLITTER_TOOL)
        .arg("--split")
        .arg("--split-max-size")
        .arg(max_size.to_string())
        .arg(input)
        .arg(out_prefix)
        .output()
        .map_err(|e| PackError::MissingTool {
            tool: SPLITTER_TOOL.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(PackError::SplitFailed(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    collect_parts(out_prefix)
}

/// Find the parts the splitter produced for `out_prefix`, sorted.
fn collect_parts(out_prefix: &Path) -> Result<Vec<PathBuf>, PackError> {
    let dir = out_prefix
        .parent()
        .ok_or_else(|| PackError::Config("split prefix has no parent directory".into()))?;
    let stem = out_prefix
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PackError::Config("unusable split prefix".into()))?;

    let mut parts = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| PackError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PackError::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((base, _, _)) = parse_split_part(name) {
            if base == stem {
                parts.push(entry.path());
            }
        }
    }
    parts.sort();

    if parts.is_empty() {
        return Err(PackError::SplitFailed(format!(
            "splitter produced no parts for {}",
            out_prefix.display()
        )));
    }
    debug!(parts = parts.len(), "collected split parts");
    Ok(parts)
}
