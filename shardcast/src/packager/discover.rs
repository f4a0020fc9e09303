//! Input discovery and exclusion filtering.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::error::PackError;

/// One deliverable input file.
#[derive(Debug, Clone)]
pub struct InputFile {
    /// Slash-separated virtual path under which consumers address it.
    pub virtual_path: String,
    /// Where the bytes live right now.
    pub physical: PathBuf,
    pub size: u64,
}

/// Directory names never packaged.
const VCS_DIRS: &[&str] = &[".git", ".svn", ".hg"];

/// Walk the input files and directory trees into a deterministic,
/// exclusion-filtered deliverable list.
///
/// A file input contributes its basename as the virtual path; a directory
/// input contributes its files under their relative paths. Dotfiles and
/// VCS artifacts are always skipped, user `exclude` patterns on top.
pub fn discover(inputs: &[PathBuf], exclude: &[String]) -> Result<Vec<InputFile>, PackError> {
    let mut out = Vec::new();

    for input in inputs {
        let meta = fs::metadata(input).map_err(|e| PackError::io(input, e))?;
        if meta.is_file() {
            let name = input
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| PackError::Config(format!("unusable input name: {}", input.display())))?;
            if is_excluded(name, exclude) {
                trace!(name, "input excluded");
                continue;
            }
            out.push(InputFile {
                virtual_path: name.to_string(),
                physical: input.clone(),
                size: meta.len(),
            });
        } else {
            walk(input, input, exclude, &mut out)?;
        }
    }

    out.sort_by(|a, b| a.virtual_path.cmp(&b.virtual_path));
    debug!(files = out.len(), "discovered input files");
    Ok(out)
}

fn walk(
    root: &Path,
    dir: &Path,
    exclude: &[String],
    out: &mut Vec<InputFile>,
) -> Result<(), PackError> {
    let entries = fs::read_dir(dir).map_err(|e| PackError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PackError::io(dir, e))?;
        let path = entry.path();
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };

        if name.starts_with('.') || VCS_DIRS.contains(&name) {
            trace!(name, "skipping hidden/VCS entry");
            continue;
        }

        let meta = entry.metadata().map_err(|e| PackError::io(&path, e))?;
        if meta.is_dir() {
            walk(root, &path, exclude, out)?;
            continue;
        }

        let rel = path
            .strip_prefix(root)
            .expect("walked path is under root")
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        if is_excluded(&rel, exclude) || is_excluded(name, exclude) {
            trace!(rel, "entry excluded by pattern");
            continue;
        }

        out.push(InputFile {
            virtual_path: rel,
            physical: path,
            size: meta.len(),
        });
    }
    Ok(())
}

/// Whether `name` matches any exclusion pattern.
fn is_excluded(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| glob_match(p, name))
}

/// Minimal glob: `*` matches any run of characters, everything else is
/// literal. Enough for `*.tmp`-style excludes.
fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(pattern: &[u8], name: &[u8]) -> bool {
        match (pattern.first(), name.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pattern[1..], name) || (!name.is_empty() && inner(pattern, &name[1..]))
            }
            (Some(p), Some(n)) if p == n => inner(&pattern[1..], &name[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, size: usize) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, vec![0u8; size]).unwrap();
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*.tmp", "scratch.tmp"));
        assert!(glob_match("model*", "model_q4.onnx"));
        assert!(glob_match("exact.txt", "exact.txt"));
        assert!(glob_match("*", "anything"));
        assert!(!glob_match("*.tmp", "scratch.bin"));
        assert!(!glob_match("exact.txt", "other.txt"));
    }

    #[test]
    fn test_discover_mixed_inputs() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("pkg");
        touch(&tree.join("config.json"), 10);
        touch(&tree.join("onnx/model.onnx"), 100);
        touch(&tree.join(".hidden"), 1);
        touch(&tree.join(".git/HEAD"), 1);
        let single = temp.path().join("extra.bin");
        touch(&single, 5);

        let files = discover(&[tree.clone(), single], &[]).unwrap();
        let vps: Vec<&str> = files.iter().map(|f| f.virtual_path.as_str()).collect();
        assert_eq!(vps, vec!["config.json", "extra.bin", "onnx/model.onnx"]);
    }

    #[test]
    fn test_discover_applies_exclusions() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("pkg");
        touch(&tree.join("keep.bin"), 10);
        touch(&tree.join("skip.tmp"), 10);
        touch(&tree.join("logs/run.log"), 10);

        let files = discover(
            &[tree],
            &["*.tmp".to_string(), "logs/*".to_string()],
        )
        .unwrap();
        let vps: Vec<&str> = files.iter().map(|f| f.virtual_path.as_str()).collect();
        assert_eq!(vps, vec!["keep.bin"]);
    }

    #[test]
    fn test_discover_missing_input_fails() {
        let err = discover(&[PathBuf::from("/definitely/not/here")], &[]).unwrap_err();
        assert!(matches!(err, PackError::Io { .. }));
    }
}
