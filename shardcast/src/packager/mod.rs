//! The packager: artifacts in, flat shard directory + filemap out.
//!
//! Phases, in order: discover inputs, pre-split over-sized GGUF via the
//! external splitter, disk-space preflight, hash + dedup + collision
//! check against the existing filemap, byte-split into CDN-sized shards,
//! write file entries, synthesize manifests, and write `filemap.json`
//! last; an aborted run never publishes a filemap.

mod discover;
mod error;
mod gguf_split;
mod manifests;
mod split;

pub use discover::{discover, InputFile};
pub use error::{Collision, PackError};
pub use gguf_split::{logical_gguf_name, parse_split_part, SPLITTER_TOOL};
pub use manifests::{onnx_token, synthesize, FileKind, RunFile};
pub use split::{shard_name, split_file};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::filemap::{FileEntry, Filemap, FILEMAP_NAME};
use crate::gguf;
use crate::hash::sha256_file;

/// Default byte cap for CDN objects (19 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 19 * 1024 * 1024;

/// Default GGUF pre-split threshold (1800 MiB).
pub const DEFAULT_GGUF_SHARD_SIZE: u64 = 1800 * 1024 * 1024;

/// Hard cap on the GGUF pre-split size; llama.cpp mmaps parts and chokes
/// past 2 GiB on 32-bit offsets downstream.
pub const MAX_GGUF_SHARD_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Working directory for splitter intermediates, inside the output dir.
const SPLIT_WORKDIR: &str = ".gguf-split";

/// Packaging run configuration (mirrors the CLI surface).
#[derive(Debug, Clone)]
pub struct PackConfig {
    /// Input files and/or directory trees.
    pub inputs: Vec<PathBuf>,
    /// Output directory for shards + filemap.
    pub output: PathBuf,
    /// Byte cap for CDN objects.
    pub chunk_size: u64,
    /// Additive run against an existing output directory.
    pub merge: bool,
    /// Wipe an existing output directory first.
    pub overwrite: bool,
    /// Explicit manifest name grouping this run's files.
    pub manifest: Option<String>,
    /// GGUF pre-split threshold; must stay strictly under 2 GiB.
    pub gguf_shard_size: u64,
    /// Keep splitter intermediates after packaging.
    pub keep_intermediates: bool,
    /// Delete original over-sized GGUFs after a successful split.
    pub remove_originals: bool,
    /// Exclusion patterns (repeatable, `*` glob).
    pub exclude: Vec<String>,
    /// Plan and report without writing.
    pub dry_run: bool,
    /// Chatty reporting (CLI consumes this; the library just logs).
    pub verbose: bool,
}

impl PackConfig {
    pub fn new(inputs: Vec<PathBuf>, output: PathBuf) -> Self {
        Self {
            inputs,
            output,
            chunk_size: DEFAULT_CHUNK_SIZE,
            merge: false,
            overwrite: false,
            manifest: None,
            gguf_shard_size: DEFAULT_GGUF_SHARD_SIZE,
            keep_intermediates: false,
            remove_originals: false,
            exclude: Vec::new(),
            dry_run: false,
            verbose: false,
        }
    }

    fn validate(&self) -> Result<(), PackError> {
        if self.inputs.is_empty() {
            return Err(PackError::Config("no inputs given".into()));
        }
        if self.chunk_size == 0 {
            return Err(PackError::Config("chunk-size must be positive".into()));
        }
        if self.gguf_shard_size >= MAX_GGUF_SHARD_SIZE {
            return Err(PackError::Config(format!(
                "gguf-shard-size must be strictly less than 2 GiB (got {})",
                self.gguf_shard_size
            )));
        }
        if self.merge && self.overwrite {
            return Err(PackError::Config(
                "merge and overwrite are mutually exclusive".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome summary of a packaging run.
#[derive(Debug, Clone)]
pub struct PackReport {
    /// Virtual paths packaged this run.
    pub files: usize,
    /// Entries reused from the existing filemap by SHA-256.
    pub deduped: usize,
    /// CDN objects written (flat copies and shards).
    pub objects_written: usize,
    /// Total logical bytes this run covers.
    pub bytes_total: u64,
    /// Manifest names in the resulting filemap.
    pub manifests: Vec<String>,
    pub output: PathBuf,
    pub dry_run: bool,
}

/// What to do with one deliverable, decided before anything is written.
enum Planned {
    /// Content already published; reuse the existing entry.
    Dedup { entry: FileEntry },
    /// Copy flat under the basename.
    Flat { basename: String },
    /// Byte-split into `{basename}.shard.NNN`.
    Split { basename: String },
}

/// Run the packager.
pub fn pack(config: &PackConfig) -> Result<PackReport, PackError> {
    config.validate()?;

    if config.output.exists() && config.overwrite {
        info!(output = %config.output.display(), "overwrite: wiping existing package");
        fs::remove_dir_all(&config.output).map_err(|e| PackError::io(&config.output, e))?;
    }
    fs::create_dir_all(&config.output).map_err(|e| PackError::io(&config.output, e))?;

    let existing_filemap_path = config.output.join(FILEMAP_NAME);
    let existing = if existing_filemap_path.exists() {
        if !config.merge {
            return Err(PackError::Config(format!(
                "{} already contains a package; pass merge or overwrite",
                config.output.display()
            )));
        }
        let text = fs::read_to_string(&existing_filemap_path)
            .map_err(|e| PackError::io(&existing_filemap_path, e))?;
        Some(Filemap::from_json(&text)?)
    } else {
        None
    };

    // ── Phase 1: discover ────────────────────────────────────────────
    let mut deliverables = discover(&config.inputs, &config.exclude)?;

    // ── Phase 2: pre-split over-sized GGUF ───────────────────────────
    let mut split_originals: Vec<PathBuf> = Vec::new();
    let oversized: Vec<usize> = deliverables
        .iter()
        .enumerate()
        .filter(|(_, f)| {
            f.virtual_path.ends_with(".gguf")
                && f.size > config.gguf_shard_size
                && parse_split_part(basename(&f.virtual_path)).is_none()
        })
        .map(|(i, _)| i)
        .collect();

    if !oversized.is_empty() && !config.dry_run {
        gguf_split::check_splitter_available()?;

        let workdir = config.output.join(SPLIT_WORKDIR);
        fs::create_dir_all(&workdir).map_err(|e| PackError::io(&workdir, e))?;

        // The work volume must hold the largest single GGUF.
        let largest = oversized
            .iter()
            .map(|&i| deliverables[i].size)
            .max()
            .unwrap_or(0);
        check_volume(&workdir, largest)?;

        // Replace each oversized input with its split parts.
        for &index in oversized.iter().rev() {
            let original = deliverables.remove(index);
            let stem = basename(&original.virtual_path)
                .strip_suffix(".gguf")
                .unwrap_or(basename(&original.virtual_path))
                .to_string();
            let parts =
                gguf_split::split_gguf(&original.physical, config.gguf_shard_size, &workdir.join(&stem))?;

            let dir_prefix = match original.virtual_path.rsplit_once('/') {
                Some((dir, _)) => format!("{}/", dir),
                None => String::new(),
            };
            for part in parts {
                let part_name = part
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| PackError::SplitFailed("unnamed split part".into()))?
                    .to_string();
                let size = fs::metadata(&part)
                    .map_err(|e| PackError::io(&part, e))?
                    .len();
                deliverables.push(InputFile {
                    virtual_path: format!("{}{}", dir_prefix, part_name),
                    physical: part,
                    size,
                });
            }
            split_originals.push(original.physical);
        }
        deliverables.sort_by(|a, b| a.virtual_path.cmp(&b.virtual_path));
    }

    // ── Phase 3: disk-space preflight ────────────────────────────────
    let bytes_total: u64 = deliverables.iter().map(|f| f.size).sum();
    if !config.dry_run {
        check_volume(&config.output, bytes_total + bytes_total / 100)?;
    }

    // ── Phase 4: hash, dedup, collisions ─────────────────────────────
    let dedup_oracle: HashMap<&str, (&String, &FileEntry)> = existing
        .as_ref()
        .map(|f| {
            f.files
                .iter()
                .map(|(vp, entry)| (entry.sha256.as_str(), (vp, entry)))
                .collect()
        })
        .unwrap_or_default();
    let existing_names: HashMap<String, String> = existing
        .as_ref()
        .map(existing_cdn_names)
        .unwrap_or_default();

    let mut hashes: Vec<String> = Vec::with_capacity(deliverables.len());
    for file in &deliverables {
        hashes.push(sha256_file(&file.physical).map_err(|e| PackError::io(&file.physical, e))?);
    }

    let mut plans: Vec<Planned> = Vec::with_capacity(deliverables.len());
    let mut claimed: HashMap<String, (String, String)> = HashMap::new(); // basename → (sha, vp)
    let mut conflicts: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut run_entries: HashMap<String, FileEntry> = HashMap::new(); // sha → entry (within-run dedup)
    let mut deduped = 0usize;

    for (file, sha) in deliverables.iter().zip(&hashes) {
        // Cross-run dedup: the existing filemap is the oracle.
        if let Some((source_vp, entry)) = dedup_oracle.get(sha.as_str()) {
            debug!(vp = %file.virtual_path, reused_from = %source_vp, "dedup against existing package");
            plans.push(Planned::Dedup {
                entry: (*entry).clone(),
            });
            deduped += 1;
            continue;
        }

        let base = basename(&file.virtual_path).to_string();

        // Collision against prior runs' published names.
        if let Some(existing_sha) = existing_names.get(&base) {
            if existing_sha != sha {
                conflicts.entry(base.clone()).or_default().push(file.virtual_path.clone());
                continue;
            }
        }
        // Collision within this run.
        if let Some((claimed_sha, claimed_vp)) = claimed.get(&base) {
            if claimed_sha != sha {
                let slot = conflicts.entry(base.clone()).or_default();
                if !slot.contains(claimed_vp) {
                    slot.push(claimed_vp.clone());
                }
                slot.push(file.virtual_path.clone());
                continue;
            }
        }
        claimed.insert(base.clone(), (sha.clone(), file.virtual_path.clone()));

        if file.size > config.chunk_size {
            plans.push(Planned::Split { basename: base });
        } else {
            plans.push(Planned::Flat { basename: base });
        }
    }

    if !conflicts.is_empty() {
        return Err(PackError::Collision(
            conflicts
                .into_iter()
                .map(|(cdn_name, virtual_paths)| Collision {
                    cdn_name,
                    virtual_paths,
                })
                .collect(),
        ));
    }

    // ── Dry run stops before any writes ──────────────────────────────
    if config.dry_run {
        let run_files = classify_run(&deliverables, &config.output);
        let manifests = synthesize(&run_files, config.manifest.as_deref());
        info!(
            files = deliverables.len(),
            bytes = bytes_total,
            manifests = manifests.len(),
            "dry run complete"
        );
        return Ok(PackReport {
            files: deliverables.len(),
            deduped,
            objects_written: 0,
            bytes_total,
            manifests: manifests.keys().cloned().collect(),
            output: config.output.clone(),
            dry_run: true,
        });
    }

    // ── Phase 5+6: write shards and file entries ─────────────────────
    let mut filemap = existing.unwrap_or_default();
    let mut objects_written = 0usize;

    for ((file, sha), plan) in deliverables.iter().zip(&hashes).zip(&plans) {
        let entry = match plan {
            Planned::Dedup { entry } => entry.clone(),
            _ if run_entries.contains_key(sha) => {
                deduped += 1;
                run_entries[sha].clone()
            }
            Planned::Flat { basename } => {
                split::copy_flat(&file.physical, &config.output, basename)?;
                objects_written += 1;
                FileEntry {
                    size: file.size,
                    sha256: sha.clone(),
                    cdn_file: Some(basename.clone()),
                    shards: None,
                }
            }
            Planned::Split { basename } => {
                let shards =
                    split::split_file(&file.physical, basename, &config.output, config.chunk_size)?;
                objects_written += shards.len();
                FileEntry {
                    size: file.size,
                    sha256: sha.clone(),
                    cdn_file: None,
                    shards: Some(shards),
                }
            }
        };
        run_entries.insert(sha.clone(), entry.clone());
        filemap.files.insert(file.virtual_path.clone(), entry);
    }

    // ── Phase 7: manifests + GGUF descriptors ────────────────────────
    let run_files = classify_run(&deliverables, &config.output);
    let manifests = synthesize(&run_files, config.manifest.as_deref());
    for (name, entry) in manifests {
        filemap.manifests.insert(name, entry);
    }
    for (key, descriptor) in gguf_descriptors(&deliverables) {
        filemap.gguf_metadata.insert(key, descriptor);
    }

    // ── Phase 8: publish the filemap last ────────────────────────────
    filemap.validate()?;
    let filemap_path = config.output.join(FILEMAP_NAME);
    fs::write(&filemap_path, filemap.to_json()).map_err(|e| PackError::io(&filemap_path, e))?;

    // Cleanup of intermediates and originals.
    let workdir = config.output.join(SPLIT_WORKDIR);
    if workdir.exists() && !config.keep_intermediates {
        fs::remove_dir_all(&workdir).ok();
    }
    if config.remove_originals {
        for original in &split_originals {
            if let Err(e) = fs::remove_file(original) {
                warn!(path = %original.display(), error = %e, "could not remove split original");
            }
        }
    }

    info!(
        files = deliverables.len(),
        objects = objects_written,
        deduped,
        manifests = filemap.manifests.len(),
        output = %config.output.display(),
        "packaging complete"
    );

    Ok(PackReport {
        files: deliverables.len(),
        deduped,
        objects_written,
        bytes_total,
        manifests: filemap.manifests.keys().cloned().collect(),
        output: config.output.clone(),
        dry_run: false,
    })
}

/// Every CDN object name an existing filemap occupies, with the logical
/// sha it serves (shards inherit their file's sha for collision purposes).
fn existing_cdn_names(filemap: &Filemap) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for entry in filemap.files.values() {
        if let Some(cdn) = &entry.cdn_file {
            names.insert(cdn.clone(), entry.sha256.clone());
        }
        if let Some(shards) = &entry.shards {
            for shard in shards {
                // A re-split of the same logical file regenerates identical
                // shard names; treat the parent sha as the content witness.
                names.insert(
                    parent_basename(&shard.file).to_string(),
                    entry.sha256.clone(),
                );
                names.insert(shard.file.clone(), entry.sha256.clone());
            }
        }
    }
    names
}

/// `model.onnx.shard.003` → `model.onnx`; other names pass through.
fn parent_basename(shard_file: &str) -> &str {
    match shard_file.find(".shard.") {
        Some(at) => &shard_file[..at],
        None => shard_file,
    }
}

fn basename(virtual_path: &str) -> &str {
    virtual_path.rsplit('/').next().unwrap_or(virtual_path)
}

/// Classify the run's deliverables for manifest synthesis.
fn classify_run(deliverables: &[InputFile], _output: &Path) -> Vec<RunFile> {
    let descriptors = gguf_descriptors(deliverables);
    deliverables
        .iter()
        .map(|file| {
            let base = basename(&file.virtual_path);
            let kind = if let Some(token) = onnx_token(&file.virtual_path) {
                FileKind::Onnx { token }
            } else if let Some(logical) = logical_gguf_name(base) {
                let descriptor = descriptors.get(&logical);
                let class = match descriptor.and_then(|d| d["classification"].as_str()) {
                    Some("mmproj") => gguf::GgufClass::Mmproj,
                    _ => gguf::GgufClass::Llm,
                };
                let quant = descriptor
                    .and_then(|d| d["quantization"].as_str())
                    .map(String::from)
                    .or_else(|| gguf::quant_from_filename(base))
                    .unwrap_or_else(|| "unknown".into());
                FileKind::Gguf {
                    logical,
                    class,
                    quant,
                }
            } else {
                FileKind::Shared
            };
            RunFile {
                virtual_path: file.virtual_path.clone(),
                size: file.size,
                kind,
            }
        })
        .collect()
}

/// Read GGUF descriptors, one per logical file (first part speaks for a
/// split group).
fn gguf_descriptors(deliverables: &[InputFile]) -> BTreeMap<String, serde_json::Value> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = BTreeMap::new();

    let mut sorted: Vec<&InputFile> = deliverables
        .iter()
        .filter(|f| f.virtual_path.ends_with(".gguf"))
        .collect();
    sorted.sort_by(|a, b| a.virtual_path.cmp(&b.virtual_path));

    for file in sorted {
        let base = basename(&file.virtual_path);
        let Some(logical) = logical_gguf_name(base) else {
            continue;
        };
        if !seen.insert(logical.clone()) {
            continue;
        }
        let group_size: u64 = deliverables
            .iter()
            .filter(|f| logical_gguf_name(basename(&f.virtual_path)).as_deref() == Some(&logical))
            .map(|f| f.size)
            .sum();
        match gguf::read_metadata(&file.physical) {
            Ok(meta) => {
                out.insert(logical.clone(), meta.descriptor(&logical, group_size));
            }
            Err(e) => {
                warn!(file = %file.virtual_path, error = %e, "unreadable GGUF header; skipping descriptor");
            }
        }
    }
    out
}

/// Fail unless `volume` has at least `needed` bytes free.
fn check_volume(volume: &Path, needed: u64) -> Result<(), PackError> {
    let available = fs2::available_space(volume).map_err(|e| PackError::io(volume, e))?;
    if available < needed {
        return Err(PackError::DiskSpace {
            volume: volume.to_path_buf(),
            needed,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn input_tree(temp: &TempDir) -> PathBuf {
        let tree = temp.path().join("model-src");
        touch(&tree.join("config.json"), b"{\"arch\":\"demo\"}");
        touch(&tree.join("weights.bin"), &(0u8..=255).cycle().take(50).collect::<Vec<_>>());
        tree
    }

    fn config(tree: &Path, out: &Path) -> PackConfig {
        let mut config = PackConfig::new(vec![tree.to_path_buf()], out.to_path_buf());
        config.chunk_size = 20;
        config
    }

    #[test]
    fn test_pack_writes_shards_and_filemap() {
        let temp = TempDir::new().unwrap();
        let tree = input_tree(&temp);
        let out = temp.path().join("out");

        let report = pack(&config(&tree, &out)).unwrap();
        assert_eq!(report.files, 2);
        // config.json flat + 3 shards of weights.bin (20+20+10).
        assert_eq!(report.objects_written, 4);

        let filemap = Filemap::from_json(&fs::read_to_string(out.join(FILEMAP_NAME)).unwrap()).unwrap();
        let weights = &filemap.files["weights.bin"];
        assert!(weights.is_sharded());
        let shards = weights.shards.as_ref().unwrap();
        assert_eq!(shards.len(), 3);
        assert_eq!(shards[2].size, 10);
        assert!(out.join("weights.bin.shard.000").exists());
        assert!(out.join("config.json").exists());

        // Small files stay unsharded.
        assert!(!filemap.files["config.json"].is_sharded());
    }

    #[test]
    fn test_pack_refuses_existing_package_without_merge() {
        let temp = TempDir::new().unwrap();
        let tree = input_tree(&temp);
        let out = temp.path().join("out");

        pack(&config(&tree, &out)).unwrap();
        let err = pack(&config(&tree, &out)).unwrap_err();
        assert!(matches!(err, PackError::Config(_)));
    }

    #[test]
    fn test_merge_rerun_is_dedup_noop() {
        let temp = TempDir::new().unwrap();
        let tree = input_tree(&temp);
        let out = temp.path().join("out");

        pack(&config(&tree, &out)).unwrap();
        let before = fs::read_to_string(out.join(FILEMAP_NAME)).unwrap();

        let mut rerun = config(&tree, &out);
        rerun.merge = true;
        let report = pack(&rerun).unwrap();
        assert_eq!(report.deduped, 2);
        assert_eq!(report.objects_written, 0);

        let after = fs::read_to_string(out.join(FILEMAP_NAME)).unwrap();
        assert_eq!(before, after, "merge rerun must not change the filemap");
    }

    #[test]
    fn test_overwrite_wipes_and_repacks() {
        let temp = TempDir::new().unwrap();
        let tree = input_tree(&temp);
        let out = temp.path().join("out");

        pack(&config(&tree, &out)).unwrap();
        touch(&out.join("stale.artifact"), b"old");

        let mut rerun = config(&tree, &out);
        rerun.overwrite = true;
        pack(&rerun).unwrap();
        assert!(!out.join("stale.artifact").exists());
        assert!(out.join(FILEMAP_NAME).exists());
    }

    #[test]
    fn test_basename_collision_aborts_without_filemap() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("src");
        touch(&tree.join("a/model.bin"), b"contents one");
        touch(&tree.join("b/model.bin"), b"other contents");
        let out = temp.path().join("out");

        let err = pack(&config(&tree, &out)).unwrap_err();
        let PackError::Collision(collisions) = err else {
            panic!("expected collision");
        };
        assert_eq!(collisions[0].cdn_name, "model.bin");
        assert_eq!(collisions[0].virtual_paths.len(), 2);
        assert!(!out.join(FILEMAP_NAME).exists(), "no filemap on abort");
    }

    #[test]
    fn test_same_content_two_paths_shares_storage() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("src");
        touch(&tree.join("a/same.bin"), b"identical payload");
        touch(&tree.join("b/same.bin"), b"identical payload");
        let out = temp.path().join("out");

        let report = pack(&config(&tree, &out)).unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.objects_written, 1);

        let filemap = Filemap::from_json(&fs::read_to_string(out.join(FILEMAP_NAME)).unwrap()).unwrap();
        assert_eq!(
            filemap.files["a/same.bin"].cdn_file,
            filemap.files["b/same.bin"].cdn_file
        );
    }

    #[test]
    fn test_explicit_manifest() {
        let temp = TempDir::new().unwrap();
        let tree = input_tree(&temp);
        let out = temp.path().join("out");

        let mut config = config(&tree, &out);
        config.manifest = Some("release".into());
        let report = pack(&config).unwrap();
        assert_eq!(report.manifests, vec!["release".to_string()]);

        let filemap = Filemap::from_json(&fs::read_to_string(out.join(FILEMAP_NAME)).unwrap()).unwrap();
        assert_eq!(filemap.manifests["release"].files.len(), 2);
        assert_eq!(filemap.manifests["release"].size, 66);
    }

    #[test]
    fn test_auto_manifests_from_onnx_tokens() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("src");
        touch(&tree.join("onnx/model_q4f16.onnx"), &vec![1u8; 30]);
        touch(&tree.join("onnx/model_fp16.onnx"), &vec![2u8; 30]);
        touch(&tree.join("tokenizer.json"), b"tok");
        let out = temp.path().join("out");

        let report = pack(&config(&tree, &out)).unwrap();
        assert_eq!(
            report.manifests,
            vec!["fp16".to_string(), "q4f16".to_string()]
        );

        let filemap = Filemap::from_json(&fs::read_to_string(out.join(FILEMAP_NAME)).unwrap()).unwrap();
        let q4 = &filemap.manifests["q4f16"];
        assert!(q4.files.contains(&"tokenizer.json".to_string()));
        assert_eq!(q4.size, 33);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let tree = input_tree(&temp);
        let out = temp.path().join("out");

        let mut config = config(&tree, &out);
        config.dry_run = true;
        let report = pack(&config).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.objects_written, 0);
        assert!(!out.join(FILEMAP_NAME).exists());
        assert!(!out.join("config.json").exists());
    }

    #[test]
    fn test_gguf_shard_size_cap_enforced() {
        let temp = TempDir::new().unwrap();
        let tree = input_tree(&temp);
        let out = temp.path().join("out");

        let mut config = config(&tree, &out);
        config.gguf_shard_size = MAX_GGUF_SHARD_SIZE;
        assert!(matches!(pack(&config).unwrap_err(), PackError::Config(_)));
    }

    #[test]
    fn test_parent_basename() {
        assert_eq!(parent_basename("model.onnx.shard.003"), "model.onnx");
        assert_eq!(parent_basename("config.json"), "config.json");
    }

    #[test]
    fn test_presplit_gguf_inputs_grouped_not_resplit() {
        // Already-split GGUF parts above the threshold must be taken as-is.
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("src");
        touch(&tree.join("big-00001-of-00002.gguf"), &vec![1u8; 40]);
        touch(&tree.join("big-00002-of-00002.gguf"), &vec![2u8; 40]);
        let out = temp.path().join("out");

        let mut config = config(&tree, &out);
        config.gguf_shard_size = 10; // far below the parts' size
        let report = pack(&config).unwrap();

        // Each 40-byte part byte-splits into 2 CDN shards of 20.
        assert_eq!(report.objects_written, 4);
        let filemap = Filemap::from_json(&fs::read_to_string(out.join(FILEMAP_NAME)).unwrap()).unwrap();
        assert!(filemap.files.contains_key("big-00001-of-00002.gguf"));
        // Both parts land in one manifest for the logical file.
        assert_eq!(filemap.manifests.len(), 1);
        let entry = filemap.manifests.values().next().unwrap();
        assert_eq!(entry.files.len(), 2);
    }
}
