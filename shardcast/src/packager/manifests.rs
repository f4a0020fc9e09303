//! Manifest synthesis.
//!
//! Auto mode partitions a run's deliverables into named manifests: ONNX
//! variants by the filename token, GGUF logical files by classification
//! and quantization, and the Cartesian product of text-model and
//! projector quantizations for multimodal bundles. Files that belong to
//! no group (tokenizer, config) ride along in every manifest.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::filemap::ManifestEntry;
use crate::gguf::GgufClass;

/// A deliverable as the manifest synthesizer sees it.
#[derive(Debug, Clone)]
pub struct RunFile {
    pub virtual_path: String,
    pub size: u64,
    pub kind: FileKind,
}

/// Grouping classification of a deliverable.
#[derive(Debug, Clone, PartialEq)]
pub enum FileKind {
    /// ONNX variant, grouped by the filename token.
    Onnx { token: String },
    /// Part of a logical GGUF file.
    Gguf {
        logical: String,
        class: GgufClass,
        quant: String,
    },
    /// Shared support file, attached to every manifest.
    Shared,
}

/// Extract the ONNX variant token: the text between the `model_` prefix
/// and the `.onnx` / `.onnx_data` suffix.
///
/// `onnx/model_q4f16.onnx` → `q4f16`; a bare `model.onnx` has no token.
pub fn onnx_token(virtual_path: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?:^|/)model_(?P<token>.+?)\.onnx(?:_data)?$").expect("onnx regex")
    });
    re.captures(virtual_path)
        .map(|c| c["token"].to_string())
}

/// Synthesize the manifest table for a packaging run.
///
/// With `explicit`, one manifest named after it groups every run file.
/// Otherwise manifests are derived from the groups; a run with no ONNX or
/// GGUF groups yields no manifests at all (consumers fall back to the
/// whole filemap).
pub fn synthesize(run: &[RunFile], explicit: Option<&str>) -> BTreeMap<String, ManifestEntry> {
    if let Some(name) = explicit {
        let files: Vec<String> = run.iter().map(|f| f.virtual_path.clone()).collect();
        let entry = manifest_entry(run, files);
        return BTreeMap::from([(name.to_string(), entry)]);
    }

    // Group membership: manifest name → virtual paths.
    let mut onnx_groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut llm_quants: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut mmproj_quants: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut shared: Vec<String> = Vec::new();

    for file in run {
        match &file.kind {
            FileKind::Onnx { token } => onnx_groups
                .entry(token.to_lowercase())
                .or_default()
                .push(file.virtual_path.clone()),
            FileKind::Gguf { class, quant, .. } => {
                let quant = quant.to_lowercase();
                match class {
                    GgufClass::Llm => llm_quants
                        .entry(quant)
                        .or_default()
                        .push(file.virtual_path.clone()),
                    GgufClass::Mmproj => mmproj_quants
                        .entry(quant)
                        .or_default()
                        .push(file.virtual_path.clone()),
                }
            }
            FileKind::Shared => shared.push(file.virtual_path.clone()),
        }
    }

    let mut manifests: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (token, files) in &onnx_groups {
        manifests.insert(token.clone(), files.clone());
    }
    for (quant, files) in &llm_quants {
        manifests.insert(quant.clone(), files.clone());
    }
    for (quant, files) in &mmproj_quants {
        manifests.insert(format!("mmproj_{}", quant), files.clone());
    }

    // Cross-permutation manifests for multimodal bundles. Architectural
    // validity of a permutation is the publisher's to prune.
    for (llm_quant, llm_files) in &llm_quants {
        for (mm_quant, mm_files) in &mmproj_quants {
            let name = format!("{}+mmproj_{}", llm_quant, mm_quant);
            warn!(
                manifest = %name,
                "emitting cross-permutation manifest; prune any invalid pairings before publishing"
            );
            let mut files = llm_files.clone();
            files.extend(mm_files.iter().cloned());
            manifests.insert(name, files);
        }
    }

    if manifests.is_empty() {
        return BTreeMap::new();
    }

    // Shared files ride along in every manifest.
    manifests
        .into_iter()
        .map(|(name, mut files)| {
            files.extend(shared.iter().cloned());
            files.sort();
            files.dedup();
            let entry = manifest_entry(run, files);
            (name, entry)
        })
        .collect()
}

fn manifest_entry(run: &[RunFile], files: Vec<String>) -> ManifestEntry {
    let sizes: BTreeMap<&str, u64> = run
        .iter()
        .map(|f| (f.virtual_path.as_str(), f.size))
        .collect();
    let size = files
        .iter()
        .filter_map(|vp| sizes.get(vp.as_str()))
        .sum();
    ManifestEntry { files, size }
}
