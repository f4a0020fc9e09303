//! GGUF header metadata reader.
//!
//! Reads just enough of a GGUF file to classify it (text model vs
//! multimodal projector), name its quantization, and surface the common
//! architecture parameters the packager records in `gguf_metadata`.
//! Tensor data is never touched; large metadata arrays (tokenizer vocab)
//! are skipped, not loaded.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde_json::json;
use thiserror::Error;
use tracing::debug;

/// GGUF magic: "GGUF" little-endian.
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// Metadata arrays longer than this are skipped, recording only a length.
const MAX_INLINE_ARRAY: u64 = 100;

/// Upper bound on parsed KV pairs; anything past it is ignored.
const MAX_KV_PAIRS: u64 = 300;

/// Architectures that are projectors rather than standalone text models.
const MMPROJ_ARCHITECTURES: &[&str] = &["clip", "mllama_vision", "minicpmv", "wavtokenizer-dec"];

/// `general.file_type` → quantization name.
const FILE_TYPE_NAMES: &[(u32, &str)] = &[
    (0, "F32"),
    (1, "F16"),
    (2, "Q4_0"),
    (3, "Q4_1"),
    (7, "Q8_0"),
    (8, "Q5_0"),
    (9, "Q5_1"),
    (10, "Q2_K"),
    (11, "Q3_K_S"),
    (12, "Q3_K_M"),
    (13, "Q3_K_L"),
    (14, "Q4_K_S"),
    (15, "Q4_K_M"),
    (16, "Q5_K_S"),
    (17, "Q5_K_M"),
    (18, "Q6_K"),
    (19, "IQ2_XXS"),
    (20, "IQ2_XS"),
    (21, "IQ3_XXS"),
    (24, "IQ1_S"),
    (25, "IQ4_NL"),
    (26, "IQ3_S"),
    (27, "IQ3_M"),
    (28, "IQ2_S"),
    (29, "IQ2_M"),
    (30, "IQ4_XS"),
    (31, "IQ1_M"),
];

#[derive(Debug, Error)]
pub enum GgufError {
    #[error("not a GGUF file (magic {found:02x?})")]
    NotGguf { found: [u8; 4] },

    #[error("truncated GGUF header")]
    Truncated,

    #[error("i/o error reading GGUF: {0}")]
    Io(#[from] std::io::Error),
}

/// A metadata value. Large arrays keep only their length.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufValue {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
    Values(Vec<GgufValue>),
    /// An array too large to inline; only the element count is kept.
    SkippedArray { len: u64 },
}

impl GgufValue {
    /// Integer view, when the value is any integer width.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            GgufValue::U64(v) => Some(*v),
            GgufValue::I64(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GgufValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Whether a GGUF is a text model or a projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GgufClass {
    Llm,
    Mmproj,
}

impl GgufClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            GgufClass::Llm => "llm",
            GgufClass::Mmproj => "mmproj",
        }
    }
}

/// Parsed GGUF header metadata.
#[derive(Debug, Clone)]
pub struct GgufMetadata {
    pub version: u32,
    pub tensor_count: u64,
    pub kv_count: u64,
    pub kv: BTreeMap<String, GgufValue>,
}

impl GgufMetadata {
    /// `general.architecture`, when present.
    pub fn architecture(&self) -> Option<&str> {
        self.kv.get("general.architecture").and_then(|v| v.as_str())
    }

    /// `general.name`, when present.
    pub fn name(&self) -> Option<&str> {
        self.kv.get("general.name").and_then(|v| v.as_str())
    }

    /// `general.file_type`, when present.
    pub fn file_type(&self) -> Option<u32> {
        self.kv
            .get("general.file_type")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Architecture-scoped integer field, e.g. `llama.context_length`.
    pub fn arch_field(&self, field: &str) -> Option<u64> {
        let arch = self.architecture()?;
        self.kv
            .get(&format!("{}.{}", arch, field))
            .and_then(|v| v.as_u64())
    }

    /// Classify as text model or projector.
    ///
    /// The filename wins (publishers name projector files `*mmproj*`);
    /// otherwise projector architectures are recognized by name.
    pub fn classify(&self, filename: &str) -> GgufClass {
        if filename.to_lowercase().contains("mmproj") {
            return GgufClass::Mmproj;
        }
        match self.architecture() {
            Some(arch) if MMPROJ_ARCHITECTURES.contains(&arch.to_lowercase().as_str()) => {
                GgufClass::Mmproj
            }
            _ => GgufClass::Llm,
        }
    }

    /// Quantization name: `general.file_type` first, filename second.
    pub fn quantization(&self, filename: &str) -> String {
        if let Some(ft) = self.file_type() {
            if let Some((_, name)) = FILE_TYPE_NAMES.iter().find(|(code, _)| *code == ft) {
                return (*name).to_string();
            }
        }
        quant_from_filename(filename).unwrap_or_else(|| "unknown".to_string())
    }

    /// The informational descriptor recorded in the filemap.
    pub fn descriptor(&self, filename: &str, file_size: u64) -> serde_json::Value {
        let mut out = json!({
            "file": filename,
            "file_size": file_size,
            "classification": self.classify(filename).as_str(),
            "architecture": self.architecture().unwrap_or("unknown"),
            "quantization": self.quantization(filename),
            "tensor_count": self.tensor_count,
            "gguf_version": self.version,
        });
        let fields = out.as_object_mut().expect("descriptor is an object");
        if let Some(name) = self.name() {
            fields.insert("name".into(), json!(name));
        }
        for key in [
            "context_length",
            "embedding_length",
            "block_count",
            "feed_forward_length",
        ] {
            if let Some(value) = self.arch_field(key) {
                fields.insert(key.into(), json!(value));
            }
        }
        out
    }
}

/// Read the header metadata of a GGUF file on disk.
pub fn read_metadata(path: &Path) -> Result<GgufMetadata, GgufError> {
    let file = File::open(path)?;
    parse_metadata(BufReader::new(file))
}

/// Parse GGUF header metadata from any seekable reader.
pub fn parse_metadata<R: Read + Seek>(mut reader: R) -> Result<GgufMetadata, GgufError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(map_eof)?;
    if magic != GGUF_MAGIC {
        return Err(GgufError::NotGguf { found: magic });
    }

    let version = read_u32(&mut reader)?;
    let tensor_count = read_u64(&mut reader)?;
    let kv_count = read_u64(&mut reader)?;

    let mut kv = BTreeMap::new();
    for _ in 0..kv_count.min(MAX_KV_PAIRS) {
        let key = match read_string(&mut reader) {
            Ok(key) => key,
            Err(_) => break,
        };
        let value_type = match read_u32(&mut reader) {
            Ok(t) => t,
            Err(_) => break,
        };
        match read_value(&mut reader, value_type) {
            Ok(Some(value)) => {
                kv.insert(key, value);
            }
            Ok(None) => {
                // Unskippable value; the stream position is unreliable now.
                debug!(key, value_type, "stopping GGUF metadata scan");
                break;
            }
            Err(_) => break,
        }
    }

    Ok(GgufMetadata {
        version,
        tensor_count,
        kv_count,
        kv,
    })
}

fn map_eof(e: std::io::Error) -> GgufError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        GgufError::Truncated
    } else {
        GgufError::Io(e)
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, GgufError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(map_eof)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, GgufError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(map_eof)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, GgufError> {
    let len = read_u64(reader)?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).map_err(map_eof)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Fixed byte width of a scalar value type, if it has one.
fn scalar_width(value_type: u32) -> Option<u64> {
    match value_type {
        0 | 1 | 7 => Some(1),
        2 | 3 => Some(2),
        4 | 5 | 6 => Some(4),
        10 | 11 | 12 => Some(8),
        _ => None,
    }
}

/// Read one metadata value. `Ok(None)` means the value cannot be read or
/// skipped and the scan must stop.
fn read_value<R: Read + Seek>(
    reader: &mut R,
    value_type: u32,
) -> Result<Option<GgufValue>, GgufError> {
    let value = match value_type {
        0 => GgufValue::U64(read_u8(reader)? as u64),
        1 => GgufValue::I64(read_u8(reader)? as i8 as i64),
        2 => GgufValue::U64(read_u16(reader)? as u64),
        3 => GgufValue::I64(read_u16(reader)? as i16 as i64),
        4 => GgufValue::U64(read_u32(reader)? as u64),
        5 => GgufValue::I64(read_u32(reader)? as i32 as i64),
        6 => {
            let bits = read_u32(reader)?;
            GgufValue::F64(f32::from_bits(bits) as f64)
        }
        7 => GgufValue::Bool(read_u8(reader)? != 0),
        8 => GgufValue::Str(read_string(reader)?),
        9 => {
            let elem_type = read_u32(reader)?;
            let len = read_u64(reader)?;
            if len > MAX_INLINE_ARRAY {
                if let Some(width) = scalar_width(elem_type) {
                    reader
                        .seek(SeekFrom::Current((len * width) as i64))
                        .map_err(GgufError::Io)?;
                } else if elem_type == 8 {
                    for _ in 0..len {
                        let slen = read_u64(reader)?;
                        reader
                            .seek(SeekFrom::Current(slen as i64))
                            .map_err(GgufError::Io)?;
                    }
                } else {
                    // Nested large arrays of arrays: no way to skip.
                    return Ok(None);
                }
                GgufValue::SkippedArray { len }
            } else {
                let mut values = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    match read_value(reader, elem_type)? {
                        Some(value) => values.push(value),
                        None => return Ok(None),
                    }
                }
                GgufValue::Values(values)
            }
        }
        10 => GgufValue::U64(read_u64(reader)?),
        11 => GgufValue::I64(read_u64(reader)? as i64),
        12 => {
            let bits = read_u64(reader)?;
            GgufValue::F64(f64::from_bits(bits))
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8, GgufError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).map_err(map_eof)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16, GgufError> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).map_err(map_eof)?;
    Ok(u16::from_le_bytes(buf))
}

/// Extract a quantization token from a GGUF filename.
///
/// `FP16`/`FP32` normalize to `F16`/`F32`.
pub fn quant_from_filename(filename: &str) -> Option<String> {
    use regex::Regex;
    use std::sync::OnceLock;

    static QUANT_RE: OnceLock<Regex> = OnceLock::new();
    static FP_RE: OnceLock<Regex> = OnceLock::new();

    let basename = filename.rsplit('/').next().unwrap_or(filename).to_lowercase();
    let quant = QUANT_RE
        .get_or_init(|| Regex::new(r"[_\-.]((?:iq|q|f)\d+(?:_[a-z0-9]+)*)").expect("quant regex"));
    let fp = FP_RE
        .get_or_init(|| Regex::new(r"[_\-.](fp16|fp32|bf16)").expect("fp regex"));

    if let Some(captures) = quant.captures(&basename) {
        return Some(captures[1].to_uppercase());
    }
    if let Some(captures) = fp.captures(&basename) {
        return Some(captures[1].to_uppercase().replace("FP", "F"));
    }
    None
}
