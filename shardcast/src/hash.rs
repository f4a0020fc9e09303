//! SHA-256 helpers shared by the packager, stores, and resolver.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Buffer size for streamed hashing (64 KiB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Hex-encoded SHA-256 of an in-memory buffer.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hex-encoded SHA-256 of a file, streamed so multi-gigabyte artifacts
/// never land in memory whole.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// First `len` hex characters of the SHA-256 of a string key.
///
/// Used to derive stable cache paths from source URLs and source keys.
pub fn key_prefix(key: &str, len: usize) -> String {
    let mut hex = sha256_hex(key.as_bytes());
    hex.truncate(len);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_hex_known_vector() {
        // SHA-256 of "hello world"
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha256_file_matches_buffer_hash() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("payload.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"hello world").unwrap();
        drop(file);

        assert_eq!(sha256_file(&path).unwrap(), sha256_hex(b"hello world"));
    }

    #[test]
    fn test_key_prefix_length_and_stability() {
        let a = key_prefix("https://cdn.example.com/pkg", 16);
        let b = key_prefix("https://cdn.example.com/pkg", 16);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, key_prefix("https://cdn.example.com/other", 16));
    }
}
