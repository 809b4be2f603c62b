//! Content fingerprinting and stable file identities.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Streaming SHA-256 of a file's content, lowercase hex. Memory stays
/// bounded regardless of file size.
pub fn content_fingerprint(path: &Path) -> Result<String> {
    let file = File::open(path)
        .map_err(|e| PipelineError::io(format!("cannot open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 64 * 1024];
    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| PipelineError::io(format!("cannot read {}: {e}", path.display())))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Stable identity of a file within a job: md5 of its relative path.
/// Survives re-runs, so re-indexing upserts instead of duplicating.
pub fn file_id(relative_path: &str) -> String {
    format!("{:x}", md5::compute(relative_path.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello world").unwrap();
        let hash = content_fingerprint(&path).unwrap();
        assert_eq!(hash.len(), 64);
        // Known digest of "hello world".
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_identical_content_identical_fingerprint() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, vec![7u8; 200_000]).unwrap();
        std::fs::write(&b, vec![7u8; 200_000]).unwrap();
        assert_eq!(
            content_fingerprint(&a).unwrap(),
            content_fingerprint(&b).unwrap()
        );
    }

    #[test]
    fn test_file_id_is_path_stable() {
        assert_eq!(file_id("docs/report.pdf"), file_id("docs/report.pdf"));
        assert_ne!(file_id("docs/report.pdf"), file_id("docs/report2.pdf"));
        assert_eq!(file_id("a").len(), 32);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = content_fingerprint(Path::new("/nonexistent/x")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Io);
    }
}
