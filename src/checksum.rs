//! Content digests for files and directory trees.
//!
//! SHA-256 everywhere; digests are the change-detection and integrity
//! primitive for the whole backup subsystem.

use crate::fs::walker::{walk_directory, WalkOptions};
use crate::utils::errors::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Read block size for streaming digests
const BLOCK_SIZE: usize = 4096;

/// Token folded into a directory digest in place of an unreadable file's
/// content, so the digest stays defined under partial permission failures.
const UNREADABLE_TOKEN: &[u8] = b"<UNREADABLE>";

/// Streaming SHA-256 of a single file's bytes.
pub fn digest_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BLOCK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 over an entire directory tree.
///
/// Files are visited in lexicographic order of their root-relative paths;
/// each file's relative path string is folded in before its content bytes so
/// that renames change the digest. Unreadable files fold in a fixed sentinel
/// token instead of aborting.
pub fn digest_directory(root: &Path) -> Result<String> {
    let mut files = walk_directory(root, &WalkOptions::default())?;
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let mut hasher = Sha256::new();
    for file in &files {
        hasher.update(file.relative_path.to_string_lossy().as_bytes());

        match File::open(&file.path) {
            Ok(mut f) => {
                let mut buffer = [0u8; BLOCK_SIZE];
                loop {
                    let bytes_read = f.read(&mut buffer)?;
                    if bytes_read == 0 {
                        break;
                    }
                    hasher.update(&buffer[..bytes_read]);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Unreadable file in directory digest: {} ({})",
                    file.path.display(),
                    e
                );
                hasher.update(UNREADABLE_TOKEN);
            }
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_digest_file_is_stable() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, b"hello").unwrap();

        let first = digest_file(&path)?;
        let second = digest_file(&path)?;
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        Ok(())
    }

    #[test]
    fn test_digest_file_changes_with_content() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");

        fs::write(&path, b"hello").unwrap();
        let before = digest_file(&path)?;

        fs::write(&path, b"hellp").unwrap();
        let after = digest_file(&path)?;

        assert_ne!(before, after);
        Ok(())
    }

    #[test]
    fn test_digest_file_missing_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(digest_file(&temp_dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_digest_directory_sensitive_to_rename() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"same").unwrap();
        let before = digest_directory(temp_dir.path())?;

        fs::rename(
            temp_dir.path().join("a.txt"),
            temp_dir.path().join("b.txt"),
        )
        .unwrap();
        let after = digest_directory(temp_dir.path())?;

        assert_ne!(before, after);
        Ok(())
    }

    #[test]
    fn test_digest_directory_order_independent_of_creation() -> Result<()> {
        // Same set of files written in different orders digests identically.
        let dir_a = TempDir::new().unwrap();
        fs::write(dir_a.path().join("1.txt"), b"one").unwrap();
        fs::write(dir_a.path().join("2.txt"), b"two").unwrap();

        let dir_b = TempDir::new().unwrap();
        fs::write(dir_b.path().join("2.txt"), b"two").unwrap();
        fs::write(dir_b.path().join("1.txt"), b"one").unwrap();

        assert_eq!(digest_directory(dir_a.path())?, digest_directory(dir_b.path())?);
        Ok(())
    }
}
