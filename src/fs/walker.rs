//! Directory traversal with exclusion rules.
//!
//! Shared by backup creation (full-tree scans honoring the configured
//! exclusions) and the incremental change tracker (extension-filtered scans).

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Directory names excluded wherever they appear as a path component
    pub exclude_dirs: Vec<String>,

    /// Filename substrings to exclude
    pub exclude_patterns: Vec<String>,

    /// When non-empty, only files with one of these extensions are returned
    pub extensions: Vec<String>,
}

impl WalkOptions {
    pub fn from_exclusions(exclude_dirs: &[String], exclude_patterns: &[String]) -> Self {
        Self {
            exclude_dirs: exclude_dirs.to_vec(),
            exclude_patterns: exclude_patterns.to_vec(),
            extensions: Vec::new(),
        }
    }

    pub fn with_extensions(extensions: &[String]) -> Self {
        Self {
            exclude_dirs: Vec::new(),
            exclude_patterns: Vec::new(),
            extensions: extensions.to_vec(),
        }
    }

    /// Whether a path should be skipped under these options.
    /// Used both during walks and as the archive exclusion predicate.
    pub fn is_excluded(&self, path: &Path) -> bool {
        for component in path.components() {
            let name = component.as_os_str().to_string_lossy();
            if self.exclude_dirs.iter().any(|d| d == name.as_ref()) {
                return true;
            }
        }

        if let Some(file_name) = path.file_name() {
            let name = file_name.to_string_lossy();
            if self.exclude_patterns.iter().any(|p| name.contains(p.as_str())) {
                return true;
            }
        }

        false
    }

    fn matches_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                self.extensions.iter().any(|e| e == ext.as_ref())
            })
            .unwrap_or(false)
    }
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// Symlinks are resolved to their target; broken symlinks and symlinks to
    /// directories are skipped.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let raw_metadata = entry.metadata().map_err(std::io::Error::other)?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        let size = if raw_metadata.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if !resolved.is_dir() => resolved.len(),
                _ => return Ok(None),
            }
        } else {
            raw_metadata.len()
        };

        Ok(Some(Self {
            path,
            relative_path,
            size,
        }))
    }
}

/// Walk a directory tree and collect all files matching the options.
///
/// Unreadable entries are skipped (and logged) rather than failing the walk;
/// backup operations must survive partial permission failures.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(false).into_iter();
    let opts = options.clone();

    for entry in walker.filter_entry(|e| {
        // Keep the root itself even if its name matches an exclusion
        e.depth() == 0 || !opts.is_excluded(e.path())
    }) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry during walk: {}", e);
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        if !options.matches_extension(entry.path()) {
            continue;
        }

        if let Some(file_info) = FileInfo::from_entry(&entry, root)? {
            files.push(file_info);
        }
    }

    Ok(files)
}

/// Calculate total size of all files in a directory
pub fn calculate_total_size(root: &Path, options: &WalkOptions) -> std::io::Result<u64> {
    Ok(walk_directory(root, options)?.iter().map(|f| f.size).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_collects_nested_files() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content2")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn test_exclude_dirs_prunes_subtree() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("node_modules"))?;
        fs::write(temp_dir.path().join("node_modules/dep.js"), b"x")?;
        fs::write(temp_dir.path().join("app.js"), b"y")?;

        let options =
            WalkOptions::from_exclusions(&["node_modules".to_string()], &[]);
        let files = walk_directory(temp_dir.path(), &options)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path.to_str().unwrap(), "app.js");
        Ok(())
    }

    #[test]
    fn test_exclude_patterns_match_filenames() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("file.txt"), b"keep")?;
        fs::write(temp_dir.path().join(".DS_Store"), b"exclude")?;

        let options = WalkOptions::from_exclusions(&[], &[".DS_Store".to_string()]);
        let files = walk_directory(temp_dir.path(), &options)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path.to_str().unwrap(), "file.txt");
        Ok(())
    }

    #[test]
    fn test_extension_filter() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("main.py"), b"print()")?;
        fs::write(temp_dir.path().join("data.bin"), b"\x00\x01")?;

        let options = WalkOptions::with_extensions(&["py".to_string()]);
        let files = walk_directory(temp_dir.path(), &options)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path.to_str().unwrap(), "main.py");
        Ok(())
    }

    #[test]
    fn test_calculate_total_size() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("file1.txt"), b"12345")?;
        fs::write(temp_dir.path().join("file2.txt"), b"1234567")?;

        let total = calculate_total_size(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(total, 12);
        Ok(())
    }
}
