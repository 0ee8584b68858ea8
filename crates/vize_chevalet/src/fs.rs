//! File access used by the pipeline.
//!
//! Hosts hand most sources to the plugin directly, but `src`-referenced blocks
//! and hot updates read from storage. Going through [`FileSystem`] lets a host
//! serve its own virtual files and lets tests run without touching disk.

use std::io;
use std::path::Path;

use dashmap::DashMap;
use vize_carton::normalize_path;

/// Read access to component sources.
pub trait FileSystem: Send + Sync {
    /// Read a file as UTF-8.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// The operating system file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// In-memory file system keyed by normalized path.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: DashMap<String, String>,
}

impl MemoryFileSystem {
    /// Create an empty file system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a file.
    pub fn write(&self, path: impl AsRef<str>, content: impl Into<String>) {
        self.files
            .insert(normalize_path(path.as_ref()), content.into());
    }

    /// Remove a file, returning whether it existed.
    pub fn remove(&self, path: impl AsRef<str>) -> bool {
        self.files.remove(&normalize_path(path.as_ref())).is_some()
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if no file is stored.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let key = normalize_path(&path.to_string_lossy());
        self.files
            .get(&key)
            .map(|content| content.value().clone())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("{} not found", key))
            })
    }
}

impl<F: FileSystem + ?Sized> FileSystem for std::sync::Arc<F> {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        (**self).read_to_string(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_fs_normalizes_keys() {
        let fs = MemoryFileSystem::new();
        fs.write("/src/./styles/../theme.css", ".a {}");
        assert_eq!(
            fs.read_to_string(Path::new("/src/theme.css")).unwrap(),
            ".a {}"
        );
        assert_eq!(fs.len(), 1);
    }

    #[test]
    fn test_memory_fs_missing_file() {
        let fs = MemoryFileSystem::new();
        let error = fs.read_to_string(Path::new("/nope.css")).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
        assert!(!fs.remove("/nope.css"));
    }

    #[test]
    fn test_os_fs_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("App.vue");
        std::fs::write(&path, "<template><div /></template>").unwrap();

        let content = OsFileSystem.read_to_string(&path).unwrap();
        assert_eq!(content, "<template><div /></template>");
    }
}
