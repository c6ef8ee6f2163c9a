//! Filesystem side of storage: extracted text and the raw-document cache.

use std::path::{Path, PathBuf};

use manualforge_shared::{ManualForgeError, Result, sanitize_title};
use tracing::debug;
use uuid::Uuid;

/// Keyed text storage for extracted manuals.
pub trait ContentStore: Send + Sync {
    /// Store `text` under `key`, replacing any previous content.
    fn write(&self, key: &str, text: &str) -> Result<()>;

    /// Read back the text stored under `key`.
    fn read(&self, key: &str) -> Result<String>;
}

/// [`ContentStore`] writing one file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `key`, refusing keys that would escape the root.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

impl ContentStore for FsContentStore {
    fn write(&self, key: &str, text: &str) -> Result<()> {
        let target = self.path_for(key)?;
        std::fs::create_dir_all(&self.root).map_err(|e| ManualForgeError::io(&self.root, e))?;

        // Unique temp name: two records may share a key.
        let temp = self.root.join(format!(".{key}.{}.tmp", Uuid::now_v7()));
        std::fs::write(&temp, text).map_err(|e| ManualForgeError::io(&temp, e))?;

        if let Err(e) = std::fs::rename(&temp, &target) {
            let _ = std::fs::remove_file(&temp);
            return Err(ManualForgeError::io(&target, e));
        }

        debug!(key, size = text.len(), "wrote content");
        Ok(())
    }

    fn read(&self, key: &str) -> Result<String> {
        let path = self.path_for(key)?;
        std::fs::read_to_string(&path).map_err(|e| ManualForgeError::io(&path, e))
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key == "." || key == ".." {
        return Err(ManualForgeError::validation(format!(
            "invalid content key '{key}'"
        )));
    }
    if key.contains(['/', '\\', '\0']) {
        return Err(ManualForgeError::validation(format!(
            "content key '{key}' must not contain path separators"
        )));
    }
    Ok(())
}

/// Optional on-disk copy of fetched documents, kept for debugging.
#[derive(Debug, Clone)]
pub struct RawCache {
    dir: PathBuf,
}

impl RawCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Where the raw document for `title` is kept.
    pub fn path_for(&self, title: &str) -> PathBuf {
        self.dir.join(format!("{}.pdf", sanitize_title(title)))
    }

    /// Save the fetched bytes for `title`, returning the written path.
    pub fn store(&self, title: &str, bytes: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| ManualForgeError::io(&self.dir, e))?;
        let path = self.path_for(title);
        std::fs::write(&path, bytes).map_err(|e| ManualForgeError::io(&path, e))?;
        debug!(path = %path.display(), size = bytes.len(), "cached raw document");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("mf_content_{}", Uuid::now_v7()))
    }

    #[test]
    fn write_then_read_overwrites() {
        let dir = temp_dir();
        let store = FsContentStore::new(&dir);

        store.write("Manual.txt", "first").expect("write");
        store.write("Manual.txt", "second").expect("overwrite");
        assert_eq!(store.read("Manual.txt").unwrap(), "second");

        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rejects_escaping_keys() {
        let store = FsContentStore::new(temp_dir());
        assert!(store.write("../evil.txt", "x").is_err());
        assert!(store.write("a\\b.txt", "x").is_err());
        assert!(store.write("..", "x").is_err());
        assert!(store.write("", "x").is_err());
    }

    #[test]
    fn missing_key_is_io_error() {
        let store = FsContentStore::new(temp_dir());
        let err = store.read("absent.txt").unwrap_err();
        assert!(matches!(err, ManualForgeError::Io { .. }));
    }

    #[test]
    fn raw_cache_uses_sanitized_title() {
        let dir = temp_dir();
        let cache = RawCache::new(&dir);
        let path = cache.store("BMW 3 Saloon (E90)", b"%PDF-1.5").expect("store");
        assert_eq!(path, dir.join("BMW_3_Saloon_(E90).pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.5");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
