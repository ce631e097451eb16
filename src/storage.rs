//! Blob storage for animal photos.
//!
//! Keys are relative, `/`-separated paths such as `animals/rex.jpg`.

use std::path::{Component, Path, PathBuf};

use crate::eid::Eid;

pub trait BlobStore: Send + Sync {
    fn write(&self, key: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, key: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, key: &str) -> bool;
    fn delete(&self, key: &str) -> std::io::Result<()>;
}

#[derive(Clone, Debug)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    /// Resolve a key to a path under `base_dir`, refusing anything that escapes it.
    fn resolve(&self, key: &str) -> std::io::Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));

        if key.is_empty() || escapes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid blob key {key:?}"),
            ));
        }

        Ok(self.base_dir.join(relative))
    }
}

impl BlobStore for BackendLocal {
    fn exists(&self, key: &str) -> bool {
        self.resolve(key)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    fn read(&self, key: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.resolve(key)?)
    }

    fn write(&self, key: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.resolve(key)?;
        let parent = path.parent().unwrap_or(&self.base_dir);
        std::fs::create_dir_all(parent)?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp_path = parent.join(format!(".{}-{file_name}", Eid::new()));

        std::fs::write(&temp_path, data)?;

        std::fs::rename(&temp_path, &path)
    }

    fn delete(&self, key: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.resolve(key)?)
    }
}
