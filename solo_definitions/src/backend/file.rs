use std::fs;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::backend::{StorageBackend, StorageCapability, StorageError};
use crate::safety;
use super::super::Result;

const CAPABILITIES: &[StorageCapability] = &[
    StorageCapability::List,
    StorageCapability::ReadBytes,
    StorageCapability::WriteBytes,
    StorageCapability::Delete,
];

/// Storage over files directly inside a fixed base directory.
///
/// Keys are file names; listing is non-recursive and skips directories.
/// Every resolved path is confined to the base directory.
pub struct FileBackend {
    name: String,
    base: PathBuf,
}

impl FileBackend {
    pub fn new<P: AsRef<Path>>(base: P) -> Result<FileBackend> {
        let base = base.as_ref();
        if !base.is_dir() {
            bail!("storage directory {} does not exist", base.display());
        }
        Ok(FileBackend {
            name: format!("file:{}", base.display()),
            base: base.to_path_buf(),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve a key to a path inside the base directory.
    ///
    /// Existing entries are checked through the canonicalizing safe join;
    /// fresh keys only need to be single plain path components.
    fn resolve(&self, key: &str, must_exist: bool) -> Result<PathBuf> {
        let candidate = Path::new(key);
        let mut components = candidate.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => bail!("key '{}' is not a plain file name", key),
        }
        let path = self.base.join(key);
        if path.exists() {
            return safety::safe_join(&self.base, &[key]);
        }
        if must_exist {
            return Err(StorageError::ResourceNotFound(key.to_string()).into());
        }
        Ok(path)
    }
}

impl StorageBackend for FileBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[StorageCapability] {
        CAPABILITIES
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.base).min_depth(1).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file() {
                keys.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn read_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key, true)?;
        fs::read(&path)
            .map_err(|e| format_err!("{}: {}", StorageError::Backend(key.to_string()), e))
    }

    fn write_bytes(&mut self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key, false)?;
        fs::write(&path, data)
            .map_err(|e| format_err!("{}: {}", StorageError::Backend(key.to_string()), e))
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let path = self.resolve(key, true)?;
        fs::remove_file(&path)
            .map_err(|e| format_err!("{}: {}", StorageError::Backend(key.to_string()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_files_only_non_recursive() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), b"1").unwrap();
        fs::write(dir.path().join("b.yaml"), b"2").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.yaml"), b"3").unwrap();

        let backend = FileBackend::new(dir.path()).unwrap();
        assert_eq!(backend.list().unwrap(), vec!["a.yaml", "b.yaml"]);
    }

    #[test]
    fn roundtrips_bytes() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path()).unwrap();
        backend.write_bytes("doc.yaml", b"name: solo\n").unwrap();
        assert_eq!(backend.read_bytes("doc.yaml").unwrap(), b"name: solo\n");
        backend.delete("doc.yaml").unwrap();
        assert!(backend.read_bytes("doc.yaml").is_err());
    }

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        let err = backend.read_bytes("absent.yaml").unwrap_err();
        match err.downcast_ref::<StorageError>() {
            Some(StorageError::ResourceNotFound(k)) => assert_eq!(k, "absent.yaml"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn rejects_traversal_keys() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::new(dir.path()).unwrap();
        assert!(backend.write_bytes("../escape.yaml", b"x").is_err());
        assert!(backend.read_bytes("a/b.yaml").is_err());
    }
}
