use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use super::Result;

/// File directory backed storage
pub mod file;
pub use self::file::FileBackend;

/// Process environment backed storage
pub mod env;
pub use self::env::EnvBackend;

/// Operations a backend may declare support for.
///
/// Calling an undeclared operation fails with `UnsupportedOperation`; it is
/// never silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCapability {
    List,
    ReadBytes,
    WriteBytes,
    ReadObject,
    WriteObject,
    Delete,
}

impl fmt::Display for StorageCapability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            StorageCapability::List => "list",
            StorageCapability::ReadBytes => "readBytes",
            StorageCapability::WriteBytes => "writeBytes",
            StorageCapability::ReadObject => "readObject",
            StorageCapability::WriteObject => "writeObject",
            StorageCapability::Delete => "delete",
        };
        f.write_str(s)
    }
}

// All main errors that can happen from storage backends
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum StorageError {
    #[fail(display = "operation '{}' is not supported by the '{}' backend", _0, _1)]
    UnsupportedOperation(String, String),

    #[fail(display = "key '{}' was not found", _0)]
    ResourceNotFound(String),

    #[fail(display = "key '{}' has empty content", _0)]
    EmptyContent(String),

    #[fail(display = "storage backend failure on key '{}'", _0)]
    Backend(String),
}

pub(crate) fn unsupported(backend: &str, op: StorageCapability) -> failure::Error {
    StorageError::UnsupportedOperation(op.to_string(), backend.to_string()).into()
}

/// Uniform byte-oriented storage over some concrete medium.
///
/// Backends declare their capability set up front; the default method bodies
/// reject everything, so a backend only implements what it declares.
pub trait StorageBackend: Send {
    fn name(&self) -> &str;

    fn capabilities(&self) -> &[StorageCapability];

    fn is_supported(&self, op: StorageCapability) -> bool {
        self.capabilities().contains(&op)
    }

    /// List stored keys.
    fn list(&self) -> Result<Vec<String>> {
        Err(unsupported(self.name(), StorageCapability::List))
    }

    /// Read the raw bytes stored under a key.
    fn read_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let _ = key;
        Err(unsupported(self.name(), StorageCapability::ReadBytes))
    }

    /// Write raw bytes under a key, replacing previous content.
    fn write_bytes(&mut self, key: &str, data: &[u8]) -> Result<()> {
        let _ = (key, data);
        Err(unsupported(self.name(), StorageCapability::WriteBytes))
    }

    /// Remove a key.
    fn delete(&mut self, key: &str) -> Result<()> {
        let _ = key;
        Err(unsupported(self.name(), StorageCapability::Delete))
    }
}

/// YAML object layer over any byte backend.
///
/// Writes use stable (sorted) mapping keys so persisted documents diff
/// cleanly between saves.
pub struct YamlStore<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> YamlStore<B> {
    pub fn new(backend: B) -> YamlStore<B> {
        YamlStore { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_supported(&self, op: StorageCapability) -> bool {
        match op {
            StorageCapability::ReadObject => {
                self.backend.is_supported(StorageCapability::ReadBytes)
            }
            StorageCapability::WriteObject => {
                self.backend.is_supported(StorageCapability::WriteBytes)
            }
            other => self.backend.is_supported(other),
        }
    }

    pub fn read_value(&self, key: &str) -> Result<Value> {
        if !self.is_supported(StorageCapability::ReadObject) {
            return Err(unsupported(self.backend.name(), StorageCapability::ReadObject));
        }
        let bytes = self.backend.read_bytes(key)?;
        if bytes.is_empty() {
            return Err(StorageError::EmptyContent(key.to_string()).into());
        }
        serde_yaml::from_slice(&bytes)
            .map_err(|e| format_err!("{}: {}", StorageError::Backend(key.to_string()), e))
    }

    pub fn read_object<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.read_value(key)?;
        serde_yaml::from_value(value)
            .map_err(|e| format_err!("{}: {}", StorageError::Backend(key.to_string()), e))
    }

    pub fn write_object<T: Serialize>(&mut self, key: &str, object: &T) -> Result<()> {
        if !self.is_supported(StorageCapability::WriteObject) {
            return Err(unsupported(self.backend.name(), StorageCapability::WriteObject));
        }
        let value = serde_yaml::to_value(object)?;
        let text = serde_yaml::to_string(&sort_mappings(value))?;
        self.backend.write_bytes(key, text.as_bytes())
    }
}

/// Rebuild every mapping with keys in sorted order.
fn sort_mappings(value: Value) -> Value {
    match value {
        Value::Mapping(m) => {
            let mut pairs: Vec<(Value, Value)> =
                m.into_iter().map(|(k, v)| (k, sort_mappings(v))).collect();
            pairs.sort_by_key(|(k, _)| serde_yaml::to_string(k).unwrap_or_default());
            let mut sorted = Mapping::new();
            for (k, v) in pairs {
                sorted.insert(k, v);
            }
            Value::Mapping(sorted)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(sort_mappings).collect()),
        scalar => scalar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct ReadOnly {
        entries: BTreeMap<String, Vec<u8>>,
    }

    impl StorageBackend for ReadOnly {
        fn name(&self) -> &str {
            "read-only"
        }
        fn capabilities(&self) -> &[StorageCapability] {
            &[StorageCapability::List, StorageCapability::ReadBytes]
        }
        fn list(&self) -> Result<Vec<String>> {
            Ok(self.entries.keys().cloned().collect())
        }
        fn read_bytes(&self, key: &str) -> Result<Vec<u8>> {
            self.entries
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::ResourceNotFound(key.to_string()).into())
        }
    }

    #[test]
    fn undeclared_operations_fail() {
        let mut backend = ReadOnly {
            entries: BTreeMap::new(),
        };
        assert!(!backend.is_supported(StorageCapability::WriteBytes));
        let err = backend.write_bytes("k", b"v").unwrap_err();
        match err.downcast_ref::<StorageError>() {
            Some(StorageError::UnsupportedOperation(op, name)) => {
                assert_eq!(op, "writeBytes");
                assert_eq!(name, "read-only");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(backend.delete("k").is_err());
    }

    #[derive(Deserialize, Debug, PartialEq)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn yaml_store_reads_objects() {
        let mut entries = BTreeMap::new();
        entries.insert("doc".to_string(), b"name: solo\ncount: 2\n".to_vec());
        let store = YamlStore::new(ReadOnly { entries });
        let value = store.read_value("doc").unwrap();
        assert_eq!(value["name"], Value::String("solo".into()));
        let doc: Doc = store.read_object("doc").unwrap();
        assert_eq!(
            doc,
            Doc {
                name: "solo".to_string(),
                count: 2
            }
        );
    }

    #[test]
    fn yaml_store_rejects_empty_content() {
        let mut entries = BTreeMap::new();
        entries.insert("doc".to_string(), Vec::new());
        let store = YamlStore::new(ReadOnly { entries });
        let err = store.read_value("doc").unwrap_err();
        assert!(err.downcast_ref::<StorageError>().is_some());
    }

    #[test]
    fn yaml_store_write_needs_capability() {
        let mut store = YamlStore::new(ReadOnly {
            entries: BTreeMap::new(),
        });
        assert!(store.write_object("doc", &Value::Null).is_err());
    }

    #[test]
    fn mappings_are_sorted_on_write() {
        let value: Value = serde_yaml::from_str("b: 1\na: 2\n").unwrap();
        let sorted = sort_mappings(value);
        let text = serde_yaml::to_string(&sorted).unwrap();
        let a = text.find("a:").unwrap();
        let b = text.find("b:").unwrap();
        assert!(a < b);
    }
}
