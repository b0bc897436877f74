use std::collections::BTreeMap;
use std::sync::Arc;

use solo_definitions::backend::{StorageBackend, StorageCapability, StorageError};
use solo_definitions::Result;

use crate::kube::{self, Kube, ResourceRef};

const CAPABILITIES: &[StorageCapability] = &[
    StorageCapability::List,
    StorageCapability::ReadBytes,
    StorageCapability::WriteBytes,
    StorageCapability::Delete,
];

/// Storage over a named config-map in a known namespace and context.
///
/// Each storage key is one `data` entry; the remote state document lives in
/// a single entry as a serialized blob.
pub struct ConfigMapBackend {
    name: String,
    kube: Arc<Kube>,
    reference: ResourceRef,
}

impl ConfigMapBackend {
    pub fn new(kube: Arc<Kube>, reference: ResourceRef) -> ConfigMapBackend {
        ConfigMapBackend {
            name: format!("config-map:{}", reference),
            kube,
            reference,
        }
    }

    pub fn reference(&self) -> &ResourceRef {
        &self.reference
    }

    fn read_map(&self) -> Result<Option<BTreeMap<String, String>>> {
        match self.kube.config_maps().read(&self.reference) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                if kube::is_not_found(&e) {
                    Ok(None)
                } else {
                    Err(format_err!(
                        "{}: {}",
                        StorageError::Backend(self.reference.to_string()),
                        e
                    ))
                }
            }
        }
    }

    fn write_map(&self, existed: bool, data: BTreeMap<String, String>) -> Result<()> {
        let outcome = if existed {
            self.kube.config_maps().replace(&self.reference, data)
        } else {
            self.kube
                .config_maps()
                .create(&self.reference, BTreeMap::new(), data)
        };
        outcome.map_err(|e| {
            format_err!(
                "{}: {}",
                StorageError::Backend(self.reference.to_string()),
                e
            )
        })
    }
}

impl StorageBackend for ConfigMapBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[StorageCapability] {
        CAPABILITIES
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .read_map()?
            .map(|data| data.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn read_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let data = self
            .read_map()?
            .ok_or_else(|| StorageError::ResourceNotFound(key.to_string()))?;
        data.get(key)
            .map(|v| v.clone().into_bytes())
            .ok_or_else(|| StorageError::ResourceNotFound(key.to_string()).into())
    }

    fn write_bytes(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|e| format_err!("{}: {}", StorageError::Backend(key.to_string()), e))?;
        let (existed, mut data) = match self.read_map()? {
            Some(data) => (true, data),
            None => (false, BTreeMap::new()),
        };
        data.insert(key.to_string(), text);
        self.write_map(existed, data)
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let mut data = self
            .read_map()?
            .ok_or_else(|| StorageError::ResourceNotFound(key.to_string()))?;
        if data.remove(key).is_none() {
            return Err(StorageError::ResourceNotFound(key.to_string()).into());
        }
        self.write_map(true, data)
    }
}
