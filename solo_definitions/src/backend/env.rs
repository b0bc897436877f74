use std::env;

use crate::backend::{StorageBackend, StorageCapability, StorageError};
use crate::keys;
use super::super::Result;

const CAPABILITIES: &[StorageCapability] =
    &[StorageCapability::List, StorageCapability::ReadBytes];

/// Read-only storage over the process environment.
///
/// An optional prefix (`SOLO_`) filters the variables and is stripped on
/// presentation, so `SOLO_DEPLOYMENT_NAME` lists as `deployment.name`.
pub struct EnvBackend {
    name: String,
    prefix: Option<String>,
}

impl EnvBackend {
    pub fn new(prefix: Option<&str>) -> EnvBackend {
        EnvBackend {
            name: match prefix {
                Some(p) => format!("env:{}", p),
                None => "env".to_string(),
            },
            prefix: prefix.map(|p| p.to_string()),
        }
    }
}

impl StorageBackend for EnvBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[StorageCapability] {
        CAPABILITIES
    }

    fn list(&self) -> Result<Vec<String>> {
        let prefix = self.prefix.as_ref().map(|p| p.as_str());
        let mut listed: Vec<String> = env::vars()
            .filter_map(|(name, _)| keys::from_env_key(&name, prefix))
            .collect();
        listed.sort();
        Ok(listed)
    }

    fn read_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let prefix = self.prefix.as_ref().map(|p| p.as_str());
        let name = keys::to_env_key(key, prefix);
        match env::var(&name) {
            Ok(v) => Ok(v.into_bytes()),
            Err(env::VarError::NotPresent) => {
                Err(StorageError::ResourceNotFound(key.to_string()).into())
            }
            Err(e) => Err(format_err!("{}: {}", StorageError::Backend(key.to_string()), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_prefixed_variables() {
        env::set_var("SOLO_TEST_DEPLOYMENT", "dual-cluster");
        let backend = EnvBackend::new(Some("SOLO_"));
        assert_eq!(
            backend.read_bytes("test.deployment").unwrap(),
            b"dual-cluster"
        );
        assert!(backend.list().unwrap().contains(&"test.deployment".to_string()));
        env::remove_var("SOLO_TEST_DEPLOYMENT");
    }

    #[test]
    fn writes_are_unsupported() {
        let mut backend = EnvBackend::new(Some("SOLO_"));
        assert!(!backend.is_supported(StorageCapability::WriteBytes));
        let err = backend.write_bytes("k", b"v").unwrap_err();
        match err.downcast_ref::<StorageError>() {
            Some(StorageError::UnsupportedOperation(op, _)) => assert_eq!(op, "writeBytes"),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(backend.delete("k").is_err());
    }

    #[test]
    fn missing_variable_is_not_found() {
        let backend = EnvBackend::new(Some("SOLO_"));
        assert!(backend.read_bytes("definitely.not.set").is_err());
    }
}
