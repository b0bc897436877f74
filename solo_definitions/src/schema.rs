use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::version::VersionRange;
use super::Result;

/// Document key carrying the schema version.
pub const VERSION_KEY: &str = "schemaVersion";

// All main errors that can happen from the schema layer
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum SchemaError {
    #[fail(display = "schema '{}' failed validation: {}", _0, _1)]
    Validation(String, String),

    #[fail(display = "schema '{}' migration failed: {}", _0, _1)]
    Migration(String, String),

    #[fail(display = "schema '{}' cannot handle document version '{}'", _0, _1)]
    InvalidVersion(String, String),
}

/// One step of the forward migration pipeline.
///
/// A migration accepts documents whose version lies in `range` ([from, to))
/// and leaves them at `version`. Migrations always see a private copy of the
/// document; the caller's input is never mutated.
pub trait SchemaMigration: Send + Sync {
    fn range(&self) -> VersionRange;

    fn version(&self) -> u32;

    fn migrate(&self, doc: &mut Mapping) -> Result<()>;
}

/// A versioned document schema bound to its typed model.
pub struct Schema<T> {
    name: String,
    version: u32,
    migrations: Vec<Box<dyn SchemaMigration>>,
    _model: PhantomData<fn() -> T>,
}

impl<T> Schema<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(name: &str, version: u32, migrations: Vec<Box<dyn SchemaMigration>>) -> Schema<T> {
        Schema {
            name: name.to_string(),
            version,
            migrations,
            _model: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    fn invalid(&self, reason: String) -> failure::Error {
        SchemaError::Validation(self.name.clone(), reason).into()
    }

    /// Pre-use invariant over the declared migrations.
    ///
    /// The resulting versions must be unique, and walking forward from
    /// version 0 by always taking the lowest eligible migration must land
    /// exactly on the current version. Runs before any data is migrated.
    pub fn validate_migrations(&self) -> Result<()> {
        let mut versions: Vec<u32> = self.migrations.iter().map(|m| m.version()).collect();
        versions.sort_unstable();
        for pair in versions.windows(2) {
            if pair[0] == pair[1] {
                return Err(self.invalid(format!(
                    "duplicate migration resulting version '{}'",
                    pair[0]
                )));
            }
        }

        let mut version = 0;
        while version < self.version {
            let next = self
                .migrations
                .iter()
                .filter(|m| m.range().contains(version))
                .min_by_key(|m| m.version());
            let next = match next {
                Some(m) => m,
                None => {
                    return Err(
                        self.invalid(format!("No migration found for version '{}'", version))
                    );
                }
            };
            if next.version() <= version {
                return Err(self.invalid(format!(
                    "migration for version '{}' does not advance (results in '{}')",
                    version,
                    next.version()
                )));
            }
            version = next.version();
        }
        if version != self.version {
            return Err(self.invalid(format!(
                "migrations overshoot current version ('{}' > '{}')",
                version, self.version
            )));
        }
        Ok(())
    }

    /// Migrate a plain document forward and instantiate the model.
    ///
    /// Never partial: either the document reaches the current version and
    /// deserializes, or the whole transform fails.
    pub fn transform(&self, value: &Value) -> Result<T> {
        let mut doc = match value {
            Value::Mapping(m) => m.clone(),
            _ => {
                return Err(SchemaError::Migration(
                    self.name.clone(),
                    "document is not a mapping".to_string(),
                )
                .into());
            }
        };

        loop {
            let version = self.document_version(&doc)?;
            if version == self.version {
                break;
            }
            let migration = self
                .migrations
                .iter()
                .filter(|m| m.range().contains(version))
                .min_by_key(|m| m.version());
            let migration = match migration {
                Some(m) => m,
                None => {
                    return Err(SchemaError::Migration(
                        self.name.clone(),
                        format!("no migration found for version '{}'", version),
                    )
                    .into());
                }
            };
            migration.migrate(&mut doc)?;
            doc.insert(
                Value::String(VERSION_KEY.to_string()),
                Value::Number(migration.version().into()),
            );
        }

        serde_yaml::from_value(Value::Mapping(doc)).map_err(|e| {
            SchemaError::Migration(self.name.clone(), format!("model instantiation: {}", e)).into()
        })
    }

    /// Serialize a model back to a plain document stamped with the current
    /// schema version.
    pub fn encode(&self, model: &T) -> Result<Value> {
        let value = serde_yaml::to_value(model)?;
        let mut doc = match value {
            Value::Mapping(m) => m,
            _ => {
                return Err(SchemaError::Migration(
                    self.name.clone(),
                    "model did not serialize to a mapping".to_string(),
                )
                .into());
            }
        };
        doc.insert(
            Value::String(VERSION_KEY.to_string()),
            Value::Number(self.version.into()),
        );
        Ok(Value::Mapping(doc))
    }

    fn document_version(&self, doc: &Mapping) -> Result<u32> {
        let raw = match doc.get(&Value::String(VERSION_KEY.to_string())) {
            None => return Ok(0),
            Some(v) => v,
        };
        let version = match raw {
            Value::Number(n) => n.as_u64(),
            _ => None,
        };
        let version = version.ok_or_else(|| {
            SchemaError::InvalidVersion(self.name.clone(), format!("{:?}", raw))
        })?;
        if version > u64::from(self.version) {
            return Err(SchemaError::InvalidVersion(
                self.name.clone(),
                version.to_string(),
            )
            .into());
        }
        Ok(version as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Doc {
        schemaVersion: u32,
        name: String,
        #[serde(default)]
        renamed: bool,
    }

    struct Step {
        range: VersionRange,
        version: u32,
    }

    impl SchemaMigration for Step {
        fn range(&self) -> VersionRange {
            self.range
        }
        fn version(&self) -> u32 {
            self.version
        }
        fn migrate(&self, doc: &mut Mapping) -> Result<()> {
            doc.insert(Value::String("renamed".into()), Value::Bool(true));
            Ok(())
        }
    }

    fn step(from: u32, to: u32, version: u32) -> Box<dyn SchemaMigration> {
        Box::new(Step {
            range: VersionRange::new(from, to).unwrap(),
            version,
        })
    }

    #[test]
    fn validates_unbroken_chain() {
        let schema: Schema<Doc> = Schema::new("doc", 2, vec![step(0, 1, 1), step(1, 2, 2)]);
        schema.validate_migrations().unwrap();
    }

    #[test]
    fn gap_in_chain_fails_validation() {
        let schema: Schema<Doc> = Schema::new("doc", 3, vec![step(0, 1, 1), step(2, 3, 3)]);
        let err = schema.validate_migrations().unwrap_err();
        assert!(err
            .to_string()
            .contains("No migration found for version '1'"));
    }

    #[test]
    fn duplicate_resulting_version_fails_validation() {
        let schema: Schema<Doc> = Schema::new("doc", 2, vec![step(0, 1, 2), step(1, 2, 2)]);
        assert!(schema.validate_migrations().is_err());
    }

    #[test]
    fn transform_walks_to_current_version() {
        let schema: Schema<Doc> = Schema::new("doc", 2, vec![step(0, 1, 1), step(1, 2, 2)]);
        let input: Value = serde_yaml::from_str("name: solo\n").unwrap();
        let doc = schema.transform(&input).unwrap();
        assert_eq!(doc.schemaVersion, 2);
        assert!(doc.renamed);
        // caller's document is untouched
        assert_eq!(input, serde_yaml::from_str::<Value>("name: solo\n").unwrap());
    }

    #[test]
    fn transform_is_idempotent_at_current_version() {
        let schema: Schema<Doc> = Schema::new("doc", 2, vec![step(0, 1, 1), step(1, 2, 2)]);
        let input: Value = serde_yaml::from_str("schemaVersion: 2\nname: solo\n").unwrap();
        let doc = schema.transform(&input).unwrap();
        assert!(!doc.renamed);
    }

    #[test]
    fn newer_document_than_schema_fails() {
        let schema: Schema<Doc> = Schema::new("doc", 1, vec![step(0, 1, 1)]);
        let input: Value = serde_yaml::from_str("schemaVersion: 5\nname: solo\n").unwrap();
        let err = schema.transform(&input).unwrap_err();
        assert!(err.downcast_ref::<SchemaError>().is_some());
    }

    #[test]
    fn stuck_transform_fails_loudly() {
        // declared chain has a hole at 1; a version-1 document cannot advance
        let schema: Schema<Doc> = Schema::new("doc", 3, vec![step(0, 1, 1), step(2, 3, 3)]);
        let input: Value = serde_yaml::from_str("schemaVersion: 1\nname: solo\n").unwrap();
        assert!(schema.transform(&input).is_err());
    }

    #[test]
    fn encode_stamps_current_version() {
        let schema: Schema<Doc> = Schema::new("doc", 2, vec![step(0, 1, 1), step(1, 2, 2)]);
        let doc = Doc {
            schemaVersion: 2,
            name: "solo".into(),
            renamed: false,
        };
        let value = schema.encode(&doc).unwrap();
        assert_eq!(value[VERSION_KEY], Value::Number(2.into()));
    }
}
