use std::collections::BTreeMap;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use serde::de::DeserializeOwned;
use serde_yaml::Value;

use crate::backend::{EnvBackend, StorageBackend};
use crate::forest::{self, Forest};
use crate::keys;
use super::Result;

// All main errors that can happen from configuration lookup
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ConfigError {
    #[fail(display = "required key '{}' is not defined", _0)]
    MissingKey(String),

    #[fail(display = "key '{}' does not hold a {} (found '{}')", _0, _1, _2)]
    WrongType(String, String, String),

    #[fail(display = "refresh failed for {} source(s): {}", _0, _1)]
    RefreshFailed(usize, String),

    #[fail(display = "no mutable source accepts writes for key '{}'", _0)]
    Immutable(String),
}

/// One provider of flat configuration properties.
///
/// The ordinal decides precedence between sources: higher wins. `load` is a
/// pure read of the backing medium; the layered view owns the caching.
pub trait ConfigSource: Send {
    fn name(&self) -> &str;

    fn ordinal(&self) -> i32;

    fn load(&self) -> Result<BTreeMap<String, String>>;

    fn is_refreshable(&self) -> bool {
        false
    }

    fn is_mutable(&self) -> bool {
        false
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        let _ = value;
        Err(ConfigError::Immutable(key.to_string()).into())
    }
}

/// In-memory source, used for defaults and for argv overlays.
pub struct MapSource {
    name: String,
    ordinal: i32,
    entries: BTreeMap<String, String>,
}

impl MapSource {
    pub fn new(name: &str, ordinal: i32) -> MapSource {
        MapSource {
            name: name.to_string(),
            ordinal,
            entries: BTreeMap::new(),
        }
    }

    pub fn with_entries(
        name: &str,
        ordinal: i32,
        entries: BTreeMap<String, String>,
    ) -> MapSource {
        MapSource {
            name: name.to_string(),
            ordinal,
            entries,
        }
    }
}

impl ConfigSource for MapSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn ordinal(&self) -> i32 {
        self.ordinal
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.entries.clone())
    }

    fn is_mutable(&self) -> bool {
        true
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries
            .insert(keys::normalize(key), value.to_string());
        Ok(())
    }
}

/// Environment-variable source over the env backend.
pub struct EnvSource {
    ordinal: i32,
    backend: EnvBackend,
}

impl EnvSource {
    pub fn new(ordinal: i32, prefix: Option<&str>) -> EnvSource {
        EnvSource {
            ordinal,
            backend: EnvBackend::new(prefix),
        }
    }
}

impl ConfigSource for EnvSource {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn ordinal(&self) -> i32 {
        self.ordinal
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        let mut entries = BTreeMap::new();
        for key in self.backend.list()? {
            let bytes = self.backend.read_bytes(&key)?;
            entries.insert(key, String::from_utf8_lossy(&bytes).to_string());
        }
        Ok(entries)
    }

    fn is_refreshable(&self) -> bool {
        true
    }
}

/// YAML file source; the document is flattened into dotted keys.
///
/// A missing file loads as empty so optional override files stay optional.
pub struct YamlFileSource {
    name: String,
    ordinal: i32,
    path: PathBuf,
}

impl YamlFileSource {
    pub fn new<P: AsRef<Path>>(name: &str, ordinal: i32, path: P) -> YamlFileSource {
        YamlFileSource {
            name: name.to_string(),
            ordinal,
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ConfigSource for YamlFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn ordinal(&self) -> i32 {
        self.ordinal
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            debug!("config file {} absent, loading empty", self.path.display());
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let value: Value = serde_yaml::from_str(&text)?;
        forest::flatten_value(&value)
    }

    fn is_refreshable(&self) -> bool {
        true
    }
}

struct Layer {
    source: Box<dyn ConfigSource>,
    cache: BTreeMap<String, String>,
}

/// Composition of sources into one precedence-ordered view.
///
/// Sources are sorted ascending by ordinal on construction; lookups walk
/// from the top. Typed accessors apply the leaf coercion rules of the
/// forest module.
pub struct LayeredConfig {
    layers: Vec<Layer>,
}

impl LayeredConfig {
    pub fn new(sources: Vec<Box<dyn ConfigSource>>) -> Result<LayeredConfig> {
        let mut sources = sources;
        sources.sort_by_key(|s| s.ordinal());
        let mut layers = Vec::with_capacity(sources.len());
        for source in sources {
            let cache = source.load()?;
            layers.push(Layer { source, cache });
        }
        Ok(LayeredConfig { layers })
    }

    /// All keys and effective values, later sources overwriting earlier.
    pub fn merged(&self) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for layer in &self.layers {
            for (k, v) in &layer.cache {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    /// The effective raw value for a key, if any source defines it.
    pub fn value(&self, key: &str) -> Option<String> {
        let key = keys::normalize(key);
        for layer in self.layers.iter().rev() {
            if let Some(v) = layer.cache.get(&key) {
                return Some(v.clone());
            }
        }
        None
    }

    /// Which source currently defines a key; diagnostics only.
    pub fn origin_of(&self, key: &str) -> Option<&str> {
        let key = keys::normalize(key);
        for layer in self.layers.iter().rev() {
            if layer.cache.contains_key(&key) {
                return Some(layer.source.name());
            }
        }
        None
    }

    pub fn as_string(&self, key: &str) -> Result<String> {
        self.value(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()).into())
    }

    pub fn as_bool(&self, key: &str) -> Result<bool> {
        let raw = self.as_string(key)?;
        match forest::coerce(&raw) {
            Value::Bool(b) => Ok(b),
            _ => Err(ConfigError::WrongType(key.to_string(), "boolean".to_string(), raw).into()),
        }
    }

    pub fn as_int(&self, key: &str) -> Result<i64> {
        let raw = self.as_string(key)?;
        match forest::coerce(&raw) {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| {
                    ConfigError::WrongType(key.to_string(), "integer".to_string(), raw.clone())
                        .into()
                }),
            _ => Err(ConfigError::WrongType(key.to_string(), "integer".to_string(), raw).into()),
        }
    }

    pub fn as_float(&self, key: &str) -> Result<f64> {
        let raw = self.as_string(key)?;
        match forest::coerce(&raw) {
            Value::Number(n) => n.as_f64().ok_or_else(|| {
                ConfigError::WrongType(key.to_string(), "number".to_string(), raw.clone()).into()
            }),
            _ => Err(ConfigError::WrongType(key.to_string(), "number".to_string(), raw).into()),
        }
    }

    /// A list of strings: an array node, or a comma separated scalar.
    pub fn as_string_list(&self, key: &str) -> Result<Vec<String>> {
        let forest = Forest::from_map(&self.merged())?;
        if let Some(node) = forest.node_at(key) {
            if node.is_array() {
                let items = match node.to_value() {
                    Value::Sequence(seq) => seq,
                    _ => Vec::new(),
                };
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(match item {
                        Value::String(s) => s,
                        other => serde_yaml::to_string(&other)?
                            .trim_start_matches("---")
                            .trim()
                            .to_string(),
                    });
                }
                return Ok(out);
            }
        }
        let raw = self.as_string(key)?;
        Ok(raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    /// Deserialize the subtree under a key into a typed model.
    pub fn object<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let forest = Forest::from_map(&self.merged())?;
        let node = forest
            .node_at(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
        serde_yaml::from_value(node.to_value()).map_err(|e| {
            ConfigError::WrongType(key.to_string(), "object".to_string(), e.to_string()).into()
        })
    }

    /// Deserialize an array node into a list of typed models.
    pub fn object_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let forest = Forest::from_map(&self.merged())?;
        let node = forest
            .node_at(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
        if !node.is_array() {
            return Err(ConfigError::WrongType(
                key.to_string(),
                "array".to_string(),
                "object".to_string(),
            )
            .into());
        }
        let items = match node.to_value() {
            Value::Sequence(seq) => seq,
            _ => Vec::new(),
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(serde_yaml::from_value(item).map_err(|e| {
                ConfigError::WrongType(key.to_string(), "array".to_string(), e.to_string())
            })?);
        }
        Ok(out)
    }

    /// Write a key through to the highest-ordinal mutable source.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let key = keys::normalize(key);
        for layer in self.layers.iter_mut().rev() {
            if layer.source.is_mutable() {
                layer.source.put(&key, value)?;
                layer.cache.insert(key, value.to_string());
                return Ok(());
            }
        }
        Err(ConfigError::Immutable(key).into())
    }

    /// Reload every refreshable source, in parallel, all-or-nothing.
    ///
    /// On any failure the previous caches are retained and the failures are
    /// reported together.
    pub fn refresh(&mut self) -> Result<()> {
        let old = mem::replace(&mut self.layers, Vec::new());
        let expected = old.len();
        let (tx, rx) = mpsc::channel();
        for (i, layer) in old.into_iter().enumerate() {
            let tx = tx.clone();
            if layer.source.is_refreshable() {
                thread::spawn(move || {
                    let loaded = layer.source.load();
                    let _ = tx.send((i, layer, Some(loaded)));
                });
            } else {
                let _ = tx.send((i, layer, None));
            }
        }
        drop(tx);

        let mut collected: Vec<(usize, Layer, Option<Result<BTreeMap<String, String>>>)> =
            rx.iter().collect();
        if collected.len() != expected {
            bail!("lost {} config source(s) during refresh", expected - collected.len());
        }
        collected.sort_by_key(|(i, _, _)| *i);

        let mut failures = Vec::new();
        let mut layers = Vec::with_capacity(expected);
        let mut updates = Vec::with_capacity(expected);
        for (_, layer, loaded) in collected {
            match loaded {
                None => updates.push(None),
                Some(Ok(map)) => updates.push(Some(map)),
                Some(Err(e)) => {
                    failures.push(format!("{}: {}", layer.source.name(), e));
                    updates.push(None);
                }
            }
            layers.push(layer);
        }
        self.layers = layers;

        if !failures.is_empty() {
            return Err(ConfigError::RefreshFailed(failures.len(), failures.join("; ")).into());
        }
        for (layer, update) in self.layers.iter_mut().zip(updates) {
            if let Some(map) = update {
                layer.cache = map;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn map_source(name: &str, ordinal: i32, entries: &[(&str, &str)]) -> Box<dyn ConfigSource> {
        let entries = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Box::new(MapSource::with_entries(name, ordinal, entries))
    }

    #[test]
    fn higher_ordinal_wins() {
        let layered = LayeredConfig::new(vec![
            map_source("s1", 1, &[("k", "a")]),
            map_source("s2", 2, &[("k", "b")]),
            map_source("s3", 3, &[]),
        ])
        .unwrap();
        assert_eq!(layered.as_string("k").unwrap(), "b");
        assert_eq!(layered.origin_of("k"), Some("s2"));
    }

    #[test]
    fn typed_accessors_coerce() {
        let layered = LayeredConfig::new(vec![map_source(
            "s",
            1,
            &[
                ("quiet", "true"),
                ("replicas", "3"),
                ("ratio", "0.5"),
                ("aliases", "node1, node2"),
                ("clusters.0", "c1"),
                ("clusters.1", "c2"),
            ],
        )])
        .unwrap();
        assert!(layered.as_bool("quiet").unwrap());
        assert_eq!(layered.as_int("replicas").unwrap(), 3);
        assert!((layered.as_float("ratio").unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(layered.as_string_list("aliases").unwrap(), vec!["node1", "node2"]);
        assert_eq!(layered.as_string_list("clusters").unwrap(), vec!["c1", "c2"]);
        assert!(layered.as_bool("replicas").is_err());
        assert!(layered.as_int("missing").is_err());
    }

    #[derive(Deserialize, Debug, PartialEq)]
    struct Target {
        namespace: String,
        realm: i64,
    }

    #[test]
    fn object_accessors_delegate_to_forest() {
        let layered = LayeredConfig::new(vec![map_source(
            "s",
            1,
            &[
                ("target.namespace", "solo-e2e"),
                ("target.realm", "0"),
                ("targets.0.namespace", "a"),
                ("targets.0.realm", "1"),
                ("targets.1.namespace", "b"),
                ("targets.1.realm", "2"),
            ],
        )])
        .unwrap();
        let one: Target = layered.object("target").unwrap();
        assert_eq!(one.namespace, "solo-e2e");
        let many: Vec<Target> = layered.object_list("targets").unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].realm, 2);
        // scalar is not an array node
        assert!(layered.object_list::<Target>("target.namespace").is_err());
    }

    #[test]
    fn set_writes_to_highest_mutable() {
        let mut layered = LayeredConfig::new(vec![
            map_source("low", 1, &[("k", "a")]),
            map_source("high", 5, &[]),
        ])
        .unwrap();
        layered.set("k", "z").unwrap();
        assert_eq!(layered.as_string("k").unwrap(), "z");
        assert_eq!(layered.origin_of("k"), Some("high"));
    }

    struct Flaky {
        fail: Arc<AtomicBool>,
    }

    impl ConfigSource for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn ordinal(&self) -> i32 {
            7
        }
        fn load(&self) -> Result<BTreeMap<String, String>> {
            if self.fail.load(Ordering::SeqCst) {
                bail!("backend unavailable");
            }
            let mut m = BTreeMap::new();
            m.insert("k".to_string(), "fresh".to_string());
            Ok(m)
        }
        fn is_refreshable(&self) -> bool {
            true
        }
    }

    #[test]
    fn failed_refresh_retains_previous_state() {
        let fail = Arc::new(AtomicBool::new(false));
        let mut layered = LayeredConfig::new(vec![Box::new(Flaky { fail: fail.clone() })
            as Box<dyn ConfigSource>])
        .unwrap();
        assert_eq!(layered.as_string("k").unwrap(), "fresh");

        fail.store(true, Ordering::SeqCst);
        let err = layered.refresh().unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
        // previous view still intact
        assert_eq!(layered.as_string("k").unwrap(), "fresh");

        fail.store(false, Ordering::SeqCst);
        layered.refresh().unwrap();
        assert_eq!(layered.as_string("k").unwrap(), "fresh");
    }

    #[test]
    fn env_source_reads_process_environment() {
        std::env::set_var("SOLO_SRC_TEST_KEY", "from-env");
        let layered =
            LayeredConfig::new(vec![Box::new(EnvSource::new(10, Some("SOLO_SRC_TEST_")))])
                .unwrap();
        assert_eq!(layered.as_string("key").unwrap(), "from-env");
        std::env::remove_var("SOLO_SRC_TEST_KEY");
    }
}
