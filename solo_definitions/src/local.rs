use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::components::is_dns1123_label;
use crate::version;
use super::Result;

/// File name of the per-user state document inside the solo home.
pub const LOCAL_CONFIG_FILE: &str = "local-config.yaml";

/// Resolve the solo home directory (`$SOLO_HOME_DIR` or `~/.solo`).
pub fn home_dir() -> PathBuf {
    if let Ok(dir) = env::var("SOLO_HOME_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".solo")
}

/// Resolve the cache directory (`$SOLO_CACHE_DIR` or `<home>/cache`).
pub fn cache_dir() -> PathBuf {
    if let Ok(dir) = env::var("SOLO_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    home_dir().join("cache")
}

/// Resolve the logs directory (`$SOLO_LOGS_DIR` or `<home>/logs`).
pub fn logs_dir() -> PathBuf {
    if let Ok(dir) = env::var("SOLO_LOGS_DIR") {
        return PathBuf::from(dir);
    }
    home_dir().join("logs")
}

/// A deployment as the user sees it locally.
///
/// ```yaml
/// clusters: [cluster-1, cluster-2]
/// namespace: solo-e2e
/// realm: 0
/// shard: 0
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Deployment {
    #[serde(default)]
    pub clusters: Vec<String>,

    pub namespace: String,

    #[serde(default)]
    pub realm: i64,

    #[serde(default)]
    pub shard: i64,
}

/// The per-user state document.
///
/// One YAML file per user; only the owning process writes it. Cluster
/// references map user-chosen labels to kube contexts, and deployments name
/// clusters by reference only.
///
/// ```yaml
/// userEmailAddress: dev@example.com
/// soloVersion: 0.9.0
/// deployments:
///   dual-cluster:
///     clusters: [cluster-1, cluster-2]
///     namespace: solo-e2e
///     realm: 0
///     shard: 0
/// clusterRefs:
///   cluster-1: kind-cluster-1
///   cluster-2: kind-cluster-2
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    #[serde(default)]
    pub userEmailAddress: String,

    #[serde(default)]
    pub soloVersion: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deployments: BTreeMap<String, Deployment>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub clusterRefs: BTreeMap<String, String>,
}

impl LocalConfig {
    /// Whether the state file exists under the given home directory.
    pub fn config_file_exists(home: &Path) -> bool {
        home.join(LOCAL_CONFIG_FILE).is_file()
    }

    /// Seed a fresh document for a new user.
    pub fn create(user_email: &str, solo_version: &str) -> Result<LocalConfig> {
        let config = LocalConfig {
            userEmailAddress: user_email.to_string(),
            soloVersion: solo_version.to_string(),
            deployments: BTreeMap::new(),
            clusterRefs: BTreeMap::new(),
        };
        config.verify()?;
        Ok(config)
    }

    /// Read the document from the home directory.
    ///
    /// A missing file yields an empty-but-valid document; callers that want
    /// a real identity must `create` first.
    pub fn load(home: &Path) -> Result<LocalConfig> {
        let path = home.join(LOCAL_CONFIG_FILE);
        if !path.is_file() {
            debug!("no local config at {}, starting empty", path.display());
            return Ok(LocalConfig::default());
        }
        let text = fs::read_to_string(&path)?;
        let config: LocalConfig = serde_yaml::from_str(&text)
            .map_err(|e| format_err!("malformed {}: {}", path.display(), e))?;
        config.verify()?;
        Ok(config)
    }

    /// Persist the document into the home directory.
    pub fn save(&self, home: &Path) -> Result<()> {
        self.verify()?;
        if !home.is_dir() {
            fs::create_dir_all(home)?;
        }
        let text = serde_yaml::to_string(self)?;
        fs::write(home.join(LOCAL_CONFIG_FILE), text)?;
        Ok(())
    }

    pub fn set_user_email_address(&mut self, email: &str) -> Result<()> {
        self.userEmailAddress = email.to_string();
        self.verify()
    }

    pub fn set_solo_version(&mut self, version: &str) -> Result<()> {
        self.soloVersion = version.to_string();
        self.verify()
    }

    pub fn set_deployments(&mut self, deployments: BTreeMap<String, Deployment>) -> Result<()> {
        self.deployments = deployments;
        self.verify()
    }

    pub fn set_cluster_refs(&mut self, cluster_refs: BTreeMap<String, String>) -> Result<()> {
        self.clusterRefs = cluster_refs;
        self.verify()
    }

    pub fn add_deployment(&mut self, name: &str, deployment: Deployment) -> Result<()> {
        if self.deployments.contains_key(name) {
            bail!("deployment '{}' already exists", name);
        }
        self.deployments.insert(name.to_string(), deployment);
        self.verify()
    }

    pub fn add_cluster_ref(&mut self, cluster_ref: &str, context: &str) -> Result<()> {
        self.clusterRefs
            .insert(cluster_ref.to_string(), context.to_string());
        self.verify()
    }

    /// The kube context registered for a cluster reference.
    pub fn context_for(&self, cluster_ref: &str) -> Result<&str> {
        self.clusterRefs
            .get(cluster_ref)
            .map(|c| c.as_str())
            .ok_or_else(|| {
                format_err!(
                    "cluster-ref '{}' is not connected; known refs: {:?}",
                    cluster_ref,
                    self.clusterRefs.keys().collect::<Vec<_>>()
                )
            })
    }

    /// Verify assumptions about the document before any write returns.
    pub fn verify(&self) -> Result<()> {
        if !self.userEmailAddress.is_empty() {
            let re = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
            if !re.is_match(&self.userEmailAddress) {
                bail!("'{}' is not a valid email address", self.userEmailAddress);
            }
        }
        if !self.soloVersion.is_empty() {
            version::parse(&self.soloVersion)?;
        }
        for (name, d) in &self.deployments {
            if !is_dns1123_label(name) {
                bail!("deployment name '{}' is not a DNS-1123 label", name);
            }
            if !is_dns1123_label(&d.namespace) {
                bail!("deployment '{}' has invalid namespace '{}'", name, d.namespace);
            }
            if d.realm < 0 || d.shard < 0 {
                bail!("deployment '{}' has negative realm or shard", name);
            }
            for cluster in &d.clusters {
                if !self.clusterRefs.contains_key(cluster) {
                    bail!(
                        "deployment '{}' references unconnected cluster '{}'",
                        name,
                        cluster
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> LocalConfig {
        let mut config = LocalConfig::create("dev@example.com", "0.9.0").unwrap();
        config.add_cluster_ref("cluster-1", "kind-cluster-1").unwrap();
        config
            .add_deployment(
                "dual",
                Deployment {
                    clusters: vec!["cluster-1".to_string()],
                    namespace: "solo-e2e".to_string(),
                    realm: 0,
                    shard: 0,
                },
            )
            .unwrap();
        config
    }

    #[test]
    fn create_seeds_empty_deployments() {
        let config = LocalConfig::create("a@b.c", "0.9.0").unwrap();
        assert!(config.deployments.is_empty());
        assert_eq!(config.userEmailAddress, "a@b.c");
    }

    #[test]
    fn write_then_read_roundtrips() {
        let home = tempdir().unwrap();
        let config = sample();
        config.save(home.path()).unwrap();
        assert!(LocalConfig::config_file_exists(home.path()));
        let loaded = LocalConfig::load(home.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_reads_empty_but_valid() {
        let home = tempdir().unwrap();
        assert!(!LocalConfig::config_file_exists(home.path()));
        let loaded = LocalConfig::load(home.path()).unwrap();
        assert_eq!(loaded, LocalConfig::default());
        loaded.verify().unwrap();
    }

    #[test]
    fn rejects_bad_email_and_version() {
        assert!(LocalConfig::create("not-an-email", "0.9.0").is_err());
        assert!(LocalConfig::create("a@b.c", "not.a.version").is_err());
    }

    #[test]
    fn rejects_unconnected_cluster() {
        let mut config = LocalConfig::create("a@b.c", "0.9.0").unwrap();
        let result = config.add_deployment(
            "lonely",
            Deployment {
                clusters: vec!["ghost".to_string()],
                namespace: "ns".to_string(),
                realm: 0,
                shard: 0,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn context_lookup() {
        let config = sample();
        assert_eq!(config.context_for("cluster-1").unwrap(), "kind-cluster-1");
        assert!(config.context_for("cluster-9").is_err());
    }

    #[test]
    fn env_overrides_home() {
        env::set_var("SOLO_HOME_DIR", "/tmp/solo-test-home");
        assert_eq!(home_dir(), PathBuf::from("/tmp/solo-test-home"));
        env::remove_var("SOLO_HOME_DIR");
    }
}
