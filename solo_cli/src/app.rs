use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use solo_definitions::backend::YamlStore;
use solo_definitions::local;
use solo_definitions::remote::{RemoteConfig, UserIdentity};
use solo_definitions::LocalConfig;

use crate::backend::ConfigMapBackend;
use crate::helm::Helm;
use crate::kube::{Kube, NamespaceName, ResourceRef};
use crate::lease::{DeploymentLease, KubeLeaseStore, LeaseStore, RenewalService};
use crate::ledger::LedgerClient;
use crate::resolvers;
use crate::settings::Settings;
use super::Result;

/// Name of the config map holding the remote state.
pub const REMOTE_CONFIG_MAP: &str = "solo-remote-config";
/// The single data entry carrying the serialized document.
pub const REMOTE_CONFIG_KEY: &str = "remote-config.yaml";
/// Lease duration; renewals fire at half of this.
pub const LEASE_DURATION: Duration = Duration::from_secs(20);

/// The hostname as the kernel reports it.
pub fn hostname() -> String {
    let mut buf = vec![0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).to_string()
}

/// The resolved target of a deployment-scoped command.
pub struct DeploymentTarget {
    pub deployment: String,
    pub namespace: NamespaceName,
    pub cluster_ref: String,
    pub kube: Arc<Kube>,
}

/// Process-wide wiring: config manager, local state, facade cache, renewal
/// service and ledger client, assembled once at entry.
///
/// Tests substitute fixtures by constructing their own `App`.
pub struct App {
    pub home: PathBuf,
    pub settings: Settings,
    pub local: Mutex<LocalConfig>,
    pub renewal: Arc<RenewalService>,
    pub ledger: LedgerClient,
    kubes: Mutex<BTreeMap<String, Arc<Kube>>>,
}

impl App {
    pub fn new(settings: Settings) -> Result<App> {
        let home = local::home_dir();
        let local_config = LocalConfig::load(&home)?;
        let ledger = if settings.is_dev() {
            LedgerClient::mocked(0, 0)
        } else {
            LedgerClient::standard(0, 0)
        };
        Ok(App {
            home,
            settings,
            local: Mutex::new(local_config),
            renewal: RenewalService::start(),
            ledger,
            kubes: Mutex::new(BTreeMap::new()),
        })
    }

    /// Snapshot of the local state document.
    pub fn local_config(&self) -> LocalConfig {
        self.local.lock().unwrap().clone()
    }

    /// Mutate and persist the local state document.
    pub fn update_local<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut LocalConfig) -> Result<()>,
    {
        let mut local_config = self.local.lock().unwrap();
        mutate(&mut local_config)?;
        local_config.save(&self.home)
    }

    /// One cached facade per kube context.
    pub fn kube_for_context(&self, context: &str) -> Result<Arc<Kube>> {
        let mut kubes = self.kubes.lock().unwrap();
        if let Some(kube) = kubes.get(context) {
            return Ok(kube.clone());
        }
        let kube = Arc::new(Kube::attach(context)?);
        kubes.insert(context.to_string(), kube.clone());
        Ok(kube)
    }

    pub fn kube_for_cluster(&self, cluster_ref: &str) -> Result<Arc<Kube>> {
        let local_config = self.local.lock().unwrap();
        let context = local_config.context_for(cluster_ref)?.to_string();
        drop(local_config);
        self.kube_for_context(&context)
    }

    /// Helm invoker for the cluster's context.
    pub fn helm_for_cluster(&self, cluster_ref: &str) -> Result<Helm> {
        let local_config = self.local.lock().unwrap();
        let context = local_config.context_for(cluster_ref)?.to_string();
        Ok(Helm::new(&context))
    }

    /// Resolve deployment, namespace, cluster and facade from flags.
    pub fn target(&self) -> Result<DeploymentTarget> {
        let local_config = self.local_config();
        let deployment = resolvers::resolve_deployment(&local_config, &self.settings)?;
        let namespace = resolvers::resolve_namespace_from_deployment(&local_config, &self.settings)?;
        let cluster_ref = resolvers::resolve_cluster_ref(&local_config, &self.settings, &deployment)?;
        let kube = self.kube_for_cluster(&cluster_ref)?;
        Ok(DeploymentTarget {
            deployment,
            namespace,
            cluster_ref,
            kube,
        })
    }

    pub fn identity(&self) -> UserIdentity {
        let local_config = self.local.lock().unwrap();
        let name = if local_config.userEmailAddress.is_empty() {
            "unknown".to_string()
        } else {
            local_config.userEmailAddress.clone()
        };
        UserIdentity {
            name,
            hostname: hostname(),
        }
    }

    /// Lease holder identity for this process.
    pub fn holder(&self) -> String {
        let identity = self.identity();
        format!("{}@{}", identity.name, identity.hostname)
    }

    fn remote_ref(&self, namespace: &NamespaceName) -> Result<ResourceRef> {
        ResourceRef::new(namespace.clone(), REMOTE_CONFIG_MAP)
    }

    /// The YAML store over the deployment's remote config map.
    pub fn remote_store(
        &self,
        kube: &Arc<Kube>,
        namespace: &NamespaceName,
    ) -> Result<YamlStore<ConfigMapBackend>> {
        let reference = self.remote_ref(namespace)?;
        Ok(YamlStore::new(ConfigMapBackend::new(kube.clone(), reference)))
    }

    pub fn remote_exists(&self, kube: &Arc<Kube>, namespace: &NamespaceName) -> Result<bool> {
        kube.config_maps().exists(&self.remote_ref(namespace)?)
    }

    /// Load + migrate + verify the remote state.
    pub fn load_remote(&self, kube: &Arc<Kube>, namespace: &NamespaceName) -> Result<RemoteConfig> {
        let store = self.remote_store(kube, namespace)?;
        let value = store.read_value(REMOTE_CONFIG_KEY)?;
        let config = RemoteConfig::from_document(&value)?;
        let cli_version = solo_definitions::version::parse(env!("CARGO_PKG_VERSION"))?;
        if !solo_definitions::version::same_major(&config.versions.cli, &cli_version) {
            bail!(
                "remote state was written by solo {} which is incompatible with {}",
                config.versions.cli,
                cli_version
            );
        }
        if config.versions.cli != cli_version {
            warn!(
                "remote state was last written by solo {} (this is {})",
                config.versions.cli, cli_version
            );
        }
        Ok(config)
    }

    /// Validate, stamp metadata and persist the remote state.
    pub fn save_remote(
        &self,
        kube: &Arc<Kube>,
        namespace: &NamespaceName,
        config: &mut RemoteConfig,
    ) -> Result<()> {
        let document = config.to_document(self.identity())?;
        let mut store = self.remote_store(kube, namespace)?;
        store.write_object(REMOTE_CONFIG_KEY, &document)
    }

    /// Delete the remote state config map (ignore absence).
    pub fn delete_remote(&self, kube: &Arc<Kube>, namespace: &NamespaceName) -> Result<()> {
        let reference = self.remote_ref(namespace)?;
        match kube.config_maps().delete(&reference) {
            Ok(()) => Ok(()),
            Err(e) => {
                if crate::kube::is_not_found(&e) {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// The deployment's exclusivity lease.
    ///
    /// The duration can be tuned through the `lease.duration` config key
    /// (e.g. `SOLO_LEASE_DURATION=40s`).
    pub fn lease_for(&self, target: &DeploymentTarget) -> DeploymentLease {
        let duration = match self.settings.get("lease.duration") {
            Some(raw) => match solo_definitions::duration::parse(&raw) {
                Ok(d) => d,
                Err(e) => {
                    warn!("ignoring invalid lease.duration '{}': {}", raw, e);
                    LEASE_DURATION
                }
            },
            None => LEASE_DURATION,
        };
        let store = Arc::new(KubeLeaseStore::new(
            target.kube.clone(),
            target.namespace.clone(),
        )) as Arc<dyn LeaseStore>;
        DeploymentLease::new(
            store,
            self.renewal.clone(),
            &format!("solo-lock-{}", target.deployment),
            &self.holder(),
            duration,
        )
    }

    /// Run a closure under the deployment lease.
    ///
    /// The lease is released on every exit path; a release failure after a
    /// command failure is logged, not surfaced over the original error.
    pub fn with_lease<F>(&self, target: &DeploymentTarget, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut lease = self.lease_for(target);
        lease.acquire()?;
        let outcome = body();
        match lease.release() {
            Ok(()) => outcome,
            Err(release_err) => match outcome {
                Ok(()) => Err(release_err),
                Err(e) => {
                    warn!("failed to release lease after error: {}", release_err);
                    Err(e)
                }
            },
        }
    }

    /// Tear down background machinery; used on all process exit paths.
    pub fn shutdown(&self) {
        self.renewal.cancel_all();
        self.ledger.close();
        let unused = self.settings.unused_flags();
        if !unused.is_empty() {
            debug!("flags never read this run: {}", unused.join(", "));
        }
        self.renewal.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_nonempty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn holder_identity_combines_user_and_host() {
        let settings = Settings::new().unwrap();
        let app = App::new(settings).unwrap();
        let holder = app.holder();
        assert!(holder.contains('@'));
        app.shutdown();
    }
}
