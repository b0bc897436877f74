use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;
use std::thread;
use std::time::Duration;

use either::Either;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolumeClaim, Pod, Secret, Service,
};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube_client::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube_client::config::{KubeConfigOptions, Kubeconfig};
use kube_client::{Client, Config};
use serde::de::DeserializeOwned;
use tokio::runtime::Runtime;

use solo_definitions::components::is_dns1123_label;

/// kubectl backed port-forward tunnels
pub mod portforward;
pub use self::portforward::PortForwardHandle;

// All main errors that can happen from the kube facade

// New failure error type
#[derive(Debug)]
struct KError {
    inner: Context<KErrKind>,
}
// its associated enum
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum KErrKind {
    #[fail(display = "{} '{}/{}' was not found", _0, _1, _2)]
    NotFound(String, String, String),

    #[fail(display = "failed to create {} '{}/{}' (status {})", _0, _1, _2, _3)]
    Create(String, String, String, u16),

    #[fail(display = "failed to read {} '{}/{}' (status {})", _0, _1, _2, _3)]
    Read(String, String, String, u16),

    #[fail(display = "failed to update {} '{}/{}' (status {})", _0, _1, _2, _3)]
    Update(String, String, String, u16),

    #[fail(display = "failed to delete {} '{}/{}' (status {})", _0, _1, _2, _3)]
    Delete(String, String, String, u16),

    #[fail(display = "failed to replace {} '{}/{}' (status {})", _0, _1, _2, _3)]
    Replace(String, String, String, u16),

    #[fail(display = "kube api error on {} '{}/{}': {}", _0, _1, _2, _3)]
    Api(String, String, String, String),

    #[fail(display = "'{}' is not a valid RFC-1123 DNS label", _0)]
    InvalidName(String),

    #[fail(display = "could not attach to kube context '{}'", _0)]
    Attach(String),
}
use failure::{Context, Backtrace, Fail};

// boilerplate error wrapping (might go away)
impl Fail for KError {
    fn cause(&self) -> Option<&dyn Fail> { self.inner.cause() }
    fn backtrace(&self) -> Option<&Backtrace> { self.inner.backtrace() }
}
impl fmt::Display for KError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}
impl From<KErrKind> for KError {
    fn from(kind: KErrKind) -> KError {
        KError { inner: Context::new(kind) }
    }
}
impl From<Context<KErrKind>> for KError {
    fn from(inner: Context<KErrKind>) -> KError {
        KError { inner }
    }
}
pub type Result<T> = std::result::Result<T, failure::Error>;

/// Mutating verbs used for error classification.
#[derive(Debug, Clone, Copy)]
enum Verb {
    Create,
    Read,
    Update,
    Delete,
    Replace,
}

/// A validated kubernetes namespace name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceName(String);

impl NamespaceName {
    pub fn new(name: &str) -> Result<NamespaceName> {
        if !is_dns1123_label(name) {
            return Err(KErrKind::InvalidName(name.to_string()).into());
        }
        Ok(NamespaceName(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Namespace + name pair for namespaced resource kinds.
///
/// Only constructible through the validating factory, so invalid names fail
/// before any api call is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    namespace: NamespaceName,
    name: String,
}

impl ResourceRef {
    pub fn new(namespace: NamespaceName, name: &str) -> Result<ResourceRef> {
        if !is_dns1123_label(name) {
            return Err(KErrKind::InvalidName(name.to_string()).into());
        }
        Ok(ResourceRef {
            namespace,
            name: name.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_str()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A container inside a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub pod: ResourceRef,
    pub name: String,
}

impl ContainerRef {
    pub fn new(pod: ResourceRef, name: &str) -> Result<ContainerRef> {
        if !is_dns1123_label(name) {
            return Err(KErrKind::InvalidName(name.to_string()).into());
        }
        Ok(ContainerRef {
            pod,
            name: name.to_string(),
        })
    }
}

fn map_kube_err(verb: Verb, kind: &str, namespace: &str, name: &str, err: kube_client::Error) -> failure::Error {
    let (kind, namespace, name) = (kind.to_string(), namespace.to_string(), name.to_string());
    match err {
        kube_client::Error::Api(resp) => {
            if resp.code == 404 {
                return KErrKind::NotFound(kind, namespace, name).into();
            }
            let code = resp.code;
            match verb {
                Verb::Create => KErrKind::Create(kind, namespace, name, code).into(),
                Verb::Read => KErrKind::Read(kind, namespace, name, code).into(),
                Verb::Update => KErrKind::Update(kind, namespace, name, code).into(),
                Verb::Delete => KErrKind::Delete(kind, namespace, name, code).into(),
                Verb::Replace => KErrKind::Replace(kind, namespace, name, code).into(),
            }
        }
        other => KErrKind::Api(kind, namespace, name, other.to_string()).into(),
    }
}

/// Whether a facade error is the typed 404.
pub fn is_not_found(err: &failure::Error) -> bool {
    match err.downcast_ref::<KErrKind>() {
        Some(KErrKind::NotFound(..)) => true,
        _ => false,
    }
}

fn http_status(err: &kube_client::Error) -> Option<u16> {
    match err {
        kube_client::Error::Api(resp) => Some(resp.code),
        _ => None,
    }
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..ObjectMeta::default()
    }
}

/// One facade per kube context.
///
/// The facade owns its client and a contained runtime; callers stay
/// synchronous. Facades are cheap enough to cache per context and are never
/// shared across contexts.
pub struct Kube {
    context: String,
    client: Client,
    rt: Runtime,
}

impl Kube {
    /// Attach to a context from the local kubeconfig.
    pub fn attach(context: &str) -> Result<Kube> {
        let rt = Runtime::new()?;
        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            ..KubeConfigOptions::default()
        };
        let client = rt.block_on(async {
            let config = Config::from_kubeconfig(&options)
                .await
                .map_err(|e| format_err!("{}: {}", KErrKind::Attach(context.to_string()), e))?;
            Client::try_from(config)
                .map_err(|e| format_err!("{}: {}", KErrKind::Attach(context.to_string()), e))
        })?;
        Ok(Kube {
            context: context.to_string(),
            client,
            rt,
        })
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Context names defined in the local kubeconfig.
    pub fn contexts() -> Result<Vec<String>> {
        let kubeconfig = Kubeconfig::read().map_err(|e| format_err!("kubeconfig: {}", e))?;
        Ok(kubeconfig.contexts.into_iter().map(|c| c.name).collect())
    }

    /// The context kubectl would use by default.
    pub fn current_context() -> Result<Option<String>> {
        let kubeconfig = Kubeconfig::read().map_err(|e| format_err!("kubeconfig: {}", e))?;
        Ok(kubeconfig.current_context)
    }

    /// Attach to a context and probe it with a namespace list.
    ///
    /// The caller's facades are untouched; a fresh client is built for the
    /// probe and dropped again, so the effective context is restored on both
    /// success and failure.
    pub fn test_context_connection(context: &str) -> bool {
        match Kube::attach(context) {
            Ok(kube) => kube.namespaces().list().is_ok(),
            Err(e) => {
                debug!("context '{}' probe failed: {}", context, e);
                false
            }
        }
    }

    pub fn namespaces(&self) -> Namespaces {
        Namespaces { kube: self }
    }

    pub fn pods(&self) -> Pods {
        Pods { kube: self }
    }

    pub fn services(&self) -> Services {
        Services { kube: self }
    }

    pub fn config_maps(&self) -> ConfigMaps {
        ConfigMaps { kube: self }
    }

    pub fn secrets(&self) -> Secrets {
        Secrets { kube: self }
    }

    pub fn pvcs(&self) -> Pvcs {
        Pvcs { kube: self }
    }

    pub fn leases(&self) -> Leases {
        Leases { kube: self }
    }

    pub fn ingresses(&self) -> Ingresses {
        Ingresses { kube: self }
    }

    pub fn crds(&self) -> Crds {
        Crds { kube: self }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube_client::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + DeserializeOwned
            + std::fmt::Debug
            + Clone,
        <K as kube_client::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

pub struct Namespaces<'a> {
    kube: &'a Kube,
}

impl<'a> Namespaces<'a> {
    pub fn list(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.kube.client.clone());
        let listed = self
            .kube
            .rt
            .block_on(async { api.list(&ListParams::default()).await })
            .map_err(|e| map_kube_err(Verb::Read, "Namespace", "", "", e))?;
        Ok(listed
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    pub fn exists(&self, name: &NamespaceName) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.kube.client.clone());
        match self.kube.rt.block_on(async { api.get(name.as_str()).await }) {
            Ok(_) => Ok(true),
            Err(e) => {
                let mapped = map_kube_err(Verb::Read, "Namespace", "", name.as_str(), e);
                if is_not_found(&mapped) {
                    Ok(false)
                } else {
                    Err(mapped)
                }
            }
        }
    }

    pub fn create(&self, name: &NamespaceName) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.kube.client.clone());
        let ns = Namespace {
            metadata: meta(name.as_str()),
            ..Namespace::default()
        };
        self.kube
            .rt
            .block_on(async { api.create(&PostParams::default(), &ns).await })
            .map(|_| ())
            .map_err(|e| map_kube_err(Verb::Create, "Namespace", "", name.as_str(), e))
    }

    /// Create unless present already.
    pub fn ensure(&self, name: &NamespaceName) -> Result<()> {
        if self.exists(name)? {
            debug!("namespace {} already exists", name);
            return Ok(());
        }
        self.create(name)
    }

    pub fn delete(&self, name: &NamespaceName) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.kube.client.clone());
        match self
            .kube
            .rt
            .block_on(async { api.delete(name.as_str(), &DeleteParams::default()).await })
        {
            Ok(Either::Left(_)) | Ok(Either::Right(_)) => Ok(()),
            Err(e) => Err(map_kube_err(Verb::Delete, "Namespace", "", name.as_str(), e)),
        }
    }
}

pub struct ConfigMaps<'a> {
    kube: &'a Kube,
}

impl<'a> ConfigMaps<'a> {
    pub fn read(&self, cm: &ResourceRef) -> Result<BTreeMap<String, String>> {
        let api: Api<ConfigMap> = self.kube.namespaced(cm.namespace());
        let found = self
            .kube
            .rt
            .block_on(async { api.get(cm.name()).await })
            .map_err(|e| map_kube_err(Verb::Read, "ConfigMap", cm.namespace(), cm.name(), e))?;
        Ok(found.data.unwrap_or_default())
    }

    pub fn exists(&self, cm: &ResourceRef) -> Result<bool> {
        match self.read(cm) {
            Ok(_) => Ok(true),
            Err(e) => {
                if is_not_found(&e) {
                    Ok(false)
                } else {
                    Err(e)
                }
            }
        }
    }

    pub fn create(
        &self,
        cm: &ResourceRef,
        labels: BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<ConfigMap> = self.kube.namespaced(cm.namespace());
        let object = ConfigMap {
            metadata: ObjectMeta {
                name: Some(cm.name().to_string()),
                labels: if labels.is_empty() { None } else { Some(labels) },
                ..ObjectMeta::default()
            },
            data: Some(data),
            ..ConfigMap::default()
        };
        self.kube
            .rt
            .block_on(async { api.create(&PostParams::default(), &object).await })
            .map(|_| ())
            .map_err(|e| map_kube_err(Verb::Create, "ConfigMap", cm.namespace(), cm.name(), e))
    }

    /// Replace the data of an existing config map (read-modify-write).
    pub fn replace(&self, cm: &ResourceRef, data: BTreeMap<String, String>) -> Result<()> {
        let api: Api<ConfigMap> = self.kube.namespaced(cm.namespace());
        let mut object = self
            .kube
            .rt
            .block_on(async { api.get(cm.name()).await })
            .map_err(|e| map_kube_err(Verb::Read, "ConfigMap", cm.namespace(), cm.name(), e))?;
        object.data = Some(data);
        self.kube
            .rt
            .block_on(async { api.replace(cm.name(), &PostParams::default(), &object).await })
            .map(|_| ())
            .map_err(|e| map_kube_err(Verb::Replace, "ConfigMap", cm.namespace(), cm.name(), e))
    }

    pub fn delete(&self, cm: &ResourceRef) -> Result<()> {
        let api: Api<ConfigMap> = self.kube.namespaced(cm.namespace());
        match self
            .kube
            .rt
            .block_on(async { api.delete(cm.name(), &DeleteParams::default()).await })
        {
            Ok(_) => Ok(()),
            Err(e) => Err(map_kube_err(Verb::Delete, "ConfigMap", cm.namespace(), cm.name(), e)),
        }
    }

    pub fn list(&self, namespace: &NamespaceName, selector: Option<&str>) -> Result<Vec<String>> {
        let api: Api<ConfigMap> = self.kube.namespaced(namespace.as_str());
        let mut params = ListParams::default();
        if let Some(s) = selector {
            params = params.labels(s);
        }
        let listed = self
            .kube
            .rt
            .block_on(async { api.list(&params).await })
            .map_err(|e| map_kube_err(Verb::Read, "ConfigMap", namespace.as_str(), "", e))?;
        Ok(listed
            .items
            .into_iter()
            .filter_map(|cm| cm.metadata.name)
            .collect())
    }
}

pub struct Pods<'a> {
    kube: &'a Kube,
}

impl<'a> Pods<'a> {
    pub fn read(&self, pod: &ResourceRef) -> Result<Pod> {
        let api: Api<Pod> = self.kube.namespaced(pod.namespace());
        self.kube
            .rt
            .block_on(async { api.get(pod.name()).await })
            .map_err(|e| map_kube_err(Verb::Read, "Pod", pod.namespace(), pod.name(), e))
    }

    pub fn list(&self, namespace: &NamespaceName, selector: Option<&str>) -> Result<Vec<String>> {
        let api: Api<Pod> = self.kube.namespaced(namespace.as_str());
        let mut params = ListParams::default();
        if let Some(s) = selector {
            params = params.labels(s);
        }
        let listed = self
            .kube
            .rt
            .block_on(async { api.list(&params).await })
            .map_err(|e| map_kube_err(Verb::Read, "Pod", namespace.as_str(), "", e))?;
        Ok(listed
            .items
            .into_iter()
            .filter_map(|p| p.metadata.name)
            .collect())
    }

    pub fn delete(&self, pod: &ResourceRef) -> Result<()> {
        let api: Api<Pod> = self.kube.namespaced(pod.namespace());
        match self
            .kube
            .rt
            .block_on(async { api.delete(pod.name(), &DeleteParams::default()).await })
        {
            Ok(_) => Ok(()),
            Err(e) => Err(map_kube_err(Verb::Delete, "Pod", pod.namespace(), pod.name(), e)),
        }
    }

    /// Whether the pod is running and all containers report ready.
    pub fn is_ready(&self, pod: &ResourceRef) -> Result<bool> {
        let found = self.read(pod)?;
        let status = match found.status {
            Some(s) => s,
            None => return Ok(false),
        };
        if status.phase.as_deref() != Some("Running") {
            return Ok(false);
        }
        let ready = status
            .conditions
            .unwrap_or_default()
            .into_iter()
            .any(|c| c.type_ == "Ready" && c.status == "True");
        Ok(ready)
    }

    /// Poll until the pod is ready or the attempts run out.
    pub fn wait_ready(&self, pod: &ResourceRef, attempts: u32, delay: Duration) -> Result<()> {
        for attempt in 0..attempts {
            match self.is_ready(pod) {
                Ok(true) => return Ok(()),
                Ok(false) => debug!("pod {} not ready (attempt {})", pod, attempt + 1),
                Err(e) => {
                    if !is_not_found(&e) {
                        return Err(e);
                    }
                    debug!("pod {} not found yet (attempt {})", pod, attempt + 1);
                }
            }
            thread::sleep(delay);
        }
        bail!("pod {} did not become ready after {} attempts", pod, attempts)
    }

    /// Fetch logs, optionally narrowed to one container.
    pub fn logs(&self, pod: &ResourceRef, container: Option<&ContainerRef>) -> Result<String> {
        let api: Api<Pod> = self.kube.namespaced(pod.namespace());
        let params = LogParams {
            container: container.map(|c| c.name.clone()),
            ..LogParams::default()
        };
        self.kube
            .rt
            .block_on(async { api.logs(pod.name(), &params).await })
            .map_err(|e| map_kube_err(Verb::Read, "Pod", pod.namespace(), pod.name(), e))
    }

    /// Open a kubectl port-forward tunnel to the pod.
    pub fn port_forward(
        &self,
        pod: &ResourceRef,
        local_port: u16,
        pod_port: u16,
    ) -> Result<PortForwardHandle> {
        portforward::start(self.kube.context(), pod, local_port, pod_port)
    }
}

pub struct Services<'a> {
    kube: &'a Kube,
}

impl<'a> Services<'a> {
    pub fn read(&self, svc: &ResourceRef) -> Result<Service> {
        let api: Api<Service> = self.kube.namespaced(svc.namespace());
        self.kube
            .rt
            .block_on(async { api.get(svc.name()).await })
            .map_err(|e| map_kube_err(Verb::Read, "Service", svc.namespace(), svc.name(), e))
    }

    pub fn list(&self, namespace: &NamespaceName, selector: Option<&str>) -> Result<Vec<String>> {
        let api: Api<Service> = self.kube.namespaced(namespace.as_str());
        let mut params = ListParams::default();
        if let Some(s) = selector {
            params = params.labels(s);
        }
        let listed = self
            .kube
            .rt
            .block_on(async { api.list(&params).await })
            .map_err(|e| map_kube_err(Verb::Read, "Service", namespace.as_str(), "", e))?;
        Ok(listed
            .items
            .into_iter()
            .filter_map(|s| s.metadata.name)
            .collect())
    }
}

pub struct Secrets<'a> {
    kube: &'a Kube,
}

impl<'a> Secrets<'a> {
    /// Secret listing carries a hard server-side timeout; huge namespaces
    /// should not hang a command forever.
    const LIST_TIMEOUT_SECS: u32 = 300;

    pub fn read(&self, secret: &ResourceRef) -> Result<BTreeMap<String, Vec<u8>>> {
        let api: Api<Secret> = self.kube.namespaced(secret.namespace());
        let found = self
            .kube
            .rt
            .block_on(async { api.get(secret.name()).await })
            .map_err(|e| map_kube_err(Verb::Read, "Secret", secret.namespace(), secret.name(), e))?;
        Ok(found
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect())
    }

    pub fn create(
        &self,
        secret: &ResourceRef,
        labels: BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<Secret> = self.kube.namespaced(secret.namespace());
        let object = Secret {
            metadata: ObjectMeta {
                name: Some(secret.name().to_string()),
                labels: if labels.is_empty() { None } else { Some(labels) },
                ..ObjectMeta::default()
            },
            string_data: Some(data),
            ..Secret::default()
        };
        self.kube
            .rt
            .block_on(async { api.create(&PostParams::default(), &object).await })
            .map(|_| ())
            .map_err(|e| map_kube_err(Verb::Create, "Secret", secret.namespace(), secret.name(), e))
    }

    pub fn delete(&self, secret: &ResourceRef) -> Result<()> {
        let api: Api<Secret> = self.kube.namespaced(secret.namespace());
        match self
            .kube
            .rt
            .block_on(async { api.delete(secret.name(), &DeleteParams::default()).await })
        {
            Ok(_) => Ok(()),
            Err(e) => Err(map_kube_err(Verb::Delete, "Secret", secret.namespace(), secret.name(), e)),
        }
    }

    pub fn list(&self, namespace: &NamespaceName, selector: Option<&str>) -> Result<Vec<String>> {
        let api: Api<Secret> = self.kube.namespaced(namespace.as_str());
        let mut params = ListParams::default().timeout(Self::LIST_TIMEOUT_SECS);
        if let Some(s) = selector {
            params = params.labels(s);
        }
        let listed = self
            .kube
            .rt
            .block_on(async { api.list(&params).await })
            .map_err(|e| map_kube_err(Verb::Read, "Secret", namespace.as_str(), "", e))?;
        Ok(listed
            .items
            .into_iter()
            .filter_map(|s| s.metadata.name)
            .collect())
    }
}

pub struct Pvcs<'a> {
    kube: &'a Kube,
}

impl<'a> Pvcs<'a> {
    pub fn list(&self, namespace: &NamespaceName, selector: Option<&str>) -> Result<Vec<String>> {
        let api: Api<PersistentVolumeClaim> = self.kube.namespaced(namespace.as_str());
        let mut params = ListParams::default();
        if let Some(s) = selector {
            params = params.labels(s);
        }
        let listed = self
            .kube
            .rt
            .block_on(async { api.list(&params).await })
            .map_err(|e| {
                map_kube_err(Verb::Read, "PersistentVolumeClaim", namespace.as_str(), "", e)
            })?;
        Ok(listed
            .items
            .into_iter()
            .filter_map(|p| p.metadata.name)
            .collect())
    }

    pub fn delete(&self, pvc: &ResourceRef) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = self.kube.namespaced(pvc.namespace());
        match self
            .kube
            .rt
            .block_on(async { api.delete(pvc.name(), &DeleteParams::default()).await })
        {
            Ok(_) => Ok(()),
            Err(e) => Err(map_kube_err(
                Verb::Delete,
                "PersistentVolumeClaim",
                pvc.namespace(),
                pvc.name(),
                e,
            )),
        }
    }
}

pub struct Leases<'a> {
    kube: &'a Kube,
}

impl<'a> Leases<'a> {
    const READ_RETRIES: u32 = 3;
    const READ_RETRY_DELAY: Duration = Duration::from_secs(5);

    /// Read a lease; transient server errors (500) are retried a few times.
    pub fn read(&self, lease: &ResourceRef) -> Result<Lease> {
        let api: Api<Lease> = self.kube.namespaced(lease.namespace());
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self
                .kube
                .rt
                .block_on(async { api.get(lease.name()).await });
            match outcome {
                Ok(found) => return Ok(found),
                Err(e) => {
                    if http_status(&e) == Some(500) && attempt < Self::READ_RETRIES {
                        warn!(
                            "lease {} read returned 500, retrying ({}/{})",
                            lease, attempt, Self::READ_RETRIES
                        );
                        thread::sleep(Self::READ_RETRY_DELAY);
                        continue;
                    }
                    return Err(map_kube_err(Verb::Read, "Lease", lease.namespace(), lease.name(), e));
                }
            }
        }
    }

    pub fn create(&self, lease: &ResourceRef, spec: LeaseSpec) -> Result<Lease> {
        let api: Api<Lease> = self.kube.namespaced(lease.namespace());
        let object = Lease {
            metadata: meta(lease.name()),
            spec: Some(spec),
        };
        self.kube
            .rt
            .block_on(async { api.create(&PostParams::default(), &object).await })
            .map_err(|e| map_kube_err(Verb::Create, "Lease", lease.namespace(), lease.name(), e))
    }

    /// Replace an existing lease object; the passed object must carry the
    /// resourceVersion from a previous read.
    pub fn replace(&self, lease: &ResourceRef, object: &Lease) -> Result<Lease> {
        let api: Api<Lease> = self.kube.namespaced(lease.namespace());
        self.kube
            .rt
            .block_on(async { api.replace(lease.name(), &PostParams::default(), object).await })
            .map_err(|e| map_kube_err(Verb::Replace, "Lease", lease.namespace(), lease.name(), e))
    }

    /// Delete, ignoring absence.
    pub fn delete(&self, lease: &ResourceRef) -> Result<()> {
        let api: Api<Lease> = self.kube.namespaced(lease.namespace());
        match self
            .kube
            .rt
            .block_on(async { api.delete(lease.name(), &DeleteParams::default()).await })
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let mapped = map_kube_err(Verb::Delete, "Lease", lease.namespace(), lease.name(), e);
                if is_not_found(&mapped) {
                    Ok(())
                } else {
                    Err(mapped)
                }
            }
        }
    }
}

pub struct Ingresses<'a> {
    kube: &'a Kube,
}

impl<'a> Ingresses<'a> {
    pub fn list(&self, namespace: &NamespaceName) -> Result<Vec<String>> {
        let api: Api<Ingress> = self.kube.namespaced(namespace.as_str());
        let listed = self
            .kube
            .rt
            .block_on(async { api.list(&ListParams::default()).await })
            .map_err(|e| map_kube_err(Verb::Read, "Ingress", namespace.as_str(), "", e))?;
        Ok(listed
            .items
            .into_iter()
            .filter_map(|i| i.metadata.name)
            .collect())
    }

    pub fn classes(&self) -> Result<Vec<String>> {
        let api: Api<IngressClass> = Api::all(self.kube.client.clone());
        let listed = self
            .kube
            .rt
            .block_on(async { api.list(&ListParams::default()).await })
            .map_err(|e| map_kube_err(Verb::Read, "IngressClass", "", "", e))?;
        Ok(listed
            .items
            .into_iter()
            .filter_map(|c| c.metadata.name)
            .collect())
    }
}

pub struct Crds<'a> {
    kube: &'a Kube,
}

impl<'a> Crds<'a> {
    pub fn list(&self) -> Result<Vec<String>> {
        let api: Api<CustomResourceDefinition> = Api::all(self.kube.client.clone());
        let listed = self
            .kube
            .rt
            .block_on(async { api.list(&ListParams::default()).await })
            .map_err(|e| map_kube_err(Verb::Read, "CustomResourceDefinition", "", "", e))?;
        Ok(listed
            .items
            .into_iter()
            .filter_map(|c| c.metadata.name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_names_are_validated() {
        assert!(NamespaceName::new("solo-e2e").is_ok());
        for bad in &["", "A", "-x", "x-"] {
            let err = NamespaceName::new(bad).unwrap_err();
            match err.downcast_ref::<KErrKind>() {
                Some(KErrKind::InvalidName(n)) => assert_eq!(n, bad),
                other => panic!("unexpected error {:?}", other),
            }
        }
        assert!(NamespaceName::new(&"x".repeat(64)).is_err());
        assert!(NamespaceName::new(&"x".repeat(63)).is_ok());
    }

    #[test]
    fn resource_refs_are_validated() {
        let ns = NamespaceName::new("solo-e2e").unwrap();
        let r = ResourceRef::new(ns.clone(), "network-node1-0").unwrap();
        assert_eq!(r.to_string(), "solo-e2e/network-node1-0");
        assert!(ResourceRef::new(ns.clone(), "Not-Valid").is_err());
        let pod = ResourceRef::new(ns, "network-node1-0").unwrap();
        assert!(ContainerRef::new(pod.clone(), "root-container").is_ok());
        assert!(ContainerRef::new(pod, "UPPER").is_err());
    }

    #[test]
    fn not_found_mapping() {
        let resp = kube_client::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        };
        let mapped = map_kube_err(
            Verb::Read,
            "ConfigMap",
            "solo-e2e",
            "remote-config",
            kube_client::Error::Api(resp),
        );
        assert!(is_not_found(&mapped));
    }

    #[test]
    fn verb_mapping_carries_status() {
        let resp = kube_client::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "denied".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        };
        let mapped = map_kube_err(
            Verb::Create,
            "Secret",
            "solo-e2e",
            "node-keys",
            kube_client::Error::Api(resp),
        );
        match mapped.downcast_ref::<KErrKind>() {
            Some(KErrKind::Create(kind, ns, name, code)) => {
                assert_eq!(kind, "Secret");
                assert_eq!(ns, "solo-e2e");
                assert_eq!(name, "node-keys");
                assert_eq!(*code, 403);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
