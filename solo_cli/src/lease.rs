use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease as KubeLease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use uuid::Uuid;

use crate::kube::{Kube, NamespaceName, ResourceRef};
use super::Result;

/// How many times `acquire` retries before reporting exhaustion.
const DEFAULT_ACQUIRE_ATTEMPTS: u32 = 10;
/// Fixed backoff between acquisition attempts.
const DEFAULT_ACQUIRE_BACKOFF: Duration = Duration::from_secs(5);

// All main errors that can happen from lease handling
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum LeaseError {
    #[fail(display = "lease '{}' is currently held by '{}'", _0, _1)]
    AcquisitionFailed(String, String),

    #[fail(display = "gave up on lease '{}' after {} attempts; held by '{}'", _0, _1, _2)]
    Exhausted(String, u32, String),

    #[fail(display = "lease '{}' is no longer held by '{}'", _0, _1)]
    Lost(String, String),
}

/// Plain data mirror of a cluster lease resource.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseRecord {
    pub holder: String,
    pub duration_secs: i64,
    pub acquire_time: DateTime<Utc>,
    pub renew_time: DateTime<Utc>,
    pub transitions: i32,
    pub resource_version: Option<String>,
}

impl LeaseRecord {
    fn fresh(holder: &str, duration_secs: i64) -> LeaseRecord {
        let now = Utc::now();
        LeaseRecord {
            holder: holder.to_string(),
            duration_secs,
            acquire_time: now,
            renew_time: now,
            transitions: 0,
            resource_version: None,
        }
    }

    /// Expired when the holder has not renewed within the lease duration.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(self.renew_time);
        elapsed.num_seconds() > self.duration_secs
    }
}

/// Storage for lease records; the real store talks to the cluster, tests use
/// an in-memory one.
pub trait LeaseStore: Send + Sync {
    fn read(&self, name: &str) -> Result<Option<LeaseRecord>>;

    fn create(&self, name: &str, record: &LeaseRecord) -> Result<()>;

    fn replace(&self, name: &str, record: &LeaseRecord) -> Result<()>;

    /// Delete, ignoring absence.
    fn delete(&self, name: &str) -> Result<()>;
}

/// Lease store over the kube facade's lease sub-facade.
pub struct KubeLeaseStore {
    kube: Arc<Kube>,
    namespace: NamespaceName,
}

impl KubeLeaseStore {
    pub fn new(kube: Arc<Kube>, namespace: NamespaceName) -> KubeLeaseStore {
        KubeLeaseStore { kube, namespace }
    }

    fn reference(&self, name: &str) -> Result<ResourceRef> {
        ResourceRef::new(self.namespace.clone(), name)
    }

    fn to_spec(record: &LeaseRecord) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(record.holder.clone()),
            lease_duration_seconds: Some(record.duration_secs as i32),
            acquire_time: Some(MicroTime(record.acquire_time)),
            renew_time: Some(MicroTime(record.renew_time)),
            lease_transitions: Some(record.transitions),
            ..LeaseSpec::default()
        }
    }

    fn from_lease(lease: &KubeLease) -> LeaseRecord {
        let spec = lease.spec.clone().unwrap_or_default();
        let now = Utc::now();
        LeaseRecord {
            holder: spec.holder_identity.unwrap_or_default(),
            duration_secs: i64::from(spec.lease_duration_seconds.unwrap_or(0)),
            acquire_time: spec.acquire_time.map(|t| t.0).unwrap_or(now),
            renew_time: spec.renew_time.map(|t| t.0).unwrap_or(now),
            transitions: spec.lease_transitions.unwrap_or(0),
            resource_version: lease.metadata.resource_version.clone(),
        }
    }
}

impl LeaseStore for KubeLeaseStore {
    fn read(&self, name: &str) -> Result<Option<LeaseRecord>> {
        let lease_ref = self.reference(name)?;
        match self.kube.leases().read(&lease_ref) {
            Ok(lease) => Ok(Some(Self::from_lease(&lease))),
            Err(e) => {
                if crate::kube::is_not_found(&e) {
                    Ok(None)
                } else {
                    Err(e)
                }
            }
        }
    }

    fn create(&self, name: &str, record: &LeaseRecord) -> Result<()> {
        let lease_ref = self.reference(name)?;
        self.kube
            .leases()
            .create(&lease_ref, Self::to_spec(record))
            .map(|_| ())
    }

    fn replace(&self, name: &str, record: &LeaseRecord) -> Result<()> {
        let lease_ref = self.reference(name)?;
        let object = KubeLease {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(name.to_string()),
                resource_version: record.resource_version.clone(),
                ..Default::default()
            },
            spec: Some(Self::to_spec(record)),
        };
        self.kube.leases().replace(&lease_ref, &object).map(|_| ())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let lease_ref = self.reference(name)?;
        self.kube.leases().delete(&lease_ref)
    }
}

struct RenewTask {
    name: String,
    held: Arc<AtomicBool>,
    renew: Box<dyn Fn() -> Result<()> + Send>,
}

struct Registration {
    task: RenewTask,
    interval: Duration,
    due: Instant,
}

enum Msg {
    Schedule(Uuid, Duration, RenewTask),
    Cancel(Uuid),
    CancelAll,
    Shutdown,
}

/// Background renewal timer.
///
/// One worker thread fires each registered lease at `duration / 2`
/// intervals; a failed renewal marks the lease as not held, logs at warn
/// and never fires again. Firings that race a cancellation renew a released
/// lease, which is benign.
pub struct RenewalService {
    tx: Mutex<Sender<Msg>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RenewalService {
    pub fn start() -> Arc<RenewalService> {
        let (tx, rx) = mpsc::channel::<Msg>();
        let worker = thread::Builder::new()
            .name("lease-renewal".to_string())
            .spawn(move || {
                let mut registrations: HashMap<Uuid, Registration> = HashMap::new();
                loop {
                    let timeout = registrations
                        .values()
                        .map(|r| {
                            let now = Instant::now();
                            if r.due > now {
                                r.due - now
                            } else {
                                Duration::from_millis(0)
                            }
                        })
                        .min()
                        .unwrap_or_else(|| Duration::from_secs(3600));
                    match rx.recv_timeout(timeout) {
                        Ok(Msg::Schedule(id, interval, task)) => {
                            let due = Instant::now() + interval;
                            registrations.insert(
                                id,
                                Registration {
                                    task,
                                    interval,
                                    due,
                                },
                            );
                        }
                        Ok(Msg::Cancel(id)) => {
                            registrations.remove(&id);
                        }
                        Ok(Msg::CancelAll) => {
                            registrations.clear();
                        }
                        Ok(Msg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            let now = Instant::now();
                            let due_ids: Vec<Uuid> = registrations
                                .iter()
                                .filter(|(_, r)| r.due <= now)
                                .map(|(id, _)| *id)
                                .collect();
                            for id in due_ids {
                                let failed = {
                                    let reg = match registrations.get_mut(&id) {
                                        Some(r) => r,
                                        None => continue,
                                    };
                                    match (reg.task.renew)() {
                                        Ok(()) => {
                                            debug!("renewed lease '{}'", reg.task.name);
                                            reg.due = now + reg.interval;
                                            false
                                        }
                                        Err(e) => {
                                            warn!(
                                                "failed to renew lease '{}', dropping it: {}",
                                                reg.task.name, e
                                            );
                                            reg.task.held.store(false, Ordering::SeqCst);
                                            true
                                        }
                                    }
                                };
                                if failed {
                                    registrations.remove(&id);
                                }
                            }
                        }
                    }
                }
            })
            .expect("spawning the renewal thread cannot fail");
        Arc::new(RenewalService {
            tx: Mutex::new(tx),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn send(&self, msg: Msg) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(msg);
        }
    }

    fn schedule(
        &self,
        name: &str,
        interval: Duration,
        held: Arc<AtomicBool>,
        renew: Box<dyn Fn() -> Result<()> + Send>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.send(Msg::Schedule(
            id,
            interval,
            RenewTask {
                name: name.to_string(),
                held,
                renew,
            },
        ));
        id
    }

    fn cancel(&self, id: Uuid) {
        self.send(Msg::Cancel(id));
    }

    /// Unschedule every registered lease; used on process shutdown.
    pub fn cancel_all(&self) {
        self.send(Msg::CancelAll);
    }

    pub fn shutdown(&self) {
        self.send(Msg::Shutdown);
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for RenewalService {
    fn drop(&mut self) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(Msg::Shutdown);
        }
    }
}

/// A named deployment lease and its lifetime.
///
/// Acquired on command entry, auto-renewed by the renewal service until
/// released. The lease serializes every process mutating one deployment.
pub struct DeploymentLease {
    name: String,
    holder: String,
    duration: Duration,
    store: Arc<dyn LeaseStore>,
    renewal: Arc<RenewalService>,
    held: Arc<AtomicBool>,
    schedule: Option<Uuid>,
    max_attempts: u32,
    backoff: Duration,
}

impl DeploymentLease {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        renewal: Arc<RenewalService>,
        name: &str,
        holder: &str,
        duration: Duration,
    ) -> DeploymentLease {
        DeploymentLease {
            name: name.to_string(),
            holder: holder.to_string(),
            duration,
            store,
            renewal,
            held: Arc::new(AtomicBool::new(false)),
            schedule: None,
            max_attempts: DEFAULT_ACQUIRE_ATTEMPTS,
            backoff: DEFAULT_ACQUIRE_BACKOFF,
        }
    }

    /// Tune the acquisition retry policy.
    pub fn attempts(mut self, max_attempts: u32, backoff: Duration) -> DeploymentLease {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    fn duration_secs(&self) -> i64 {
        self.duration.as_secs() as i64
    }

    /// One acquisition attempt.
    ///
    /// Missing lease: create it. Expired lease: take it over. Held by us:
    /// renew. Held by someone else: fail naming the holder.
    fn try_acquire(&self) -> Result<()> {
        match self.store.read(&self.name)? {
            None => {
                let record = LeaseRecord::fresh(&self.holder, self.duration_secs());
                self.store.create(&self.name, &record)
            }
            Some(mut record) => {
                if record.holder == self.holder {
                    record.renew_time = Utc::now();
                    return self.store.replace(&self.name, &record);
                }
                if record.is_expired(Utc::now()) {
                    info!(
                        "taking over expired lease '{}' from '{}'",
                        self.name, record.holder
                    );
                    let now = Utc::now();
                    record.holder = self.holder.clone();
                    record.acquire_time = now;
                    record.renew_time = now;
                    record.transitions += 1;
                    record.duration_secs = self.duration_secs();
                    return self.store.replace(&self.name, &record);
                }
                Err(LeaseError::AcquisitionFailed(self.name.clone(), record.holder).into())
            }
        }
    }

    /// Acquire with retries, then schedule auto-renewal.
    pub fn acquire(&mut self) -> Result<()> {
        let mut last_holder = String::new();
        for attempt in 1..=self.max_attempts {
            match self.try_acquire() {
                Ok(()) => {
                    self.held.store(true, Ordering::SeqCst);
                    let store = self.store.clone();
                    let name = self.name.clone();
                    let holder = self.holder.clone();
                    let interval = self.duration / 2;
                    let id = self.renewal.schedule(
                        &self.name,
                        interval,
                        self.held.clone(),
                        Box::new(move || renew_on_store(&*store, &name, &holder)),
                    );
                    self.schedule = Some(id);
                    return Ok(());
                }
                Err(e) => match e.downcast_ref::<LeaseError>() {
                    Some(LeaseError::AcquisitionFailed(_, holder)) => {
                        last_holder = holder.clone();
                        debug!(
                            "lease '{}' held by '{}' (attempt {}/{})",
                            self.name, holder, attempt, self.max_attempts
                        );
                        if attempt < self.max_attempts {
                            thread::sleep(self.backoff);
                        }
                    }
                    _ => return Err(e),
                },
            }
        }
        Err(LeaseError::Exhausted(self.name.clone(), self.max_attempts, last_holder).into())
    }

    /// Renew once, immediately.
    pub fn renew(&self) -> Result<()> {
        renew_on_store(&*self.store, &self.name, &self.holder)
    }

    /// Hand the lease to a new holder, preserving the renewal schedule.
    pub fn transfer(&mut self, new_holder: &str) -> Result<()> {
        let mut record = self
            .store
            .read(&self.name)?
            .ok_or_else(|| LeaseError::Lost(self.name.clone(), self.holder.clone()))?;
        record.transitions += 1;
        record.renew_time = Utc::now();
        record.holder = new_holder.to_string();
        self.store.replace(&self.name, &record)?;
        self.holder = new_holder.to_string();
        Ok(())
    }

    /// Delete the lease resource and stop renewing. Idempotent.
    pub fn release(&mut self) -> Result<()> {
        if let Some(id) = self.schedule.take() {
            self.renewal.cancel(id);
        }
        self.store.delete(&self.name)?;
        self.held.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn renew_on_store(store: &dyn LeaseStore, name: &str, holder: &str) -> Result<()> {
    let mut record = store
        .read(name)?
        .ok_or_else(|| LeaseError::Lost(name.to_string(), holder.to_string()))?;
    if record.holder != holder {
        return Err(LeaseError::Lost(name.to_string(), holder.to_string()).into());
    }
    record.renew_time = Utc::now();
    store.replace(name, &record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct MemoryStore {
        leases: Mutex<BTreeMap<String, LeaseRecord>>,
    }

    impl LeaseStore for MemoryStore {
        fn read(&self, name: &str) -> Result<Option<LeaseRecord>> {
            Ok(self.leases.lock().unwrap().get(name).cloned())
        }
        fn create(&self, name: &str, record: &LeaseRecord) -> Result<()> {
            let mut leases = self.leases.lock().unwrap();
            if leases.contains_key(name) {
                bail!("lease '{}' already exists", name);
            }
            leases.insert(name.to_string(), record.clone());
            Ok(())
        }
        fn replace(&self, name: &str, record: &LeaseRecord) -> Result<()> {
            let mut leases = self.leases.lock().unwrap();
            if !leases.contains_key(name) {
                bail!("lease '{}' does not exist", name);
            }
            leases.insert(name.to_string(), record.clone());
            Ok(())
        }
        fn delete(&self, name: &str) -> Result<()> {
            self.leases.lock().unwrap().remove(name);
            Ok(())
        }
    }

    fn lease(
        store: &Arc<MemoryStore>,
        renewal: &Arc<RenewalService>,
        holder: &str,
    ) -> DeploymentLease {
        DeploymentLease::new(
            store.clone() as Arc<dyn LeaseStore>,
            renewal.clone(),
            "deploy-a",
            holder,
            Duration::from_secs(20),
        )
        .attempts(2, Duration::from_millis(5))
    }

    #[test]
    fn acquire_creates_and_release_is_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let renewal = RenewalService::start();
        let mut l = lease(&store, &renewal, "p1@host");
        l.acquire().unwrap();
        assert!(l.is_held());
        assert_eq!(
            store.read("deploy-a").unwrap().unwrap().holder,
            "p1@host"
        );
        l.release().unwrap();
        l.release().unwrap();
        assert!(!l.is_held());
        assert!(store.read("deploy-a").unwrap().is_none());
        renewal.shutdown();
    }

    #[test]
    fn contention_fails_with_current_holder() {
        let store = Arc::new(MemoryStore::default());
        let renewal = RenewalService::start();
        let mut p1 = lease(&store, &renewal, "p1@host");
        p1.acquire().unwrap();

        let mut p2 = lease(&store, &renewal, "p2@host");
        let err = p2.acquire().unwrap_err();
        match err.downcast_ref::<LeaseError>() {
            Some(LeaseError::Exhausted(name, attempts, holder)) => {
                assert_eq!(name, "deploy-a");
                assert_eq!(*attempts, 2);
                assert_eq!(holder, "p1@host");
            }
            other => panic!("unexpected error {:?}", other),
        }
        renewal.shutdown();
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let store = Arc::new(MemoryStore::default());
        let renewal = RenewalService::start();
        let mut p1 = lease(&store, &renewal, "p1@host");
        p1.acquire().unwrap();

        // age the lease past twice its duration
        {
            let mut leases = store.leases.lock().unwrap();
            let record = leases.get_mut("deploy-a").unwrap();
            record.renew_time = Utc::now() - chrono::Duration::seconds(41);
        }

        let mut p2 = lease(&store, &renewal, "p2@host");
        p2.acquire().unwrap();
        let record = store.read("deploy-a").unwrap().unwrap();
        assert_eq!(record.holder, "p2@host");
        assert_eq!(record.transitions, 1);
        renewal.shutdown();
    }

    #[test]
    fn reacquire_by_holder_renews() {
        let store = Arc::new(MemoryStore::default());
        let renewal = RenewalService::start();
        let mut l = lease(&store, &renewal, "p1@host");
        l.acquire().unwrap();
        let first = store.read("deploy-a").unwrap().unwrap();
        thread::sleep(Duration::from_millis(10));
        l.acquire().unwrap();
        let second = store.read("deploy-a").unwrap().unwrap();
        assert_eq!(second.transitions, first.transitions);
        assert!(second.renew_time >= first.renew_time);
        renewal.shutdown();
    }

    #[test]
    fn transfer_bumps_transitions_and_holder() {
        let store = Arc::new(MemoryStore::default());
        let renewal = RenewalService::start();
        let mut l = lease(&store, &renewal, "p1@host");
        l.acquire().unwrap();
        l.transfer("p3@host").unwrap();
        let record = store.read("deploy-a").unwrap().unwrap();
        assert_eq!(record.holder, "p3@host");
        assert_eq!(record.transitions, 1);
        assert_eq!(l.holder(), "p3@host");
        renewal.shutdown();
    }

    #[test]
    fn renewal_service_fires_and_stops_on_failure() {
        let renewal = RenewalService::start();
        let fires = Arc::new(AtomicU32::new(0));
        let held = Arc::new(AtomicBool::new(true));
        let fires_in_task = fires.clone();
        renewal.schedule(
            "deploy-a",
            Duration::from_millis(10),
            held.clone(),
            Box::new(move || {
                let n = fires_in_task.fetch_add(1, Ordering::SeqCst);
                if n >= 2 {
                    bail!("renew refused");
                }
                Ok(())
            }),
        );
        thread::sleep(Duration::from_millis(200));
        // two successes, one failure, then silence
        assert_eq!(fires.load(Ordering::SeqCst), 3);
        assert!(!held.load(Ordering::SeqCst));
        renewal.shutdown();
    }

    #[test]
    fn cancel_all_stops_firing() {
        let renewal = RenewalService::start();
        let fires = Arc::new(AtomicU32::new(0));
        let held = Arc::new(AtomicBool::new(true));
        let fires_in_task = fires.clone();
        renewal.schedule(
            "deploy-a",
            Duration::from_millis(20),
            held,
            Box::new(move || {
                fires_in_task.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        renewal.cancel_all();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(fires.load(Ordering::SeqCst), 0);
        renewal.shutdown();
    }
}
