pub mod runtime;
pub mod watch;

use std::net::IpAddr;
use std::sync::Arc;

use netguard_api::CheckResult;
use netguard_common::{ContainerKey, PolicyValue};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bpf::BpfMap;
use crate::bpf::codec::{self, KernelMap};
use crate::manager::watch::{EventHandler, WatchEvent};
use crate::metrics::Metrics;
use crate::store::NetworkStore;
use crate::types::{ContainerInfo, ContainerSource, PodInfo, PolicyInfo, PolicyLabel, object_key};
use crate::{Error, Result};

/// Container registration coming from the setup process.
#[derive(Clone, Debug, Default)]
pub struct Registration {
    pub id: String,
    pub namespace: Option<String>,
    pub pod_name: Option<String>,
    pub net_ns: Option<String>,
    pub if_name: Option<String>,
}

/// Keeps the kernel map in step with the store.
///
/// Every mutation that touches both takes the map lock first, applies the
/// store change, then writes the map. The store lock itself is only held
/// inside individual store calls.
pub struct Manager<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for Manager<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct Shared<M> {
    store: Arc<NetworkStore>,
    map: Mutex<KernelMap<M>>,
    label: PolicyLabel,
    metrics: Metrics,
}

impl<M> Manager<M>
where
    M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
{
    pub fn new(
        store: Arc<NetworkStore>,
        map: KernelMap<M>,
        label: PolicyLabel,
        metrics: Metrics,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                map: Mutex::new(map),
                label,
                metrics,
            }),
        }
    }

    pub fn store(&self) -> &NetworkStore {
        &self.shared.store
    }

    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }

    /// Registers a container and writes its record. Either both happen or
    /// neither does.
    pub fn register_container(&self, registration: Registration) -> Result<ContainerInfo> {
        if registration.id.is_empty() {
            return Err(Error::InvalidRequest("containerID must not be empty".into()));
        }
        let store = self.store();
        let mut map = self.shared.map.lock();

        let owner = match (&registration.namespace, &registration.pod_name) {
            (Some(ns), Some(name)) => store.get_pod(ns, name),
            _ => None,
        };
        let container = ContainerInfo {
            id: registration.id,
            namespace: registration.namespace,
            pod_name: registration.pod_name,
            net_ns: registration.net_ns,
            if_name: registration
                .if_name
                .unwrap_or_else(|| crate::types::WATCHED_IF_NAME.to_string()),
            ip: owner.as_ref().and_then(|p| p.ip),
            restricted: owner
                .as_ref()
                .is_some_and(|p| self.shared.label.matches(&p.labels)),
            source: ContainerSource::Runtime,
        };
        self.check_collision(&container.id)?;

        let previous = store.add_container(container.clone());
        if let Err(e) = self.write_record(&mut map, &container) {
            match previous {
                Some(previous) => store.add_container(previous),
                None => store.delete_container(&container.id),
            };
            return Err(e);
        }
        info!(
            id = %container.id,
            restricted = container.restricted,
            "registered container"
        );
        Ok(container)
    }

    /// Removes the record first, then the store entry. A missing container
    /// is not an error.
    pub fn deregister_container(&self, id: &str) -> Result<Option<ContainerInfo>> {
        let mut map = self.shared.map.lock();
        self.remove_record(&mut map, codec::hash(id))?;
        let removed = self.store().delete_container(id);
        if removed.is_some() {
            info!(id, "deregistered container");
        } else {
            debug!(id, "deregister of unknown container");
        }
        Ok(removed)
    }

    pub fn check_container(&self, id: &str) -> Result<CheckResult> {
        let registered = self.store().get_container(id).is_some();
        let record = self.shared.map.lock().lookup(id)?;
        Ok(CheckResult {
            registered,
            restricted: record.is_some_and(|r| r.restricted),
            record_present: record.is_some(),
        })
    }

    /// Stores the pod and brings the containers it owns up to date.
    pub fn apply_pod(&self, pod: PodInfo) -> Result<()> {
        let mut map = self.shared.map.lock();
        self.store().upsert_pod(pod.clone());
        self.sync_pod_containers(&mut map, &pod)
    }

    /// Forgets the pod and removes every container and record tied to it,
    /// either by owner or by the pod's last known address. A container
    /// stays in the store until its record is gone, so a failed removal is
    /// retried by the next delete or reconcile.
    pub fn delete_pod(&self, namespace: &str, name: &str, uid: Option<&str>) -> Result<()> {
        let store = self.store();
        let mut map = self.shared.map.lock();

        let previous = store.delete_pod(namespace, name);
        let owner = object_key(namespace, name);
        let last_ip: Option<IpAddr> = previous.as_ref().and_then(|p| p.ip);
        let owned: Vec<ContainerInfo> = store
            .containers()
            .into_iter()
            .filter(|c| {
                c.owner_key().as_deref() == Some(owner.as_str())
                    || (last_ip.is_some() && c.ip == last_ip)
            })
            .collect();

        let mut stale: ahash::HashMap<ContainerKey, Option<String>> = owned
            .into_iter()
            .map(|c| (codec::hash(&c.id), Some(c.id)))
            .collect();
        if let Some(uid) = uid.or(previous.as_ref().and_then(|p| p.uid.as_deref())) {
            stale.entry(codec::hash(uid)).or_insert(None);
        }
        if stale.is_empty() {
            return Ok(());
        }

        let mut present = ahash::HashSet::default();
        for entry in map.iter() {
            let (key, _) = entry?;
            if stale.contains_key(&key) {
                present.insert(key);
            }
        }

        let mut result = Ok(());
        let mut removed = 0;
        for (key, id) in stale {
            if present.contains(&key)
                && let Err(e) = self.remove_record(&mut map, key)
            {
                warn!(%e, key, "failed to remove record of deleted pod");
                result = Err(e);
                continue;
            }
            if let Some(id) = id {
                store.delete_container(&id);
                removed += 1;
            }
        }
        info!(
            pod = %owner,
            containers = removed,
            "removed containers of deleted pod"
        );
        result
    }

    pub fn apply_policy(&self, policy: PolicyInfo) {
        debug!(policy = %policy.key(), "policy updated");
        self.store().upsert_policy(policy);
    }

    pub fn delete_policy(&self, namespace: &str, name: &str) {
        debug!(namespace, name, "policy deleted");
        self.store().delete_policy(namespace, name);
    }

    /// Replaces the pod and policy sets, then rewrites every container
    /// record.
    pub fn reconcile(&self, pods: Vec<PodInfo>, policies: Vec<PolicyInfo>) -> Result<()> {
        let mut measurer = self.metrics().measure_reconcile();
        let mut map = self.shared.map.lock();
        self.store().reconcile(pods, policies);
        self.sync_containers(&mut map)?;
        measurer.succeeded();

        let (pods, policies, containers) = self.store().counts();
        info!(pods, policies, containers, "reconciled store");
        debug!("store after reconcile:\n{}", self.store().snapshot_string());
        Ok(())
    }

    fn sync_pod_containers(&self, map: &mut KernelMap<M>, pod: &PodInfo) -> Result<()> {
        let store = self.store();
        let desired = pod.watched_container(&self.shared.label);
        let restricted = self.shared.label.matches(&pod.labels);
        let mut result = Ok(());

        for current in store.containers_owned_by(&pod.key()) {
            if current.source == ContainerSource::Watch
                && desired.as_ref().is_none_or(|d| d.id != current.id)
            {
                // pod left Running or changed uid
                if let Err(e) = self.remove_record(map, codec::hash(&current.id)) {
                    result = Err(e);
                    continue;
                }
                store.delete_container(&current.id);
                continue;
            }
            let updated = ContainerInfo {
                restricted,
                ip: pod.ip.or(current.ip),
                ..current.clone()
            };
            if updated == current {
                continue;
            }
            if updated.restricted != current.restricted
                && let Err(e) = self.write_record(map, &updated)
            {
                warn!(%e, id = %updated.id, "failed to update container record");
                result = Err(e);
                continue;
            }
            store.add_container(updated);
        }

        if let Some(desired) = desired
            && store.get_container(&desired.id).is_none()
            && let Err(e) = self.insert_watched(map, desired)
        {
            result = Err(e);
        }
        result
    }

    /// Aligns every container with the current pod set and rewrites all
    /// records. Records of containers the store does not know are kept.
    fn sync_containers(&self, map: &mut KernelMap<M>) -> Result<()> {
        let store = self.store();
        let pods: ahash::HashMap<_, _> = store.pods().into_iter().map(|p| (p.key(), p)).collect();
        let mut desired: ahash::HashMap<String, ContainerInfo> = pods
            .values()
            .filter_map(|p| p.watched_container(&self.shared.label))
            .map(|c| (c.id.clone(), c))
            .collect();
        let mut result = Ok(());

        for current in store.containers() {
            let wanted = desired.remove(&current.id);
            if current.source == ContainerSource::Watch && wanted.is_none() {
                if let Err(e) = self.remove_record(map, codec::hash(&current.id)) {
                    result = Err(e);
                    continue;
                }
                store.delete_container(&current.id);
                continue;
            }
            let owner = current.owner_key().and_then(|key| pods.get(&key));
            let updated = match owner {
                Some(pod) => ContainerInfo {
                    restricted: self.shared.label.matches(&pod.labels),
                    ip: pod.ip.or(current.ip),
                    ..current.clone()
                },
                // unknown owner, fail open
                None => ContainerInfo {
                    restricted: false,
                    ..current.clone()
                },
            };
            if let Err(e) = self.write_record(map, &updated) {
                result = Err(e);
                continue;
            }
            if updated != current {
                store.add_container(updated);
            }
        }

        for (_, container) in desired {
            if let Err(e) = self.insert_watched(map, container) {
                result = Err(e);
            }
        }
        result
    }

    fn insert_watched(&self, map: &mut KernelMap<M>, container: ContainerInfo) -> Result<()> {
        if let Err(e) = self.check_collision(&container.id) {
            warn!(%e, "skipping watched container");
            return Ok(());
        }
        self.write_record(map, &container)?;
        debug!(id = %container.id, "added watched container");
        self.store().add_container(container);
        Ok(())
    }

    fn check_collision(&self, id: &str) -> Result<()> {
        let key = codec::hash(id);
        if let Some(existing) = self
            .store()
            .containers()
            .into_iter()
            .find(|c| c.id != id && codec::hash(&c.id) == key)
        {
            return Err(Error::KeyCollision {
                key,
                existing: existing.id,
                requested: id.to_string(),
            });
        }
        Ok(())
    }

    fn write_record(&self, map: &mut KernelMap<M>, container: &ContainerInfo) -> Result<()> {
        let result = map.put(container).map(|_| ());
        self.metrics()
            .count_map_operation("upsert", result.is_ok());
        if let Err(e) = &result {
            warn!(%e, id = %container.id, "failed to write container record");
        }
        result
    }

    fn remove_record(&self, map: &mut KernelMap<M>, key: ContainerKey) -> Result<()> {
        let result = map.remove_key(key).map(|_| ());
        self.metrics()
            .count_map_operation("remove", result.is_ok());
        result
    }
}

impl<M> EventHandler<PodInfo> for Manager<M>
where
    M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
{
    fn apply(&self, event: WatchEvent<PodInfo>) -> Result<()> {
        match event {
            WatchEvent::Added(pod) | WatchEvent::Modified(pod) => self.apply_pod(pod),
            WatchEvent::Deleted(pod) => {
                self.delete_pod(&pod.namespace, &pod.name, pod.uid.as_deref())
            }
        }
    }
}

impl<M> EventHandler<PolicyInfo> for Manager<M>
where
    M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
{
    fn apply(&self, event: WatchEvent<PolicyInfo>) -> Result<()> {
        match event {
            WatchEvent::Added(policy) | WatchEvent::Modified(policy) => self.apply_policy(policy),
            WatchEvent::Deleted(policy) => self.delete_policy(&policy.namespace, &policy.name),
        }
        Ok(())
    }
}
