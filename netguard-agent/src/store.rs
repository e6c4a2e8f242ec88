use std::fmt::Write;

use parking_lot::RwLock;

use crate::types::{ContainerInfo, ObjectKey, PodInfo, PolicyInfo, object_key};

#[derive(Default)]
struct Inner {
    pods: ahash::HashMap<ObjectKey, PodInfo>,
    policies: ahash::HashMap<ObjectKey, PolicyInfo>,
    containers: ahash::HashMap<String, ContainerInfo>,
}

/// In-memory view of pods, policies and containers.
///
/// All three collections sit behind one lock so a reader never mixes
/// generations. The lock is only held for the in-memory mutation itself.
#[derive(Default)]
pub struct NetworkStore {
    inner: RwLock<Inner>,
}

impl NetworkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a pod, returning the replaced value.
    pub fn upsert_pod(&self, pod: PodInfo) -> Option<PodInfo> {
        let key = pod.key();
        self.inner.write().pods.insert(key, pod)
    }

    pub fn delete_pod(&self, namespace: &str, name: &str) -> Option<PodInfo> {
        self.inner.write().pods.remove(&object_key(namespace, name))
    }

    pub fn get_pod(&self, namespace: &str, name: &str) -> Option<PodInfo> {
        self.inner
            .read()
            .pods
            .get(&object_key(namespace, name))
            .cloned()
    }

    pub fn upsert_policy(&self, policy: PolicyInfo) -> Option<PolicyInfo> {
        let key = policy.key();
        self.inner.write().policies.insert(key, policy)
    }

    pub fn delete_policy(&self, namespace: &str, name: &str) -> Option<PolicyInfo> {
        self.inner
            .write()
            .policies
            .remove(&object_key(namespace, name))
    }

    pub fn get_policy(&self, namespace: &str, name: &str) -> Option<PolicyInfo> {
        self.inner
            .read()
            .policies
            .get(&object_key(namespace, name))
            .cloned()
    }

    pub fn add_container(&self, container: ContainerInfo) -> Option<ContainerInfo> {
        self.inner
            .write()
            .containers
            .insert(container.id.clone(), container)
    }

    pub fn delete_container(&self, id: &str) -> Option<ContainerInfo> {
        self.inner.write().containers.remove(id)
    }

    pub fn get_container(&self, id: &str) -> Option<ContainerInfo> {
        self.inner.read().containers.get(id).cloned()
    }

    pub fn containers(&self) -> Vec<ContainerInfo> {
        self.inner.read().containers.values().cloned().collect()
    }

    pub fn containers_owned_by(&self, owner: &str) -> Vec<ContainerInfo> {
        self.inner
            .read()
            .containers
            .values()
            .filter(|c| c.owner_key().as_deref() == Some(owner))
            .cloned()
            .collect()
    }

    pub fn pods(&self) -> Vec<PodInfo> {
        self.inner.read().pods.values().cloned().collect()
    }

    pub fn policies(&self) -> Vec<PolicyInfo> {
        self.inner.read().policies.values().cloned().collect()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let inner = self.inner.read();
        (
            inner.pods.len(),
            inner.policies.len(),
            inner.containers.len(),
        )
    }

    /// Replaces the full pod and policy sets. Containers are left alone.
    ///
    /// The replacement maps are built before the write lock is taken, so
    /// readers see either the old or the new generation.
    pub fn reconcile(&self, pods: Vec<PodInfo>, policies: Vec<PolicyInfo>) {
        let pods: ahash::HashMap<_, _> = pods.into_iter().map(|p| (p.key(), p)).collect();
        let policies: ahash::HashMap<_, _> =
            policies.into_iter().map(|p| (p.key(), p)).collect();

        let mut inner = self.inner.write();
        inner.pods = pods;
        inner.policies = policies;
    }

    /// Diagnostic rendering of the whole store, sorted by key.
    pub fn snapshot_string(&self) -> String {
        let inner = self.inner.read();
        let mut out = String::new();

        let mut pods: Vec<_> = inner.pods.iter().collect();
        pods.sort_by(|a, b| a.0.cmp(b.0));
        let _ = writeln!(out, "Pods:");
        for (key, pod) in pods {
            let ip = pod.ip.map(|ip| ip.to_string()).unwrap_or_default();
            let _ = writeln!(out, "  {key}: Phase={}, IP={ip}", pod.phase);
        }

        let mut policies: Vec<_> = inner.policies.iter().collect();
        policies.sort_by(|a, b| a.0.cmp(b.0));
        let _ = writeln!(out, "Policies:");
        for (key, policy) in policies {
            let _ = writeln!(
                out,
                "  {key}: Ingress rules={}, Egress rules={}",
                policy.ingress_rules, policy.egress_rules
            );
        }

        let mut containers: Vec<_> = inner.containers.iter().collect();
        containers.sort_by(|a, b| a.0.cmp(b.0));
        let _ = writeln!(out, "Containers:");
        for (id, c) in containers {
            let _ = writeln!(
                out,
                "  {id}: Pod={}/{}, NetNS={}, Interface={}, Restricted={}",
                c.namespace.as_deref().unwrap_or_default(),
                c.pod_name.as_deref().unwrap_or_default(),
                c.net_ns.as_deref().unwrap_or_default(),
                c.if_name,
                c.restricted,
            );
        }
        out
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::types::{ContainerSource, PodPhase};

    fn pod(namespace: &str, name: &str, generation: u64) -> PodInfo {
        PodInfo {
            namespace: namespace.into(),
            name: name.into(),
            uid: Some(format!("{namespace}-{name}")),
            phase: PodPhase::Running,
            ip: None,
            host_network: false,
            labels: BTreeMap::from([("gen".into(), generation.to_string())]),
        }
    }

    fn policy(namespace: &str, name: &str) -> PolicyInfo {
        PolicyInfo {
            namespace: namespace.into(),
            name: name.into(),
            ingress_rules: 1,
            egress_rules: 0,
        }
    }

    fn container(id: &str) -> ContainerInfo {
        ContainerInfo {
            id: id.into(),
            namespace: Some("default".into()),
            pod_name: Some("web".into()),
            net_ns: Some("/var/run/netns/cni-1".into()),
            if_name: "eth0".into(),
            ip: None,
            restricted: false,
            source: ContainerSource::Runtime,
        }
    }

    #[test]
    fn test_pod_upsert_delete() {
        let store = NetworkStore::new();
        assert!(store.upsert_pod(pod("default", "web", 1)).is_none());
        let prev = store.upsert_pod(pod("default", "web", 2)).expect("replaced");
        assert_eq!(prev.labels["gen"], "1");
        assert_eq!(store.get_pod("default", "web").unwrap().labels["gen"], "2");

        assert!(store.delete_pod("default", "web").is_some());
        // deleting again is a no-op
        assert!(store.delete_pod("default", "web").is_none());
        assert!(store.get_pod("default", "web").is_none());
    }

    #[test]
    fn test_policy_upsert_delete() {
        let store = NetworkStore::new();
        store.upsert_policy(policy("default", "deny-all"));
        store.upsert_policy(policy("default", "deny-all"));
        assert_eq!(store.counts().1, 1);
        assert!(store.delete_policy("default", "deny-all").is_some());
        assert!(store.get_policy("default", "deny-all").is_none());
    }

    #[test]
    fn test_containers() {
        let store = NetworkStore::new();
        store.add_container(container("c1"));
        store.add_container(container("c2"));
        assert_eq!(store.get_container("c1").unwrap().if_name, "eth0");
        assert_eq!(store.containers_owned_by("default/web").len(), 2);

        assert!(store.delete_container("c1").is_some());
        assert!(store.get_container("c1").is_none());
        assert!(store.delete_container("c1").is_none());

        assert_eq!(store.containers().len(), 1);
    }

    #[test]
    fn test_reconcile_replaces_pods_and_policies_only() {
        let store = NetworkStore::new();
        store.upsert_pod(pod("default", "stale", 1));
        store.upsert_policy(policy("default", "stale"));
        store.add_container(container("c1"));

        store.reconcile(
            vec![pod("default", "web", 1), pod("kube-system", "dns", 1)],
            vec![policy("default", "deny-all")],
        );

        assert!(store.get_pod("default", "stale").is_none());
        assert!(store.get_policy("default", "stale").is_none());
        assert_eq!(store.counts(), (2, 1, 1));
        assert!(store.get_container("c1").is_some());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let store = NetworkStore::new();
        let pods = vec![pod("default", "web", 1), pod("default", "db", 3)];
        let policies = vec![policy("default", "deny-all")];

        store.reconcile(pods.clone(), policies.clone());
        let first = store.snapshot_string();
        store.reconcile(pods, policies);
        assert_eq!(first, store.snapshot_string());
    }

    #[test]
    fn test_snapshot_string() {
        let store = NetworkStore::new();
        let mut p = pod("default", "web", 1);
        p.ip = Some("10.0.0.4".parse().unwrap());
        store.upsert_pod(p);
        store.upsert_policy(policy("default", "deny-all"));
        store.add_container(container("c1"));

        let out = store.snapshot_string();
        assert!(out.contains("default/web: Phase=Running, IP=10.0.0.4"));
        assert!(out.contains("default/deny-all: Ingress rules=1, Egress rules=0"));
        assert!(out.contains("c1: Pod=default/web, NetNS=/var/run/netns/cni-1, Interface=eth0"));
    }

    #[test]
    fn test_reads_follow_write_order_per_key() {
        let store = Arc::new(NetworkStore::new());
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for generation in 1..=2000u64 {
                    store.upsert_pod(pod("default", "web", generation));
                    if generation % 100 == 0 {
                        store.delete_pod("default", "web");
                    }
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    let mut last = 0u64;
                    for _ in 0..5000 {
                        if let Some(p) = store.get_pod("default", "web") {
                            let generation: u64 = p.labels["gen"].parse().unwrap();
                            assert!(generation >= last, "{generation} observed after {last}");
                            last = generation;
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn test_reconcile_never_exposes_empty_state() {
        let store = Arc::new(NetworkStore::new());
        let a = vec![pod("default", "a", 1)];
        let b = vec![pod("default", "b", 1), pod("default", "c", 1)];
        store.reconcile(a.clone(), vec![]);

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    if i % 2 == 0 {
                        store.reconcile(b.clone(), vec![policy("default", "p")]);
                    } else {
                        store.reconcile(a.clone(), vec![]);
                    }
                }
            })
        };
        let reader = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..5000 {
                    let (pods, policies, _) = store.counts();
                    assert!(pods == 1 && policies == 0 || pods == 2 && policies == 1);
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
    }
}
