use std::collections::BTreeMap;
use std::fmt::Display;
use std::net::IpAddr;

use serde::Serialize;

/// Store key shared by pods and policies.
pub type ObjectKey = String;

pub fn object_key(namespace: &str, name: &str) -> ObjectKey {
    format!("{namespace}/{name}")
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        write!(f, "{phase}")
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PodInfo {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    pub phase: PodPhase,
    pub ip: Option<IpAddr>,
    pub host_network: bool,
    pub labels: BTreeMap<String, String>,
}

impl PodInfo {
    pub fn key(&self) -> ObjectKey {
        object_key(&self.namespace, &self.name)
    }

    /// Container the watch derives for this pod, if the pod currently
    /// qualifies for one.
    pub fn watched_container(&self, label: &PolicyLabel) -> Option<ContainerInfo> {
        if self.phase != PodPhase::Running || self.host_network {
            return None;
        }
        let ip = self.ip?;
        let uid = self.uid.as_ref()?;
        Some(ContainerInfo {
            id: uid.clone(),
            namespace: Some(self.namespace.clone()),
            pod_name: Some(self.name.clone()),
            net_ns: None,
            if_name: WATCHED_IF_NAME.to_string(),
            ip: Some(ip),
            restricted: label.matches(&self.labels),
            source: ContainerSource::Watch,
        })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PolicyInfo {
    pub namespace: String,
    pub name: String,
    pub ingress_rules: usize,
    pub egress_rules: usize,
}

impl PolicyInfo {
    pub fn key(&self) -> ObjectKey {
        object_key(&self.namespace, &self.name)
    }
}

pub const WATCHED_IF_NAME: &str = "eth0";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum ContainerSource {
    /// Derived from a running pod seen by the cluster watch.
    Watch,
    /// Registered by the setup process over the socket.
    Runtime,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerInfo {
    pub id: String,
    pub namespace: Option<String>,
    pub pod_name: Option<String>,
    pub net_ns: Option<String>,
    pub if_name: String,
    pub ip: Option<IpAddr>,
    pub restricted: bool,
    pub source: ContainerSource,
}

impl ContainerInfo {
    pub fn owner_key(&self) -> Option<ObjectKey> {
        match (&self.namespace, &self.pod_name) {
            (Some(ns), Some(name)) => Some(object_key(ns, name)),
            _ => None,
        }
    }
}

/// Label that marks a pod's containers as restricted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PolicyLabel {
    pub key: String,
    pub value: String,
}

impl Default for PolicyLabel {
    fn default() -> Self {
        Self {
            key: "network.policy".into(),
            value: "restricted".into(),
        }
    }
}

impl PolicyLabel {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(&self.key) == Some(&self.value)
    }
}
