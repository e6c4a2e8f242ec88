mod source;

use std::net::IpAddr;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::ResourceExt;

use crate::types::{PodInfo, PodPhase, PolicyInfo};

pub use source::KubeSource;

impl From<&Pod> for PodInfo {
    fn from(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        Self {
            namespace: pod.namespace().unwrap_or_default(),
            name: pod.name_any(),
            uid: pod.uid(),
            phase: status
                .and_then(|s| s.phase.as_deref())
                .map(PodPhase::from)
                .unwrap_or_default(),
            ip: status
                .and_then(|s| s.pod_ip.as_deref())
                .and_then(|ip| ip.parse::<IpAddr>().ok()),
            host_network: pod
                .spec
                .as_ref()
                .and_then(|s| s.host_network)
                .unwrap_or(false),
            labels: pod.labels().clone(),
        }
    }
}

impl From<&NetworkPolicy> for PolicyInfo {
    fn from(policy: &NetworkPolicy) -> Self {
        let spec = policy.spec.as_ref();
        Self {
            namespace: policy.namespace().unwrap_or_default(),
            name: policy.name_any(),
            ingress_rules: spec
                .and_then(|s| s.ingress.as_ref())
                .map_or(0, |rules| rules.len()),
            egress_rules: spec
                .and_then(|s| s.egress.as_ref())
                .map_or(0, |rules| rules.len()),
        }
    }
}
