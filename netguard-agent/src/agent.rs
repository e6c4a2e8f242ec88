use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::Api;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Result;
use crate::backoff::{Backoff, TokioClock};
use crate::bpf::{KernelMap, codec};
use crate::config::{AgentArgs, DumpArgs};
use crate::kubernetes::KubeSource;
use crate::manager::Manager;
use crate::manager::runtime::{self, SyncSettings, join_error};
use crate::metrics::Metrics;
use crate::server;
use crate::store::NetworkStore;
use crate::types::PolicyLabel;

const MAP_WAIT_INITIAL: Duration = Duration::from_secs(2);
const MAP_WAIT_MAX: Duration = Duration::from_secs(10);

/// Starts the agent: opens the pinned map, syncs with the cluster, then
/// serves the socket until `cancel` fires. `ready` is cancelled once
/// requests can be answered.
pub async fn start(
    args: AgentArgs,
    metrics: Metrics,
    ready: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    let map = codec::open_with_retry(
        &args.bpf_map_path,
        args.map_wait_attempts,
        Backoff::new(MAP_WAIT_INITIAL, MAP_WAIT_MAX),
        &TokioClock,
    )
    .await?;

    let kube_client = kube::Client::try_default().await?;
    let mut pods = KubeSource::new(Api::<Pod>::all(kube_client.clone()));
    if let Some(node) = &args.node_name {
        info!("watching pods on node {node}");
        pods = pods.with_field_selector(format!("spec.nodeName={node}"));
    }
    let policies = KubeSource::new(Api::<NetworkPolicy>::all(kube_client));

    let store = Arc::new(NetworkStore::new());
    let label = PolicyLabel {
        key: args.policy_label_key.clone(),
        value: args.policy_label_value.clone(),
    };
    let manager = Manager::new(store, KernelMap::new(map), label, metrics);

    let settings = SyncSettings {
        reconcile_interval: args.reconcile_interval(),
        backoff: Backoff::new(args.backoff_initial(), args.backoff_max()),
    };
    let sync_handle = runtime::start(
        manager.clone(),
        pods,
        policies,
        TokioClock,
        settings,
        cancel.child_token(),
    )
    .await?;

    let listener = server::bind(&args.socket_path)?;
    let server_handle = tokio::spawn(server::serve(
        listener,
        args.socket_path.clone(),
        manager,
        cancel.child_token(),
    ));
    ready.cancel();
    info!("agent ready");

    let (sync, served) = tokio::join!(sync_handle, server_handle);
    sync.map_err(join_error)?;
    served.map_err(join_error)?
}

/// Prints every record of the pinned map.
pub fn dump(args: DumpArgs) -> Result<()> {
    let map = KernelMap::new(codec::open(&args.bpf_map_path)?);
    let mut out = std::io::stdout().lock();
    let mut count = 0;
    for entry in map.iter() {
        match entry {
            Ok((key, record)) => {
                writeln!(out, "{key:#018x} restricted={}", record.restricted)?;
                count += 1;
            }
            Err(e) => {
                error!(%e, "failed to read map entry");
                return Err(e);
            }
        }
    }
    writeln!(out, "{count} entries")?;
    Ok(())
}
