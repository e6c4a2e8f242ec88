use std::time::Duration;

use netguard_common::{ContainerKey, PolicyValue};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backoff::{Backoff, Clock};
use crate::bpf::BpfMap;
use crate::manager::Manager;
use crate::manager::watch::{ClusterSource, Subscription};
use crate::types::{PodInfo, PolicyInfo};
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub reconcile_interval: Duration,
    pub backoff: Backoff,
}

/// Lists pods and policies and reconciles the manager against them.
pub async fn reconcile_once<M, P, Q>(manager: &Manager<M>, pods: &P, policies: &Q) -> Result<()>
where
    M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
    P: ClusterSource<PodInfo>,
    Q: ClusterSource<PolicyInfo>,
{
    let (pods, policies) = tokio::try_join!(pods.list(), policies.list())?;
    manager.reconcile(pods, policies)
}

/// Runs the initial sync, then starts both watches and the periodic
/// reconciliation. A failed initial sync is returned to the caller.
pub async fn start<M, P, Q, C>(
    manager: Manager<M>,
    pods: P,
    policies: Q,
    clock: C,
    settings: SyncSettings,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>>
where
    M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
    P: ClusterSource<PodInfo> + Clone,
    Q: ClusterSource<PolicyInfo> + Clone,
    C: Clock + Clone,
{
    info!("running initial sync");
    reconcile_once(&manager, &pods, &policies).await?;

    let pod_watch = Subscription::new(
        "pods",
        pods.clone(),
        manager.clone(),
        clock.clone(),
        settings.backoff.clone(),
        manager.metrics().clone(),
    );
    let policy_watch = Subscription::new(
        "policies",
        policies.clone(),
        manager.clone(),
        clock,
        settings.backoff,
        manager.metrics().clone(),
    );

    let handle = tokio::spawn(async move {
        tokio::join!(
            pod_watch.run::<PodInfo>(cancel.child_token()),
            policy_watch.run::<PolicyInfo>(cancel.child_token()),
            periodic_reconcile(
                manager,
                pods,
                policies,
                settings.reconcile_interval,
                cancel.child_token(),
            ),
        );
    });
    Ok(handle)
}

/// Reconciles on a fixed interval. The first tick is skipped because the
/// initial sync just ran.
pub async fn periodic_reconcile<M, P, Q>(
    manager: Manager<M>,
    pods: P,
    policies: Q,
    interval: Duration,
    cancel: CancellationToken,
) where
    M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
    P: ClusterSource<PodInfo>,
    Q: ClusterSource<PolicyInfo>,
{
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = reconcile_once(&manager, &pods, &policies).await {
                    error!(%e, "periodic reconciliation failed");
                }
            }
        }
    }
    info!("periodic reconciliation stopped");
}

pub fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Task(e.to_string())
}
