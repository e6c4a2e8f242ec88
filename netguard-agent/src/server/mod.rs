mod handler;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use netguard_common::{ContainerKey, PolicyValue};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::bpf::BpfMap;
use crate::manager::Manager;

pub use handler::{handle_connection, handle_request};

/// Binds the agent socket, replacing a stale socket file left by an
/// earlier run.
pub fn bind(path: &Path) -> Result<UnixListener> {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != ErrorKind::NotFound
    {
        return Err(e.into());
    }
    let Some(parent) = path.parent() else {
        return Err(std::io::Error::new(
            ErrorKind::NotFound,
            format!("parent of path {} could not resolve", path.display()),
        )
        .into());
    };
    fs::create_dir_all(parent)?;
    let listener = UnixListener::bind(path)?;
    info!("agent socket listening on {}", path.display());
    Ok(listener)
}

/// Accepts connections until `cancel` fires, then waits for in-flight
/// requests and removes the socket file.
pub async fn serve<M>(
    listener: UnixListener,
    path: PathBuf,
    manager: Manager<M>,
    cancel: CancellationToken,
) -> Result<()>
where
    M: BpfMap<ContainerKey, PolicyValue> + Send + 'static,
{
    let tracker = TaskTracker::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let manager = manager.clone();
                    tracker.spawn(async move {
                        if let Err(e) = handle_connection(stream, &manager).await {
                            warn!(%e, "failed to serve connection");
                        }
                    });
                }
                Err(e) => {
                    error!(%e, "failed to accept connection");
                }
            }
        }
    }

    tracker.close();
    debug!(in_flight = tracker.len(), "waiting for in-flight requests");
    tracker.wait().await;
    drop(listener);
    if let Err(e) = fs::remove_file(&path)
        && e.kind() != ErrorKind::NotFound
    {
        warn!(%e, "failed to remove agent socket");
    }
    info!("agent socket closed");
    Ok(())
}
