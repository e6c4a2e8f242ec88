pub mod agent;
pub mod backoff;
pub mod bpf;
pub mod config;
pub mod http;
pub mod kubernetes;
pub mod manager;
pub mod metrics;
pub mod server;
pub mod store;
pub mod types;

use std::path::PathBuf;

use netguard_common::ContainerKey;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("map error: {0}")]
    Map(#[from] aya::maps::MapError),

    #[error("kernel map at {} is unavailable: {reason}", path.display())]
    MapUnavailable { path: PathBuf, reason: String },

    #[error(
        "container {requested} hashes to key {key:#018x} already owned by container {existing}"
    )]
    KeyCollision {
        key: ContainerKey,
        existing: String,
        requested: String,
    },

    #[error("watch failed: {0}")]
    Watch(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("framing error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("task failed: {0}")]
    Task(String),
}

impl Error {
    /// Transient infrastructure failures that a caller may retry after
    /// backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::Map(_) | Error::MapUnavailable { .. } | Error::Watch(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Watch("stream closed".into()).is_retryable());
        assert!(
            Error::MapUnavailable {
                path: "/sys/fs/bpf/container_deps".into(),
                reason: "not found".into(),
            }
            .is_retryable()
        );
        assert!(!Error::InvalidRequest("bad".into()).is_retryable());
        assert!(
            !Error::KeyCollision {
                key: 1,
                existing: "a".into(),
                requested: "b".into(),
            }
            .is_retryable()
        );
    }
}
