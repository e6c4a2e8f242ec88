use std::path::Path;

use aya::maps::{HashMap, Map, MapData};
use netguard_common::{ContainerKey, FLAG_RESTRICTED, PolicyValue, container_key};
use tracing::{info, warn};

use crate::backoff::{Backoff, Clock};
use crate::bpf::BpfMap;
use crate::types::ContainerInfo;
use crate::{Error, Result};

pub type PinnedMap = HashMap<MapData, ContainerKey, PolicyValue>;

/// Decoded view of a map value.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PolicyRecord {
    pub restricted: bool,
}

pub fn hash(container_id: &str) -> ContainerKey {
    container_key(container_id.as_bytes())
}

pub fn encode(container: &ContainerInfo) -> PolicyValue {
    encode_flags(container.restricted)
}

pub fn encode_flags(restricted: bool) -> PolicyValue {
    let flags = if restricted { FLAG_RESTRICTED } else { 0 };
    PolicyValue::from_flags(flags)
}

pub fn decode(value: &PolicyValue) -> PolicyRecord {
    PolicyRecord {
        restricted: value.is_restricted(),
    }
}

/// Container policy map keyed by the hash of the container id.
///
/// Writes are last writer wins. Callers that need read-modify-write have to
/// serialize around this type themselves.
pub struct KernelMap<M> {
    map: M,
}

impl<M> KernelMap<M>
where
    M: BpfMap<ContainerKey, PolicyValue>,
{
    pub fn new(map: M) -> Self {
        Self { map }
    }

    pub fn upsert(&mut self, key: ContainerKey, value: PolicyValue) -> Result<()> {
        self.map.update(key, value)
    }

    /// Writes the record for `container` and returns its key.
    pub fn put(&mut self, container: &ContainerInfo) -> Result<ContainerKey> {
        let key = hash(&container.id);
        self.upsert(key, encode(container))?;
        Ok(key)
    }

    /// `None` means the container has no record; it is not an error.
    pub fn lookup(&self, container_id: &str) -> Result<Option<PolicyRecord>> {
        self.lookup_key(hash(container_id))
    }

    pub fn lookup_key(&self, key: ContainerKey) -> Result<Option<PolicyRecord>> {
        Ok(self.map.get(&key)?.as_ref().map(decode))
    }

    /// Restricted state of a container. Unknown containers are unrestricted.
    pub fn is_restricted(&self, container_id: &str) -> Result<bool> {
        Ok(self
            .lookup(container_id)?
            .is_some_and(|record| record.restricted))
    }

    pub fn remove(&mut self, container_id: &str) -> Result<bool> {
        self.remove_key(hash(container_id))
    }

    pub fn remove_key(&mut self, key: ContainerKey) -> Result<bool> {
        self.map.delete(&key)
    }

    /// Walks the map lazily. Each call starts a fresh walk; entries written
    /// concurrently may or may not be observed.
    pub fn iter(&self) -> impl Iterator<Item = Result<(ContainerKey, PolicyRecord)>> + '_ {
        self.map
            .entries()
            .map(|entry| entry.map(|(key, value)| (key, decode(&value))))
    }
}

/// Opens the map pinned at `path`. The map is never created here.
pub fn open(path: &Path) -> Result<PinnedMap> {
    let unavailable = |reason: String| Error::MapUnavailable {
        path: path.to_path_buf(),
        reason,
    };
    let data = MapData::from_pin(path).map_err(|e| unavailable(e.to_string()))?;
    let map: PinnedMap = Map::HashMap(data)
        .try_into()
        .map_err(|e: aya::maps::MapError| unavailable(e.to_string()))?;
    Ok(map)
}

/// Opens the pinned map, waiting for it to appear.
pub async fn open_with_retry<C: Clock>(
    path: &Path,
    attempts: u32,
    mut backoff: Backoff,
    clock: &C,
) -> Result<PinnedMap> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match open(path) {
            Ok(map) => {
                info!("opened pinned map {}", path.display());
                return Ok(map);
            }
            Err(e) if attempt < attempts => {
                let delay = backoff.next_delay();
                warn!(%e, attempt, ?delay, "pinned map not ready, retrying");
                clock.sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
