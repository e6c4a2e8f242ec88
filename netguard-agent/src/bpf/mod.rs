pub mod codec;

use std::borrow::{Borrow, BorrowMut};
use std::hash::Hash;
use std::io::ErrorKind;

use aya::Pod;
use aya::maps::{HashMap, MapData, MapError};

use crate::Result;

pub use codec::{KernelMap, PinnedMap, PolicyRecord};

/// Point operations and iteration over a kernel hash map.
pub trait BpfMap<K, V> {
    fn update(&mut self, key: K, value: V) -> Result<()>;
    /// Returns false when the key was not present.
    fn delete(&mut self, key: &K) -> Result<bool>;
    fn get(&self, key: &K) -> Result<Option<V>>;
    fn entries(&self) -> Box<dyn Iterator<Item = Result<(K, V)>> + '_>;
}

impl<T, K, V> BpfMap<K, V> for HashMap<T, K, V>
where
    T: Borrow<MapData> + BorrowMut<MapData>,
    K: Pod + Eq + Hash,
    V: Pod,
{
    fn update(&mut self, key: K, value: V) -> Result<()> {
        Ok(self.insert(key, value, 0)?)
    }

    fn delete(&mut self, key: &K) -> Result<bool> {
        match self.remove(key) {
            Ok(()) => Ok(true),
            Err(MapError::SyscallError(e)) if e.io_error.kind() == ErrorKind::NotFound => {
                Ok(false)
            }
            Err(MapError::KeyNotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        match <HashMap<T, K, V>>::get(self, key, 0) {
            Ok(v) => Ok(Some(v)),
            Err(MapError::KeyNotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn entries(&self) -> Box<dyn Iterator<Item = Result<(K, V)>> + '_> {
        Box::new(self.iter().map(|entry| entry.map_err(Into::into)))
    }
}

impl<K: Pod + Eq + Hash, V: Pod> BpfMap<K, V> for ahash::HashMap<K, V> {
    fn update(&mut self, key: K, value: V) -> Result<()> {
        self.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &K) -> Result<bool> {
        Ok(self.remove(key).is_some())
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(<ahash::HashMap<K, V>>::get(self, key).copied())
    }

    fn entries(&self) -> Box<dyn Iterator<Item = Result<(K, V)>> + '_> {
        Box::new(self.iter().map(|(k, v)| Ok((*k, *v))))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use netguard_common::{ContainerKey, PolicyValue};
    use parking_lot::Mutex;

    use super::BpfMap;
    use crate::{Error, Result};

    /// Shared in-memory map whose writes can be made to fail on demand.
    #[derive(Clone, Default)]
    pub(crate) struct FlakyMap {
        entries: Arc<Mutex<ahash::HashMap<ContainerKey, PolicyValue>>>,
        fail_writes: Arc<AtomicBool>,
    }

    impl FlakyMap {
        pub fn set_failing(&self, failing: bool) {
            self.fail_writes.store(failing, Ordering::SeqCst);
        }

        pub fn len(&self) -> usize {
            self.entries.lock().len()
        }

        fn check(&self) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::MapUnavailable {
                    path: "/sys/fs/bpf/container_deps".into(),
                    reason: "injected failure".into(),
                });
            }
            Ok(())
        }
    }

    impl BpfMap<ContainerKey, PolicyValue> for FlakyMap {
        fn update(&mut self, key: ContainerKey, value: PolicyValue) -> Result<()> {
            self.check()?;
            self.entries.lock().insert(key, value);
            Ok(())
        }

        fn delete(&mut self, key: &ContainerKey) -> Result<bool> {
            self.check()?;
            Ok(self.entries.lock().remove(key).is_some())
        }

        fn get(&self, key: &ContainerKey) -> Result<Option<PolicyValue>> {
            Ok(self.entries.lock().get(key).copied())
        }

        fn entries(&self) -> Box<dyn Iterator<Item = Result<(ContainerKey, PolicyValue)>> + '_> {
            let entries: Vec<_> = self.entries.lock().iter().map(|(k, v)| (*k, *v)).collect();
            Box::new(entries.into_iter().map(Ok))
        }
    }
}
