#![no_std]

//! Layout of the container policy map shared between the agent and the
//! packet filter that consumes it.
//!
//! The map is a `BPF_MAP_TYPE_HASH` pinned on the bpf filesystem:
//!
//! | part  | width | contents                                        |
//! |-------|-------|-------------------------------------------------|
//! | key   | 8     | FNV-1 64 hash of the container id, host order   |
//! | value | 8     | byte 0: flags (bit 0 = restricted), 1..8 zero   |

pub type ContainerKey = u64;

/// Entries the kernel side allocates for the map.
pub const MAX_ENTRIES: u32 = 10_000;

pub const POLICY_VALUE_SIZE: usize = 8;
pub const FLAGS_OFFSET: usize = 0;

pub const FLAG_RESTRICTED: u8 = 1 << 0;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1 (multiply, then xor) over the raw bytes of a container id.
///
/// No seed is mixed in so a restarted agent derives the same keys for the
/// same ids.
pub const fn container_key(id: &[u8]) -> ContainerKey {
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < id.len() {
        hash = hash.wrapping_mul(FNV_PRIME);
        hash ^= id[i] as u64;
        i += 1;
    }
    hash
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct PolicyValue {
    pub bytes: [u8; POLICY_VALUE_SIZE],
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for PolicyValue {}

impl PolicyValue {
    /// Builds a value from its flag byte; reserved bytes are zero.
    pub const fn from_flags(flags: u8) -> Self {
        let mut bytes = [0u8; POLICY_VALUE_SIZE];
        bytes[FLAGS_OFFSET] = flags;
        Self { bytes }
    }

    pub const fn from_bytes(bytes: [u8; POLICY_VALUE_SIZE]) -> Self {
        Self { bytes }
    }

    pub const fn to_bytes(self) -> [u8; POLICY_VALUE_SIZE] {
        self.bytes
    }

    pub const fn flags(&self) -> u8 {
        self.bytes[FLAGS_OFFSET]
    }

    pub const fn is_restricted(&self) -> bool {
        self.flags() & FLAG_RESTRICTED != 0
    }
}
