use std::fmt;

use crate::id::KeyGen;

/// Identity of a top-level folder (TLF): one per-user or per-team root tree.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TlfId([u8; 16]);

impl TlfId {
    pub const LEN: usize = 16;

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Display for TlfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TlfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TlfId({self})")
    }
}

/// Opaque handle identifying the folder a block belongs to.
///
/// The retriever needs it to locate and decrypt blocks; the prefetcher only
/// ever reads the folder id out of it (for sync-state lookups) and passes the
/// rest through untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyMetadata {
    tlf_id: TlfId,
    latest_key_gen: KeyGen,
}

impl KeyMetadata {
    pub fn new(tlf_id: TlfId, latest_key_gen: KeyGen) -> Self {
        Self {
            tlf_id,
            latest_key_gen,
        }
    }

    pub fn tlf_id(&self) -> TlfId {
        self.tlf_id
    }

    pub fn latest_key_gen(&self) -> KeyGen {
        self.latest_key_gen
    }
}
