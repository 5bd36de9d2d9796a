use std::fmt;

use crate::id::{BlockId, DataVer, KeyGen};

/// Full identity of one block: which ciphertext, which key generation it was
/// encrypted under, and which data version it was encoded with.
///
/// Pointers are immutable once created and are used as cache and queue keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockPointer {
    pub id: BlockId,
    pub key_gen: KeyGen,
    pub data_ver: DataVer,
}

impl BlockPointer {
    pub fn new(id: BlockId, key_gen: KeyGen, data_ver: DataVer) -> Self {
        Self {
            id,
            key_gen,
            data_ver,
        }
    }
}

impl fmt::Display for BlockPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(v{})", self.id, self.data_ver)
    }
}

/// A pointer plus the encoded (on-server) size of the block it refers to.
///
/// This is what parents embed for their children: indirect pointers and
/// directory entries both carry a `BlockInfo`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    pub ptr: BlockPointer,
    pub enc_size: u32,
}

impl BlockInfo {
    pub fn new(ptr: BlockPointer, enc_size: u32) -> Self {
        Self { ptr, enc_size }
    }
}
