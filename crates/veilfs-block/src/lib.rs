#![forbid(unsafe_code)]

//! Block data model for the veilfs client.
//!
//! Everything here is a plain value: block identities ([`BlockId`],
//! [`BlockPointer`]), the polymorphic block payload ([`Block`] and its file /
//! directory variants), directory entries, and the folder handle
//! ([`KeyMetadata`]) that ties a block back to its top-level folder.
//!
//! No I/O and no locking; the retrieval and caching layers build on these
//! types.

mod block;
mod entry;
mod id;
mod kmd;
mod ptr;

pub use block::{
    Block, CommonBlock, DirBlock, DirContents, FileBlock, FileContents, IndirectDirPtr,
    IndirectFilePtr,
};
pub use entry::{DirEntry, EntryType};
pub use id::{BlockId, DataVer, KeyGen, FIRST_VALID_DATA_VER};
pub use kmd::{KeyMetadata, TlfId};
pub use ptr::{BlockInfo, BlockPointer};
