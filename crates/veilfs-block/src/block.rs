use std::collections::BTreeMap;

use bytes::Bytes;

use crate::entry::DirEntry;
use crate::ptr::BlockInfo;

/// Child pointer inside an indirect file block: where the child's data sits
/// in the file's byte space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndirectFilePtr {
    pub info: BlockInfo,
    /// Byte offset of the child's first byte within the whole file.
    pub off: u64,
    /// Whether the range covered by this child contains unwritten holes.
    pub holes: bool,
}

/// Child pointer inside an indirect directory block: which name range the
/// child covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndirectDirPtr {
    pub info: BlockInfo,
    /// First entry name covered by the child block.
    pub off: String,
}

/// Payload of a file block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileContents {
    /// Terminal file bytes.
    Direct(Bytes),
    /// Ordered child pointers, ascending by byte offset.
    Indirect(Vec<IndirectFilePtr>),
}

/// A block holding file content, either the bytes themselves or pointers to
/// further file blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileBlock {
    pub contents: FileContents,
}

impl FileBlock {
    pub fn direct(data: Bytes) -> Self {
        Self {
            contents: FileContents::Direct(data),
        }
    }

    pub fn indirect(iptrs: Vec<IndirectFilePtr>) -> Self {
        Self {
            contents: FileContents::Indirect(iptrs),
        }
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self.contents, FileContents::Indirect(_))
    }

    pub fn indirect_ptrs(&self) -> &[IndirectFilePtr] {
        match &self.contents {
            FileContents::Indirect(iptrs) => iptrs,
            FileContents::Direct(_) => &[],
        }
    }

    /// Empty target of the variant this block's children decode into.
    pub fn new_empty(&self) -> FileBlock {
        FileBlock::default()
    }
}

impl Default for FileBlock {
    fn default() -> Self {
        Self::direct(Bytes::new())
    }
}

/// Payload of a directory block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirContents {
    /// Terminal child entries, keyed by entry name. A `BTreeMap` so that
    /// iteration order is deterministic.
    Direct(BTreeMap<String, DirEntry>),
    /// Ordered child pointers, ascending by starting name.
    Indirect(Vec<IndirectDirPtr>),
}

/// A block holding directory content, either the entries themselves or
/// pointers to further directory blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirBlock {
    pub contents: DirContents,
}

impl DirBlock {
    pub fn direct(children: BTreeMap<String, DirEntry>) -> Self {
        Self {
            contents: DirContents::Direct(children),
        }
    }

    pub fn indirect(iptrs: Vec<IndirectDirPtr>) -> Self {
        Self {
            contents: DirContents::Indirect(iptrs),
        }
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self.contents, DirContents::Indirect(_))
    }

    pub fn indirect_ptrs(&self) -> &[IndirectDirPtr] {
        match &self.contents {
            DirContents::Indirect(iptrs) => iptrs,
            DirContents::Direct(_) => &[],
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, DirEntry>> {
        match &self.contents {
            DirContents::Direct(children) => Some(children),
            DirContents::Indirect(_) => None,
        }
    }

    /// Empty target of the variant this block's children decode into.
    pub fn new_empty(&self) -> DirBlock {
        DirBlock::default()
    }
}

impl Default for DirBlock {
    fn default() -> Self {
        Self::direct(BTreeMap::new())
    }
}

/// A block whose variant the client does not interpret. Treated as a leaf.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommonBlock;

/// The polymorphic block payload: explicit discrimination replaces the
/// original system's runtime type inspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    File(FileBlock),
    Dir(DirBlock),
    Common(CommonBlock),
}

impl Block {
    /// Empty direct file block, the fetch target for a file-typed child.
    pub fn empty_file() -> Self {
        Block::File(FileBlock::default())
    }

    /// Empty direct directory block, the fetch target for a dir-typed child.
    pub fn empty_dir() -> Self {
        Block::Dir(DirBlock::default())
    }
}
