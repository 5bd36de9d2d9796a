use std::fmt;

/// Opaque 32-byte identity of a block's encrypted contents.
///
/// Two pointers carrying the same `BlockId` refer to the same ciphertext on
/// the block server, independent of which folder references it.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BlockId([u8; 32]);

impl BlockId {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Display for BlockId {
    /// Abbreviated hex form (first 8 bytes), enough to correlate log lines.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({self})")
    }
}

/// Version of a block's wire encoding.
///
/// A client refuses to fetch blocks whose version is below
/// [`FIRST_VALID_DATA_VER`] or above what it was built to understand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataVer(pub u32);

/// The lowest data version any client has ever written.
pub const FIRST_VALID_DATA_VER: DataVer = DataVer(1);

impl fmt::Display for DataVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key generation of the enclosing folder a block was encrypted under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyGen(pub u32);
