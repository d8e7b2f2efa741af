//! [BID (Block ID)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/d3155aa1-ccdd-4dee-a0a9-5363ccca5352)

use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    fmt::Debug,
    io::{self, Read},
};

use super::header::NdbVersion;

/// A block id, widened to 64 bits for ANSI files.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u64);

impl BlockId {
    pub fn new(is_internal: bool, index: u64) -> Self {
        let internal = if is_internal { 0x02 } else { 0 };
        Self((index << 2) | internal)
    }

    /// `i`: the block is an `XBLOCK`, `XXBLOCK`, `SLBLOCK` or `SIBLOCK`.
    pub fn is_internal(&self) -> bool {
        self.0 & 0x02 != 0
    }

    pub fn index(&self) -> u64 {
        self.0 >> 2
    }

    /// The key used in the block B-tree, with the reserved low bit cleared.
    pub fn search_key(&self) -> u64 {
        self.0 & !0x01
    }

    pub fn read(f: &mut dyn Read, version: NdbVersion) -> io::Result<Self> {
        let value = if version.is_unicode() {
            f.read_u64::<LittleEndian>()?
        } else {
            u64::from(f.read_u32::<LittleEndian>()?)
        };
        Ok(Self(value))
    }
}

impl Debug for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_internal() {
            "Internal"
        } else {
            "External"
        };
        write!(f, "BlockId {{ {kind}: 0x{:X} }}", self.index())
    }
}

impl From<u64> for BlockId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<BlockId> for u64 {
    fn from(value: BlockId) -> Self {
        value.0
    }
}
