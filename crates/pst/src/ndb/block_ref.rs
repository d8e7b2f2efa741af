//! [BREF](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/844a5ebf-488a-45fd-8fce-92a84d8e24a3)

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

use super::{block_id::BlockId, header::NdbVersion};

/// A block id together with the absolute file offset (`ib`) of the block or page.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct BlockRef {
    block: BlockId,
    index: u64,
}

impl BlockRef {
    pub fn new(block: BlockId, index: u64) -> Self {
        Self { block, index }
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn read(f: &mut dyn Read, version: NdbVersion) -> io::Result<Self> {
        // bid
        let block = BlockId::read(f, version)?;

        // ib
        let index = if version.is_unicode() {
            f.read_u64::<LittleEndian>()?
        } else {
            u64::from(f.read_u32::<LittleEndian>()?)
        };

        Ok(Self { block, index })
    }
}
