//! [Blocks](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/a9c1981d-d1ea-457c-b39e-dc7fb0eb95d4)

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
};
use tracing::trace;

use super::{
    block_id::BlockId,
    header::{CryptMethod, Header, NdbVersion},
    node_id::NodeId,
    page::BlockBTreeEntry,
    *,
};
use crate::{
    block_sig::compute_sig,
    crc::compute_crc,
    encode::{cyclic, permute},
    source::BlockSource,
    PstFile,
};

pub const MAX_BLOCK_SIZE: usize = 8192;

/// The on-disk footprint of a block holding `size` bytes of data: data, padding and
/// `BLOCKTRAILER`, rounded up to the block alignment of the format.
pub fn block_size(version: NdbVersion, size: usize) -> usize {
    let alignment = version.block_alignment();
    (size + version.block_trailer_size()).div_ceil(alignment) * alignment
}

/// [BLOCKTRAILER](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/a14943ef-70c2-403f-898c-5bc3747117e1)
#[derive(Clone, Copy, Debug)]
pub struct BlockTrailer {
    size: u16,
    signature: u16,
    crc: u32,
    block_id: BlockId,
}

impl BlockTrailer {
    pub fn read(f: &mut dyn Read, version: NdbVersion) -> NdbResult<Self> {
        // cb
        let size = f.read_u16::<LittleEndian>()?;
        if size == 0 || usize::from(size) > MAX_BLOCK_SIZE - version.block_trailer_size() {
            return Err(NdbError::InvalidBlockSize(size));
        }

        // wSig
        let signature = f.read_u16::<LittleEndian>()?;

        let (crc, block_id) = if version.is_unicode() {
            // dwCRC, bid
            let crc = f.read_u32::<LittleEndian>()?;
            (crc, BlockId::read(f, version)?)
        } else {
            // bid, dwCRC
            let block_id = BlockId::read(f, version)?;
            (f.read_u32::<LittleEndian>()?, block_id)
        };

        Ok(Self {
            size,
            signature,
            crc,
            block_id,
        })
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn signature(&self) -> u16 {
        self.signature
    }

    pub fn crc(&self) -> u32 {
        self.crc
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }
}

/// Read the block described by `entry`, check its trailer against the block B-tree and its own
/// contents, and undo the encoding and compression of the payload.
pub fn read_block(
    source: &dyn BlockSource,
    header: &Header,
    entry: &BlockBTreeEntry,
) -> NdbResult<Vec<u8>> {
    let version = header.version();
    let block = entry.block();
    let size = usize::from(entry.size());

    let mut buffer = vec![0_u8; block_size(version, size)];
    source.read_exact_at(block.index(), &mut buffer)?;

    let trailer_offset = buffer.len() - version.block_trailer_size();
    let trailer = BlockTrailer::read(&mut Cursor::new(&buffer[trailer_offset..]), version)?;
    if trailer.size() != entry.size() {
        return Err(NdbError::MismatchBlockSize(trailer.size(), entry.size()));
    }
    if trailer.block_id().search_key() != block.block().search_key() {
        return Err(NdbError::MismatchBlockId(trailer.block_id()));
    }

    buffer.truncate(size);
    if compute_crc(0, &buffer) != trailer.crc() {
        return Err(NdbError::InvalidBlockCrc(trailer.crc()));
    }
    if compute_sig(block.index(), u64::from(block.block())) != trailer.signature() {
        return Err(NdbError::InvalidBlockSignature(trailer.signature()));
    }

    if !block.block().is_internal() {
        match header.crypt_method() {
            CryptMethod::None => {}
            CryptMethod::Permute => permute::decode_block(&mut buffer),
            CryptMethod::Cyclic => {
                cyclic::encode_decode_block(&mut buffer, u64::from(block.block()) as u32)
            }
        }
    }

    if entry.is_compressed() {
        buffer = inflate(block.block(), &buffer, entry.inflated_size() as usize)?;
    }

    trace!(block = ?block.block(), size = buffer.len(), "read block");
    Ok(buffer)
}

fn inflate(block: BlockId, data: &[u8], inflated_size: usize) -> NdbResult<Vec<u8>> {
    let mut inflated = Vec::with_capacity(inflated_size);
    ZlibDecoder::new(data)
        .take(inflated_size as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|err| NdbError::InflateBlockFailed(block, err))?;
    if inflated.len() != inflated_size {
        return Err(NdbError::MismatchInflatedSize(inflated_size, inflated.len()));
    }
    Ok(inflated)
}

/// `btype` of an `XBLOCK` or `XXBLOCK`.
const DATA_TREE_BLOCK_TYPE: u8 = 0x01;
/// `btype` of an `SLBLOCK` or `SIBLOCK`.
const SUB_NODE_BLOCK_TYPE: u8 = 0x02;

/// [Data Tree](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/d2e9aa6f-2d5a-4c87-8d16-6b6f4ad47da8)
#[derive(Clone, Debug)]
pub enum DataTree {
    /// A single external data block.
    Leaf(BlockId),
    /// [XBLOCK](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5b7a6935-e83d-4917-9f62-6ce3707f09e0)
    /// or [XXBLOCK](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/061b6ac4-d1da-468c-b75d-0303a0a8f468)
    Intermediate {
        level: u8,
        total_size: u32,
        children: Vec<BlockId>,
    },
}

impl DataTree {
    pub fn read(pst: &PstFile, block: BlockId) -> NdbResult<Self> {
        if !block.is_internal() {
            return Ok(Self::Leaf(block));
        }

        let data = pst.read_block(block)?;
        let version = pst.header().version();
        let mut cursor = Cursor::new(data.as_slice());

        // btype
        let block_type = cursor.read_u8()?;
        if block_type != DATA_TREE_BLOCK_TYPE {
            return Err(NdbError::InvalidInternalBlockType(block_type));
        }

        // cLevel
        let level = cursor.read_u8()?;
        if !(1..=2).contains(&level) {
            return Err(NdbError::InvalidInternalBlockLevel(level));
        }

        // cEnt
        let entry_count = cursor.read_u16::<LittleEndian>()?;
        if 8 + usize::from(entry_count) * version.id_size() > data.len() {
            return Err(NdbError::InvalidInternalBlockEntryCount(entry_count));
        }

        // lcbTotal
        let total_size = cursor.read_u32::<LittleEndian>()?;

        // rgbid
        let children = (0..entry_count)
            .map(|_| BlockId::read(&mut cursor, version))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::Intermediate {
            level,
            total_size,
            children,
        })
    }

    /// Read every leaf block of the tree in order.
    pub fn blocks(&self, pst: &PstFile) -> NdbResult<Vec<Vec<u8>>> {
        match self {
            Self::Leaf(block) => Ok(vec![pst.read_block(*block)?]),
            Self::Intermediate {
                level,
                total_size,
                children,
            } => {
                let mut blocks = Vec::with_capacity(children.len());
                for child in children {
                    match (*level, child.is_internal()) {
                        (1, false) => blocks.push(pst.read_block(*child)?),
                        (2, true) => {
                            let tree = DataTree::read(pst, *child)?;
                            let DataTree::Intermediate { level: 1, .. } = tree else {
                                return Err(NdbError::InvalidInternalBlockLevel(2));
                            };
                            blocks.extend(tree.blocks(pst)?);
                        }
                        (1, true) => return Err(NdbError::ExpectedExternalBlock(*child)),
                        _ => return Err(NdbError::ExpectedInternalBlock(*child)),
                    }
                }

                let actual_size: u64 = blocks.iter().map(|block| block.len() as u64).sum();
                if actual_size != u64::from(*total_size) {
                    return Err(NdbError::MismatchDataTreeSize(*total_size, actual_size));
                }

                Ok(blocks)
            }
        }
    }
}

/// Read an [SLBLOCK](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/85c4d943-0779-43c5-bd98-61dc9bb5dfd6)
/// or [SIBLOCK](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/729fb9bd-060a-4d6a-b3b0-bd1f4e4bf4f9)
/// tree into a map of its leaf `SLENTRY` records.
pub fn read_sub_node_tree(
    pst: &PstFile,
    block: BlockId,
) -> NdbResult<BTreeMap<NodeId, NodeRecord>> {
    let mut sub_nodes = BTreeMap::new();
    read_sub_node_block(pst, block, None, &mut sub_nodes)?;
    Ok(sub_nodes)
}

fn read_sub_node_block(
    pst: &PstFile,
    block: BlockId,
    expected_level: Option<u8>,
    sub_nodes: &mut BTreeMap<NodeId, NodeRecord>,
) -> NdbResult<()> {
    if !block.is_internal() {
        return Err(NdbError::ExpectedInternalBlock(block));
    }

    let data = pst.read_block(block)?;
    let version = pst.header().version();
    let mut cursor = Cursor::new(data.as_slice());

    // btype
    let block_type = cursor.read_u8()?;
    if block_type != SUB_NODE_BLOCK_TYPE {
        return Err(NdbError::InvalidInternalBlockType(block_type));
    }

    // cLevel
    let level = cursor.read_u8()?;
    if level > 1 || expected_level.is_some_and(|expected| expected != level) {
        return Err(NdbError::InvalidInternalBlockLevel(level));
    }

    // cEnt
    let entry_count = cursor.read_u16::<LittleEndian>()?;

    // dwPadding
    let header_size = if version.is_unicode() {
        cursor.read_u32::<LittleEndian>()?;
        8
    } else {
        4
    };

    let entry_size = if level == 0 { 3 } else { 2 } * version.id_size();
    if header_size + usize::from(entry_count) * entry_size > data.len() {
        return Err(NdbError::InvalidInternalBlockEntryCount(entry_count));
    }

    let mut previous = None;
    for _ in 0..entry_count {
        // nid
        let node = NodeId::read(&mut cursor, version)?;
        if previous.is_some_and(|previous| previous >= node) {
            return Err(NdbError::UnsortedBTreeKeys(u64::from(u32::from(node))));
        }
        previous = Some(node);

        if level == 0 {
            // bidData
            let data = BlockId::read(&mut cursor, version)?;

            // bidSub
            let sub_node = BlockId::read(&mut cursor, version)?;
            let sub_node = if u64::from(sub_node) == 0 {
                None
            } else {
                Some(sub_node)
            };

            sub_nodes.insert(node, NodeRecord::new(node, data, sub_node));
        } else {
            // bid
            let child = BlockId::read(&mut cursor, version)?;
            read_sub_node_block(pst, child, Some(0), sub_nodes)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size() {
        assert_eq!(block_size(NdbVersion::Unicode, 1), 64);
        assert_eq!(block_size(NdbVersion::Unicode, 48), 64);
        assert_eq!(block_size(NdbVersion::Unicode, 49), 128);
        assert_eq!(block_size(NdbVersion::Ansi, 52), 64);
        assert_eq!(block_size(NdbVersion::Ansi, 53), 128);
        assert_eq!(block_size(NdbVersion::Unicode, 8176), 8192);
        assert_eq!(block_size(NdbVersion::Unicode4k, 100), 512);
    }

    #[test]
    fn test_trailer_size_bounds() {
        let bytes = [0_u8; 16];
        let Err(NdbError::InvalidBlockSize(0)) =
            BlockTrailer::read(&mut Cursor::new(&bytes[..]), NdbVersion::Unicode)
        else {
            panic!("a zero cb should be rejected");
        };
    }

    #[test]
    fn test_ansi_trailer_order() {
        let bytes = [
            0x10, 0x00, // cb
            0x34, 0x12, // wSig
            0x08, 0x00, 0x00, 0x00, // bid
            0x78, 0x56, 0x34, 0x12, // dwCRC
        ];
        let trailer = BlockTrailer::read(&mut Cursor::new(&bytes[..]), NdbVersion::Ansi).unwrap();
        assert_eq!(trailer.size(), 0x10);
        assert_eq!(trailer.signature(), 0x1234);
        assert_eq!(u64::from(trailer.block_id()), 0x08);
        assert_eq!(trailer.crc(), 0x1234_5678);
    }

    #[test]
    fn test_inflate_size_mismatch() {
        use flate2::{write::ZlibEncoder, Compression};
        use std::io::Write;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[7_u8; 300]).unwrap();
        let compressed = encoder.finish().unwrap();

        let block = BlockId::from(0x04);
        assert_eq!(inflate(block, &compressed, 300).unwrap(), vec![7_u8; 300]);

        let Err(NdbError::MismatchInflatedSize(200, 201)) = inflate(block, &compressed, 200)
        else {
            panic!("inflated size should be checked");
        };
    }
}
