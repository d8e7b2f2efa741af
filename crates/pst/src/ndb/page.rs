//! [Pages](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5774b4f2-0ac5-4a6e-a3fb-a2d1b6b2d4ad)
//!
//! Both the node B-tree and the block B-tree are stored in `BTPAGE`s with the same layout. Only
//! the leaf entries differ, which [BTreeEntry] abstracts.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};
use tracing::trace;

use super::{block_id::BlockId, block_ref::BlockRef, header::NdbVersion, node_id::NodeId, *};
use crate::{block_sig::compute_sig, crc::compute_crc, source::BlockSource};

/// `ptype`
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PageType {
    /// `ptypeBBT`: Block BTree page
    BlockBTree = 0x80,
    /// `ptypeNBT`: Node BTree page
    NodeBTree = 0x81,
    /// `ptypeFMap`: Free Map page
    FreeMap = 0x82,
    /// `ptypePMap`: Allocation Page Map page
    AllocationPageMap = 0x83,
    /// `ptypeAMap`: Allocation Map page
    AllocationMap = 0x84,
    /// `ptypeFPMap`: Free Page Map page
    FreePageMap = 0x85,
    /// `ptypeDL`: Density List page
    DensityList = 0x86,
}

impl TryFrom<u8> for PageType {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x80 => Ok(Self::BlockBTree),
            0x81 => Ok(Self::NodeBTree),
            0x82 => Ok(Self::FreeMap),
            0x83 => Ok(Self::AllocationPageMap),
            0x84 => Ok(Self::AllocationMap),
            0x85 => Ok(Self::FreePageMap),
            0x86 => Ok(Self::DensityList),
            _ => Err(NdbError::InvalidPageType(value)),
        }
    }
}

/// [PAGETRAILER](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/f4ccb38a-930a-4db4-98df-a69c195926ba)
#[derive(Clone, Copy, Debug)]
pub struct PageTrailer {
    page_type: PageType,
    signature: u16,
    crc: u32,
    block_id: BlockId,
}

impl PageTrailer {
    pub fn read(f: &mut dyn Read, version: NdbVersion) -> NdbResult<Self> {
        // ptype
        let page_type = f.read_u8()?;

        // ptypeRepeat
        let page_type_repeat = f.read_u8()?;
        if page_type != page_type_repeat {
            return Err(NdbError::MismatchPageTypeRepeat(page_type, page_type_repeat));
        }
        let page_type = PageType::try_from(page_type)?;

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
            page_type,
            signature,
            crc,
            block_id,
        })
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
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

/// A fixed-size record stored in a `BTPAGE`, ordered by [BTreeEntry::key].
pub trait BTreeEntry: Sized + Copy {
    fn entry_size(version: NdbVersion) -> usize;
    fn read(f: &mut dyn Read, version: NdbVersion) -> io::Result<Self>;
    fn key(&self) -> u64;
}

/// A leaf entry of one of the two trees.
pub trait BTreeLeafEntry: BTreeEntry {
    const PAGE_TYPE: PageType;
}

/// [BTENTRY](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/bc8052a3-f300-4022-be31-f0f408fffca0)
#[derive(Clone, Copy, Debug)]
pub struct IntermediateEntry {
    key: u64,
    child: BlockRef,
}

impl IntermediateEntry {
    pub fn child(&self) -> BlockRef {
        self.child
    }
}

impl BTreeEntry for IntermediateEntry {
    fn entry_size(version: NdbVersion) -> usize {
        3 * version.id_size()
    }

    fn read(f: &mut dyn Read, version: NdbVersion) -> io::Result<Self> {
        // btkey
        let key = if version.is_unicode() {
            f.read_u64::<LittleEndian>()?
        } else {
            u64::from(f.read_u32::<LittleEndian>()?)
        };

        // BREF
        let child = BlockRef::read(f, version)?;

        Ok(Self { key, child })
    }

    fn key(&self) -> u64 {
        self.key
    }
}

/// [NBTENTRY](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/53a4b926-8ac4-45c9-9c6d-8358d951dbcd)
#[derive(Clone, Copy, Debug)]
pub struct NodeBTreeEntry {
    node: NodeId,
    data: BlockId,
    sub_node: Option<BlockId>,
    parent: Option<NodeId>,
}

impl NodeBTreeEntry {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn data(&self) -> BlockId {
        self.data
    }

    pub fn sub_node(&self) -> Option<BlockId> {
        self.sub_node
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
}

impl BTreeEntry for NodeBTreeEntry {
    fn entry_size(version: NdbVersion) -> usize {
        if version.is_unicode() {
            32
        } else {
            16
        }
    }

    fn read(f: &mut dyn Read, version: NdbVersion) -> io::Result<Self> {
        // nid
        let node = NodeId::read(f, version)?;

        // bidData
        let data = BlockId::read(f, version)?;

        // bidSub
        let sub_node = BlockId::read(f, version)?;
        let sub_node = if u64::from(sub_node) == 0 {
            None
        } else {
            Some(sub_node)
        };

        // nidParent
        let parent = f.read_u32::<LittleEndian>()?;
        let parent = if parent == 0 {
            None
        } else {
            Some(NodeId::from(parent))
        };

        Ok(Self {
            node,
            data,
            sub_node,
            parent,
        })
    }

    fn key(&self) -> u64 {
        u64::from(u32::from(self.node))
    }
}

impl BTreeLeafEntry for NodeBTreeEntry {
    const PAGE_TYPE: PageType = PageType::NodeBTree;
}

impl From<NodeBTreeEntry> for NodeRecord {
    fn from(value: NodeBTreeEntry) -> Self {
        NodeRecord::new(value.node, value.data, value.sub_node)
    }
}

/// [BBTENTRY](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/53a4b926-8ac4-45c9-9c6d-8358d951dbcd)
///
/// 4K-page files append the inflated size of compressed blocks after `cRef`.
#[derive(Clone, Copy, Debug)]
pub struct BlockBTreeEntry {
    block: BlockRef,
    size: u16,
    ref_count: u16,
    inflated_size: u32,
}

impl BlockBTreeEntry {
    pub fn block(&self) -> BlockRef {
        self.block
    }

    /// `cb`: the stored size of the block data, excluding padding and trailer.
    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn ref_count(&self) -> u16 {
        self.ref_count
    }

    /// The size of the block data once inflated, equal to [Self::size] unless the block is
    /// compressed.
    pub fn inflated_size(&self) -> u32 {
        self.inflated_size
    }

    pub fn is_compressed(&self) -> bool {
        self.inflated_size > u32::from(self.size)
    }
}

impl BTreeEntry for BlockBTreeEntry {
    fn entry_size(version: NdbVersion) -> usize {
        if version.is_unicode() {
            24
        } else {
            12
        }
    }

    fn read(f: &mut dyn Read, version: NdbVersion) -> io::Result<Self> {
        // BREF
        let block = BlockRef::read(f, version)?;

        // cb
        let size = f.read_u16::<LittleEndian>()?;

        // cRef
        let ref_count = f.read_u16::<LittleEndian>()?;

        let inflated_size = match version {
            NdbVersion::Unicode4k => f.read_u32::<LittleEndian>()?,
            _ => u32::from(size),
        };

        Ok(Self {
            block,
            size,
            ref_count,
            inflated_size,
        })
    }

    fn key(&self) -> u64 {
        self.block.block().search_key()
    }
}

impl BTreeLeafEntry for BlockBTreeEntry {
    const PAGE_TYPE: PageType = PageType::BlockBTree;
}

/// [BTPAGE](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/4f0cd8e7-c2d0-4975-90a4-d417cfca77f8)
#[derive(Clone, Debug)]
pub enum BTreePage<Entry: BTreeLeafEntry> {
    Intermediate {
        level: u8,
        entries: Vec<IntermediateEntry>,
    },
    Leaf(Vec<Entry>),
}

impl<Entry: BTreeLeafEntry> BTreePage<Entry> {
    pub fn read(source: &dyn BlockSource, version: NdbVersion, page: BlockRef) -> NdbResult<Self> {
        let mut buffer = vec![0_u8; version.page_size()];
        source.read_exact_at(page.index(), &mut buffer)?;
        Self::parse(&buffer, version, page)
    }

    pub fn parse(buffer: &[u8], version: NdbVersion, page: BlockRef) -> NdbResult<Self> {
        let trailer_offset = version.page_trailer_offset();
        let trailer = PageTrailer::read(&mut Cursor::new(&buffer[trailer_offset..]), version)?;
        if trailer.page_type() != Entry::PAGE_TYPE {
            return Err(NdbError::UnexpectedPageType(trailer.page_type()));
        }

        let crc = compute_crc(0, &buffer[..trailer_offset]);
        if crc != trailer.crc() {
            return Err(NdbError::InvalidPageCrc(trailer.crc()));
        }

        if trailer.block_id().search_key() != page.block().search_key() {
            return Err(NdbError::MismatchPageBlockId(trailer.block_id()));
        }

        let signature = compute_sig(page.index(), u64::from(page.block()));
        if trailer.signature() != signature {
            return Err(NdbError::InvalidPageSignature(trailer.signature()));
        }

        let entries_size = version.page_entries_size();
        let mut cursor = Cursor::new(&buffer[entries_size..trailer_offset]);

        // cEnt, cEntMax
        let entry_count = match version {
            NdbVersion::Unicode4k => {
                let entry_count = cursor.read_u16::<LittleEndian>()?;
                let _max_entries = cursor.read_u16::<LittleEndian>()?;
                usize::from(entry_count)
            }
            _ => {
                let entry_count = cursor.read_u8()?;
                let _max_entries = cursor.read_u8()?;
                usize::from(entry_count)
            }
        };

        // cbEnt
        let entry_size = cursor.read_u8()?;

        // cLevel
        let level = cursor.read_u8()?;

        let expected_size = if level == 0 {
            Entry::entry_size(version)
        } else {
            IntermediateEntry::entry_size(version)
        };
        if usize::from(entry_size) != expected_size {
            return Err(NdbError::InvalidBTreeEntrySize(entry_size));
        }
        if entry_count * expected_size > entries_size {
            return Err(NdbError::InvalidBTreeEntryCount(entry_count));
        }

        let rgentries = &buffer[..entries_size];
        if level == 0 {
            let entries = read_entries::<Entry>(rgentries, entry_count, version)?;
            Ok(Self::Leaf(entries))
        } else {
            let entries = read_entries::<IntermediateEntry>(rgentries, entry_count, version)?;
            Ok(Self::Intermediate { level, entries })
        }
    }
}

fn read_entries<Entry: BTreeEntry>(
    rgentries: &[u8],
    entry_count: usize,
    version: NdbVersion,
) -> NdbResult<Vec<Entry>> {
    let entry_size = Entry::entry_size(version);
    let mut entries: Vec<Entry> = Vec::with_capacity(entry_count);
    for chunk in rgentries.chunks_exact(entry_size).take(entry_count) {
        let entry = Entry::read(&mut Cursor::new(chunk), version)?;
        if let Some(previous) = entries.last() {
            if previous.key() >= entry.key() {
                return Err(NdbError::UnsortedBTreeKeys(entry.key()));
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Descend from `root` to the leaf entry whose key equals `key`.
///
/// Each intermediate step follows the last child whose key is not greater than `key`, and the
/// child page must sit exactly one level below its parent.
pub fn find_entry<Entry: BTreeLeafEntry>(
    source: &dyn BlockSource,
    version: NdbVersion,
    root: BlockRef,
    key: u64,
) -> NdbResult<Entry> {
    let mut page = root;
    let mut expected_level = None;

    loop {
        match BTreePage::<Entry>::read(source, version, page)? {
            BTreePage::Intermediate { level, entries } => {
                if expected_level.is_some_and(|expected| expected != level) {
                    return Err(NdbError::InvalidBTreePageLevel(level));
                }

                let position = entries.partition_point(|entry| entry.key() <= key);
                let Some(entry) = position.checked_sub(1).and_then(|i| entries.get(i)) else {
                    return Err(NdbError::BTreeKeyNotFound(Entry::PAGE_TYPE, key));
                };

                trace!(level, key, child = ?entry.child(), "descending B-tree");
                page = entry.child();
                expected_level = Some(level - 1);
            }
            BTreePage::Leaf(entries) => {
                if expected_level.is_some_and(|expected| expected != 0) {
                    return Err(NdbError::InvalidBTreePageLevel(0));
                }

                return entries
                    .binary_search_by_key(&key, |entry| entry.key())
                    .map(|index| entries[index])
                    .map_err(|_| NdbError::BTreeKeyNotFound(Entry::PAGE_TYPE, key));
            }
        }
    }
}
