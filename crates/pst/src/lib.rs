#![doc = include_str!("../README.md")]

use std::{collections::BTreeMap, path::Path};
use tracing::{debug, warn};

pub mod block_sig;
pub mod crc;
pub mod encode;
pub mod ltp;
pub mod messaging;
pub mod ndb;
pub mod source;

use ndb::{
    block::{self, DataTree},
    block_id::BlockId,
    header::Header,
    node_id::NodeId,
    page::{self, BlockBTreeEntry, NodeBTreeEntry},
    NdbError, NdbResult, NodeRecord,
};
use source::{BlockSource, FileSource};

/// Coarse classification shared by the error enums of every layer, used to decide whether a
/// failure aborts a whole file, skips a node, or only blanks a single field.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ErrorClass {
    /// The header is not a PST/OST header this crate can read.
    InvalidFormat,
    /// The underlying read failed.
    Io,
    /// A B-tree page or the folder hierarchy is structurally inconsistent.
    CorruptIndex,
    /// A heap, BTH, property or table structure inside a node is inconsistent.
    CorruptNode,
    /// A block trailer does not match its contents.
    ChecksumMismatch,
    /// A node, block or subnode id is missing from its index.
    NotFound,
    /// A property is not present in a property context.
    PropertyNotFound,
    /// A string or body could not be decoded to text.
    Encoding,
}

impl ErrorClass {
    /// Errors of this class end processing of the whole container.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::InvalidFormat | Self::Io)
    }
}

/// [PST File](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/6b57253b-0853-47bb-99bb-d4b8f78105f0)
///
/// An open container with a validated header. All reads are positional, so a `PstFile` can be
/// shared by reference between threads.
pub struct PstFile {
    source: Box<dyn BlockSource>,
    header: Header,
}

impl PstFile {
    pub fn open(path: impl AsRef<Path>) -> NdbResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening container");
        Self::from_source(Box::new(FileSource::open(path)?))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> NdbResult<Self> {
        Self::from_source(Box::new(bytes))
    }

    pub fn from_source(source: Box<dyn BlockSource>) -> NdbResult<Self> {
        let header = Header::read(source.as_ref())?;

        let size = source.size()?;
        if header.file_eof() > size {
            warn!(
                ib_file_eof = header.file_eof(),
                size, "container is shorter than its header declares"
            );
        }

        Ok(Self { source, header })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) fn source(&self) -> &dyn BlockSource {
        self.source.as_ref()
    }

    /// Find a node in the node B-tree.
    pub fn lookup_node(&self, node: NodeId) -> NdbResult<NodeRecord> {
        let entry: NodeBTreeEntry = page::find_entry(
            self.source(),
            self.header.version(),
            self.header.node_btree(),
            u64::from(u32::from(node)),
        )?;
        Ok(entry.into())
    }

    /// Find a block in the block B-tree.
    pub fn lookup_block(&self, block: BlockId) -> NdbResult<BlockBTreeEntry> {
        page::find_entry(
            self.source(),
            self.header.version(),
            self.header.block_btree(),
            block.search_key(),
        )
    }

    /// Read, verify and decode a single block.
    pub fn read_block(&self, block: BlockId) -> NdbResult<Vec<u8>> {
        let entry = self.lookup_block(block)?;
        block::read_block(self.source(), &self.header, &entry)
    }

    /// Read the data blocks of a node in order, expanding `XBLOCK` and `XXBLOCK` trees.
    pub fn read_data_tree(&self, block: BlockId) -> NdbResult<Vec<Vec<u8>>> {
        let tree = DataTree::read(self, block)?;
        tree.blocks(self)
    }

    /// Read the subnode tree of a node, if it has one.
    pub fn read_sub_nodes(&self, node: &NodeRecord) -> NdbResult<BTreeMap<NodeId, NodeRecord>> {
        match node.sub_node() {
            Some(sub_node) => block::read_sub_node_tree(self, sub_node),
            None => Ok(Default::default()),
        }
    }

    /// Find a single subnode of `node`.
    pub fn lookup_sub_node(&self, node: &NodeRecord, sub_node: NodeId) -> NdbResult<NodeRecord> {
        self.read_sub_nodes(node)?
            .remove(&sub_node)
            .ok_or(NdbError::SubNodeNotFound(sub_node))
    }
}
