//! ## [Node Database (NDB) Layer](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/e4efaad0-1876-446e-9d34-bb921588f924)

use std::io;
use thiserror::Error;

use crate::ErrorClass;

pub mod block;
pub mod block_id;
pub mod block_ref;
pub mod header;
pub mod node_id;
pub mod page;

use block_id::BlockId;
use node_id::{NodeId, NodeIdType};
use page::PageType;

#[derive(Error, Debug)]
pub enum NdbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("File is too small for a HEADER: {0} bytes")]
    FileTooSmall(u64),
    #[error("Invalid HEADER dwMagic: 0x{0:08X}")]
    InvalidNdbHeaderMagicValue(u32),
    #[error("Invalid HEADER dwCRCPartial: 0x{0:08X}")]
    InvalidNdbHeaderPartialCrc(u32),
    #[error("Invalid HEADER wMagicClient: 0x{0:04X}")]
    InvalidNdbHeaderMagicClientValue(u16),
    #[error("Invalid HEADER wVer: 0x{0:04X}")]
    InvalidNdbVersion(u16),
    #[error("Invalid HEADER dwCRCFull: 0x{0:08X}")]
    InvalidNdbHeaderFullCrc(u32),
    #[error("Invalid HEADER bSentinel: 0x{0:02X}")]
    InvalidNdbHeaderSentinelValue(u8),
    #[error("Invalid HEADER bCryptMethod: 0x{0:02X}")]
    InvalidNdbCryptMethod(u8),
    #[error("Invalid nidType: 0x{0:02X}")]
    InvalidNodeIdType(u8),
    #[error("Invalid nidIndex: 0x{0:08X}")]
    InvalidNodeIndex(u32),
    #[error("Mismatch between PAGETRAILER ptype and ptypeRepeat: (0x{0:02X}, 0x{1:02X})")]
    MismatchPageTypeRepeat(u8, u8),
    #[error("Invalid PAGETRAILER ptype: 0x{0:02X}")]
    InvalidPageType(u8),
    #[error("Invalid PAGETRAILER ptype: {0:?}")]
    UnexpectedPageType(PageType),
    #[error("Invalid PAGETRAILER dwCRC: 0x{0:08X}")]
    InvalidPageCrc(u32),
    #[error("Invalid PAGETRAILER wSig: 0x{0:04X}")]
    InvalidPageSignature(u16),
    #[error("Invalid PAGETRAILER bid: {0:?}")]
    MismatchPageBlockId(BlockId),
    #[error("Invalid BTPAGE cLevel: 0x{0:02X}")]
    InvalidBTreePageLevel(u8),
    #[error("Invalid BTPAGE cEnt: {0}")]
    InvalidBTreeEntryCount(usize),
    #[error("Invalid BTPAGE cbEnt: {0}")]
    InvalidBTreeEntrySize(u8),
    #[error("BTPAGE keys are not strictly ascending at key 0x{0:016X}")]
    UnsortedBTreeKeys(u64),
    #[error("Key 0x{1:016X} not found in {0:?}")]
    BTreeKeyNotFound(PageType, u64),
    #[error("Subnode not found: {0:?}")]
    SubNodeNotFound(NodeId),
    #[error("Invalid BLOCKTRAILER cb: 0x{0:04X}")]
    InvalidBlockSize(u16),
    #[error("Mismatch between BLOCKTRAILER cb and BBTENTRY cb: (0x{0:04X}, 0x{1:04X})")]
    MismatchBlockSize(u16, u16),
    #[error("Invalid BLOCKTRAILER bid: {0:?}")]
    MismatchBlockId(BlockId),
    #[error("Invalid BLOCKTRAILER dwCRC: 0x{0:08X}")]
    InvalidBlockCrc(u32),
    #[error("Invalid BLOCKTRAILER wSig: 0x{0:04X}")]
    InvalidBlockSignature(u16),
    #[error("Failed to inflate block {0:?}: {1}")]
    InflateBlockFailed(BlockId, io::Error),
    #[error("Inflated block size mismatch: expected 0x{0:X}, found 0x{1:X}")]
    MismatchInflatedSize(usize, usize),
    #[error("Invalid internal block btype: 0x{0:02X}")]
    InvalidInternalBlockType(u8),
    #[error("Invalid internal block cLevel: 0x{0:02X}")]
    InvalidInternalBlockLevel(u8),
    #[error("Invalid internal block cEnt: {0}")]
    InvalidInternalBlockEntryCount(u16),
    #[error("Expected an internal block: {0:?}")]
    ExpectedInternalBlock(BlockId),
    #[error("Expected an external block: {0:?}")]
    ExpectedExternalBlock(BlockId),
    #[error("Invalid XBLOCK lcbTotal: expected 0x{0:X}, found 0x{1:X}")]
    MismatchDataTreeSize(u32, u64),
}

impl NdbError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io(_) => ErrorClass::Io,
            Self::FileTooSmall(_)
            | Self::InvalidNdbHeaderMagicValue(_)
            | Self::InvalidNdbHeaderPartialCrc(_)
            | Self::InvalidNdbHeaderMagicClientValue(_)
            | Self::InvalidNdbVersion(_)
            | Self::InvalidNdbHeaderFullCrc(_)
            | Self::InvalidNdbHeaderSentinelValue(_)
            | Self::InvalidNdbCryptMethod(_) => ErrorClass::InvalidFormat,
            Self::InvalidNodeIdType(_)
            | Self::InvalidNodeIndex(_)
            | Self::MismatchPageTypeRepeat(..)
            | Self::InvalidPageType(_)
            | Self::UnexpectedPageType(_)
            | Self::InvalidPageCrc(_)
            | Self::InvalidPageSignature(_)
            | Self::MismatchPageBlockId(_)
            | Self::InvalidBTreePageLevel(_)
            | Self::InvalidBTreeEntryCount(_)
            | Self::InvalidBTreeEntrySize(_)
            | Self::UnsortedBTreeKeys(_) => ErrorClass::CorruptIndex,
            Self::BTreeKeyNotFound(..) | Self::SubNodeNotFound(_) => ErrorClass::NotFound,
            Self::InvalidBlockSize(_)
            | Self::MismatchBlockSize(..)
            | Self::MismatchBlockId(_)
            | Self::InvalidBlockCrc(_)
            | Self::InvalidBlockSignature(_) => ErrorClass::ChecksumMismatch,
            Self::InflateBlockFailed(..)
            | Self::MismatchInflatedSize(..)
            | Self::InvalidInternalBlockType(_)
            | Self::InvalidInternalBlockLevel(_)
            | Self::InvalidInternalBlockEntryCount(_)
            | Self::ExpectedInternalBlock(_)
            | Self::ExpectedExternalBlock(_)
            | Self::MismatchDataTreeSize(..) => ErrorClass::CorruptNode,
        }
    }
}

impl From<NdbError> for io::Error {
    fn from(err: NdbError) -> io::Error {
        match err {
            NdbError::Io(err) => err,
            err => io::Error::new(io::ErrorKind::InvalidData, err),
        }
    }
}

pub type NdbResult<T> = Result<T, NdbError>;

/// The location of a node's content: its data tree and its optional subnode tree. Both
/// [page::NodeBTreeEntry] leaves and `SLENTRY` records resolve to one of these.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeRecord {
    node: NodeId,
    data: BlockId,
    sub_node: Option<BlockId>,
}

impl NodeRecord {
    pub fn new(node: NodeId, data: BlockId, sub_node: Option<BlockId>) -> Self {
        Self {
            node,
            data,
            sub_node,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn data(&self) -> BlockId {
        self.data
    }

    pub fn sub_node(&self) -> Option<BlockId> {
        self.sub_node
    }

    pub fn id_type(&self) -> NdbResult<NodeIdType> {
        self.node.id_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            NdbError::InvalidNdbHeaderMagicValue(0).class(),
            ErrorClass::InvalidFormat
        );
        assert_eq!(
            NdbError::UnsortedBTreeKeys(4).class(),
            ErrorClass::CorruptIndex
        );
        assert_eq!(
            NdbError::InvalidBlockCrc(0).class(),
            ErrorClass::ChecksumMismatch
        );
        assert_eq!(
            NdbError::BTreeKeyNotFound(PageType::BlockBTree, 4).class(),
            ErrorClass::NotFound
        );
    }

    #[test]
    fn test_io_error_round_trip() {
        let err = io::Error::from(NdbError::Io(io::Error::from(io::ErrorKind::UnexpectedEof)));
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let err = io::Error::from(NdbError::InvalidPageCrc(0x1234));
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
