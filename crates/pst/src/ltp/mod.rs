//! ## [Lists, Tables, and Properties (LTP) Layer](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/4c24c7d2-5c5a-4b99-88b2-f4b84cc293ae)

use std::io;
use thiserror::Error;

use crate::{
    ndb::{node_id::NodeId, NdbError},
    ErrorClass,
};

pub mod heap;
pub mod prop_context;
pub mod prop_type;
pub mod table_context;
pub mod tree;

use heap::HeapNodeType;
use prop_type::PropertyType;

#[derive(Error, Debug)]
pub enum LtpError {
    #[error("Node Database error: {0}")]
    NodeDatabaseError(#[from] NdbError),
    #[error("Truncated LTP structure: {0}")]
    Truncated(#[from] io::Error),
    #[error("Empty heap-on-node")]
    EmptyHeapNode,
    #[error("Invalid HID hidType: 0x{0:02X}")]
    InvalidHeapIdType(u8),
    #[error("Invalid HID hidIndex: 0x{0:04X}")]
    InvalidHeapIndex(u16),
    #[error("Invalid HID hidBlockIndex: 0x{0:04X}")]
    InvalidHeapBlockIndex(u16),
    #[error("Invalid HNHDR bSig: 0x{0:02X}")]
    InvalidHeapSignature(u8),
    #[error("Invalid HNHDR bClientSig: 0x{0:02X}")]
    InvalidHeapClientSignature(u8),
    #[error("Unexpected HNHDR bClientSig: {0:?}")]
    UnexpectedHeapClientSignature(HeapNodeType),
    #[error("Invalid HNPAGEHDR ibHnpm: 0x{0:04X}")]
    InvalidHeapPageMapOffset(u16),
    #[error("Invalid HNPAGEMAP cAlloc: 0x{0:04X}")]
    InvalidHeapPageAllocCount(u16),
    #[error("Invalid HNPAGEMAP rgibAlloc entry: 0x{0:04X}")]
    InvalidHeapPageAllocOffset(u16),
    #[error("Invalid BTHHEADER bType: 0x{0:02X}")]
    InvalidHeapTreeNodeType(u8),
    #[error("Invalid BTHHEADER cbKey: 0x{0:02X}")]
    InvalidHeapTreeKeySize(u8),
    #[error("Invalid BTHHEADER cbEnt: 0x{0:02X}")]
    InvalidHeapTreeDataSize(u8),
    #[error("Invalid BTH record block size: 0x{0:X}")]
    InvalidHeapTreeRecordsSize(usize),
    #[error("BTH keys are not strictly ascending at key 0x{0:X}")]
    UnsortedHeapTreeKeys(u64),
    #[error("Invalid property tree BTHHEADER: cbKey 0x{0:02X}, cbEnt 0x{1:02X}")]
    InvalidPropertyTreeHeader(u8, u8),
    #[error("Invalid wPropType: 0x{0:04X}")]
    InvalidPropertyType(u16),
    #[error("Property not found: 0x{0:04X}")]
    PropertyNotFound(u16),
    #[error("Property subnode not found: {0:?}")]
    PropertySubNodeNotFound(NodeId),
    #[error("Invalid {0:?} value size: 0x{1:X}")]
    InvalidPropertyValueSize(PropertyType, usize),
    #[error("Unexpected property type: {0:?}")]
    UnexpectedPropertyType(PropertyType),
    #[error("Invalid TCINFO bType: {0:?}")]
    InvalidTableContextHeapTreeNodeType(HeapNodeType),
    #[error("Invalid TCINFO cCols: {0}")]
    InvalidTableContextColumnCount(usize),
    #[error("Invalid TCINFO rgib[TCI_4b]: 0x{0:04X}")]
    InvalidTableContext4ByteOffset(u16),
    #[error("Invalid TCINFO rgib[TCI_2b]: 0x{0:04X}")]
    InvalidTableContext2ByteOffset(u16),
    #[error("Invalid TCINFO rgib[TCI_1b]: 0x{0:04X}")]
    InvalidTableContext1ByteOffset(u16),
    #[error("Invalid TCINFO rgib[TCI_bm]: 0x{0:04X}")]
    InvalidTableContextBitmaskOffset(u16),
    #[error("Invalid TCOLDESC for property 0x{0:04X}: ibData 0x{1:04X}, cbData 0x{2:02X}, iBit 0x{3:02X}")]
    InvalidTableColumnDescriptor(u16, u16, u8, u8),
    #[error("Invalid TCROWID dwRowIndex: 0x{0:08X}")]
    InvalidTableRowIndex(u32),
    #[error("Table row not found: 0x{0:08X}")]
    TableRowNotFound(u32),
    #[error("Table column not found: 0x{0:04X}")]
    TableColumnNotFound(u16),
    #[error("Invalid UTF-16 string")]
    InvalidUnicodeString,
    #[error("Unsupported code page: {0}")]
    UnsupportedCodePage(u16),
    #[error("Invalid string in code page {0}")]
    InvalidString8(u16),
}

impl LtpError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NodeDatabaseError(err) => err.class(),
            Self::PropertyNotFound(_) => ErrorClass::PropertyNotFound,
            Self::PropertySubNodeNotFound(_)
            | Self::TableRowNotFound(_)
            | Self::TableColumnNotFound(_) => ErrorClass::NotFound,
            Self::InvalidUnicodeString
            | Self::UnsupportedCodePage(_)
            | Self::InvalidString8(_) => ErrorClass::Encoding,
            _ => ErrorClass::CorruptNode,
        }
    }
}

impl From<LtpError> for io::Error {
    fn from(err: LtpError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

pub type LtpResult<T> = Result<T, LtpError>;
