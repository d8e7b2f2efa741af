//! ## [HN (Heap-on-Node)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/77ce49a3-3772-4d8d-bb2c-2f7520a238a6)

use byteorder::{LittleEndian, ReadBytesExt};
use std::{fmt::Debug, io::Cursor};

use super::*;
use crate::{ndb::NodeRecord, PstFile};

/// `bSig`
pub const HEAP_SIGNATURE: u8 = 0xEC;

/// The largest allocation a heap-on-node will hold. Bigger values live in subnodes.
pub const MAX_HEAP_ALLOCATION: usize = 3580;

/// [HID](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/85b9e985-ea53-447f-b70c-eb82bfbdcbc9)
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapId(u32);

impl HeapId {
    pub fn new(index: u16, block_index: u16) -> LtpResult<Self> {
        if index == 0 || index >= 0x800 {
            return Err(LtpError::InvalidHeapIndex(index));
        }
        Ok(Self((u32::from(block_index) << 16) | (u32::from(index) << 5)))
    }

    /// `hidIndex`, 1-based.
    pub fn index(&self) -> u16 {
        ((self.0 >> 5) & 0x7FF) as u16
    }

    /// `hidBlockIndex`
    pub fn block_index(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// A zero HID marks an empty value or an empty tree.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<u32> for HeapId {
    type Error = LtpError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        // hidType
        let id_type = (value & 0x1F) as u8;
        if id_type != 0 {
            return Err(LtpError::InvalidHeapIdType(id_type));
        }
        Ok(Self(value))
    }
}

impl From<HeapId> for u32 {
    fn from(value: HeapId) -> Self {
        value.0
    }
}

impl Debug for HeapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HeapId {{ block: 0x{:X}, index: 0x{:X} }}",
            self.block_index(),
            self.index()
        )
    }
}

/// `bClientSig`
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HeapNodeType {
    /// `bTypeTC`: Table Context (TC/HN)
    Table = 0x7C,
    /// `bTypeBTH`: BTree-on-Heap (BTH)
    Tree = 0xB5,
    /// `bTypePC`: Property Context (PC/BTH)
    Properties = 0xBC,
}

impl TryFrom<u8> for HeapNodeType {
    type Error = LtpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x7C => Ok(Self::Table),
            0xB5 => Ok(Self::Tree),
            0xBC => Ok(Self::Properties),
            _ => Err(LtpError::InvalidHeapClientSignature(value)),
        }
    }
}

/// [HNHDR](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/8e4ae05c-3c24-4103-b7e5-ffef6f244834)
#[derive(Clone, Copy, Debug)]
pub struct HeapNodeHeader {
    client_signature: HeapNodeType,
    user_root: HeapId,
}

impl HeapNodeHeader {
    pub fn client_signature(&self) -> HeapNodeType {
        self.client_signature
    }

    /// `hidUserRoot`
    pub fn user_root(&self) -> HeapId {
        self.user_root
    }
}

/// One data block of the heap with its `rgibAlloc` boundaries.
#[derive(Clone, Debug)]
struct HeapBlock {
    data: Vec<u8>,
    allocations: Vec<u16>,
}

impl HeapBlock {
    /// Parse the `HNPAGEMAP` referenced by the `ibHnpm` field at the start of every heap block.
    fn new(data: Vec<u8>) -> LtpResult<Self> {
        let mut cursor = Cursor::new(data.as_slice());

        // ibHnpm
        let page_map_offset = cursor.read_u16::<LittleEndian>()?;
        if usize::from(page_map_offset) + 4 > data.len() {
            return Err(LtpError::InvalidHeapPageMapOffset(page_map_offset));
        }
        cursor.set_position(u64::from(page_map_offset));

        // cAlloc
        let alloc_count = cursor.read_u16::<LittleEndian>()?;

        // cFree
        let _free_count = cursor.read_u16::<LittleEndian>()?;

        let map_end = usize::from(page_map_offset) + 4 + 2 * (usize::from(alloc_count) + 1);
        if map_end > data.len() {
            return Err(LtpError::InvalidHeapPageAllocCount(alloc_count));
        }

        // rgibAlloc
        let mut allocations = Vec::with_capacity(usize::from(alloc_count) + 1);
        for _ in 0..=alloc_count {
            let offset = cursor.read_u16::<LittleEndian>()?;
            let out_of_order = allocations.last().is_some_and(|&last| offset < last);
            if out_of_order || offset > page_map_offset {
                return Err(LtpError::InvalidHeapPageAllocOffset(offset));
            }
            allocations.push(offset);
        }

        Ok(Self { data, allocations })
    }
}

/// A node's data blocks viewed as a heap of allocations addressed by [HeapId].
#[derive(Clone, Debug)]
pub struct HeapNode {
    header: HeapNodeHeader,
    blocks: Vec<HeapBlock>,
}

impl HeapNode {
    pub fn read(pst: &PstFile, node: &NodeRecord) -> LtpResult<Self> {
        Self::new(pst.read_data_tree(node.data())?)
    }

    pub fn new(blocks: Vec<Vec<u8>>) -> LtpResult<Self> {
        let first = blocks.first().ok_or(LtpError::EmptyHeapNode)?;
        let mut cursor = Cursor::new(first.as_slice());

        // ibHnpm
        cursor.read_u16::<LittleEndian>()?;

        // bSig
        let signature = cursor.read_u8()?;
        if signature != HEAP_SIGNATURE {
            return Err(LtpError::InvalidHeapSignature(signature));
        }

        // bClientSig
        let client_signature = HeapNodeType::try_from(cursor.read_u8()?)?;

        // hidUserRoot
        let user_root = HeapId::try_from(cursor.read_u32::<LittleEndian>()?)?;

        let header = HeapNodeHeader {
            client_signature,
            user_root,
        };
        let blocks = blocks
            .into_iter()
            .map(HeapBlock::new)
            .collect::<LtpResult<Vec<_>>>()?;

        Ok(Self { header, blocks })
    }

    pub fn header(&self) -> &HeapNodeHeader {
        &self.header
    }

    /// Check `bClientSig` against the structure the caller expects to find.
    pub fn expect_client(&self, expected: HeapNodeType) -> LtpResult<()> {
        if self.header.client_signature != expected {
            return Err(LtpError::UnexpectedHeapClientSignature(
                self.header.client_signature,
            ));
        }
        Ok(())
    }

    /// Look up an allocation. A null HID yields an empty slice.
    pub fn find_entry(&self, heap_id: HeapId) -> LtpResult<&[u8]> {
        if heap_id.is_null() {
            return Ok(&[]);
        }

        let block = self
            .blocks
            .get(usize::from(heap_id.block_index()))
            .ok_or(LtpError::InvalidHeapBlockIndex(heap_id.block_index()))?;

        let index = usize::from(heap_id.index());
        let (Some(&start), Some(&end)) = (
            index.checked_sub(1).and_then(|i| block.allocations.get(i)),
            block.allocations.get(index),
        ) else {
            return Err(LtpError::InvalidHeapIndex(heap_id.index()));
        };

        Ok(&block.data[usize::from(start)..usize::from(end)])
    }
}
