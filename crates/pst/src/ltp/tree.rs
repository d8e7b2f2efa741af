//! ## [BTree-on-Heap (BTH)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/2dd1a95a-c8b1-4ac5-87d1-10cb8de64053)

use byteorder::{LittleEndian, ReadBytesExt};
use core::mem;
use std::io::{Cursor, Read};

use super::{heap::*, *};

/// [BTHHEADER](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/8e4ae05c-3c24-4103-b7e5-ffef6f244834)
#[derive(Clone, Copy, Debug)]
pub struct HeapTreeHeader {
    key_size: u8,
    entry_size: u8,
    levels: u8,
    root: HeapId,
}

impl HeapTreeHeader {
    pub fn new(key_size: u8, entry_size: u8, levels: u8, root: HeapId) -> LtpResult<Self> {
        match key_size {
            2 | 4 | 8 => {}
            invalid => {
                return Err(LtpError::InvalidHeapTreeKeySize(invalid));
            }
        }

        match entry_size {
            1..=32 => {}
            invalid => {
                return Err(LtpError::InvalidHeapTreeDataSize(invalid));
            }
        }

        Ok(Self {
            key_size,
            entry_size,
            levels,
            root,
        })
    }

    pub fn read(f: &mut dyn Read) -> LtpResult<Self> {
        // bType
        let heap_type = f.read_u8()?;
        if heap_type != HeapNodeType::Tree as u8 {
            return Err(LtpError::InvalidHeapTreeNodeType(heap_type));
        }

        // cbKey
        let key_size = f.read_u8()?;

        // cbEnt
        let entry_size = f.read_u8()?;

        // bIdxLevels
        let levels = f.read_u8()?;

        // hidRoot
        let root = HeapId::try_from(f.read_u32::<LittleEndian>()?)?;

        Self::new(key_size, entry_size, levels, root)
    }

    pub fn key_size(&self) -> u8 {
        self.key_size
    }

    pub fn entry_size(&self) -> u8 {
        self.entry_size
    }

    pub fn levels(&self) -> u8 {
        self.levels
    }

    pub fn root(&self) -> HeapId {
        self.root
    }
}

/// [Leaf BTH (Data) Records](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/660db569-c8f7-4516-82ad-44709b1c667f)
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HeapTreeLeafEntry {
    key: u64,
    data: Vec<u8>,
}

impl HeapTreeLeafEntry {
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

fn read_key(f: &mut dyn Read, key_size: u8) -> std::io::Result<u64> {
    match key_size {
        2 => f.read_u16::<LittleEndian>().map(u64::from),
        4 => f.read_u32::<LittleEndian>().map(u64::from),
        _ => f.read_u64::<LittleEndian>(),
    }
}

/// A BTH rooted at the `hidUserRoot` of a heap, or at a HID the caller supplies (a TC row
/// index hangs off `TCINFO`).
pub struct HeapTree<'a> {
    heap: &'a HeapNode,
    header: HeapTreeHeader,
}

impl<'a> HeapTree<'a> {
    pub fn new(heap: &'a HeapNode, user_root: HeapId) -> LtpResult<Self> {
        let mut cursor = heap.find_entry(user_root)?;
        let header = HeapTreeHeader::read(&mut cursor)?;
        Ok(Self { heap, header })
    }

    pub fn header(&self) -> &HeapTreeHeader {
        &self.header
    }

    /// Walk the tree from `hidRoot` and return every leaf record in key order.
    pub fn entries(&self) -> LtpResult<Vec<HeapTreeLeafEntry>> {
        let header = &self.header;
        if header.root().is_null() {
            return Ok(Default::default());
        }

        let key_size = usize::from(header.key_size());
        let mut level = header.levels();
        let mut next_level = vec![header.root()];

        while level > 0 {
            for heap_id in mem::take(&mut next_level) {
                let records = self.heap.find_entry(heap_id)?;
                if records.len() % (key_size + 4) != 0 {
                    return Err(LtpError::InvalidHeapTreeRecordsSize(records.len()));
                }

                let mut cursor = Cursor::new(records);
                for _ in 0..records.len() / (key_size + 4) {
                    read_key(&mut cursor, header.key_size())?;
                    next_level.push(HeapId::try_from(cursor.read_u32::<LittleEndian>()?)?);
                }
            }

            level -= 1;
        }

        let entry_size = usize::from(header.entry_size());
        let mut results: Vec<HeapTreeLeafEntry> = Vec::new();
        for heap_id in next_level {
            let records = self.heap.find_entry(heap_id)?;
            if records.len() % (key_size + entry_size) != 0 {
                return Err(LtpError::InvalidHeapTreeRecordsSize(records.len()));
            }

            let mut cursor = Cursor::new(records);
            for _ in 0..records.len() / (key_size + entry_size) {
                let key = read_key(&mut cursor, header.key_size())?;
                if results.last().is_some_and(|last| last.key >= key) {
                    return Err(LtpError::UnsortedHeapTreeKeys(key));
                }

                let mut data = vec![0; entry_size];
                cursor.read_exact(&mut data)?;
                results.push(HeapTreeLeafEntry { key, data });
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn heap(items: &[Vec<u8>]) -> HeapNode {
        let mut data = vec![0_u8; 12];
        let mut offsets = vec![12_u16];
        for item in items {
            data.extend_from_slice(item);
            offsets.push(data.len() as u16);
        }
        if data.len() % 2 != 0 {
            data.push(0);
        }
        let page_map = data.len() as u16;
        data[..2].copy_from_slice(&page_map.to_le_bytes());
        data[2] = HEAP_SIGNATURE;
        data[3] = HeapNodeType::Properties as u8;
        data[4..8].copy_from_slice(&0x20_u32.to_le_bytes());
        data.write_u16::<LittleEndian>(items.len() as u16).unwrap();
        data.write_u16::<LittleEndian>(0).unwrap();
        for offset in offsets {
            data.write_u16::<LittleEndian>(offset).unwrap();
        }
        HeapNode::new(vec![data]).unwrap()
    }

    fn bth_header(key_size: u8, entry_size: u8, levels: u8, root: u32) -> Vec<u8> {
        let mut data = vec![HeapNodeType::Tree as u8, key_size, entry_size, levels];
        data.extend_from_slice(&root.to_le_bytes());
        data
    }

    #[test]
    fn test_single_level() {
        let mut leaf = Vec::new();
        for (key, value) in [(0x0037_u16, 1_u32), (0x0E06, 2)] {
            leaf.extend_from_slice(&key.to_le_bytes());
            leaf.extend_from_slice(&value.to_le_bytes());
        }
        let heap = heap(&[bth_header(2, 4, 0, 0x40), leaf]);
        let tree = HeapTree::new(&heap, heap.header().user_root()).unwrap();
        let entries = tree.entries().unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key(), 0x0037);
        assert_eq!(entries[0].data(), &1_u32.to_le_bytes());
        assert_eq!(entries[1].key(), 0x0E06);
    }

    #[test]
    fn test_intermediate_level() {
        let mut index = Vec::new();
        for (key, hid) in [(1_u32, 0x60_u32), (3, 0x80)] {
            index.extend_from_slice(&key.to_le_bytes());
            index.extend_from_slice(&hid.to_le_bytes());
        }
        let leaf = |keys: [u32; 2]| -> Vec<u8> {
            keys.iter()
                .flat_map(|key| key.to_le_bytes().into_iter().chain([0xAA, 0xBB]))
                .collect()
        };
        let heap = heap(&[
            bth_header(4, 2, 1, 0x40),
            index,
            leaf([1, 2]),
            leaf([3, 4]),
        ]);
        let tree = HeapTree::new(&heap, heap.header().user_root()).unwrap();
        let keys: Vec<_> = tree.entries().unwrap().iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_tree() {
        let heap = heap(&[bth_header(2, 6, 0, 0)]);
        let tree = HeapTree::new(&heap, heap.header().user_root()).unwrap();
        assert!(tree.entries().unwrap().is_empty());
    }

    #[test]
    fn test_unsorted_keys() {
        let leaf = [2_u16, 1]
            .iter()
            .flat_map(|key| key.to_le_bytes().into_iter().chain([0, 0, 0, 0]))
            .collect();
        let heap = heap(&[bth_header(2, 4, 0, 0x40), leaf]);
        let tree = HeapTree::new(&heap, heap.header().user_root()).unwrap();
        let Err(LtpError::UnsortedHeapTreeKeys(1)) = tree.entries() else {
            panic!("descending keys should be rejected");
        };
    }

    #[test]
    fn test_bad_key_size() {
        let heap = heap(&[bth_header(3, 4, 0, 0)]);
        let Err(LtpError::InvalidHeapTreeKeySize(3)) =
            HeapTree::new(&heap, heap.header().user_root())
        else {
            panic!("cbKey must be 2, 4 or 8");
        };
    }
}
