//! Heap-on-node, BTH, property context and table context encoders.

use byteorder::{LittleEndian, WriteBytesExt};
use std::{collections::BTreeMap, io};

use pst_decoder::{
    ltp::{
        heap::{HeapId, HeapNodeType, HEAP_SIGNATURE, MAX_HEAP_ALLOCATION},
        prop_type::PropertyType,
        table_context::{existence_bitmap_size, LTP_ROW_ID_PROP_ID, LTP_ROW_VERSION_PROP_ID},
    },
    ndb::{
        header::NdbVersion,
        node_id::{NodeId, NodeIdType},
    },
};

/// A property value to encode.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    Integer16(i16),
    Integer32(i32),
    Integer64(i64),
    Boolean(bool),
    Floating64(f64),
    /// FILETIME ticks
    Time(i64),
    String8(Vec<u8>),
    Unicode(String),
    Binary(Vec<u8>),
}

impl Value {
    pub fn prop_type(&self) -> PropertyType {
        match self {
            Self::Integer16(_) => PropertyType::Integer16,
            Self::Integer32(_) => PropertyType::Integer32,
            Self::Integer64(_) => PropertyType::Integer64,
            Self::Boolean(_) => PropertyType::Boolean,
            Self::Floating64(_) => PropertyType::Floating64,
            Self::Time(_) => PropertyType::Time,
            Self::String8(_) => PropertyType::String8,
            Self::Unicode(_) => PropertyType::Unicode,
            Self::Binary(_) => PropertyType::Binary,
        }
    }

    /// The stored bytes. Strings are written without a terminator.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Integer16(value) => value.to_le_bytes().to_vec(),
            Self::Integer32(value) => value.to_le_bytes().to_vec(),
            Self::Integer64(value) | Self::Time(value) => value.to_le_bytes().to_vec(),
            Self::Boolean(value) => vec![u8::from(*value)],
            Self::Floating64(value) => value.to_le_bytes().to_vec(),
            Self::String8(value) | Self::Binary(value) => value.clone(),
            Self::Unicode(value) => value.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        }
    }
}

/// The data blocks and subnodes of one node, before any of it is written.
#[derive(Clone, Default, Debug)]
pub struct NodeImage {
    pub data: Vec<Vec<u8>>,
    pub sub_nodes: BTreeMap<NodeId, NodeImage>,
}

impl NodeImage {
    /// A raw byte stream split across as many data blocks as it needs.
    pub fn from_stream(version: NdbVersion, data: &[u8], chunk_size: usize) -> Self {
        let chunk_size = chunk_size.min(version.max_block_data_size()).max(1);
        Self {
            data: data.chunks(chunk_size).map(<[u8]>::to_vec).collect(),
            sub_nodes: Default::default(),
        }
    }
}

struct HeapBlockWriter {
    data: Vec<u8>,
    allocations: Vec<u16>,
}

impl HeapBlockWriter {
    fn new(block_index: usize) -> Self {
        let header_size = match block_index {
            // HNHDR
            0 => 12,
            // HNBITMAPHDR
            index if index % 128 == 8 => 66,
            // HNPAGEHDR
            _ => 2,
        };
        Self {
            data: vec![0; header_size],
            allocations: vec![header_size as u16],
        }
    }

    /// Size of the block once an item of `size` bytes is added, including the page map.
    fn size_with(&self, size: usize) -> usize {
        let data = (self.data.len() + size).next_multiple_of(2);
        data + 4 + 2 * (self.allocations.len() + 1)
    }
}

pub struct HeapWriter {
    version: NdbVersion,
    client: HeapNodeType,
    blocks: Vec<HeapBlockWriter>,
}

impl HeapWriter {
    pub fn new(version: NdbVersion, client: HeapNodeType) -> Self {
        Self {
            version,
            client,
            blocks: vec![HeapBlockWriter::new(0)],
        }
    }

    pub fn allocate(&mut self, item: &[u8]) -> io::Result<u32> {
        if item.len() > MAX_HEAP_ALLOCATION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("heap allocation of {} bytes", item.len()),
            ));
        }

        let max_size = self.version.max_block_data_size();
        let full = self.blocks.last().is_some_and(|block| {
            block.size_with(item.len()) > max_size || block.allocations.len() >= 0x7FF
        });
        if full {
            self.blocks.push(HeapBlockWriter::new(self.blocks.len()));
        }

        let block_index = self.blocks.len() - 1;
        let block = &mut self.blocks[block_index];
        block.data.extend_from_slice(item);
        block.allocations.push(block.data.len() as u16);

        let index = block.allocations.len() - 1;
        let heap_id = HeapId::new(index as u16, block_index as u16)?;
        Ok(u32::from(heap_id))
    }

    /// Lay out the page maps and the `HNHDR`, returning the node's data blocks.
    pub fn finish(self, user_root: u32) -> io::Result<Vec<Vec<u8>>> {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for (block_index, block) in self.blocks.into_iter().enumerate() {
            let mut data = block.data;
            if data.len() % 2 != 0 {
                data.push(0);
            }

            let page_map = data.len() as u16;
            data[..2].copy_from_slice(&page_map.to_le_bytes());
            if block_index == 0 {
                data[2] = HEAP_SIGNATURE;
                data[3] = self.client as u8;
                data[4..8].copy_from_slice(&user_root.to_le_bytes());
            }

            // HNPAGEMAP
            data.write_u16::<LittleEndian>((block.allocations.len() - 1) as u16)?;
            data.write_u16::<LittleEndian>(0)?;
            for offset in block.allocations {
                data.write_u16::<LittleEndian>(offset)?;
            }
            blocks.push(data);
        }
        Ok(blocks)
    }
}

/// Write a BTH holding `records` (key, data) and return the HID of its header. Leaves that
/// overflow one allocation get intermediate levels above them.
pub fn write_heap_tree(
    heap: &mut HeapWriter,
    key_size: u8,
    entry_size: u8,
    mut records: Vec<(u64, Vec<u8>)>,
) -> io::Result<u32> {
    records.sort_by_key(|(key, _)| *key);

    let write_key = |record: &mut Vec<u8>, key: u64| -> io::Result<()> {
        match key_size {
            2 => record.write_u16::<LittleEndian>(key as u16),
            4 => record.write_u32::<LittleEndian>(key as u32),
            _ => record.write_u64::<LittleEndian>(key),
        }
    };

    let mut levels = 0_u8;
    let mut root = 0;
    let mut record_size = usize::from(key_size) + usize::from(entry_size);
    while !records.is_empty() {
        let per_allocation = MAX_HEAP_ALLOCATION / record_size;
        let mut parents = Vec::new();
        for group in records.chunks(per_allocation) {
            let mut allocation = Vec::with_capacity(group.len() * record_size);
            for (key, data) in group {
                write_key(&mut allocation, *key)?;
                allocation.extend_from_slice(data);
            }
            parents.push((group[0].0, heap.allocate(&allocation)?));
        }

        if let [(_, heap_id)] = parents.as_slice() {
            root = *heap_id;
            break;
        }

        records = parents
            .into_iter()
            .map(|(key, heap_id)| (key, heap_id.to_le_bytes().to_vec()))
            .collect();
        record_size = usize::from(key_size) + 4;
        levels += 1;
    }

    let mut header = Vec::with_capacity(8);
    header.write_u8(HeapNodeType::Tree as u8)?;
    header.write_u8(key_size)?;
    header.write_u8(entry_size)?;
    header.write_u8(levels)?;
    header.write_u32::<LittleEndian>(root)?;
    heap.allocate(&header)
}

/// Hands out the NIDs of the subnodes holding values too large for the heap.
#[derive(Default)]
struct SubNodeIds(u32);

impl SubNodeIds {
    fn next(&mut self) -> io::Result<NodeId> {
        self.0 += 1;
        Ok(NodeId::new(NodeIdType::ListsTablesProperties, self.0)?)
    }
}

/// Store a variable-size value in the heap, or in a new subnode when it is too large, and
/// return its HNID.
fn store_value(
    version: NdbVersion,
    heap: &mut HeapWriter,
    sub_nodes: &mut BTreeMap<NodeId, NodeImage>,
    ids: &mut SubNodeIds,
    data: &[u8],
) -> io::Result<u32> {
    if data.len() <= MAX_HEAP_ALLOCATION {
        return heap.allocate(data);
    }

    let node = ids.next()?;
    sub_nodes.insert(
        node,
        NodeImage::from_stream(version, data, version.max_block_data_size()),
    );
    Ok(u32::from(node))
}

/// Encode a property context.
pub fn property_context(
    version: NdbVersion,
    properties: &BTreeMap<u16, Value>,
) -> io::Result<NodeImage> {
    let mut heap = HeapWriter::new(version, HeapNodeType::Properties);
    let mut sub_nodes = BTreeMap::new();
    let mut ids = SubNodeIds::default();

    let mut records = Vec::with_capacity(properties.len());
    for (&prop_id, value) in properties {
        let prop_type = value.prop_type();
        let data = value.to_bytes();
        let hnid = if prop_type.is_inline() {
            let mut small = [0_u8; 4];
            small[..data.len()].copy_from_slice(&data);
            u32::from_le_bytes(small)
        } else {
            store_value(version, &mut heap, &mut sub_nodes, &mut ids, &data)?
        };

        let mut record = Vec::with_capacity(6);
        record.write_u16::<LittleEndian>(u16::from(prop_type))?;
        record.write_u32::<LittleEndian>(hnid)?;
        records.push((u64::from(prop_id), record));
    }

    let user_root = write_heap_tree(&mut heap, 2, 6, records)?;
    Ok(NodeImage {
        data: heap.finish(user_root)?,
        sub_nodes,
    })
}

#[derive(Clone, Copy, Debug)]
struct Column {
    prop_id: u16,
    prop_type: PropertyType,
    offset: u16,
    size: u8,
    bit: u8,
}

/// Cells of fixed types up to 8 bytes are stored in the row, everything else as an HNID.
fn cell_size(prop_type: PropertyType) -> u8 {
    match prop_type.fixed_size() {
        Some(size) if size <= 8 => size as u8,
        _ => 4,
    }
}

/// Encode a table context. `rows` holds each row's id and one optional value per column in
/// `columns`. Row id and row version columns are added in front.
pub fn table_context(
    version: NdbVersion,
    columns: &[(u16, PropertyType)],
    rows: &[(u32, Vec<Option<Value>>)],
) -> io::Result<NodeImage> {
    let mut heap = HeapWriter::new(version, HeapNodeType::Table);
    let mut sub_nodes = BTreeMap::new();
    let mut ids = SubNodeIds::default();

    let mut all_columns = vec![
        (LTP_ROW_ID_PROP_ID, PropertyType::Integer32, usize::MAX),
        (LTP_ROW_VERSION_PROP_ID, PropertyType::Integer32, usize::MAX),
    ];
    all_columns.extend(
        columns
            .iter()
            .enumerate()
            .map(|(index, &(prop_id, prop_type))| (prop_id, prop_type, index)),
    );

    // Lay the cells out by descending width: 8 and 4 byte cells, then 2, then 1.
    let mut layout: Vec<_> = all_columns.iter().enumerate().collect();
    layout.sort_by_key(|(bit, (_, prop_type, _))| {
        let size = cell_size(*prop_type);
        (if size >= 4 { 0 } else { 4 - size }, *bit)
    });

    let mut descriptors = Vec::with_capacity(all_columns.len());
    let mut sources = Vec::with_capacity(all_columns.len());
    let mut offset = 0_u16;
    let mut ends = [0_u16; 3];
    for (bit, &(prop_id, prop_type, source)) in layout {
        let size = cell_size(prop_type);
        descriptors.push(Column {
            prop_id,
            prop_type,
            offset,
            size,
            bit: bit as u8,
        });
        sources.push(source);
        offset += u16::from(size);
        match size {
            1 => ends[2] = offset,
            2 => ends[1] = offset,
            _ => ends[0] = offset,
        }
    }
    ends[1] = ends[1].max(ends[0]);
    ends[2] = ends[2].max(ends[1]);
    let bitmap_size = existence_bitmap_size(all_columns.len());
    let row_size = usize::from(ends[2]) + bitmap_size;

    let mut matrix = Vec::with_capacity(rows.len() * row_size);
    for (row_id, values) in rows {
        let mut row = vec![0_u8; row_size];
        for (column, &source) in descriptors.iter().zip(&sources) {
            let value = match (column.prop_id, source) {
                (LTP_ROW_ID_PROP_ID, usize::MAX) => Some(Value::Integer32(*row_id as i32)),
                (LTP_ROW_VERSION_PROP_ID, usize::MAX) => Some(Value::Integer32(0)),
                _ => values.get(source).cloned().flatten(),
            };
            let Some(value) = value else {
                continue;
            };

            let data = value.to_bytes();
            let start = usize::from(column.offset);
            match column.prop_type.fixed_size() {
                Some(size) if size <= 8 => row[start..start + size].copy_from_slice(&data),
                _ => {
                    let hnid = store_value(version, &mut heap, &mut sub_nodes, &mut ids, &data)?;
                    row[start..start + 4].copy_from_slice(&hnid.to_le_bytes());
                }
            }

            let bit = usize::from(column.bit);
            row[usize::from(ends[2]) + bit / 8] |= 0x80 >> (bit % 8);
        }
        matrix.extend_from_slice(&row);
    }

    let rows_hnid = if matrix.is_empty() {
        0
    } else if matrix.len() <= MAX_HEAP_ALLOCATION {
        heap.allocate(&matrix)?
    } else {
        let node = ids.next()?;
        let rows_per_block = version.max_block_data_size() / row_size;
        sub_nodes.insert(
            node,
            NodeImage::from_stream(version, &matrix, rows_per_block * row_size),
        );
        u32::from(node)
    };

    let index_size = if version.is_unicode() { 4 } else { 2 };
    let mut index = Vec::with_capacity(rows.len());
    for (position, (row_id, _)) in rows.iter().enumerate() {
        let mut record = Vec::with_capacity(index_size);
        if version.is_unicode() {
            record.write_u32::<LittleEndian>(position as u32)?;
        } else {
            record.write_u16::<LittleEndian>(position as u16)?;
        }
        index.push((u64::from(*row_id), record));
    }
    let row_index = write_heap_tree(&mut heap, 4, index_size as u8, index)?;

    // TCINFO
    let mut info = Vec::new();
    info.write_u8(HeapNodeType::Table as u8)?;
    info.write_u8(descriptors.len() as u8)?;
    info.write_u16::<LittleEndian>(ends[0])?;
    info.write_u16::<LittleEndian>(ends[1])?;
    info.write_u16::<LittleEndian>(ends[2])?;
    info.write_u16::<LittleEndian>(row_size as u16)?;
    info.write_u32::<LittleEndian>(row_index)?;
    info.write_u32::<LittleEndian>(rows_hnid)?;
    // hidIndex
    info.write_u32::<LittleEndian>(0)?;

    let mut sorted = descriptors;
    sorted.sort_by_key(|column| column.prop_id);
    for column in sorted {
        info.write_u16::<LittleEndian>(u16::from(column.prop_type))?;
        info.write_u16::<LittleEndian>(column.prop_id)?;
        info.write_u16::<LittleEndian>(column.offset)?;
        info.write_u8(column.size)?;
        info.write_u8(column.bit)?;
    }
    let user_root = heap.allocate(&info)?;

    Ok(NodeImage {
        data: heap.finish(user_root)?,
        sub_nodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pst_decoder::ltp::{heap::HeapNode, tree::HeapTree};

    #[test]
    fn test_heap_writer_reads_back() {
        let mut heap = HeapWriter::new(NdbVersion::Unicode, HeapNodeType::Properties);
        let first = heap.allocate(b"abc").unwrap();
        let second = heap.allocate(&[]).unwrap();
        let third = heap.allocate(&[9; 100]).unwrap();
        let blocks = heap.finish(first).unwrap();

        let node = HeapNode::new(blocks).unwrap();
        assert_eq!(node.header().client_signature(), HeapNodeType::Properties);
        assert_eq!(node.find_entry(HeapId::try_from(first).unwrap()).unwrap(), b"abc");
        assert!(node
            .find_entry(HeapId::try_from(second).unwrap())
            .unwrap()
            .is_empty());
        assert_eq!(
            node.find_entry(HeapId::try_from(third).unwrap()).unwrap(),
            &[9; 100]
        );
    }

    #[test]
    fn test_heap_spills_into_next_block() {
        let mut heap = HeapWriter::new(NdbVersion::Unicode, HeapNodeType::Properties);
        let ids: Vec<_> = (0..5)
            .map(|_| heap.allocate(&[1; MAX_HEAP_ALLOCATION]).unwrap())
            .collect();
        let blocks = heap.finish(ids[0]).unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks
            .iter()
            .all(|block| block.len() <= NdbVersion::Unicode.max_block_data_size()));

        let node = HeapNode::new(blocks).unwrap();
        let last = HeapId::try_from(ids[4]).unwrap();
        assert_eq!(last.block_index(), 2);
        assert_eq!(node.find_entry(last).unwrap().len(), MAX_HEAP_ALLOCATION);
    }

    #[test]
    fn test_multi_level_heap_tree() {
        let mut heap = HeapWriter::new(NdbVersion::Unicode, HeapNodeType::Properties);
        let records: Vec<_> = (0..1000_u64)
            .map(|key| (key, (key as u32).to_le_bytes().to_vec()))
            .collect();
        let root = write_heap_tree(&mut heap, 4, 4, records).unwrap();
        let node = HeapNode::new(heap.finish(root).unwrap()).unwrap();

        let tree = HeapTree::new(&node, HeapId::try_from(root).unwrap()).unwrap();
        assert_eq!(tree.header().levels(), 1);
        let entries = tree.entries().unwrap();
        assert_eq!(entries.len(), 1000);
        assert_eq!(entries[999].key(), 999);
        assert_eq!(entries[999].data(), &999_u32.to_le_bytes());
    }
}
