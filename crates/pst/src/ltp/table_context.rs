//! ## [Table Context (TC)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5e48be0d-a75a-4918-a277-50408ff96740)

use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    collections::BTreeMap,
    fmt::Debug,
    io::{Cursor, Read},
};
use tracing::debug;

use super::{heap::*, prop_context::*, prop_type::*, tree::*, *};
use crate::{ndb::NodeRecord, PstFile};

pub const LTP_ROW_ID_PROP_ID: u16 = 0x67F2;
pub const LTP_ROW_VERSION_PROP_ID: u16 = 0x67F3;

pub const fn existence_bitmap_size(column_count: usize) -> usize {
    column_count.div_ceil(8)
}

/// The Cell Existence Block is MSB-first: column 0 is the high bit of the first byte.
pub fn check_existence_bitmap(column: usize, existence_bitmap: &[u8]) -> LtpResult<bool> {
    let byte = existence_bitmap
        .get(column / 8)
        .ok_or(LtpError::InvalidTableContextColumnCount(column))?;
    Ok(byte & (1_u8 << (7 - (column % 8))) != 0)
}

/// [TCINFO](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/45b3a0c5-d6d6-4e02-aebf-13766ff693f0)
#[derive(Clone, Debug)]
pub struct TableContextInfo {
    end_4byte_values: u16,
    end_2byte_values: u16,
    end_1byte_values: u16,
    end_existence_bitmap: u16,
    row_index: HeapId,
    rows: Option<PropertyValueRecord>,
    columns: Vec<TableColumnDescriptor>,
}

impl TableContextInfo {
    pub fn new(
        end_4byte_values: u16,
        end_2byte_values: u16,
        end_1byte_values: u16,
        end_existence_bitmap: u16,
        row_index: HeapId,
        rows: Option<PropertyValueRecord>,
        columns: Vec<TableColumnDescriptor>,
    ) -> LtpResult<Self> {
        if end_4byte_values % 4 != 0 {
            return Err(LtpError::InvalidTableContext4ByteOffset(end_4byte_values));
        }

        if end_2byte_values < end_4byte_values {
            return Err(LtpError::InvalidTableContext2ByteOffset(end_2byte_values));
        }

        if end_1byte_values < end_2byte_values {
            return Err(LtpError::InvalidTableContext1ByteOffset(end_1byte_values));
        }

        if end_existence_bitmap < end_1byte_values
            || usize::from(end_existence_bitmap - end_1byte_values)
                != existence_bitmap_size(columns.len())
        {
            return Err(LtpError::InvalidTableContextBitmaskOffset(
                end_existence_bitmap,
            ));
        }

        for column in columns.iter() {
            let expected_size = match column.prop_type().fixed_size() {
                Some(size) if size <= 8 => size,
                _ => 4,
            };

            if usize::from(column.size()) != expected_size
                || u32::from(column.offset()) + u32::from(column.size())
                    > u32::from(end_1byte_values)
                || usize::from(column.existence_bitmap_index()) >= columns.len()
            {
                return Err(LtpError::InvalidTableColumnDescriptor(
                    column.prop_id(),
                    column.offset(),
                    column.size(),
                    column.existence_bitmap_index(),
                ));
            }
        }

        Ok(Self {
            end_4byte_values,
            end_2byte_values,
            end_1byte_values,
            end_existence_bitmap,
            row_index,
            rows,
            columns,
        })
    }

    pub fn read(f: &mut dyn Read) -> LtpResult<Self> {
        // bType
        let signature = HeapNodeType::try_from(f.read_u8()?)?;
        if signature != HeapNodeType::Table {
            return Err(LtpError::InvalidTableContextHeapTreeNodeType(signature));
        }

        // cCols
        let column_count = f.read_u8()?;

        // rgib
        let end_4byte_values = f.read_u16::<LittleEndian>()?;
        let end_2byte_values = f.read_u16::<LittleEndian>()?;
        let end_1byte_values = f.read_u16::<LittleEndian>()?;
        let end_existence_bitmap = f.read_u16::<LittleEndian>()?;

        // hidRowIndex
        let row_index = HeapId::try_from(f.read_u32::<LittleEndian>()?)?;

        // hnidRows
        let rows = match f.read_u32::<LittleEndian>()? {
            0 => None,
            hnid => Some(PropertyValueRecord::from_hnid(hnid)?),
        };

        // hidIndex
        f.read_u32::<LittleEndian>()?;

        // rgTCOLDESC
        let mut columns = Vec::with_capacity(usize::from(column_count));
        for _ in 0..column_count {
            columns.push(TableColumnDescriptor::read(f)?);
        }

        Self::new(
            end_4byte_values,
            end_2byte_values,
            end_1byte_values,
            end_existence_bitmap,
            row_index,
            rows,
            columns,
        )
    }

    pub fn end_4byte_values(&self) -> u16 {
        self.end_4byte_values
    }

    pub fn end_2byte_values(&self) -> u16 {
        self.end_2byte_values
    }

    pub fn end_1byte_values(&self) -> u16 {
        self.end_1byte_values
    }

    /// Also the size of a whole row.
    pub fn end_existence_bitmap(&self) -> u16 {
        self.end_existence_bitmap
    }

    pub fn row_index(&self) -> HeapId {
        self.row_index
    }

    pub fn rows(&self) -> Option<PropertyValueRecord> {
        self.rows
    }

    pub fn columns(&self) -> &[TableColumnDescriptor] {
        &self.columns
    }
}

/// [TCOLDESC](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/3a2f63cf-bb40-4559-910c-e55ec43d9cbb)
#[derive(Clone, Copy, Default, Debug)]
pub struct TableColumnDescriptor {
    prop_type: PropertyType,
    prop_id: u16,
    offset: u16,
    size: u8,
    existence_bitmap_index: u8,
}

impl TableColumnDescriptor {
    pub fn new(
        prop_type: PropertyType,
        prop_id: u16,
        offset: u16,
        size: u8,
        existence_bitmap_index: u8,
    ) -> Self {
        Self {
            prop_type,
            prop_id,
            offset,
            size,
            existence_bitmap_index,
        }
    }

    pub fn read(f: &mut dyn Read) -> LtpResult<Self> {
        // tag
        let prop_type = PropertyType::try_from(f.read_u16::<LittleEndian>()?)?;
        let prop_id = f.read_u16::<LittleEndian>()?;

        // ibData
        let offset = f.read_u16::<LittleEndian>()?;

        // cbData
        let size = f.read_u8()?;

        // iBit
        let existence_bitmap_index = f.read_u8()?;

        Ok(Self::new(
            prop_type,
            prop_id,
            offset,
            size,
            existence_bitmap_index,
        ))
    }

    pub fn prop_type(&self) -> PropertyType {
        self.prop_type
    }

    pub fn prop_id(&self) -> u16 {
        self.prop_id
    }

    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn existence_bitmap_index(&self) -> u8 {
        self.existence_bitmap_index
    }
}

/// A row of the table: its `dwRowID` and its position in the row matrix.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TableRowId {
    id: u32,
    position: u32,
}

impl TableRowId {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn position(&self) -> u32 {
        self.position
    }
}

pub struct TableContext<'a> {
    pst: &'a PstFile,
    node: NodeRecord,
    heap: HeapNode,
    info: TableContextInfo,
    row_index: BTreeMap<u32, u32>,
    row_blocks: Vec<Vec<u8>>,
    rows_per_block: usize,
    rows: Vec<TableRowId>,
}

impl<'a> TableContext<'a> {
    pub fn read(pst: &'a PstFile, node: NodeRecord) -> LtpResult<Self> {
        let heap = HeapNode::read(pst, &node)?;
        heap.expect_client(HeapNodeType::Table)?;

        let mut cursor = Cursor::new(heap.find_entry(heap.header().user_root())?);
        let info = TableContextInfo::read(&mut cursor)?;

        let row_index = Self::read_row_index(pst, &heap, &info)?;

        let row_blocks = match info.rows() {
            None => vec![],
            Some(PropertyValueRecord::Heap(heap_id)) => vec![heap.find_entry(heap_id)?.to_vec()],
            Some(PropertyValueRecord::Node(sub_node)) => {
                let record = pst.lookup_sub_node(&node, sub_node)?;
                pst.read_data_tree(record.data())?
            }
            Some(PropertyValueRecord::Small(_)) => vec![],
        };

        let row_size = usize::from(info.end_existence_bitmap());
        let rows_per_block = row_blocks
            .first()
            .map(|block| block.len() / row_size.max(1))
            .unwrap_or_default();

        let mut context = Self {
            pst,
            node,
            heap,
            info,
            row_index,
            row_blocks,
            rows_per_block,
            rows: vec![],
        };

        let row_count = context.row_index.len() as u32;
        if let Some(position) = context
            .row_index
            .values()
            .copied()
            .find(|&position| position >= row_count)
        {
            return Err(LtpError::InvalidTableRowIndex(position));
        }

        let rows = (0..row_count)
            .map(|position| {
                let row = context.row_data(position)?;
                let id = u32::from_le_bytes([row[0], row[1], row[2], row[3]]);
                Ok(TableRowId { id, position })
            })
            .collect::<LtpResult<Vec<_>>>()?;
        context.rows = rows;

        debug!(node = ?node.node(), rows = row_count, "read table context");
        Ok(context)
    }

    fn read_row_index(
        pst: &PstFile,
        heap: &HeapNode,
        info: &TableContextInfo,
    ) -> LtpResult<BTreeMap<u32, u32>> {
        let tree = HeapTree::new(heap, info.row_index())?;
        let header = tree.header();
        if header.key_size() != 4 {
            return Err(LtpError::InvalidHeapTreeKeySize(header.key_size()));
        }
        let index_size = if pst.header().version().is_unicode() { 4 } else { 2 };
        if header.entry_size() != index_size {
            return Err(LtpError::InvalidHeapTreeDataSize(header.entry_size()));
        }

        Ok(tree
            .entries()?
            .iter()
            .map(|entry| {
                let position = entry
                    .data()
                    .iter()
                    .rev()
                    .fold(0_u32, |acc, &b| (acc << 8) | u32::from(b));
                (entry.key() as u32, position)
            })
            .collect())
    }

    pub fn node(&self) -> &NodeRecord {
        &self.node
    }

    pub fn info(&self) -> &TableContextInfo {
        &self.info
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows in row-matrix order.
    pub fn rows(&self) -> impl Iterator<Item = TableRowId> + '_ {
        self.rows.iter().copied()
    }

    /// Find a row by `dwRowID` through the row index.
    pub fn find_row(&self, id: u32) -> LtpResult<TableRowId> {
        let position = self
            .row_index
            .get(&id)
            .copied()
            .ok_or(LtpError::TableRowNotFound(id))?;
        self.rows
            .get(position as usize)
            .copied()
            .ok_or(LtpError::InvalidTableRowIndex(position))
    }

    pub fn column(&self, prop_id: u16) -> LtpResult<&TableColumnDescriptor> {
        self.info
            .columns()
            .iter()
            .find(|column| column.prop_id() == prop_id)
            .ok_or(LtpError::TableColumnNotFound(prop_id))
    }

    fn row_data(&self, position: u32) -> LtpResult<&[u8]> {
        let row_size = usize::from(self.info.end_existence_bitmap());
        if self.rows_per_block == 0 || row_size < 4 {
            return Err(LtpError::InvalidTableRowIndex(position));
        }

        let position_index = position as usize;
        let block = self
            .row_blocks
            .get(position_index / self.rows_per_block)
            .ok_or(LtpError::InvalidTableRowIndex(position))?;
        let start = (position_index % self.rows_per_block) * row_size;
        block
            .get(start..start + row_size)
            .ok_or(LtpError::InvalidTableRowIndex(position))
    }

    /// Read a cell. A cleared existence bit yields `None`.
    pub fn cell(&self, row: TableRowId, prop_id: u16) -> LtpResult<Option<PropertyValue>> {
        let column = self.column(prop_id)?;
        let row_data = self.row_data(row.position())?;

        let existence_bitmap = &row_data[usize::from(self.info.end_1byte_values())..];
        if !check_existence_bitmap(
            usize::from(column.existence_bitmap_index()),
            existence_bitmap,
        )? {
            return Ok(None);
        }

        let start = usize::from(column.offset());
        let data = &row_data[start..start + usize::from(column.size())];
        let prop_type = column.prop_type();

        let value = match prop_type.fixed_size() {
            Some(size) if size <= 8 => PropertyValue::parse(prop_type, data)?,
            _ => {
                let hnid = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                read_indirect_value(
                    self.pst,
                    &self.node,
                    &self.heap,
                    prop_type,
                    PropertyValueRecord::from_hnid(hnid)?,
                )?
            }
        };

        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn tcinfo(rgib: [u16; 4], columns: &[(u16, u16, u16, u8, u8)]) -> Vec<u8> {
        let mut data = vec![HeapNodeType::Table as u8, columns.len() as u8];
        for end in rgib {
            data.write_u16::<LittleEndian>(end).unwrap();
        }
        data.write_u32::<LittleEndian>(0x20).unwrap();
        data.write_u32::<LittleEndian>(0x40).unwrap();
        data.write_u32::<LittleEndian>(0).unwrap();
        for &(prop_type, prop_id, offset, size, bit) in columns {
            data.write_u16::<LittleEndian>(prop_type).unwrap();
            data.write_u16::<LittleEndian>(prop_id).unwrap();
            data.write_u16::<LittleEndian>(offset).unwrap();
            data.write_u8(size).unwrap();
            data.write_u8(bit).unwrap();
        }
        data
    }

    const ROW_ID: (u16, u16, u16, u8, u8) = (0x0003, LTP_ROW_ID_PROP_ID, 0, 4, 0);
    const ROW_VERSION: (u16, u16, u16, u8, u8) = (0x0003, LTP_ROW_VERSION_PROP_ID, 4, 4, 1);

    #[test]
    fn test_existence_bitmap() {
        assert_eq!(existence_bitmap_size(0), 0);
        assert_eq!(existence_bitmap_size(8), 1);
        assert_eq!(existence_bitmap_size(9), 2);

        let bitmap = [0b1000_0001, 0b0100_0000];
        assert!(check_existence_bitmap(0, &bitmap).unwrap());
        assert!(!check_existence_bitmap(1, &bitmap).unwrap());
        assert!(check_existence_bitmap(7, &bitmap).unwrap());
        assert!(check_existence_bitmap(9, &bitmap).unwrap());
        assert!(check_existence_bitmap(16, &bitmap).is_err());
    }

    #[test]
    fn test_read_info() {
        let data = tcinfo(
            [12, 12, 13, 14],
            &[ROW_ID, ROW_VERSION, (0x001F, 0x3001, 8, 4, 2), (0x000B, 0x360A, 12, 1, 3)],
        );
        let info = TableContextInfo::read(&mut data.as_slice()).unwrap();
        assert_eq!(info.columns().len(), 4);
        assert_eq!(info.end_existence_bitmap(), 14);
        assert_eq!(
            info.rows(),
            Some(PropertyValueRecord::Heap(HeapId::try_from(0x40).unwrap()))
        );
        assert_eq!(info.columns()[2].prop_type(), PropertyType::Unicode);
    }

    #[test]
    fn test_bitmap_size_mismatch() {
        let data = tcinfo([8, 8, 8, 10], &[ROW_ID, ROW_VERSION]);
        let Err(LtpError::InvalidTableContextBitmaskOffset(10)) =
            TableContextInfo::read(&mut data.as_slice())
        else {
            panic!("two columns need one bitmap byte");
        };
    }

    #[test]
    fn test_unordered_rgib() {
        let data = tcinfo([8, 6, 8, 9], &[ROW_ID, ROW_VERSION]);
        let Err(LtpError::InvalidTableContext2ByteOffset(6)) =
            TableContextInfo::read(&mut data.as_slice())
        else {
            panic!("rgib must be monotonic");
        };
    }

    #[test]
    fn test_column_outside_row() {
        let data = tcinfo(
            [8, 8, 8, 9],
            &[ROW_ID, ROW_VERSION, (0x0040, 0x0E06, 4, 8, 2)],
        );
        let Err(err @ LtpError::InvalidTableColumnDescriptor(0x0E06, 4, 8, 2)) =
            TableContextInfo::read(&mut data.as_slice())
        else {
            panic!("an 8 byte cell at offset 4 overruns the 4-byte region");
        };
        assert_eq!(err.class(), ErrorClass::CorruptNode);
    }

    #[test]
    fn test_wrong_heap_type() {
        let mut data = tcinfo([8, 8, 8, 9], &[ROW_ID, ROW_VERSION]);
        data[0] = HeapNodeType::Tree as u8;
        let Err(LtpError::InvalidTableContextHeapTreeNodeType(HeapNodeType::Tree)) =
            TableContextInfo::read(&mut data.as_slice())
        else {
            panic!("bType must be bTypeTC");
        };
    }
}
