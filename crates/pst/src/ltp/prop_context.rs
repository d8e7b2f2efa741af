//! ## [Property Context (PC)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/294c83c6-ff92-42f5-b6b6-876c29fa9737)

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use std::{
    collections::BTreeMap,
    fmt::Debug,
    io::{Cursor, Read},
};
use tracing::debug;

use super::{heap::*, prop_type::*, tree::*, *};
use crate::{
    ndb::{node_id::NodeId, NdbError, NodeRecord},
    PstFile,
};

/// `dwValueHnid`: where a property value lives.
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum PropertyValueRecord {
    Small(u32),
    Heap(HeapId),
    Node(NodeId),
}

impl PropertyValueRecord {
    /// Interpret an `HNID` that refers to a value stored outside of the record.
    pub fn from_hnid(hnid: u32) -> LtpResult<Self> {
        if hnid & 0x1F == 0 {
            Ok(Self::Heap(HeapId::try_from(hnid)?))
        } else {
            Ok(Self::Node(NodeId::from(hnid)))
        }
    }
}

impl Debug for PropertyValueRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValueRecord::Small(value) => write!(f, "Small(0x{value:08X})"),
            PropertyValueRecord::Heap(heap_id) => write!(f, "{heap_id:?}"),
            PropertyValueRecord::Node(node_id) => write!(f, "{node_id:?}"),
        }
    }
}

/// [PC BTH Record](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/7daab6f5-ce65-437e-80d5-1b1be4088bd3)
#[derive(Clone, Copy, Debug)]
pub struct PropertyTreeRecord {
    prop_id: u16,
    prop_type: PropertyType,
    value: PropertyValueRecord,
}

impl PropertyTreeRecord {
    fn read(entry: &HeapTreeLeafEntry) -> LtpResult<Self> {
        let prop_id = entry.key() as u16;
        let mut cursor = Cursor::new(entry.data());

        // wPropType
        let prop_type = PropertyType::try_from(cursor.read_u16::<LittleEndian>()?)?;

        // dwValueHnid
        let value = cursor.read_u32::<LittleEndian>()?;
        let value = if prop_type.is_inline() {
            PropertyValueRecord::Small(value)
        } else {
            PropertyValueRecord::from_hnid(value)?
        };

        Ok(Self {
            prop_id,
            prop_type,
            value,
        })
    }

    pub fn prop_id(&self) -> u16 {
        self.prop_id
    }

    pub fn prop_type(&self) -> PropertyType {
        self.prop_type
    }

    pub fn value(&self) -> PropertyValueRecord {
        self.value
    }
}

/// The target of a `PtypObject` value: a subnode and the size of its contents.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ObjectValue {
    node: NodeId,
    size: u32,
}

impl ObjectValue {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

/// A decoded property value. Multi-valued properties are kept in their stored form.
#[derive(Clone, Default, PartialEq, Debug)]
pub enum PropertyValue {
    #[default]
    Null,
    Integer16(i16),
    Integer32(i32),
    Floating32(f32),
    Floating64(f64),
    /// Scaled by 10,000
    Currency(i64),
    /// Days since December 30, 1899
    FloatingTime(f64),
    ErrorCode(i32),
    Boolean(bool),
    Integer64(i64),
    /// Multibyte characters in the message code page, still NUL terminated if stored that way.
    String8(Vec<u8>),
    /// UTF-16 code units, still NUL terminated if stored that way.
    Unicode(Vec<u16>),
    /// `FILETIME` ticks, see [filetime_to_utc].
    Time(i64),
    Guid([u8; 16]),
    Binary(Vec<u8>),
    Object(ObjectValue),
    Multiple {
        prop_type: PropertyType,
        data: Vec<u8>,
    },
}

impl PropertyValue {
    /// Decode a value stored in place in a 4-byte `dwValueHnid`.
    pub fn from_small(prop_type: PropertyType, value: u32) -> LtpResult<Self> {
        let size = prop_type
            .fixed_size()
            .filter(|&size| size <= 4)
            .ok_or(LtpError::UnexpectedPropertyType(prop_type))?;
        Self::parse(prop_type, &value.to_le_bytes()[..size])
    }

    /// Decode a value from its stored bytes.
    pub fn parse(prop_type: PropertyType, data: &[u8]) -> LtpResult<Self> {
        if let Some(size) = prop_type.fixed_size() {
            if data.len() != size {
                return Err(LtpError::InvalidPropertyValueSize(prop_type, data.len()));
            }
        }

        let mut cursor = Cursor::new(data);
        let value = match prop_type {
            PropertyType::Null => Self::Null,
            PropertyType::Integer16 => Self::Integer16(cursor.read_i16::<LittleEndian>()?),
            PropertyType::Integer32 => Self::Integer32(cursor.read_i32::<LittleEndian>()?),
            PropertyType::Floating32 => Self::Floating32(cursor.read_f32::<LittleEndian>()?),
            PropertyType::Floating64 => Self::Floating64(cursor.read_f64::<LittleEndian>()?),
            PropertyType::Currency => Self::Currency(cursor.read_i64::<LittleEndian>()?),
            PropertyType::FloatingTime => {
                Self::FloatingTime(cursor.read_f64::<LittleEndian>()?)
            }
            PropertyType::ErrorCode => Self::ErrorCode(cursor.read_i32::<LittleEndian>()?),
            PropertyType::Boolean => Self::Boolean(cursor.read_u8()? != 0),
            PropertyType::Integer64 => Self::Integer64(cursor.read_i64::<LittleEndian>()?),
            PropertyType::Time => Self::Time(cursor.read_i64::<LittleEndian>()?),
            PropertyType::Guid => {
                let mut guid = [0; 16];
                cursor.read_exact(&mut guid)?;
                Self::Guid(guid)
            }
            PropertyType::String8 => Self::String8(data.to_vec()),
            PropertyType::Unicode => {
                if data.len() % 2 != 0 {
                    return Err(LtpError::InvalidPropertyValueSize(prop_type, data.len()));
                }
                Self::Unicode(
                    data.chunks_exact(2)
                        .map(|ch| u16::from_le_bytes([ch[0], ch[1]]))
                        .collect(),
                )
            }
            PropertyType::Binary => Self::Binary(data.to_vec()),
            PropertyType::Object => {
                if data.len() != 8 {
                    return Err(LtpError::InvalidPropertyValueSize(prop_type, data.len()));
                }
                let node = NodeId::from(cursor.read_u32::<LittleEndian>()?);
                let size = cursor.read_u32::<LittleEndian>()?;
                Self::Object(ObjectValue { node, size })
            }
            prop_type => Self::Multiple {
                prop_type,
                data: data.to_vec(),
            },
        };

        Ok(value)
    }

    pub fn prop_type(&self) -> PropertyType {
        match self {
            Self::Null => PropertyType::Null,
            Self::Integer16(_) => PropertyType::Integer16,
            Self::Integer32(_) => PropertyType::Integer32,
            Self::Floating32(_) => PropertyType::Floating32,
            Self::Floating64(_) => PropertyType::Floating64,
            Self::Currency(_) => PropertyType::Currency,
            Self::FloatingTime(_) => PropertyType::FloatingTime,
            Self::ErrorCode(_) => PropertyType::ErrorCode,
            Self::Boolean(_) => PropertyType::Boolean,
            Self::Integer64(_) => PropertyType::Integer64,
            Self::String8(_) => PropertyType::String8,
            Self::Unicode(_) => PropertyType::Unicode,
            Self::Time(_) => PropertyType::Time,
            Self::Guid(_) => PropertyType::Guid,
            Self::Binary(_) => PropertyType::Binary,
            Self::Object(_) => PropertyType::Object,
            Self::Multiple { prop_type, .. } => *prop_type,
        }
    }

    /// Decode a `PtypString8` or `PtypString` value. `code_page` only applies to `PtypString8`.
    pub fn to_text(&self, code_page: u16) -> LtpResult<String> {
        match self {
            Self::String8(buffer) => decode_string8(buffer, code_page),
            Self::Unicode(buffer) => decode_unicode(buffer),
            value => Err(LtpError::UnexpectedPropertyType(value.prop_type())),
        }
    }

    /// Widen any integer value.
    pub fn to_integer(&self) -> LtpResult<i64> {
        match self {
            Self::Integer16(value) => Ok(i64::from(*value)),
            Self::Integer32(value) => Ok(i64::from(*value)),
            Self::Integer64(value) => Ok(*value),
            Self::Boolean(value) => Ok(i64::from(*value)),
            value => Err(LtpError::UnexpectedPropertyType(value.prop_type())),
        }
    }
}

/// `FILETIME` ticks between January 1, 1601 and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;

const TICKS_PER_SECOND: i64 = 10_000_000;

/// Convert `PtypTime` ticks to UTC. Returns `None` outside of the range `chrono` can represent.
pub fn filetime_to_utc(ticks: i64) -> Option<DateTime<Utc>> {
    let ticks = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let seconds = ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = u32::try_from(ticks.rem_euclid(TICKS_PER_SECOND) * 100).ok()?;
    DateTime::from_timestamp(seconds, nanos)
}

/// `PtypString`, with one trailing NUL tolerated.
pub fn decode_unicode(buffer: &[u16]) -> LtpResult<String> {
    let buffer = buffer.strip_suffix(&[0]).unwrap_or(buffer);
    String::from_utf16(buffer).map_err(|_| LtpError::InvalidUnicodeString)
}

/// US-ASCII has no `encoding_rs` mapping.
const CODE_PAGE_US_ASCII: u16 = 20127;

/// `PtypString8` in the given Windows code page, with one trailing NUL tolerated.
pub fn decode_string8(buffer: &[u8], code_page: u16) -> LtpResult<String> {
    let buffer = buffer.strip_suffix(&[0]).unwrap_or(buffer);
    if code_page == CODE_PAGE_US_ASCII {
        if !buffer.is_ascii() {
            return Err(LtpError::InvalidString8(code_page));
        }
        return Ok(buffer.iter().map(|&b| char::from(b)).collect());
    }

    let coding = codepage_strings::Coding::new(code_page)
        .map_err(|_| LtpError::UnsupportedCodePage(code_page))?;
    coding
        .decode(buffer)
        .map(|text| text.into_owned())
        .map_err(|_| LtpError::InvalidString8(code_page))
}

/// Resolve a value that lives in the heap or in a subnode of `node`.
pub(crate) fn read_indirect_value(
    pst: &PstFile,
    node: &NodeRecord,
    heap: &HeapNode,
    prop_type: PropertyType,
    value: PropertyValueRecord,
) -> LtpResult<PropertyValue> {
    match value {
        PropertyValueRecord::Small(value) => PropertyValue::from_small(prop_type, value),
        PropertyValueRecord::Heap(heap_id) => {
            PropertyValue::parse(prop_type, heap.find_entry(heap_id)?)
        }
        PropertyValueRecord::Node(sub_node) => {
            let record = pst
                .lookup_sub_node(node, sub_node)
                .map_err(|err| match err {
                    NdbError::SubNodeNotFound(sub_node) => {
                        LtpError::PropertySubNodeNotFound(sub_node)
                    }
                    err => err.into(),
                })?;
            debug!(node = ?node.node(), ?sub_node, "reading property value from subnode");
            let data = pst.read_data_tree(record.data())?.concat();
            PropertyValue::parse(prop_type, &data)
        }
    }
}

/// A node's property map. Records are decoded up front, values are read on [PropertyContext::get].
pub struct PropertyContext<'a> {
    pst: &'a PstFile,
    node: NodeRecord,
    heap: HeapNode,
    properties: BTreeMap<u16, PropertyTreeRecord>,
}

impl<'a> PropertyContext<'a> {
    pub fn read(pst: &'a PstFile, node: NodeRecord) -> LtpResult<Self> {
        let heap = HeapNode::read(pst, &node)?;
        heap.expect_client(HeapNodeType::Properties)?;

        let tree = HeapTree::new(&heap, heap.header().user_root())?;
        let header = tree.header();
        if header.key_size() != 2 || header.entry_size() != 6 {
            return Err(LtpError::InvalidPropertyTreeHeader(
                header.key_size(),
                header.entry_size(),
            ));
        }

        let properties = tree
            .entries()?
            .iter()
            .map(|entry| {
                let record = PropertyTreeRecord::read(entry)?;
                Ok((record.prop_id(), record))
            })
            .collect::<LtpResult<BTreeMap<_, _>>>()?;

        Ok(Self {
            pst,
            node,
            heap,
            properties,
        })
    }

    pub fn node(&self) -> &NodeRecord {
        &self.node
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyTreeRecord> {
        self.properties.values()
    }

    pub fn contains(&self, prop_id: u16) -> bool {
        self.properties.contains_key(&prop_id)
    }

    pub fn record(&self, prop_id: u16) -> LtpResult<&PropertyTreeRecord> {
        self.properties
            .get(&prop_id)
            .ok_or(LtpError::PropertyNotFound(prop_id))
    }

    pub fn get(&self, prop_id: u16) -> LtpResult<PropertyValue> {
        let record = self.record(prop_id)?;
        read_indirect_value(
            self.pst,
            &self.node,
            &self.heap,
            record.prop_type(),
            record.value(),
        )
    }
}
