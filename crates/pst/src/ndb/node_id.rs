//! [NID (Node ID)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/18d7644e-cb33-4e11-95c0-34d8a84fbff6)

use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    fmt::Debug,
    io::{self, Read},
};

use super::{header::NdbVersion, *};

/// `nidType`
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum NodeIdType {
    /// `NID_TYPE_HID`: heap allocation inside a node, never a node of its own
    HeapNode = 0x00,
    /// `NID_TYPE_INTERNAL`
    Internal = 0x01,
    /// `NID_TYPE_NORMAL_FOLDER`: folder property context
    NormalFolder = 0x02,
    /// `NID_TYPE_SEARCH_FOLDER`: search folder property context
    SearchFolder = 0x03,
    /// `NID_TYPE_NORMAL_MESSAGE`: message property context
    NormalMessage = 0x04,
    /// `NID_TYPE_ATTACHMENT`: attachment property context
    Attachment = 0x05,
    /// `NID_TYPE_SEARCH_UPDATE_QUEUE`
    SearchUpdateQueue = 0x06,
    /// `NID_TYPE_SEARCH_CRITERIA_OBJECT`
    SearchCriteria = 0x07,
    /// `NID_TYPE_ASSOC_MESSAGE`: folder associated information message
    AssociatedMessage = 0x08,
    /// `NID_TYPE_CONTENTS_TABLE_INDEX`
    ContentsTableIndex = 0x0A,
    /// `NID_TYPE_RECEIVE_FOLDER_TABLE`
    ReceiveFolderTable = 0x0B,
    /// `NID_TYPE_OUTGOING_QUEUE_TABLE`
    OutgoingQueueTable = 0x0C,
    /// `NID_TYPE_HIERARCHY_TABLE`: sub-folders of a folder
    HierarchyTable = 0x0D,
    /// `NID_TYPE_CONTENTS_TABLE`: messages of a folder
    ContentsTable = 0x0E,
    /// `NID_TYPE_ASSOC_CONTENTS_TABLE`
    AssociatedContentsTable = 0x0F,
    /// `NID_TYPE_SEARCH_CONTENTS_TABLE`
    SearchContentsTable = 0x10,
    /// `NID_TYPE_ATTACHMENT_TABLE`: attachments of a message
    AttachmentTable = 0x11,
    /// `NID_TYPE_RECIPIENT_TABLE`: recipients of a message
    RecipientTable = 0x12,
    /// `NID_TYPE_SEARCH_TABLE_INDEX`
    SearchTableIndex = 0x13,
    /// `NID_TYPE_LTP`: subnode holding a property value or table rows
    ListsTablesProperties = 0x1F,
}

impl TryFrom<u8> for NodeIdType {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::HeapNode),
            0x01 => Ok(Self::Internal),
            0x02 => Ok(Self::NormalFolder),
            0x03 => Ok(Self::SearchFolder),
            0x04 => Ok(Self::NormalMessage),
            0x05 => Ok(Self::Attachment),
            0x06 => Ok(Self::SearchUpdateQueue),
            0x07 => Ok(Self::SearchCriteria),
            0x08 => Ok(Self::AssociatedMessage),
            0x0A => Ok(Self::ContentsTableIndex),
            0x0B => Ok(Self::ReceiveFolderTable),
            0x0C => Ok(Self::OutgoingQueueTable),
            0x0D => Ok(Self::HierarchyTable),
            0x0E => Ok(Self::ContentsTable),
            0x0F => Ok(Self::AssociatedContentsTable),
            0x10 => Ok(Self::SearchContentsTable),
            0x11 => Ok(Self::AttachmentTable),
            0x12 => Ok(Self::RecipientTable),
            0x13 => Ok(Self::SearchTableIndex),
            0x1F => Ok(Self::ListsTablesProperties),
            _ => Err(NdbError::InvalidNodeIdType(value)),
        }
    }
}

pub const MAX_NODE_INDEX: u32 = (1 << 27) - 1;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id_type: NodeIdType, index: u32) -> NdbResult<Self> {
        if index > MAX_NODE_INDEX {
            return Err(NdbError::InvalidNodeIndex(index));
        }
        Ok(Self((index << 5) | u32::from(id_type as u8)))
    }

    pub fn id_type(&self) -> NdbResult<NodeIdType> {
        NodeIdType::try_from((self.0 & 0x1F) as u8)
    }

    pub fn index(&self) -> u32 {
        self.0 >> 5
    }

    /// The node of another type that shares this node's index, e.g. the hierarchy table of a
    /// folder.
    pub fn sibling(&self, id_type: NodeIdType) -> NdbResult<Self> {
        Self::new(id_type, self.index())
    }

    /// Read a NID stored in an on-disk id slot, which is 8 bytes wide in Unicode files. Only the
    /// low 32 bits are meaningful.
    pub fn read(f: &mut dyn Read, version: NdbVersion) -> io::Result<Self> {
        let value = f.read_u32::<LittleEndian>()?;
        if version.is_unicode() {
            let _high = f.read_u32::<LittleEndian>()?;
        }
        Ok(Self(value))
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Ok(id_type) = self.id_type() else {
            return write!(f, "NodeId {{ invalid: 0x{:08X} }}", self.0);
        };

        write!(f, "NodeId {{ {:?}: 0x{:X} }}", id_type, self.index())
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<NodeId> for u32 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

/// `NID_MESSAGE_STORE`: the message store property context.
pub const NID_MESSAGE_STORE: NodeId = NodeId(0x21);

/// `NID_ROOT_FOLDER`: the root of the folder hierarchy.
pub const NID_ROOT_FOLDER: NodeId = NodeId(0x122);

/// `NID_ATTACHMENT_TABLE`: the attachment table subnode of a message.
pub const NID_ATTACHMENT_TABLE: NodeId = NodeId(0x671);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_nid_index_overflow() {
        let Err(NdbError::InvalidNodeIndex(value)) =
            NodeId::new(NodeIdType::HeapNode, MAX_NODE_INDEX + 1)
        else {
            panic!("NodeId should be out of range");
        };
        assert_eq!(value, MAX_NODE_INDEX + 1);
    }

    #[test]
    fn test_well_known_nodes() {
        assert_eq!(NID_MESSAGE_STORE.id_type().unwrap(), NodeIdType::Internal);
        assert_eq!(NID_MESSAGE_STORE.index(), 1);
        assert_eq!(NID_ROOT_FOLDER.id_type().unwrap(), NodeIdType::NormalFolder);
        assert_eq!(NID_ROOT_FOLDER.index(), 9);
        assert_eq!(
            NID_ATTACHMENT_TABLE.id_type().unwrap(),
            NodeIdType::AttachmentTable
        );
    }

    #[test]
    fn test_sibling() {
        let table = NID_ROOT_FOLDER
            .sibling(NodeIdType::HierarchyTable)
            .unwrap();
        assert_eq!(u32::from(table), 0x12D);
    }

    #[test]
    fn test_invalid_type() {
        let Err(NdbError::InvalidNodeIdType(value)) = NodeId::from(0x09).id_type() else {
            panic!("nidType 0x09 should be invalid");
        };
        assert_eq!(value, 0x09);
    }

    #[test]
    fn test_read_unicode_slot() {
        let mut cursor = Cursor::new([0x22, 0x01, 0, 0, 0, 0, 0, 0]);
        let node = NodeId::read(&mut cursor, NdbVersion::Unicode).unwrap();
        assert_eq!(node, NID_ROOT_FOLDER);
        assert_eq!(cursor.position(), 8);
    }
}
