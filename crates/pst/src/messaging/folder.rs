//! ## [Folders](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/dee5b9d0-5513-4c5e-94aa-8bd28a9350b2)

use tracing::debug;

use super::*;
use crate::{
    ltp::{
        prop_context::{PropertyContext, PropertyValue},
        table_context::TableContext,
    },
    ndb::{node_id::NodeIdType, NodeRecord},
    PstFile,
};

/// `PidTagDisplayName`
pub const PROP_DISPLAY_NAME: u16 = 0x3001;
/// `PidTagContentCount`
pub const PROP_CONTENT_COUNT: u16 = 0x3602;
/// `PidTagSubfolders`
pub const PROP_SUBFOLDERS: u16 = 0x360A;

/// Folder names carry no code page of their own.
const FOLDER_CODE_PAGE: u16 = 1252;

pub struct Folder<'a> {
    pst: &'a PstFile,
    node: NodeRecord,
    properties: PropertyContext<'a>,
}

impl<'a> Folder<'a> {
    pub fn read(pst: &'a PstFile, node_id: NodeId) -> MessagingResult<Self> {
        expect_node_type(node_id, &[NodeIdType::NormalFolder])?;
        let node = pst.lookup_node(node_id)?;
        let properties = PropertyContext::read(pst, node)?;
        Ok(Self {
            pst,
            node,
            properties,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node.node()
    }

    pub fn properties(&self) -> &PropertyContext<'a> {
        &self.properties
    }

    pub fn display_name(&self) -> MessagingResult<String> {
        match self.properties.get(PROP_DISPLAY_NAME)? {
            value @ (PropertyValue::String8(_) | PropertyValue::Unicode(_)) => {
                Ok(value.to_text(FOLDER_CODE_PAGE)?)
            }
            invalid => Err(MessagingError::InvalidFolderDisplayName(invalid.prop_type())),
        }
    }

    pub fn content_count(&self) -> MessagingResult<i32> {
        match self.properties.get(PROP_CONTENT_COUNT)? {
            PropertyValue::Integer32(value) => Ok(value),
            invalid => Err(MessagingError::InvalidFolderContentCount(invalid.prop_type())),
        }
    }

    pub fn has_sub_folders(&self) -> MessagingResult<bool> {
        match self.properties.get(PROP_SUBFOLDERS)? {
            PropertyValue::Boolean(value) => Ok(value),
            invalid => Err(MessagingError::InvalidFolderHasSubfolders(invalid.prop_type())),
        }
    }

    /// Read one of the tables that share this folder's NID index. A folder without that node
    /// yields `None`.
    fn sibling_table(&self, id_type: NodeIdType) -> MessagingResult<Option<TableContext<'a>>> {
        let node_id = self.node_id().sibling(id_type)?;
        let node = match self.pst.lookup_node(node_id) {
            Ok(node) => node,
            Err(NdbError::BTreeKeyNotFound(..)) => {
                debug!(folder = ?self.node_id(), ?id_type, "folder has no table");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Some(TableContext::read(self.pst, node)?))
    }

    pub fn hierarchy_table(&self) -> MessagingResult<Option<TableContext<'a>>> {
        self.sibling_table(NodeIdType::HierarchyTable)
    }

    pub fn contents_table(&self) -> MessagingResult<Option<TableContext<'a>>> {
        self.sibling_table(NodeIdType::ContentsTable)
    }

    /// The NIDs of the child folders, in hierarchy table row order.
    pub fn sub_folders(&self) -> MessagingResult<Vec<NodeId>> {
        Ok(self
            .hierarchy_table()?
            .map(|table| table.rows().map(|row| NodeId::from(row.id())).collect())
            .unwrap_or_default())
    }

    /// The NIDs of the messages, in contents table row order.
    pub fn messages(&self) -> MessagingResult<Vec<NodeId>> {
        Ok(self
            .contents_table()?
            .map(|table| table.rows().map(|row| NodeId::from(row.id())).collect())
            .unwrap_or_default())
    }
}
