//! Writes small, valid PST/OST containers in memory so the decoder and the exporter can be
//! tested without binary fixtures checked into the tree.
//!
//! ```no_run
//! use pst_fixture::{FolderSpec, MessageSpec, PstBuilder};
//! use pst_decoder::ndb::header::NdbVersion;
//!
//! let fixture = PstBuilder::new(NdbVersion::Unicode)
//!     .root(FolderSpec::new("").folder(
//!         FolderSpec::new("Inbox").message(MessageSpec::new().subject("Hello")),
//!     ))
//!     .build()
//!     .unwrap();
//! let pst = pst_decoder::PstFile::from_bytes(fixture.into_bytes()).unwrap();
//! ```

use std::{collections::BTreeMap, io, path::Path};

use pst_decoder::{
    ltp::prop_type::PropertyType,
    ndb::{
        block_id::BlockId,
        node_id::{NodeId, NodeIdType, NID_ATTACHMENT_TABLE, NID_MESSAGE_STORE, NID_ROOT_FOLDER},
    },
};

pub mod ltp;
pub mod writer;

pub use ltp::Value;
pub use pst_decoder::ndb::header::{CryptMethod, NdbVersion};

use ltp::{property_context, table_context, NodeImage};
use writer::{ContainerWriter, NodeEntry, TreeOptions};

pub const PROP_MESSAGE_CLASS: u16 = 0x001A;
pub const PROP_SUBJECT: u16 = 0x0037;
pub const PROP_CLIENT_SUBMIT_TIME: u16 = 0x0039;
pub const PROP_TRANSPORT_HEADERS: u16 = 0x007D;
pub const PROP_SENDER_NAME: u16 = 0x0C1A;
pub const PROP_DELIVERY_TIME: u16 = 0x0E06;
pub const PROP_MESSAGE_FLAGS: u16 = 0x0E07;
pub const PROP_MESSAGE_SIZE: u16 = 0x0E08;
pub const PROP_ATTACH_SIZE: u16 = 0x0E20;
pub const PROP_BODY: u16 = 0x1000;
pub const PROP_HTML: u16 = 0x1013;
pub const PROP_DISPLAY_NAME: u16 = 0x3001;
pub const PROP_CREATION_TIME: u16 = 0x3007;
pub const PROP_CONTENT_COUNT: u16 = 0x3602;
pub const PROP_CONTENT_UNREAD_COUNT: u16 = 0x3603;
pub const PROP_SUBFOLDERS: u16 = 0x360A;
pub const PROP_ATTACH_DATA: u16 = 0x3701;
pub const PROP_ATTACH_FILENAME: u16 = 0x3704;
pub const PROP_ATTACH_METHOD: u16 = 0x3705;
pub const PROP_MESSAGE_CODEPAGE: u16 = 0x3FFD;

/// `FILETIME` ticks for a Unix timestamp.
pub fn filetime(unix_seconds: i64, nanos: u32) -> i64 {
    (unix_seconds + 11_644_473_600) * 10_000_000 + i64::from(nanos / 100)
}

#[derive(Clone, Debug, Default)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct MessageSpec {
    properties: BTreeMap<u16, Value>,
    attachments: Vec<Attachment>,
}

impl Default for MessageSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSpec {
    pub fn new() -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(PROP_MESSAGE_CLASS, Value::Unicode("IPM.Note".into()));
        Self {
            properties,
            attachments: Vec::new(),
        }
    }

    pub fn property(mut self, prop_id: u16, value: Value) -> Self {
        self.properties.insert(prop_id, value);
        self
    }

    pub fn without(mut self, prop_id: u16) -> Self {
        self.properties.remove(&prop_id);
        self
    }

    pub fn subject(self, subject: &str) -> Self {
        self.property(PROP_SUBJECT, Value::Unicode(subject.into()))
    }

    pub fn sender(self, sender: &str) -> Self {
        self.property(PROP_SENDER_NAME, Value::Unicode(sender.into()))
    }

    pub fn headers(self, headers: &str) -> Self {
        self.property(PROP_TRANSPORT_HEADERS, Value::Unicode(headers.into()))
    }

    pub fn body(self, body: &str) -> Self {
        self.property(PROP_BODY, Value::Unicode(body.into()))
    }

    /// `PidTagHtml` as `PtypBinary`, the way Outlook stores it.
    pub fn html(self, html: &[u8]) -> Self {
        self.property(PROP_HTML, Value::Binary(html.to_vec()))
    }

    pub fn creation_time(self, ticks: i64) -> Self {
        self.property(PROP_CREATION_TIME, Value::Time(ticks))
    }

    pub fn submit_time(self, ticks: i64) -> Self {
        self.property(PROP_CLIENT_SUBMIT_TIME, Value::Time(ticks))
    }

    pub fn delivery_time(self, ticks: i64) -> Self {
        self.property(PROP_DELIVERY_TIME, Value::Time(ticks))
    }

    pub fn attachment(mut self, filename: &str, data: &[u8]) -> Self {
        self.attachments.push(Attachment {
            filename: filename.into(),
            data: data.to_vec(),
        });
        self
    }
}

#[derive(Clone, Debug)]
pub struct FolderSpec {
    name: String,
    folders: Vec<FolderSpec>,
    messages: Vec<MessageSpec>,
    links: Vec<NodeId>,
}

impl FolderSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            folders: Vec::new(),
            messages: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn folder(mut self, folder: FolderSpec) -> Self {
        self.folders.push(folder);
        self
    }

    pub fn message(mut self, message: MessageSpec) -> Self {
        self.messages.push(message);
        self
    }

    /// Add a hierarchy table row pointing at an existing folder, such as the root.
    pub fn link(mut self, folder: NodeId) -> Self {
        self.links.push(folder);
        self
    }
}

/// Where the builder put things, for assertions and targeted corruption.
#[derive(Clone, Debug, Default)]
pub struct Layout {
    /// Folder NIDs by `/`-joined path below the root. The root itself is `""`.
    pub folders: BTreeMap<String, NodeId>,
    /// Message NIDs in the order the walker should yield them.
    pub messages: Vec<NodeId>,
    /// File offsets of each node's data blocks.
    pub data_blocks: BTreeMap<NodeId, Vec<u64>>,
}

pub struct Fixture {
    bytes: Vec<u8>,
    layout: Layout,
}

impl Fixture {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Flip the low bit of the first byte of a node's first data block.
    pub fn flip_data_bit(&mut self, node: NodeId) {
        if let Some(&offset) = self
            .layout
            .data_blocks
            .get(&node)
            .and_then(|offsets| offsets.first())
        {
            self.bytes[offset as usize] ^= 0x01;
        }
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, &self.bytes)
    }
}

pub struct PstBuilder {
    version: NdbVersion,
    crypt: CryptMethod,
    store_name: String,
    root: FolderSpec,
    options: TreeOptions,
}

impl PstBuilder {
    pub fn new(version: NdbVersion) -> Self {
        Self {
            version,
            crypt: CryptMethod::Permute,
            store_name: "Personal Folders".into(),
            root: FolderSpec::new(""),
            options: TreeOptions::default(),
        }
    }

    pub fn crypt(mut self, crypt: CryptMethod) -> Self {
        self.crypt = crypt;
        self
    }

    pub fn store_name(mut self, name: &str) -> Self {
        self.store_name = name.into();
        self
    }

    pub fn root(mut self, root: FolderSpec) -> Self {
        self.root = root;
        self
    }

    pub fn max_page_entries(mut self, max_page_entries: usize) -> Self {
        self.options.max_page_entries = Some(max_page_entries);
        self
    }

    pub fn unsorted_node_btree(mut self) -> Self {
        self.options.unsorted_node_btree = true;
        self
    }

    pub fn build(self) -> io::Result<Fixture> {
        let mut build = Build {
            writer: ContainerWriter::new(self.version, self.crypt),
            layout: Layout::default(),
            next_folder: 0x400,
            next_message: 0x10000,
        };

        let mut store = BTreeMap::new();
        store.insert(PROP_DISPLAY_NAME, Value::Unicode(self.store_name.clone()));
        let image = property_context(self.version, &store)?;
        build.write_node(NID_MESSAGE_STORE, None, image)?;

        build.write_folder(&self.root, NID_ROOT_FOLDER, NID_ROOT_FOLDER, String::new())?;

        let bytes = build.writer.finish(self.options)?;
        Ok(Fixture {
            bytes,
            layout: build.layout,
        })
    }
}

struct Build {
    writer: ContainerWriter,
    layout: Layout,
    next_folder: u32,
    next_message: u32,
}

impl Build {
    /// Write a node's blocks and subnodes. Returns the data tree root, the subnode tree root
    /// and the data block offsets.
    fn write_image(
        &mut self,
        image: NodeImage,
    ) -> io::Result<(BlockId, Option<BlockId>, Vec<u64>)> {
        let (data, offsets) = self.writer.write_data_tree(image.data)?;
        if image.sub_nodes.is_empty() {
            return Ok((data, None, offsets));
        }

        let mut entries = Vec::with_capacity(image.sub_nodes.len());
        for (node, child) in image.sub_nodes {
            let (data, sub_node, _) = self.write_image(child)?;
            entries.push(NodeEntry {
                node,
                data,
                sub_node,
                parent: None,
            });
        }
        let sub_node = self.writer.write_sub_node_tree(entries)?;
        Ok((data, Some(sub_node), offsets))
    }

    fn write_node(
        &mut self,
        node: NodeId,
        parent: Option<NodeId>,
        image: NodeImage,
    ) -> io::Result<()> {
        let (data, sub_node, offsets) = self.write_image(image)?;
        self.writer.add_node(NodeEntry {
            node,
            data,
            sub_node,
            parent,
        });
        self.layout.data_blocks.insert(node, offsets);
        Ok(())
    }

    fn write_folder(
        &mut self,
        folder: &FolderSpec,
        node: NodeId,
        parent: NodeId,
        path: String,
    ) -> io::Result<()> {
        let version = self.writer.version();
        self.layout.folders.insert(path.clone(), node);

        let mut properties = BTreeMap::new();
        properties.insert(PROP_DISPLAY_NAME, Value::Unicode(folder.name.clone()));
        properties.insert(
            PROP_CONTENT_COUNT,
            Value::Integer32(folder.messages.len() as i32),
        );
        properties.insert(PROP_CONTENT_UNREAD_COUNT, Value::Integer32(0));
        properties.insert(
            PROP_SUBFOLDERS,
            Value::Boolean(!folder.folders.is_empty() || !folder.links.is_empty()),
        );
        self.write_node(node, Some(parent), property_context(version, &properties)?)?;

        let mut children = Vec::with_capacity(folder.folders.len());
        for child in &folder.folders {
            self.next_folder += 1;
            children.push((NodeId::new(NodeIdType::NormalFolder, self.next_folder)?, child));
        }

        let mut hierarchy_rows: Vec<_> = children
            .iter()
            .map(|(child_node, child)| {
                (
                    u32::from(*child_node),
                    vec![
                        Some(Value::Unicode(child.name.clone())),
                        Some(Value::Integer32(child.messages.len() as i32)),
                        Some(Value::Integer32(0)),
                        Some(Value::Boolean(!child.folders.is_empty())),
                    ],
                )
            })
            .collect();
        hierarchy_rows.extend(
            folder
                .links
                .iter()
                .map(|link| (u32::from(*link), vec![None, None, None, None])),
        );
        let hierarchy = table_context(
            version,
            &[
                (PROP_DISPLAY_NAME, PropertyType::Unicode),
                (PROP_CONTENT_COUNT, PropertyType::Integer32),
                (PROP_CONTENT_UNREAD_COUNT, PropertyType::Integer32),
                (PROP_SUBFOLDERS, PropertyType::Boolean),
            ],
            &hierarchy_rows,
        )?;
        self.write_node(node.sibling(NodeIdType::HierarchyTable)?, None, hierarchy)?;

        let mut messages = Vec::with_capacity(folder.messages.len());
        for message in &folder.messages {
            self.next_message += 1;
            messages.push((
                NodeId::new(NodeIdType::NormalMessage, self.next_message)?,
                message,
            ));
        }

        let contents_columns = [
            (PROP_SUBJECT, PropertyType::Unicode),
            (PROP_SENDER_NAME, PropertyType::Unicode),
            (PROP_DELIVERY_TIME, PropertyType::Time),
            (PROP_MESSAGE_SIZE, PropertyType::Integer32),
        ];
        let contents_rows: Vec<_> = messages
            .iter()
            .map(|(message_node, message)| {
                let values = contents_columns
                    .iter()
                    .map(|&(prop_id, prop_type)| {
                        message
                            .properties
                            .get(&prop_id)
                            .filter(|value| value.prop_type() == prop_type)
                            .cloned()
                    })
                    .collect();
                (u32::from(*message_node), values)
            })
            .collect();
        let contents = table_context(version, &contents_columns, &contents_rows)?;
        self.write_node(node.sibling(NodeIdType::ContentsTable)?, None, contents)?;

        for (child_node, child) in children {
            let child_path = if path.is_empty() {
                child.name.clone()
            } else {
                format!("{path}/{}", child.name)
            };
            self.write_folder(child, child_node, node, child_path)?;
        }

        for (message_node, message) in messages {
            self.write_message(message, message_node, node)?;
            self.layout.messages.push(message_node);
        }

        Ok(())
    }

    fn write_message(
        &mut self,
        message: &MessageSpec,
        node: NodeId,
        parent: NodeId,
    ) -> io::Result<()> {
        let version = self.writer.version();
        let mut image = property_context(version, &message.properties)?;

        if !message.attachments.is_empty() {
            let mut rows = Vec::with_capacity(message.attachments.len());
            for (index, attachment) in message.attachments.iter().enumerate() {
                let attachment_node = NodeId::new(NodeIdType::Attachment, index as u32 + 1)?;

                let mut properties = BTreeMap::new();
                properties.insert(PROP_ATTACH_DATA, Value::Binary(attachment.data.clone()));
                properties.insert(
                    PROP_ATTACH_FILENAME,
                    Value::Unicode(attachment.filename.clone()),
                );
                properties.insert(PROP_ATTACH_METHOD, Value::Integer32(1));
                properties.insert(
                    PROP_ATTACH_SIZE,
                    Value::Integer32(attachment.data.len() as i32),
                );
                image
                    .sub_nodes
                    .insert(attachment_node, property_context(version, &properties)?);

                rows.push((
                    u32::from(attachment_node),
                    vec![
                        Some(Value::Unicode(attachment.filename.clone())),
                        Some(Value::Integer32(attachment.data.len() as i32)),
                        Some(Value::Integer32(1)),
                    ],
                ));
            }

            let table = table_context(
                version,
                &[
                    (PROP_ATTACH_FILENAME, PropertyType::Unicode),
                    (PROP_ATTACH_SIZE, PropertyType::Integer32),
                    (PROP_ATTACH_METHOD, PropertyType::Integer32),
                ],
                &rows,
            )?;
            image.sub_nodes.insert(NID_ATTACHMENT_TABLE, table);
        }

        self.write_node(node, Some(parent), image)
    }
}
