//! Block, page and header layout of the container being written.

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::{write::ZlibEncoder, Compression};
use std::io::{self, Write};

use pst_decoder::{
    block_sig::compute_sig,
    crc::compute_crc,
    encode::{cyclic, permute},
    ndb::{
        block::block_size,
        block_id::BlockId,
        block_ref::BlockRef,
        header::{
            CryptMethod, NdbVersion, ANSI_HEADER_SIZE, HEADER_MAGIC, HEADER_MAGIC_CLIENT,
            HEADER_SENTINEL, UNICODE_HEADER_SIZE,
        },
        node_id::NodeId,
        page::PageType,
    },
};

/// Offset of the first block. Real files keep the first AMap page here.
pub const FIRST_BLOCK_OFFSET: usize = 0x4400;

/// `wVerClient` written by Outlook 2003 and later.
const CLIENT_VERSION: u16 = 19;

const XBLOCK_TYPE: u8 = 0x01;
const SLBLOCK_TYPE: u8 = 0x02;

pub(crate) fn write_id(f: &mut dyn Write, version: NdbVersion, value: u64) -> io::Result<()> {
    if version.is_unicode() {
        f.write_u64::<LittleEndian>(value)
    } else {
        f.write_u32::<LittleEndian>(value as u32)
    }
}

/// Tweaks to the B-tree pages, used to exercise multi-level trees and index corruption.
#[derive(Clone, Copy, Default, Debug)]
pub struct TreeOptions {
    /// Cap the number of entries per page below what fits, forcing intermediate pages.
    pub max_page_entries: Option<usize>,
    /// Swap the first two node B-tree leaf entries.
    pub unsorted_node_btree: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct NodeEntry {
    pub node: NodeId,
    pub data: BlockId,
    pub sub_node: Option<BlockId>,
    pub parent: Option<NodeId>,
}

#[derive(Clone, Copy, Debug)]
struct BlockEntry {
    block: BlockRef,
    size: u16,
    inflated_size: u32,
}

pub struct ContainerWriter {
    version: NdbVersion,
    crypt: CryptMethod,
    buffer: Vec<u8>,
    next_block: u64,
    next_page: u64,
    blocks: Vec<BlockEntry>,
    nodes: Vec<NodeEntry>,
}

impl ContainerWriter {
    pub fn new(version: NdbVersion, crypt: CryptMethod) -> Self {
        Self {
            version,
            crypt,
            buffer: vec![0; FIRST_BLOCK_OFFSET],
            next_block: 0,
            next_page: 0,
            blocks: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn version(&self) -> NdbVersion {
        self.version
    }

    fn align(&mut self, alignment: usize) {
        let aligned = self.buffer.len().div_ceil(alignment) * alignment;
        self.buffer.resize(aligned, 0);
    }

    /// Append one block with its trailer and register it in the block B-tree.
    pub fn write_block(&mut self, is_internal: bool, data: &[u8]) -> io::Result<BlockRef> {
        let version = self.version;
        if data.is_empty() || data.len() > version.max_block_data_size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block payload of {} bytes", data.len()),
            ));
        }

        self.next_block += 1;
        let block_id = BlockId::new(is_internal, self.next_block);

        let mut stored = data.to_vec();
        if version == NdbVersion::Unicode4k {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(data)?;
            let compressed = encoder.finish()?;
            if compressed.len() < data.len() {
                stored = compressed;
            }
        }

        if !is_internal {
            match self.crypt {
                CryptMethod::None => {}
                CryptMethod::Permute => permute::encode_block(&mut stored),
                CryptMethod::Cyclic => {
                    cyclic::encode_decode_block(&mut stored, u64::from(block_id) as u32)
                }
            }
        }

        self.align(version.block_alignment());
        let index = self.buffer.len() as u64;
        let footprint = block_size(version, stored.len());

        let size = stored.len() as u16;
        let crc = compute_crc(0, &stored);
        let signature = compute_sig(index, u64::from(block_id));

        let mut block = stored;
        block.resize(footprint - version.block_trailer_size(), 0);

        // BLOCKTRAILER
        block.write_u16::<LittleEndian>(size)?;
        block.write_u16::<LittleEndian>(signature)?;
        if version.is_unicode() {
            block.write_u32::<LittleEndian>(crc)?;
            write_id(&mut block, version, u64::from(block_id))?;
        } else {
            write_id(&mut block, version, u64::from(block_id))?;
            block.write_u32::<LittleEndian>(crc)?;
        }
        self.buffer.extend_from_slice(&block);

        let block = BlockRef::new(block_id, index);
        self.blocks.push(BlockEntry {
            block,
            size,
            inflated_size: data.len() as u32,
        });
        Ok(block)
    }

    /// Write the blocks of a node and return the root of its data tree together with the file
    /// offsets of the data blocks.
    pub fn write_data_tree(&mut self, chunks: Vec<Vec<u8>>) -> io::Result<(BlockId, Vec<u64>)> {
        let mut leaves = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            leaves.push((self.write_block(false, chunk)?, chunk.len() as u32));
        }
        let offsets = leaves.iter().map(|(block, _)| block.index()).collect();

        let fan_out = (self.version.max_block_data_size() - 8) / self.version.id_size();
        let mut level = 0;
        let mut children = leaves;
        while children.len() > 1 {
            level += 1;

            let mut parents = Vec::new();
            for group in children.chunks(fan_out) {
                let total_size: u32 = group.iter().map(|(_, size)| size).sum();
                let mut block = Vec::new();
                block.write_u8(XBLOCK_TYPE)?;
                block.write_u8(level)?;
                block.write_u16::<LittleEndian>(group.len() as u16)?;
                block.write_u32::<LittleEndian>(total_size)?;
                for (child, _) in group {
                    write_id(&mut block, self.version, u64::from(child.block()))?;
                }
                parents.push((self.write_block(true, &block)?, total_size));
            }
            children = parents;
        }

        let root = children
            .first()
            .map(|(block, _)| block.block())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty data tree"))?;
        Ok((root, offsets))
    }

    /// Write `SLBLOCK`s for `entries`, sorted by NID, adding an `SIBLOCK` above them when they
    /// do not fit in one block.
    pub fn write_sub_node_tree(&mut self, entries: Vec<NodeEntry>) -> io::Result<BlockId> {
        let version = self.version;
        let header_size = if version.is_unicode() { 8 } else { 4 };
        let fan_out = (version.max_block_data_size() - header_size) / (3 * version.id_size());

        let mut leaves = Vec::new();
        for group in entries.chunks(fan_out) {
            let mut block = Vec::new();
            block.write_u8(SLBLOCK_TYPE)?;
            block.write_u8(0)?;
            block.write_u16::<LittleEndian>(group.len() as u16)?;
            if version.is_unicode() {
                block.write_u32::<LittleEndian>(0)?;
            }
            for entry in group {
                write_id(&mut block, version, u64::from(u32::from(entry.node)))?;
                write_id(&mut block, version, u64::from(entry.data))?;
                write_id(
                    &mut block,
                    version,
                    entry.sub_node.map(u64::from).unwrap_or_default(),
                )?;
            }
            leaves.push((group[0].node, self.write_block(true, &block)?.block()));
        }

        if let [(_, block)] = leaves.as_slice() {
            return Ok(*block);
        }

        let mut block = Vec::new();
        block.write_u8(SLBLOCK_TYPE)?;
        block.write_u8(1)?;
        block.write_u16::<LittleEndian>(leaves.len() as u16)?;
        if version.is_unicode() {
            block.write_u32::<LittleEndian>(0)?;
        }
        for (node, child) in &leaves {
            write_id(&mut block, version, u64::from(u32::from(*node)))?;
            write_id(&mut block, version, u64::from(*child))?;
        }
        Ok(self.write_block(true, &block)?.block())
    }

    pub fn add_node(&mut self, entry: NodeEntry) {
        self.nodes.push(entry);
    }

    /// Write both B-trees and the header, returning the finished container.
    pub fn finish(mut self, options: TreeOptions) -> io::Result<Vec<u8>> {
        let version = self.version;

        let mut nodes = Vec::with_capacity(self.nodes.len());
        for entry in &self.nodes {
            let mut record = Vec::new();
            write_id(&mut record, version, u64::from(u32::from(entry.node)))?;
            write_id(&mut record, version, u64::from(entry.data))?;
            write_id(
                &mut record,
                version,
                entry.sub_node.map(u64::from).unwrap_or_default(),
            )?;
            record.write_u32::<LittleEndian>(entry.parent.map(u32::from).unwrap_or_default())?;
            if version.is_unicode() {
                record.write_u32::<LittleEndian>(0)?;
            }
            nodes.push((u64::from(u32::from(entry.node)), record));
        }
        nodes.sort_by_key(|(key, _)| *key);
        if options.unsorted_node_btree && nodes.len() > 1 {
            nodes.swap(0, 1);
        }

        let mut blocks = Vec::with_capacity(self.blocks.len());
        for entry in &self.blocks {
            let mut record = Vec::new();
            write_id(&mut record, version, u64::from(entry.block.block()))?;
            write_id(&mut record, version, entry.block.index())?;
            record.write_u16::<LittleEndian>(entry.size)?;
            // cRef
            record.write_u16::<LittleEndian>(2)?;
            match version {
                NdbVersion::Unicode4k => record.write_u32::<LittleEndian>(entry.inflated_size)?,
                NdbVersion::Unicode => record.write_u32::<LittleEndian>(0)?,
                NdbVersion::Ansi => {}
            }
            blocks.push((entry.block.block().search_key(), record));
        }
        blocks.sort_by_key(|(key, _)| *key);

        let node_entry_size = if version.is_unicode() { 32 } else { 16 };
        let block_entry_size = match version {
            NdbVersion::Ansi => 12,
            _ => 24,
        };
        let node_btree = self.write_btree(PageType::NodeBTree, node_entry_size, nodes, options)?;
        let block_btree =
            self.write_btree(PageType::BlockBTree, block_entry_size, blocks, options)?;

        let header = self.header(node_btree, block_btree)?;
        self.buffer[..header.len()].copy_from_slice(&header);
        Ok(self.buffer)
    }

    fn write_btree(
        &mut self,
        page_type: PageType,
        leaf_entry_size: usize,
        mut entries: Vec<(u64, Vec<u8>)>,
        options: TreeOptions,
    ) -> io::Result<BlockRef> {
        let version = self.version;
        let mut level = 0_u8;
        loop {
            let entry_size = if level == 0 {
                leaf_entry_size
            } else {
                3 * version.id_size()
            };
            let mut capacity = version.page_entries_size() / entry_size;
            if let Some(max_page_entries) = options.max_page_entries {
                capacity = capacity.min(max_page_entries.max(2));
            }

            let mut pages = Vec::new();
            if entries.is_empty() {
                pages.push((0, self.write_page(page_type, level, entry_size, &[])?));
            }
            for group in entries.chunks(capacity) {
                let page = self.write_page(page_type, level, entry_size, group)?;
                pages.push((group[0].0, page));
            }

            if let [(_, root)] = pages.as_slice() {
                return Ok(*root);
            }

            entries = pages
                .into_iter()
                .map(|(key, page)| {
                    let mut entry = Vec::new();
                    write_id(&mut entry, version, key)?;
                    write_id(&mut entry, version, u64::from(page.block()))?;
                    write_id(&mut entry, version, page.index())?;
                    Ok((key, entry))
                })
                .collect::<io::Result<Vec<_>>>()?;
            level += 1;
        }
    }

    fn write_page(
        &mut self,
        page_type: PageType,
        level: u8,
        entry_size: usize,
        entries: &[(u64, Vec<u8>)],
    ) -> io::Result<BlockRef> {
        let version = self.version;
        self.align(version.page_size());
        let index = self.buffer.len() as u64;

        self.next_page += 1;
        let block_id = BlockId::new(false, self.next_page);

        let mut page = Vec::with_capacity(version.page_size());
        for (_, entry) in entries {
            page.extend_from_slice(entry);
        }
        page.resize(version.page_entries_size(), 0);

        let max_entries = version.page_entries_size() / entry_size;
        match version {
            NdbVersion::Unicode4k => {
                page.write_u16::<LittleEndian>(entries.len() as u16)?;
                page.write_u16::<LittleEndian>(max_entries as u16)?;
            }
            _ => {
                page.write_u8(entries.len() as u8)?;
                page.write_u8(max_entries as u8)?;
            }
        }
        page.write_u8(entry_size as u8)?;
        page.write_u8(level)?;
        page.resize(version.page_trailer_offset(), 0);

        let crc = compute_crc(0, &page);
        let signature = compute_sig(index, u64::from(block_id));

        // PAGETRAILER
        page.write_all(&[page_type as u8; 2])?;
        page.write_u16::<LittleEndian>(signature)?;
        if version.is_unicode() {
            page.write_u32::<LittleEndian>(crc)?;
            write_id(&mut page, version, u64::from(block_id))?;
        } else {
            write_id(&mut page, version, u64::from(block_id))?;
            page.write_u32::<LittleEndian>(crc)?;
        }
        page.resize(version.page_size(), 0);

        self.buffer.extend_from_slice(&page);
        Ok(BlockRef::new(block_id, index))
    }

    fn header(&self, node_btree: BlockRef, block_btree: BlockRef) -> io::Result<Vec<u8>> {
        let version = self.version;
        let file_eof = self.buffer.len() as u64;
        let raw_version: u16 = match version {
            NdbVersion::Ansi => 15,
            NdbVersion::Unicode => 23,
            NdbVersion::Unicode4k => 36,
        };

        let mut header = Vec::with_capacity(UNICODE_HEADER_SIZE);
        header.write_u32::<LittleEndian>(HEADER_MAGIC)?;
        // dwCRCPartial
        header.write_u32::<LittleEndian>(0)?;
        header.write_u16::<LittleEndian>(HEADER_MAGIC_CLIENT)?;
        header.write_u16::<LittleEndian>(raw_version)?;
        header.write_u16::<LittleEndian>(CLIENT_VERSION)?;
        // bPlatformCreate, bPlatformAccess
        header.write_all(&[0x01, 0x01])?;
        // dwReserved1, dwReserved2
        header.write_all(&[0; 8])?;

        let next_block = u64::from(BlockId::new(false, self.next_block + 1));
        let next_page = u64::from(BlockId::new(false, self.next_page + 1));
        if version.is_unicode() {
            // bidUnused
            header.write_u64::<LittleEndian>(0)?;
            header.write_u64::<LittleEndian>(next_page)?;
        } else {
            header.write_u32::<LittleEndian>(next_block as u32)?;
            header.write_u32::<LittleEndian>(next_page as u32)?;
        }
        // dwUnique
        header.write_u32::<LittleEndian>(1)?;
        // rgnid
        header.write_all(&[0; 128])?;
        if version.is_unicode() {
            // qwUnused
            header.write_u64::<LittleEndian>(0)?;
        }

        // ROOT
        header.write_u32::<LittleEndian>(0)?;
        write_id(&mut header, version, file_eof)?;
        // ibAMapLast, cbAMapFree, cbPMapFree
        for _ in 0..3 {
            write_id(&mut header, version, 0)?;
        }
        for bref in [node_btree, block_btree] {
            write_id(&mut header, version, u64::from(bref.block()))?;
            write_id(&mut header, version, bref.index())?;
        }
        // fAMapValid, bReserved, wReserved
        header.write_all(&[0; 4])?;

        if version.is_unicode() {
            // dwAlign
            header.write_u32::<LittleEndian>(0)?;
        }
        // rgbFM, rgbFP
        header.write_all(&[0; 256])?;
        header.write_u8(HEADER_SENTINEL)?;
        header.write_u8(self.crypt as u8)?;
        // rgbReserved
        header.write_u16::<LittleEndian>(0)?;

        if version.is_unicode() {
            header.write_u64::<LittleEndian>(next_block)?;
            let crc_offset = header.len();
            header.write_u32::<LittleEndian>(0)?;
            header.resize(UNICODE_HEADER_SIZE, 0);

            let crc_partial = compute_crc(0, &header[8..479]);
            header[4..8].copy_from_slice(&crc_partial.to_le_bytes());
            let crc_full = compute_crc(0, &header[8..crc_offset]);
            header[crc_offset..crc_offset + 4].copy_from_slice(&crc_full.to_le_bytes());
        } else {
            header.resize(ANSI_HEADER_SIZE, 0);
            let crc_partial = compute_crc(0, &header[8..479]);
            header[4..8].copy_from_slice(&crc_partial.to_le_bytes());
        }

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pst_decoder::ndb::header::Header;

    #[test]
    fn test_header_round_trips_through_parser() {
        for version in [NdbVersion::Ansi, NdbVersion::Unicode, NdbVersion::Unicode4k] {
            let writer = ContainerWriter::new(version, CryptMethod::Cyclic);
            let bytes = writer.finish(TreeOptions::default()).unwrap();
            let header = Header::parse(&bytes).unwrap();
            assert_eq!(header.version(), version);
            assert_eq!(header.crypt_method(), CryptMethod::Cyclic);
            assert_eq!(header.file_eof(), bytes.len() as u64);
        }
    }
}
