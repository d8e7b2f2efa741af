//! [HEADER](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/c9876f5a-664b-46a3-9887-ba63f113abf5)

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};

use super::{block_ref::BlockRef, *};
use crate::{crc::compute_crc, source::BlockSource};

pub const HEADER_MAGIC: u32 = u32::from_be_bytes(*b"NDB!");
pub const HEADER_MAGIC_CLIENT: u16 = u16::from_be_bytes(*b"MS");
pub const HEADER_SENTINEL: u8 = 0x80;

pub const ANSI_HEADER_SIZE: usize = 512;
pub const UNICODE_HEADER_SIZE: usize = 564;

/// Bytes covered by `dwCRCPartial`, starting at `wMagicClient`.
const PARTIAL_CRC_SIZE: usize = 471;
/// Bytes covered by `dwCRCFull` in a Unicode header, starting at `wMagicClient`.
const FULL_CRC_SIZE: usize = 516;

/// `wVer`
///
/// Selects the width of ids, the size of pages, and the layout of every on-disk structure
/// below the header.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum NdbVersion {
    /// `wVer` 14 or 15: 32-bit ids
    Ansi,
    /// `wVer` 23: 64-bit ids
    Unicode,
    /// `wVer` 36: 64-bit ids, 4K pages and zlib-compressed blocks (Outlook 2013 OST)
    Unicode4k,
}

impl TryFrom<u16> for NdbVersion {
    type Error = NdbError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            14 | 15 => Ok(Self::Ansi),
            23 => Ok(Self::Unicode),
            36 => Ok(Self::Unicode4k),
            _ => Err(NdbError::InvalidNdbVersion(value)),
        }
    }
}

impl NdbVersion {
    pub fn is_unicode(self) -> bool {
        !matches!(self, Self::Ansi)
    }

    /// Width of a `BID`, `IB` or `NID` slot.
    pub fn id_size(self) -> usize {
        if self.is_unicode() {
            8
        } else {
            4
        }
    }

    pub fn page_size(self) -> usize {
        match self {
            Self::Unicode4k => 4096,
            _ => 512,
        }
    }

    /// Size of `rgentries` in a `BTPAGE`.
    pub fn page_entries_size(self) -> usize {
        match self {
            Self::Ansi => 496,
            Self::Unicode => 488,
            Self::Unicode4k => 4056,
        }
    }

    /// Offset of the `PAGETRAILER`, which is also the number of bytes covered by its `dwCRC`.
    pub fn page_trailer_offset(self) -> usize {
        match self {
            Self::Ansi => 500,
            Self::Unicode => 496,
            Self::Unicode4k => 4072,
        }
    }

    pub fn block_trailer_size(self) -> usize {
        if self.is_unicode() {
            16
        } else {
            12
        }
    }

    pub fn block_alignment(self) -> usize {
        match self {
            Self::Unicode4k => 512,
            _ => 64,
        }
    }

    /// The largest payload of a single data block after decoding. Rows of a table context
    /// never straddle two blocks of this size.
    pub fn max_block_data_size(self) -> usize {
        8192 - self.block_trailer_size()
    }
}

/// `bCryptMethod`
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum CryptMethod {
    /// `NDB_CRYPT_NONE`: Data blocks are not encoded
    #[default]
    None = 0x00,
    /// `NDB_CRYPT_PERMUTE`: Encoded with the [Permutation algorithm](crate::encode::permute)
    Permute = 0x01,
    /// `NDB_CRYPT_CYCLIC`: Encoded with the [Cyclic algorithm](crate::encode::cyclic)
    Cyclic = 0x02,
}

impl TryFrom<u8> for CryptMethod {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::Permute),
            0x02 => Ok(Self::Cyclic),
            _ => Err(NdbError::InvalidNdbCryptMethod(value)),
        }
    }
}

/// The header fields needed to navigate a container. Allocation maps, the free-map hints and
/// the `rgnid` counters only matter to writers and are skipped.
#[derive(Clone, Debug)]
pub struct Header {
    version: NdbVersion,
    raw_version: u16,
    client_version: u16,
    file_eof: u64,
    node_btree: BlockRef,
    block_btree: BlockRef,
    crypt_method: CryptMethod,
}

impl Header {
    pub fn read(source: &dyn BlockSource) -> NdbResult<Self> {
        let size = source.size()?;
        if size < ANSI_HEADER_SIZE as u64 {
            return Err(NdbError::FileTooSmall(size));
        }

        let length = size.min(UNICODE_HEADER_SIZE as u64) as usize;
        let mut buffer = vec![0; length];
        source.read_exact_at(0, &mut buffer)?;
        Self::parse(&buffer)
    }

    pub fn parse(buffer: &[u8]) -> NdbResult<Self> {
        if buffer.len() < ANSI_HEADER_SIZE {
            return Err(NdbError::FileTooSmall(buffer.len() as u64));
        }

        let mut cursor = Cursor::new(buffer);

        // dwMagic
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != HEADER_MAGIC {
            return Err(NdbError::InvalidNdbHeaderMagicValue(magic));
        }

        // dwCRCPartial
        let crc_partial = cursor.read_u32::<LittleEndian>()?;

        // wMagicClient
        let magic_client = cursor.read_u16::<LittleEndian>()?;
        if magic_client != HEADER_MAGIC_CLIENT {
            return Err(NdbError::InvalidNdbHeaderMagicClientValue(magic_client));
        }

        if compute_crc(0, &buffer[8..8 + PARTIAL_CRC_SIZE]) != crc_partial {
            return Err(NdbError::InvalidNdbHeaderPartialCrc(crc_partial));
        }

        // wVer
        let raw_version = cursor.read_u16::<LittleEndian>()?;
        let version = NdbVersion::try_from(raw_version)?;

        // wVerClient
        let client_version = cursor.read_u16::<LittleEndian>()?;

        // bPlatformCreate, bPlatformAccess, dwReserved1, dwReserved2
        cursor.seek(SeekFrom::Current(10))?;

        let fields = match version {
            NdbVersion::Ansi => Self::read_ansi_fields(&mut cursor)?,
            _ => {
                if buffer.len() < UNICODE_HEADER_SIZE {
                    return Err(NdbError::FileTooSmall(buffer.len() as u64));
                }
                Self::read_unicode_fields(&mut cursor, buffer)?
            }
        };

        Ok(Self {
            version,
            raw_version,
            client_version,
            ..fields
        })
    }

    fn read_unicode_fields(cursor: &mut Cursor<&[u8]>, buffer: &[u8]) -> NdbResult<Self> {
        let version = NdbVersion::Unicode;

        // bidUnused, bidNextP, dwUnique, rgnid, qwUnused
        cursor.seek(SeekFrom::Current(8 + 8 + 4 + 128 + 8))?;

        let (file_eof, node_btree, block_btree) = Self::read_root(cursor, version)?;

        // dwAlign, rgbFM, rgbFP
        cursor.seek(SeekFrom::Current(4 + 128 + 128))?;

        let crypt_method = Self::read_sentinel_and_crypt(cursor)?;

        // rgbReserved, bidNextB
        cursor.seek(SeekFrom::Current(2 + 8))?;

        // dwCRCFull
        let crc_full = cursor.read_u32::<LittleEndian>()?;
        if compute_crc(0, &buffer[8..8 + FULL_CRC_SIZE]) != crc_full {
            return Err(NdbError::InvalidNdbHeaderFullCrc(crc_full));
        }

        Ok(Self {
            version,
            raw_version: 0,
            client_version: 0,
            file_eof,
            node_btree,
            block_btree,
            crypt_method,
        })
    }

    fn read_ansi_fields(cursor: &mut Cursor<&[u8]>) -> NdbResult<Self> {
        let version = NdbVersion::Ansi;

        // bidNextB, bidNextP, dwUnique, rgnid
        cursor.seek(SeekFrom::Current(4 + 4 + 4 + 128))?;

        let (file_eof, node_btree, block_btree) = Self::read_root(cursor, version)?;

        // rgbFM, rgbFP
        cursor.seek(SeekFrom::Current(128 + 128))?;

        let crypt_method = Self::read_sentinel_and_crypt(cursor)?;

        Ok(Self {
            version,
            raw_version: 0,
            client_version: 0,
            file_eof,
            node_btree,
            block_btree,
            crypt_method,
        })
    }

    /// [ROOT](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/32ce8c94-4757-46c8-a169-3fd21abee584)
    fn read_root(
        cursor: &mut Cursor<&[u8]>,
        version: NdbVersion,
    ) -> NdbResult<(u64, BlockRef, BlockRef)> {
        // dwReserved
        cursor.seek(SeekFrom::Current(4))?;

        let id_size = version.id_size() as i64;

        // ibFileEof
        let file_eof = if version.is_unicode() {
            cursor.read_u64::<LittleEndian>()?
        } else {
            u64::from(cursor.read_u32::<LittleEndian>()?)
        };

        // ibAMapLast, cbAMapFree, cbPMapFree
        cursor.seek(SeekFrom::Current(3 * id_size))?;

        // BREFNBT
        let node_btree = BlockRef::read(cursor, version)?;

        // BREFBBT
        let block_btree = BlockRef::read(cursor, version)?;

        // fAMapValid, bReserved, wReserved
        cursor.seek(SeekFrom::Current(4))?;

        Ok((file_eof, node_btree, block_btree))
    }

    fn read_sentinel_and_crypt(cursor: &mut Cursor<&[u8]>) -> NdbResult<CryptMethod> {
        // bSentinel
        let sentinel = cursor.read_u8()?;
        if sentinel != HEADER_SENTINEL {
            return Err(NdbError::InvalidNdbHeaderSentinelValue(sentinel));
        }

        // bCryptMethod
        CryptMethod::try_from(cursor.read_u8()?)
    }

    pub fn version(&self) -> NdbVersion {
        self.version
    }

    /// The raw `wVer` value.
    pub fn raw_version(&self) -> u16 {
        self.raw_version
    }

    pub fn client_version(&self) -> u16 {
        self.client_version
    }

    /// `ibFileEof`
    pub fn file_eof(&self) -> u64 {
        self.file_eof
    }

    /// `BREFNBT`
    pub fn node_btree(&self) -> BlockRef {
        self.node_btree
    }

    /// `BREFBBT`
    pub fn block_btree(&self) -> BlockRef {
        self.block_btree
    }

    pub fn crypt_method(&self) -> CryptMethod {
        self.crypt_method
    }
}
