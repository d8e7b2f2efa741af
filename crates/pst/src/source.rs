//! Positional access to the bytes of a container.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
    sync::Mutex,
};

/// Offset-addressed reads over a container.
pub trait BlockSource: Send + Sync {
    /// Total size of the container in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Fill `buffer` with the bytes starting at `offset`.
    fn read_exact_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<()>;
}

/// A file handle whose cursor is serialized behind a mutex.
pub struct FileSource {
    file: Mutex<File>,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            file: Mutex::new(File::open(path)?),
        })
    }
}

impl BlockSource for FileSource {
    fn size(&self) -> io::Result<u64> {
        let file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("Failed to lock PST file"))?;
        Ok(file.metadata()?.len())
    }

    fn read_exact_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("Failed to lock PST file"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buffer)
    }
}

impl BlockSource for Vec<u8> {
    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_exact_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let data = start
            .checked_add(buffer.len())
            .and_then(|end| self.get(start..end))
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buffer.copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read() {
        let source = vec![1_u8, 2, 3, 4, 5];
        let mut buffer = [0_u8; 3];
        source.read_exact_at(1, &mut buffer).unwrap();
        assert_eq!(buffer, [2, 3, 4]);
        assert_eq!(source.size().unwrap(), 5);
    }

    #[test]
    fn test_memory_read_past_end() {
        let source = vec![1_u8, 2, 3];
        let mut buffer = [0_u8; 2];
        let Err(err) = source.read_exact_at(2, &mut buffer) else {
            panic!("read past the end should fail");
        };
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
