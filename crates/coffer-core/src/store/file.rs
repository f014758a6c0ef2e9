use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;
use crate::store::ByteStore;

/// ByteStore over a host file.
pub struct FileByteStore {
    file: File,
}

impl FileByteStore {
    /// Open an existing file for read/write access.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    /// Create a new file, failing if one already exists at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Wrap an already opened file.
    pub fn from_file(file: File) -> Self {
        Self { file }
    }
}

impl ByteStore for FileByteStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn resize(&mut self, new_size: u64) -> Result<()> {
        self.file.set_len(new_size)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        // Writes go straight to the kernel page cache, which is coherent
        // across handles on the same host; durability against power loss is
        // the caller's explicit fsync concern.
        Ok(())
    }

    fn is_sparse(&self) -> bool {
        // set_len extension reads back as zeros.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, FileByteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileByteStore::create(&dir.path().join("store")).unwrap();
        (dir, store)
    }

    #[test]
    fn read_past_end_returns_zero() {
        let (_dir, mut store) = temp_store();
        store.write_at(0, b"abc").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(store.read_at(10, &mut buf).unwrap(), 0);
    }

    #[test]
    fn short_read_at_end() {
        let (_dir, mut store) = temp_store();
        store.write_at(0, b"abcdef").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(store.read_at(4, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn resize_extension_reads_as_zeros() {
        let (_dir, mut store) = temp_store();
        store.write_at(0, b"xy").unwrap();
        store.resize(10).unwrap();
        assert_eq!(store.size().unwrap(), 10);
        let mut buf = [0xAAu8; 10];
        assert_eq!(store.read_at(0, &mut buf).unwrap(), 10);
        assert_eq!(&buf[..2], b"xy");
        assert!(buf[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn resize_truncates() {
        let (_dir, mut store) = temp_store();
        store.write_at(0, b"abcdef").unwrap();
        store.resize(3).unwrap();
        assert_eq!(store.size().unwrap(), 3);
        let mut buf = [0u8; 6];
        assert_eq!(store.read_at(0, &mut buf).unwrap(), 3);
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        FileByteStore::create(&path).unwrap();
        assert!(FileByteStore::create(&path).is_err());
    }
}
