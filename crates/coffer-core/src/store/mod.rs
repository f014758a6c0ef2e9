pub mod file;
pub mod memory;

pub use self::file::FileByteStore;
pub use self::memory::MemoryByteStore;

use crate::error::Result;

/// A resizable, randomly addressable byte sequence.
///
/// Every layer of the stream stack both consumes and presents this interface,
/// so an encrypted stream can sit wherever a plain one does.
pub trait ByteStore: Send {
    /// Read up to `buf.len()` bytes at `offset` into `buf`.
    ///
    /// Returns the number of bytes read. The count is short only when the
    /// stream ends inside the requested range, and zero when `offset` is at
    /// or past the end. Reads past the end are not an error.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data` at `offset`, extending the stream as needed.
    ///
    /// When `offset` lies past the current end, the contents of the gap are
    /// unspecified at this layer; callers that need zeros must fill them.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Current size in bytes.
    fn size(&self) -> Result<u64>;

    /// Truncate or extend to exactly `new_size` bytes.
    fn resize(&mut self, new_size: u64) -> Result<()>;

    /// Commit buffered state so a subsequent re-open observes it.
    fn flush(&mut self) -> Result<()>;

    /// Whether unwritten holes read back as zeros without consuming space.
    fn is_sparse(&self) -> bool;
}

impl ByteStore for Box<dyn ByteStore> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read_at(offset, buf)
    }
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        (**self).write_at(offset, data)
    }
    fn size(&self) -> Result<u64> {
        (**self).size()
    }
    fn resize(&mut self, new_size: u64) -> Result<()> {
        (**self).resize(new_size)
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
    fn is_sparse(&self) -> bool {
        (**self).is_sparse()
    }
}
