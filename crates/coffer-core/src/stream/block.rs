use std::mem;

use zeroize::Zeroizing;

use crate::error::{CofferError, Result};
use crate::store::ByteStore;

/// Per-block transform seam of a [`CryptStream`].
///
/// Both directions are in-place and length-preserving; any per-block side
/// state (IVs, tags) is the implementation's business.
pub trait BlockCrypt: Send {
    /// Encrypt one block in place. `buf.len()` never exceeds the stream's
    /// block size.
    fn encrypt_block(&mut self, block: u64, buf: &mut [u8]) -> Result<()>;

    /// Decrypt one block in place.
    fn decrypt_block(&mut self, block: u64, buf: &mut [u8]) -> Result<()>;

    /// Whether the per-block side state can represent holes, so that resize
    /// extension may skip whole untouched blocks.
    fn is_sparse(&self) -> bool {
        true
    }
}

/// Random-access encrypted stream over a [`ByteStore`], one fixed-size block
/// at a time.
///
/// This is the block-walk engine shared by every cipher: it splits the
/// logical stream into blocks of `block_size` bytes, hands whole blocks to
/// the [`BlockCrypt`], and handles partial-block read-modify-write, zero
/// filling, and sparse-aware resizing. Block `k` of ciphertext lives at byte
/// `k * block_size` of the underlying store, so logical and physical sizes
/// coincide.
pub struct CryptStream<S, C> {
    store: S,
    cipher: C,
    block_size: usize,
    // Reusable per-handle buffers; the read/write path is hot and must not
    // allocate. `scratch` holds plaintext and is zeroized on drop.
    scratch: Zeroizing<Vec<u8>>,
    write_buf: Zeroizing<Vec<u8>>,
}

impl<S: ByteStore, C: BlockCrypt> CryptStream<S, C> {
    pub fn new(store: S, cipher: C, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(CofferError::InvalidArgument(
                "block size must be positive".into(),
            ));
        }
        Ok(Self {
            store,
            cipher,
            block_size,
            scratch: Zeroizing::new(vec![0u8; block_size]),
            write_buf: Zeroizing::new(vec![0u8; block_size]),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn cipher(&self) -> &C {
        &self.cipher
    }

    pub fn cipher_mut(&mut self) -> &mut C {
        &mut self.cipher
    }

    /// Read one full block of ciphertext into `out` and decrypt it in place.
    /// Returns the block's actual length (short only for the final block).
    fn read_block(&mut self, block: u64, out: &mut [u8]) -> Result<usize> {
        debug_assert_eq!(out.len(), self.block_size);
        let n = self
            .store
            .read_at(block * self.block_size as u64, out)?;
        if n == 0 {
            return Ok(0);
        }
        self.cipher.decrypt_block(block, &mut out[..n])?;
        Ok(n)
    }

    /// Read bytes `[begin, end)` of a block into `out`. Returns the number
    /// of bytes produced, which is short when the block ends before `end`.
    fn read_block_range(
        &mut self,
        block: u64,
        out: &mut [u8],
        begin: usize,
        end: usize,
    ) -> Result<usize> {
        debug_assert!(begin <= self.block_size && end <= self.block_size);
        if begin == 0 && end == self.block_size {
            return self.read_block(block, out);
        }
        if begin >= end {
            return Ok(0);
        }
        let mut scratch = mem::replace(&mut self.scratch, Zeroizing::new(Vec::new()));
        let outcome = self.read_block(block, &mut scratch).map(|n| {
            if n <= begin {
                0
            } else {
                let end = end.min(n);
                out[..end - begin].copy_from_slice(&scratch[begin..end]);
                end - begin
            }
        });
        self.scratch = scratch;
        outcome
    }

    /// Encrypt `data` as block `block` and write it out.
    fn write_block(&mut self, block: u64, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= self.block_size);
        let len = data.len();
        self.write_buf[..len].copy_from_slice(data);
        self.cipher
            .encrypt_block(block, &mut self.write_buf[..len])?;
        self.store
            .write_at(block * self.block_size as u64, &self.write_buf[..len])
    }

    /// Overwrite bytes `[begin, end)` of a block with `data`, preserving the
    /// rest of the block. Bytes past `end` that existed in a previously
    /// partial final block survive the rewrite.
    fn read_then_write_block(
        &mut self,
        block: u64,
        data: &[u8],
        begin: usize,
        end: usize,
    ) -> Result<()> {
        debug_assert!(begin <= self.block_size && end <= self.block_size);
        if begin == 0 && end == self.block_size {
            return self.write_block(block, data);
        }
        if begin >= end {
            return Ok(());
        }
        let mut scratch = mem::replace(&mut self.scratch, Zeroizing::new(Vec::new()));
        let outcome = self.splice_block(block, data, begin, end, &mut scratch);
        self.scratch = scratch;
        outcome
    }

    fn splice_block(
        &mut self,
        block: u64,
        data: &[u8],
        begin: usize,
        end: usize,
        scratch: &mut [u8],
    ) -> Result<()> {
        scratch.fill(0);
        let n = self.read_block(block, scratch)?;
        scratch[begin..end].copy_from_slice(data);
        self.write_block(block, &scratch[..n.max(end)])
    }

    /// Write zeros over `[offset, finish)` through the block cipher, so that
    /// whole zero blocks are eligible for sparse treatment downstream.
    fn zero_fill(&mut self, mut offset: u64, finish: u64) -> Result<()> {
        let bs = self.block_size as u64;
        let zeros = vec![0u8; self.block_size];
        while offset < finish {
            let block = offset / bs;
            let start = block * bs;
            let begin = (offset - start) as usize;
            let end = bs.min(finish - start) as usize;
            self.read_then_write_block(block, &zeros[begin..end], begin, end)?;
            offset += (end - begin) as u64;
        }
        Ok(())
    }

    fn unchecked_write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let bs = self.block_size as u64;
        let mut done = 0usize;
        while done < data.len() {
            let pos = offset + done as u64;
            let block = pos / bs;
            let begin = (pos - block * bs) as usize;
            let end = self.block_size.min(begin + data.len() - done);
            self.read_then_write_block(block, &data[done..done + (end - begin)], begin, end)?;
            done += end - begin;
        }
        Ok(())
    }

    fn reencrypt_truncated_tail(&mut self, block: u64, keep: usize) -> Result<()> {
        let mut scratch = mem::replace(&mut self.scratch, Zeroizing::new(Vec::new()));
        let outcome = (|| {
            scratch.fill(0);
            self.read_block(block, &mut scratch)?;
            self.write_block(block, &scratch[..keep])
        })();
        self.scratch = scratch;
        outcome
    }
}

impl<S: ByteStore, C: BlockCrypt> ByteStore for CryptStream<S, C> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let bs = self.block_size as u64;
        let mut total = 0usize;
        while total < buf.len() {
            let pos = offset + total as u64;
            let block = pos / bs;
            let begin = (pos - block * bs) as usize;
            let end = self.block_size.min(begin + buf.len() - total);
            let want = end - begin;
            let n = self.read_block_range(block, &mut buf[total..total + want], begin, end)?;
            total += n;
            if n < want {
                break;
            }
        }
        Ok(total)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if offset > self.size()? {
            self.resize(offset)?;
        }
        self.unchecked_write_at(offset, data)
    }

    fn size(&self) -> Result<u64> {
        self.store.size()
    }

    fn resize(&mut self, new_size: u64) -> Result<()> {
        let bs = self.block_size as u64;
        let current = self.size()?;
        if new_size == current {
            return Ok(());
        }
        if new_size < current {
            // Re-encrypt the surviving prefix of the final block so its tag
            // covers the shorter plaintext.
            let keep = (new_size % bs) as usize;
            if keep > 0 {
                self.reencrypt_truncated_tail(new_size / bs, keep)?;
            }
        } else {
            let old_last = current / bs;
            let new_last = new_size / bs;
            if !self.is_sparse() || old_last == new_last {
                self.zero_fill(current, new_size)?;
            } else {
                // Fill out the partial old tail (nothing when `current` is
                // block-aligned) and the partial new tail; whole blocks in
                // between stay unwritten and read back as holes.
                self.zero_fill(current, current.div_ceil(bs) * bs)?;
                self.zero_fill(new_last * bs, new_size)?;
            }
        }
        self.store.resize(new_size)
    }

    fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    fn is_sparse(&self) -> bool {
        self.store.is_sparse() && self.cipher.is_sparse()
    }
}
