use tracing::warn;
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::{CofferError, Result};
use crate::limits::{self, HEADER_SIZE, MAX_BLOCK_NUMBER};
use crate::store::ByteStore;
use crate::stream::block::{BlockCrypt, CryptStream};
use crate::stream::hmac::HmacStream;
use crate::stream::Header;
use crate::types::{FileId, SecretKey, TAG_SIZE};

/// Per-block AES-256-GCM, with the IV and tag of every block kept as a
/// record in an HMAC-wrapped meta stream.
///
/// Meta layout (behind the HMAC view): the encrypted header region
/// (`HEADER_SIZE + iv_size + TAG_SIZE` bytes), then one `IV || tag` record
/// per data block. An all-zero IV marks a block that was never written and
/// whose plaintext is defined as all zeros; real IVs are resampled until
/// they are distinguishable from that marker.
struct GcmBlockCrypt<M: ByteStore> {
    meta: HmacStream<M>,
    key: SecretKey,
    id: FileId,
    block_size: usize,
    iv_size: usize,
    check: bool,
    record: Vec<u8>,
}

impl<M: ByteStore> GcmBlockCrypt<M> {
    fn record_size(&self) -> usize {
        self.iv_size + TAG_SIZE
    }

    fn encrypted_header_size(&self) -> usize {
        HEADER_SIZE + self.record_size()
    }

    /// Meta offset of the record for `block`; with `block` set to a block
    /// count, the exact meta size covering that many blocks.
    fn record_offset(&self, block: u64) -> u64 {
        self.encrypted_header_size() as u64 + block * self.record_size() as u64
    }

    fn check_block_number(&self, block: u64) -> Result<()> {
        if block > MAX_BLOCK_NUMBER {
            return Err(CofferError::StreamTooLong {
                max: MAX_BLOCK_NUMBER * self.block_size as u64,
                requested: block.saturating_mul(self.block_size as u64),
            });
        }
        Ok(())
    }
}

impl<M: ByteStore> BlockCrypt for GcmBlockCrypt<M> {
    fn encrypt_block(&mut self, block: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.check_block_number(block)?;
        // An all-zero IV is the sparse marker; resample until the IV cannot
        // be mistaken for one.
        loop {
            crypto::random_bytes(&mut self.record[..self.iv_size]);
            if !crypto::is_all_zeros(&self.record[..self.iv_size]) {
                break;
            }
        }
        let tag = crypto::gcm_seal(
            self.key.as_bytes(),
            &self.record[..self.iv_size],
            self.id.as_bytes(),
            buf,
        )?;
        self.record[self.iv_size..].copy_from_slice(&tag);
        let offset = self.record_offset(block);
        self.meta.write_at(offset, &self.record)
    }

    fn decrypt_block(&mut self, block: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.check_block_number(block)?;
        let offset = self.record_offset(block);
        let n = self.meta.read_at(offset, &mut self.record)?;
        if n != self.record_size() {
            return Err(CofferError::CorruptedMetaData {
                id: self.id,
                msg: "missing IV/tag record",
            });
        }
        if crypto::is_all_zeros(&self.record[..self.iv_size]) {
            buf.fill(0);
            return Ok(());
        }
        let tag: [u8; TAG_SIZE] = self.record[self.iv_size..]
            .try_into()
            .expect("record holds a 16-byte tag");
        let verified = crypto::gcm_open(
            self.key.as_bytes(),
            &self.record[..self.iv_size],
            self.id.as_bytes(),
            buf,
            &tag,
        )?;
        if !verified {
            if self.check {
                return Err(CofferError::MessageVerification {
                    id: self.id,
                    offset: block * self.block_size as u64,
                });
            }
            warn!(stream = %self.id, block, "accepting unverifiable block in recovery mode");
            crypto::gcm_keystream(self.key.as_bytes(), &self.record[..self.iv_size], buf)?;
        }
        Ok(())
    }

    fn is_sparse(&self) -> bool {
        self.meta.is_sparse()
    }
}

/// The per-file stream handle: an AES-256-GCM [`CryptStream`] over a data
/// store, its IV/tag records and encrypted header living in an
/// [`HmacStream`]-wrapped meta store.
///
/// The file table opens one of these per file and does all user I/O through
/// the [`ByteStore`] and [`Header`] implementations.
pub struct AesGcmCryptStream<S: ByteStore, M: ByteStore> {
    inner: CryptStream<S, GcmBlockCrypt<M>>,
}

impl<S: ByteStore, M: ByteStore> AesGcmCryptStream<S, M> {
    /// Open (or create, when both stores are empty) a stream.
    ///
    /// `check = false` skips the meta HMAC verification and accepts blocks
    /// that fail authentication; repair tooling only.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        data: S,
        meta: M,
        data_key: SecretKey,
        meta_key: SecretKey,
        id: FileId,
        check: bool,
        block_size: usize,
        iv_size: usize,
    ) -> Result<Self> {
        if !limits::valid_iv_size(iv_size) {
            return Err(CofferError::InvalidArgument(format!(
                "IV size {iv_size} out of range [{}, {}]",
                limits::MIN_IV_SIZE,
                limits::MAX_IV_SIZE
            )));
        }
        let meta = HmacStream::open(meta_key, id, meta, check)?;
        let cipher = GcmBlockCrypt {
            meta,
            key: data_key,
            id,
            block_size,
            iv_size,
            check,
            record: vec![0u8; iv_size + TAG_SIZE],
        };
        Ok(Self {
            inner: CryptStream::new(data, cipher, block_size)?,
        })
    }

    pub fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    pub fn id(&self) -> FileId {
        self.inner.cipher().id
    }
}

impl<S: ByteStore, M: ByteStore> ByteStore for AesGcmCryptStream<S, M> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.write_at(offset, data)
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }

    fn resize(&mut self, new_size: u64) -> Result<()> {
        self.inner.resize(new_size)?;
        let blocks = new_size.div_ceil(self.inner.block_size() as u64);
        let cipher = self.inner.cipher_mut();
        let meta_size = cipher.record_offset(blocks);
        cipher.meta.resize(meta_size)
    }

    fn flush(&mut self) -> Result<()> {
        // Data first: the meta flush finalizes the HMAC, which must never
        // authenticate a data state newer than what is durable.
        self.inner.flush()?;
        self.inner.cipher_mut().meta.flush()
    }

    fn is_sparse(&self) -> bool {
        self.inner.is_sparse()
    }
}

impl<S: ByteStore, M: ByteStore> Header for AesGcmCryptStream<S, M> {
    fn max_header_len(&self) -> usize {
        HEADER_SIZE
    }

    fn read_header(&mut self, out: &mut [u8]) -> Result<bool> {
        if out.len() > HEADER_SIZE {
            return Err(CofferError::InvalidArgument(format!(
                "header read of {} bytes exceeds capacity {HEADER_SIZE}",
                out.len()
            )));
        }
        let cipher = self.inner.cipher_mut();
        let encrypted_size = cipher.encrypted_header_size();
        let mut buf = Zeroizing::new(vec![0u8; encrypted_size]);
        let n = cipher.meta.read_at(0, &mut buf)?;
        if n == 0 {
            return Ok(false);
        }
        if n != encrypted_size {
            return Err(CofferError::CorruptedMetaData {
                id: cipher.id,
                msg: "header region truncated",
            });
        }
        let (iv, rest) = buf.split_at_mut(cipher.iv_size);
        // A zero IV marks a header slot that exists (data was written first)
        // but was never itself written.
        if crypto::is_all_zeros(iv) {
            return Ok(false);
        }
        let (tag, plaintext) = rest.split_at_mut(TAG_SIZE);
        let tag: [u8; TAG_SIZE] = (&*tag).try_into().expect("header tag is 16 bytes");
        let verified =
            crypto::gcm_open(cipher.key.as_bytes(), iv, cipher.id.as_bytes(), plaintext, &tag)?;
        if !verified {
            if cipher.check {
                return Err(CofferError::MessageVerification {
                    id: cipher.id,
                    offset: 0,
                });
            }
            warn!(stream = %cipher.id, "accepting unverifiable header in recovery mode");
            crypto::gcm_keystream(cipher.key.as_bytes(), iv, plaintext)?;
        }
        let len = out.len();
        out.copy_from_slice(&plaintext[..len]);
        Ok(true)
    }

    fn write_header(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > HEADER_SIZE {
            return Err(CofferError::InvalidArgument(format!(
                "header write of {} bytes exceeds capacity {HEADER_SIZE}",
                data.len()
            )));
        }
        let cipher = self.inner.cipher_mut();
        let mut buf = Zeroizing::new(vec![0u8; cipher.encrypted_header_size()]);
        let (iv, rest) = buf.split_at_mut(cipher.iv_size);
        loop {
            crypto::random_bytes(iv);
            if !crypto::is_all_zeros(iv) {
                break;
            }
        }
        let (tag_slot, plaintext) = rest.split_at_mut(TAG_SIZE);
        // Shorter payloads are zero-padded to the full region.
        plaintext[..data.len()].copy_from_slice(data);
        let tag = crypto::gcm_seal(cipher.key.as_bytes(), iv, cipher.id.as_bytes(), plaintext)?;
        tag_slot.copy_from_slice(&tag);
        cipher.meta.write_at(0, &buf)
    }

    fn flush_header(&mut self) -> Result<()> {
        // The header lives entirely in the meta stream.
        self.inner.cipher_mut().meta.flush()
    }
}
