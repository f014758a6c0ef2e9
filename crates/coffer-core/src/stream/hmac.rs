use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::error::{CofferError, Result};
use crate::store::ByteStore;
use crate::types::{FileId, SecretKey};

/// Size of the HMAC-SHA256 tag reserved at the front of the wrapped store.
pub const HMAC_SIZE: usize = 32;

const MAC_CHUNK_SIZE: usize = 4096;

type HmacSha256 = Hmac<Sha256>;

/// ByteStore wrapper that authenticates the whole stream.
///
/// The first 32 bytes of the wrapped store hold an HMAC-SHA256 tag over
/// `id || payload`; every operation is exposed at a view shifted past the
/// tag. Verification is whole-stream at open time, not per read; the tag is
/// recomputed on flush. The payload is small by construction (one IV/tag
/// record per data block), so re-reading it to recompute is acceptable.
pub struct HmacStream<S: ByteStore> {
    inner: S,
    key: SecretKey,
    id: FileId,
    dirty: bool,
}

impl<S: ByteStore> HmacStream<S> {
    /// Wrap `inner`, verifying its tag unless `check` is false (recovery
    /// mode). An empty store is a valid empty stream.
    pub fn open(key: SecretKey, id: FileId, inner: S, check: bool) -> Result<Self> {
        let mut stream = Self {
            inner,
            key,
            id,
            dirty: false,
        };
        if check {
            stream.verify()?;
        }
        Ok(stream)
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    fn verify(&mut self) -> Result<()> {
        if self.inner.size()? == 0 {
            return Ok(());
        }
        let mut stored = [0u8; HMAC_SIZE];
        let n = self.inner.read_at(0, &mut stored)?;
        if n != HMAC_SIZE {
            return Err(CofferError::InvalidFormat(
                "stream is shorter than its HMAC tag".into(),
            ));
        }
        self.payload_mac()?
            .verify_slice(&stored)
            .map_err(|_| CofferError::InvalidHmac(self.id))
    }

    /// HMAC state over `id || payload`, streamed in fixed-size chunks.
    fn payload_mac(&mut self) -> Result<HmacSha256> {
        let mut mac =
            HmacSha256::new_from_slice(self.key.as_bytes()).expect("HMAC accepts any key length");
        mac.update(self.id.as_bytes());
        let mut buf = [0u8; MAC_CHUNK_SIZE];
        let mut offset = HMAC_SIZE as u64;
        loop {
            let n = self.inner.read_at(offset, &mut buf)?;
            if n == 0 {
                break;
            }
            mac.update(&buf[..n]);
            offset += n as u64;
        }
        Ok(mac)
    }
}

impl<S: ByteStore> ByteStore for HmacStream<S> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.inner.read_at(offset + HMAC_SIZE as u64, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.write_at(offset + HMAC_SIZE as u64, data)?;
        self.dirty = true;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.inner.size()?.saturating_sub(HMAC_SIZE as u64))
    }

    fn resize(&mut self, new_size: u64) -> Result<()> {
        self.inner.resize(new_size + HMAC_SIZE as u64)?;
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let tag = self.payload_mac()?.finalize().into_bytes();
        self.inner.write_at(0, tag.as_slice())?;
        self.inner.flush()?;
        self.dirty = false;
        Ok(())
    }

    fn is_sparse(&self) -> bool {
        self.inner.is_sparse()
    }
}

impl<S: ByteStore> Drop for HmacStream<S> {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                warn!(stream = %self.id, "failed to flush HMAC stream on drop: {e}");
            }
        }
    }
}
