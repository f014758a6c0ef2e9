use std::fmt;

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a key in bytes (256-bit).
pub const KEY_SIZE: usize = 32;

/// Size of a stream identifier in bytes.
pub const ID_SIZE: usize = 32;

/// Size of an AES-GCM authentication tag.
pub const TAG_SIZE: usize = 16;

/// Opaque 32-byte label for a stream, chosen by the file table.
///
/// Bound as AEAD associated data on every block and as the leading input of
/// the meta-stream HMAC, so two streams with distinct ids are
/// cryptographically independent even under the same key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub [u8; ID_SIZE]);

impl FileId {
    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({self})")
    }
}

impl From<[u8; ID_SIZE]> for FileId {
    fn from(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }
}

/// A 256-bit secret. Zeroized on drop; never printed.
///
/// Used for the filesystem master key and for the per-file data and meta keys
/// the file table derives from it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    /// Generate a fresh key from OS entropy.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; KEY_SIZE]> for SecretKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}
