//! Core storage stack for cofferfs: authenticated, random-access encrypted
//! byte streams layered over plain files, and the passphrase-locked
//! configuration that wraps the filesystem master key.
//!
//! Layering, bottom up:
//!
//! 1. [`store::ByteStore`] — a resizable, randomly addressable byte sequence.
//! 2. [`stream::HmacStream`] — a ByteStore wrapper holding a whole-stream
//!    HMAC-SHA256 tag, verified at open time.
//! 3. [`stream::CryptStream`] — the block-walk engine turning a per-block
//!    cipher into a random-access encrypted stream.
//! 4. [`stream::AesGcmCryptStream`] — AES-256-GCM per block, with IV/tag
//!    records and an encrypted header region kept in an HMAC-wrapped meta
//!    sidecar.
//! 5. [`config`] — the on-disk JSON record binding a passphrase to the
//!    master key via PBKDF2 and AES-GCM.
//!
//! The FUSE adapter and the file table live in sibling crates; they hand this
//! crate two byte stores, the keys, and a [`types::FileId`] per file, and do
//! all their I/O through the returned stream handle.

pub mod config;
pub mod crypto;
pub mod error;
pub mod limits;
pub mod store;
pub mod stream;
pub mod types;

pub use error::{CofferError, Result};
pub use types::{FileId, SecretKey};

#[cfg(test)]
mod testutil;

#[cfg(test)]
mod tests;
