//! AES-256-GCM primitives with a runtime-selected nonce length, plus the
//! random sampling helpers shared by the stream and config layers.
//!
//! Version-2 filesystems persist their per-block IV size, so the nonce length
//! is data, not a compile-time constant. RustCrypto fixes the nonce length in
//! the type system and derives non-96-bit nonces through GHASH exactly as the
//! GCM spec requires, so every accepted length gets its own instantiation
//! behind a dispatch table.

pub mod kdf;

use aes_gcm::aead::consts::*;
use aes_gcm::aead::generic_array::{ArrayLength, GenericArray};
use aes_gcm::aead::AeadInPlace;
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, KeyInit};
use rand::RngCore;

use crate::error::{CofferError, Result};
use crate::types::{KEY_SIZE, TAG_SIZE};

/// Instantiate `f::<N>` for the nonce length carried in `$len`.
macro_rules! dispatch_iv_len {
    ($len:expr, $f:ident($($arg:expr),* $(,)?)) => {
        match $len {
            12 => $f::<U12>($($arg),*),
            13 => $f::<U13>($($arg),*),
            14 => $f::<U14>($($arg),*),
            15 => $f::<U15>($($arg),*),
            16 => $f::<U16>($($arg),*),
            17 => $f::<U17>($($arg),*),
            18 => $f::<U18>($($arg),*),
            19 => $f::<U19>($($arg),*),
            20 => $f::<U20>($($arg),*),
            21 => $f::<U21>($($arg),*),
            22 => $f::<U22>($($arg),*),
            23 => $f::<U23>($($arg),*),
            24 => $f::<U24>($($arg),*),
            25 => $f::<U25>($($arg),*),
            26 => $f::<U26>($($arg),*),
            27 => $f::<U27>($($arg),*),
            28 => $f::<U28>($($arg),*),
            29 => $f::<U29>($($arg),*),
            30 => $f::<U30>($($arg),*),
            31 => $f::<U31>($($arg),*),
            32 => $f::<U32>($($arg),*),
            33 => $f::<U33>($($arg),*),
            34 => $f::<U34>($($arg),*),
            35 => $f::<U35>($($arg),*),
            36 => $f::<U36>($($arg),*),
            37 => $f::<U37>($($arg),*),
            38 => $f::<U38>($($arg),*),
            39 => $f::<U39>($($arg),*),
            40 => $f::<U40>($($arg),*),
            41 => $f::<U41>($($arg),*),
            42 => $f::<U42>($($arg),*),
            43 => $f::<U43>($($arg),*),
            44 => $f::<U44>($($arg),*),
            45 => $f::<U45>($($arg),*),
            46 => $f::<U46>($($arg),*),
            47 => $f::<U47>($($arg),*),
            48 => $f::<U48>($($arg),*),
            49 => $f::<U49>($($arg),*),
            50 => $f::<U50>($($arg),*),
            51 => $f::<U51>($($arg),*),
            52 => $f::<U52>($($arg),*),
            53 => $f::<U53>($($arg),*),
            54 => $f::<U54>($($arg),*),
            55 => $f::<U55>($($arg),*),
            56 => $f::<U56>($($arg),*),
            57 => $f::<U57>($($arg),*),
            58 => $f::<U58>($($arg),*),
            59 => $f::<U59>($($arg),*),
            60 => $f::<U60>($($arg),*),
            61 => $f::<U61>($($arg),*),
            62 => $f::<U62>($($arg),*),
            63 => $f::<U63>($($arg),*),
            64 => $f::<U64>($($arg),*),
            n => Err(CofferError::InvalidArgument(format!(
                "unsupported IV length {n}"
            ))),
        }
    };
}

fn seal_sized<N: ArrayLength<u8>>(
    key: &[u8; KEY_SIZE],
    iv: &[u8],
    aad: &[u8],
    buf: &mut [u8],
) -> Result<[u8; TAG_SIZE]> {
    debug_assert_eq!(iv.len(), N::USIZE);
    let cipher = AesGcm::<Aes256, N>::new(Key::<AesGcm<Aes256, N>>::from_slice(key));
    let nonce = GenericArray::<u8, N>::from_slice(iv);
    let tag = cipher
        .encrypt_in_place_detached(nonce, aad, buf)
        .map_err(|_| CofferError::InvalidArgument("AES-GCM encryption failed".into()))?;
    Ok(tag.into())
}

fn open_sized<N: ArrayLength<u8>>(
    key: &[u8; KEY_SIZE],
    iv: &[u8],
    aad: &[u8],
    buf: &mut [u8],
    tag: &[u8; TAG_SIZE],
) -> Result<bool> {
    debug_assert_eq!(iv.len(), N::USIZE);
    let cipher = AesGcm::<Aes256, N>::new(Key::<AesGcm<Aes256, N>>::from_slice(key));
    let nonce = GenericArray::<u8, N>::from_slice(iv);
    Ok(cipher
        .decrypt_in_place_detached(nonce, aad, buf, GenericArray::from_slice(tag))
        .is_ok())
}

/// Encrypt `buf` in place; returns the 16-byte authentication tag.
pub fn gcm_seal(
    key: &[u8; KEY_SIZE],
    iv: &[u8],
    aad: &[u8],
    buf: &mut [u8],
) -> Result<[u8; TAG_SIZE]> {
    dispatch_iv_len!(iv.len(), seal_sized(key, iv, aad, buf))
}

/// Decrypt `buf` in place, verifying `tag`.
///
/// Returns `Ok(false)` on tag mismatch, in which case `buf` still holds the
/// ciphertext.
pub fn gcm_open(
    key: &[u8; KEY_SIZE],
    iv: &[u8],
    aad: &[u8],
    buf: &mut [u8],
    tag: &[u8; TAG_SIZE],
) -> Result<bool> {
    dispatch_iv_len!(iv.len(), open_sized(key, iv, aad, buf, tag))
}

/// Apply the raw GCM keystream to `buf`, bypassing authentication.
///
/// GCM encryption and decryption are the same CTR XOR, so this turns
/// unverifiable ciphertext back into (unauthenticated) plaintext. Recovery
/// paths only.
pub fn gcm_keystream(key: &[u8; KEY_SIZE], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    dispatch_iv_len!(iv.len(), seal_sized(key, iv, b"", buf)).map(|_tag| ())
}

/// Fill `buf` from the thread-local CSPRNG. Per-block IVs and similar
/// short-lived values; long-lived secrets come from `SecretKey::generate`
/// and `random_key_bytes`.
pub fn random_bytes(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
}

/// Sample a 32-byte value directly from OS entropy.
pub fn random_key_bytes() -> [u8; KEY_SIZE] {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

pub fn is_all_zeros(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}
