use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CofferError, Result};
use crate::limits::MAX_PASSPHRASE_BYTES;
use crate::types::KEY_SIZE;

/// Derive the key-encryption-key from a passphrase with PBKDF2-HMAC-SHA256.
///
/// The KEK only ever wraps the master key; it is returned in a zeroizing
/// buffer and must not outlive the unwrap call.
pub fn derive_kek(
    passphrase: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    if passphrase.len() > MAX_PASSPHRASE_BYTES {
        return Err(CofferError::InvalidArgument(format!(
            "passphrase longer than {MAX_PASSPHRASE_BYTES} bytes"
        )));
    }
    if iterations == 0 {
        return Err(CofferError::InvalidArgument(
            "PBKDF2 iteration count must be positive".into(),
        ));
    }
    let mut kek = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2_hmac::<Sha256>(passphrase, salt, iterations, &mut *kek);
    Ok(kek)
}
