//! The passphrase-locked filesystem configuration.
//!
//! A JSON record at the root of the underlying directory holds the PBKDF2
//! parameters and the AES-GCM-wrapped master key, plus (format v2) the block
//! and IV geometry of the stream layer. Unlocking it is the only way from a
//! passphrase to a usable filesystem.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{self, kdf};
use crate::error::{CofferError, Result};
use crate::limits;
use crate::types::{SecretKey, KEY_SIZE, TAG_SIZE};

/// Config filename at the root of the underlying directory.
pub const CONFIG_FILE_NAME: &str = ".securefs.json";

/// Scratch filename used while rotating the password; atomically renamed
/// over the config on success.
pub const CONFIG_TMP_FILE_NAME: &str = ".securefs.json.tmp";

/// PBKDF2 round count used when the caller passes 0.
pub const DEFAULT_ITERATIONS: u32 = 400_000;

/// IV length of the config AEAD (fixed for every format version).
const CONFIG_IV_SIZE: usize = 32;

/// AAD of the config AEAD. Literally `version=1` for every format version:
/// version-2 configs were sealed under the same string historically, and
/// changing it would lock out every existing filesystem. Do not vary.
const VERSION_AAD: &[u8] = b"version=1";

const V1_BLOCK_SIZE: usize = 4096;
const V1_IV_SIZE: usize = 32;

#[derive(Serialize, Deserialize)]
struct EncryptedKeyRecord {
    #[serde(rename = "IV")]
    iv: String,
    #[serde(rename = "MAC")]
    mac: String,
    key: String,
}

#[derive(Serialize, Deserialize)]
struct ConfigRecord {
    version: u32,
    iterations: u32,
    salt: String,
    encrypted_key: EncryptedKeyRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    block_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iv_size: Option<u32>,
}

/// Parameters for creating a new filesystem config.
#[derive(Debug, Clone)]
pub struct CreateOpts {
    /// Format version, 1 or 2.
    pub version: u32,
    /// PBKDF2 rounds; 0 selects [`DEFAULT_ITERATIONS`].
    pub iterations: u32,
    /// Stream block size; persisted by v2, fixed at 4096 for v1.
    pub block_size: usize,
    /// Per-block IV size; persisted by v2, fixed at 32 for v1.
    pub iv_size: usize,
}

impl Default for CreateOpts {
    fn default() -> Self {
        Self {
            version: 2,
            iterations: 0,
            block_size: V1_BLOCK_SIZE,
            iv_size: 12,
        }
    }
}

/// A successfully unlocked config: the master key plus the stream geometry
/// every per-file stream must be opened with.
pub struct UnlockedConfig {
    pub version: u32,
    pub master_key: SecretKey,
    pub block_size: usize,
    pub iv_size: usize,
}

fn validate_geometry(block_size: usize, iv_size: usize) -> Result<()> {
    if !limits::valid_block_size(block_size) {
        return Err(CofferError::InvalidArgument(format!(
            "block size {block_size} is not a power of two in [{}, {}]",
            limits::MIN_BLOCK_SIZE,
            limits::MAX_BLOCK_SIZE
        )));
    }
    if !limits::valid_iv_size(iv_size) {
        return Err(CofferError::InvalidArgument(format!(
            "IV size {iv_size} out of range [{}, {}]",
            limits::MIN_IV_SIZE,
            limits::MAX_IV_SIZE
        )));
    }
    Ok(())
}

fn decode_hex_exact<const N: usize>(field: &str, value: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value)
        .map_err(|_| CofferError::InvalidFormat(format!("config field '{field}' is not hex")))?;
    bytes.try_into().map_err(|_| {
        CofferError::InvalidFormat(format!("config field '{field}' has the wrong length"))
    })
}

/// Produce the JSON text of a fresh config wrapping `master_key`.
pub fn generate_config(
    master_key: &SecretKey,
    passphrase: &[u8],
    opts: &CreateOpts,
) -> Result<String> {
    if opts.version != 1 && opts.version != 2 {
        return Err(CofferError::InvalidArgument(format!(
            "unsupported config version {}",
            opts.version
        )));
    }
    if opts.version == 2 {
        validate_geometry(opts.block_size, opts.iv_size)?;
    }
    let iterations = if opts.iterations == 0 {
        DEFAULT_ITERATIONS
    } else {
        opts.iterations
    };

    let salt = crypto::random_key_bytes();
    let kek = kdf::derive_kek(passphrase, &salt, iterations)?;

    let mut iv = [0u8; CONFIG_IV_SIZE];
    crypto::random_bytes(&mut iv);

    let mut wrapped = Zeroizing::new(*master_key.as_bytes());
    let mac = crypto::gcm_seal(&kek, &iv, VERSION_AAD, &mut *wrapped)?;

    let record = ConfigRecord {
        version: opts.version,
        iterations,
        salt: hex::encode(salt),
        encrypted_key: EncryptedKeyRecord {
            iv: hex::encode(iv),
            mac: hex::encode(mac),
            key: hex::encode(&*wrapped),
        },
        block_size: (opts.version == 2).then_some(opts.block_size as u32),
        iv_size: (opts.version == 2).then_some(opts.iv_size as u32),
    };
    Ok(serde_json::to_string_pretty(&record)?)
}

/// Unlock a config from its JSON text.
///
/// A mismatching AEAD tag means the passphrase is wrong (or the file was
/// tampered with); both surface as [`CofferError::WrongPassword`].
pub fn parse_config(text: &str, passphrase: &[u8]) -> Result<UnlockedConfig> {
    let record: ConfigRecord = serde_json::from_str(text)?;

    let (block_size, iv_size) = match record.version {
        1 => (V1_BLOCK_SIZE, V1_IV_SIZE),
        2 => {
            let block_size = record.block_size.ok_or_else(|| {
                CofferError::InvalidFormat("version 2 config is missing 'block_size'".into())
            })? as usize;
            let iv_size = record.iv_size.ok_or_else(|| {
                CofferError::InvalidFormat("version 2 config is missing 'iv_size'".into())
            })? as usize;
            validate_geometry(block_size, iv_size)?;
            (block_size, iv_size)
        }
        other => {
            return Err(CofferError::InvalidArgument(format!(
                "unsupported config version {other}"
            )))
        }
    };

    let salt: [u8; KEY_SIZE] = decode_hex_exact("salt", &record.salt)?;
    let iv: [u8; CONFIG_IV_SIZE] = decode_hex_exact("encrypted_key.IV", &record.encrypted_key.iv)?;
    let mac: [u8; TAG_SIZE] = decode_hex_exact("encrypted_key.MAC", &record.encrypted_key.mac)?;
    let mut wrapped: Zeroizing<[u8; KEY_SIZE]> =
        Zeroizing::new(decode_hex_exact("encrypted_key.key", &record.encrypted_key.key)?);

    let kek = kdf::derive_kek(passphrase, &salt, record.iterations)?;
    if !crypto::gcm_open(&kek, &iv, VERSION_AAD, &mut *wrapped, &mac)? {
        return Err(CofferError::WrongPassword);
    }

    debug!(
        version = record.version,
        iterations = record.iterations,
        block_size,
        iv_size,
        "unlocked filesystem config"
    );
    Ok(UnlockedConfig {
        version: record.version,
        master_key: SecretKey::from(*wrapped),
        block_size,
        iv_size,
    })
}

pub fn config_path(base: &Path) -> PathBuf {
    base.join(CONFIG_FILE_NAME)
}

/// Create the config file for a new filesystem rooted at `base`.
/// Fails if one already exists.
pub fn create_config_file(
    base: &Path,
    master_key: &SecretKey,
    passphrase: &[u8],
    opts: &CreateOpts,
) -> Result<()> {
    let text = generate_config(master_key, passphrase, opts)?;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(config_path(base))?;
    file.write_all(text.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Read and unlock the config file of the filesystem rooted at `base`.
pub fn load_config_file(base: &Path, passphrase: &[u8]) -> Result<UnlockedConfig> {
    let text = fs::read_to_string(config_path(base))?;
    if text.is_empty() {
        return Err(CofferError::InvalidFormat("config file is empty".into()));
    }
    parse_config(&text, passphrase)
}

/// Re-wrap the master key under a new passphrase.
///
/// The version, iteration count, and stream geometry are preserved; the salt
/// and IV are freshly sampled. The new config is written to the temp
/// filename, synced, and renamed over the old one, so a crash leaves either
/// the old or the new config intact.
pub fn rotate_password(base: &Path, old_passphrase: &[u8], new_passphrase: &[u8]) -> Result<()> {
    let text = fs::read_to_string(config_path(base))?;
    let record: ConfigRecord = serde_json::from_str(&text)?;
    let unlocked = parse_config(&text, old_passphrase)?;

    let opts = CreateOpts {
        version: unlocked.version,
        iterations: record.iterations,
        block_size: unlocked.block_size,
        iv_size: unlocked.iv_size,
    };
    let new_text = generate_config(&unlocked.master_key, new_passphrase, &opts)?;

    let tmp_path = base.join(CONFIG_TMP_FILE_NAME);
    {
        // Truncate any leftover temp file from an interrupted rotation.
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(new_text.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, config_path(base))?;
    info!("rotated config password");
    Ok(())
}
