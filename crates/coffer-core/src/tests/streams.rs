use std::fs;
use std::path::Path;

use crate::error::CofferError;
use crate::limits::HEADER_SIZE;
use crate::store::{ByteStore, FileByteStore, MemoryByteStore};
use crate::stream::{AesGcmCryptStream, CryptStream, Header, HmacStream};
use crate::testutil::{exercise_stream, file_store, reopen_file_store, RefModel, XorBlockCrypt};
use crate::types::{FileId, SecretKey, TAG_SIZE};

const BLOCK_SIZE: usize = 4096;
const IV_SIZE: usize = 12;
const RECORD_SIZE: usize = IV_SIZE + TAG_SIZE;
const ENCRYPTED_HEADER_SIZE: usize = HEADER_SIZE + RECORD_SIZE;

fn test_key() -> SecretKey {
    SecretKey::from([0xFF; 32])
}

fn test_id() -> FileId {
    FileId([0xEE; 32])
}

fn create_gcm(dir: &Path) -> AesGcmCryptStream<FileByteStore, FileByteStore> {
    AesGcmCryptStream::open(
        file_store(dir, "data"),
        file_store(dir, "meta"),
        test_key(),
        test_key(),
        test_id(),
        true,
        BLOCK_SIZE,
        IV_SIZE,
    )
    .unwrap()
}

fn reopen_gcm(
    dir: &Path,
    check: bool,
) -> crate::error::Result<AesGcmCryptStream<FileByteStore, FileByteStore>> {
    AesGcmCryptStream::open(
        reopen_file_store(dir, "data"),
        reopen_file_store(dir, "meta"),
        test_key(),
        test_key(),
        test_id(),
        check,
        BLOCK_SIZE,
        IV_SIZE,
    )
}

#[test]
fn hmac_stream_matches_reference() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(dir.path(), "stream");
    let mut stream = HmacStream::open(test_key(), test_id(), store, true).unwrap();
    let mut model = RefModel::new();
    exercise_stream(&mut stream, &mut model, 5000);
}

#[test]
fn hmac_roundtrip_and_tamper() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stream");
    {
        let store = FileByteStore::create(&path).unwrap();
        let mut stream = HmacStream::open(test_key(), test_id(), store, true).unwrap();
        stream.write_at(0, b"hello").unwrap();
        stream.flush().unwrap();
    }
    {
        let store = FileByteStore::open(&path).unwrap();
        let mut stream = HmacStream::open(test_key(), test_id(), store, true).unwrap();
        assert_eq!(stream.size().unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(stream.read_at(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    // A bit flip in the payload breaks the next open.
    let mut raw = fs::read(&path).unwrap();
    raw[34] ^= 0x01;
    fs::write(&path, &raw).unwrap();
    let result = HmacStream::open(test_key(), test_id(), FileByteStore::open(&path).unwrap(), true);
    assert!(matches!(result, Err(CofferError::InvalidHmac(_))));

    // So does one in the stored tag.
    raw[34] ^= 0x01;
    raw[3] ^= 0x80;
    fs::write(&path, &raw).unwrap();
    let result = HmacStream::open(test_key(), test_id(), FileByteStore::open(&path).unwrap(), true);
    assert!(matches!(result, Err(CofferError::InvalidHmac(_))));
}

#[test]
fn dummy_cipher_matches_reference() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(dir.path(), "stream");
    let mut stream = CryptStream::new(store, XorBlockCrypt, 8000).unwrap();
    let mut model = RefModel::new();
    exercise_stream(&mut stream, &mut model, 5000);
}

#[test]
fn aes_gcm_matches_reference_with_header() {
    let dir = tempfile::tempdir().unwrap();
    let mut stream = create_gcm(dir.path());
    let mut model = RefModel::new();

    let header = [5u8; HEADER_SIZE - 1];
    stream.write_header(&header).unwrap();

    exercise_stream(&mut stream, &mut model, 1000);

    stream.flush_header().unwrap();
    let mut readback = [0u8; HEADER_SIZE - 1];
    assert!(stream.read_header(&mut readback).unwrap());
    assert_eq!(readback, header);

    exercise_stream(&mut stream, &mut model, 3000);
}

#[test]
fn sparse_write_leaves_zero_iv_records() {
    let dir = tempfile::tempdir().unwrap();
    let offset = 10 * BLOCK_SIZE as u64;
    {
        let mut stream = create_gcm(dir.path());
        stream.write_at(offset, &[0xAB]).unwrap();
        assert_eq!(stream.size().unwrap(), offset + 1);

        // The hole reads as zeros without touching AEAD.
        let mut buf = vec![0xFFu8; 10 * BLOCK_SIZE];
        assert_eq!(stream.read_at(0, &mut buf).unwrap(), 10 * BLOCK_SIZE);
        assert!(buf.iter().all(|&b| b == 0));

        let mut tail = [0u8; 4];
        assert_eq!(stream.read_at(offset, &mut tail).unwrap(), 1);
        assert_eq!(tail[0], 0xAB);

        stream.flush().unwrap();
    }

    let meta = fs::read(dir.path().join("meta")).unwrap();
    assert_eq!(meta.len(), 32 + ENCRYPTED_HEADER_SIZE + 11 * RECORD_SIZE);
    for block in 0..=10 {
        let iv_at = 32 + ENCRYPTED_HEADER_SIZE + block * RECORD_SIZE;
        let iv = &meta[iv_at..iv_at + IV_SIZE];
        if block < 10 {
            assert!(iv.iter().all(|&b| b == 0), "block {block} should be a hole");
        } else {
            assert!(iv.iter().any(|&b| b != 0), "block {block} should be live");
        }
    }
}

#[test]
fn data_tamper_fails_read_at_block_offset() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut stream = create_gcm(dir.path());
        stream.write_at(0, &vec![0x42u8; 2 * BLOCK_SIZE]).unwrap();
        stream.flush().unwrap();
    }

    let data_path = dir.path().join("data");
    let mut raw = fs::read(&data_path).unwrap();
    raw[100] ^= 0x01;
    fs::write(&data_path, &raw).unwrap();

    // The meta sidecar is untouched, so the open itself still verifies.
    let mut stream = reopen_gcm(dir.path(), true).unwrap();
    let mut buf = [0u8; 16];
    match stream.read_at(0, &mut buf) {
        Err(CofferError::MessageVerification { offset, .. }) => assert_eq!(offset, 0),
        other => panic!("expected MessageVerification, got {other:?}"),
    }

    // The second block is intact and still readable.
    let mut buf = vec![0u8; BLOCK_SIZE];
    let n = stream.read_at(BLOCK_SIZE as u64, &mut buf).unwrap();
    assert_eq!(n, BLOCK_SIZE);
    assert!(buf.iter().all(|&b| b == 0x42));
}

#[test]
fn meta_tamper_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut stream = create_gcm(dir.path());
        stream.write_at(0, b"payload").unwrap();
        stream.flush().unwrap();
    }

    let meta_path = dir.path().join("meta");
    let mut raw = fs::read(&meta_path).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0x01;
    fs::write(&meta_path, &raw).unwrap();

    assert!(matches!(
        reopen_gcm(dir.path(), true),
        Err(CofferError::InvalidHmac(_))
    ));
}

#[test]
fn recovery_mode_reads_through_tampering() {
    let dir = tempfile::tempdir().unwrap();
    let payload = vec![0x42u8; BLOCK_SIZE];
    {
        let mut stream = create_gcm(dir.path());
        stream.write_at(0, &payload).unwrap();
        stream.flush().unwrap();
    }

    let data_path = dir.path().join("data");
    let mut raw = fs::read(&data_path).unwrap();
    raw[0] ^= 0x01;
    fs::write(&data_path, &raw).unwrap();

    let mut stream = reopen_gcm(dir.path(), false).unwrap();
    let mut buf = vec![0u8; BLOCK_SIZE];
    assert_eq!(stream.read_at(0, &mut buf).unwrap(), BLOCK_SIZE);
    // The flipped ciphertext bit flips exactly one plaintext bit.
    assert_eq!(buf[0], 0x42 ^ 0x01);
    assert!(buf[1..].iter().all(|&b| b == 0x42));
}

#[test]
fn reopen_recovers_content_and_header() {
    let dir = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..3 * BLOCK_SIZE as u32 + 17).map(|i| i as u8).collect();
    {
        let mut stream = create_gcm(dir.path());
        stream.write_header(b"nlink=2").unwrap();
        stream.write_at(0, &payload).unwrap();
        stream.flush().unwrap();
    }

    let mut stream = reopen_gcm(dir.path(), true).unwrap();
    assert_eq!(stream.size().unwrap(), payload.len() as u64);
    let mut buf = vec![0u8; payload.len()];
    assert_eq!(stream.read_at(0, &mut buf).unwrap(), payload.len());
    assert_eq!(buf, payload);

    let mut header = [0u8; HEADER_SIZE];
    assert!(stream.read_header(&mut header).unwrap());
    assert_eq!(&header[..7], b"nlink=2");
    assert!(header[7..].iter().all(|&b| b == 0));
}

#[test]
fn drop_flushes_dirty_meta() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut stream = create_gcm(dir.path());
        stream.write_at(0, b"not flushed explicitly").unwrap();
        // dropped dirty
    }
    let mut stream = reopen_gcm(dir.path(), true).unwrap();
    let mut buf = [0u8; 22];
    assert_eq!(stream.read_at(0, &mut buf).unwrap(), 22);
    assert_eq!(&buf, b"not flushed explicitly");
}

#[test]
fn header_absent_on_data_only_stream() {
    let dir = tempfile::tempdir().unwrap();
    let mut stream = create_gcm(dir.path());
    stream.write_at(0, b"data before header").unwrap();
    let mut buf = [0u8; HEADER_SIZE];
    assert!(!stream.read_header(&mut buf).unwrap());
}

#[test]
fn truncate_then_extend_equals_never_written() {
    let dir = tempfile::tempdir().unwrap();
    let mut stream = create_gcm(dir.path());
    let full = 2 * BLOCK_SIZE as u64 + 2048;
    let cut = BLOCK_SIZE as u64 + 2048;

    stream.write_at(0, &vec![0xABu8; full as usize]).unwrap();
    stream.resize(cut).unwrap();
    stream.resize(full).unwrap();

    let mut buf = vec![0xFFu8; full as usize];
    assert_eq!(stream.read_at(0, &mut buf).unwrap(), full as usize);
    assert!(buf[..cut as usize].iter().all(|&b| b == 0xAB));
    assert!(buf[cut as usize..].iter().all(|&b| b == 0));
}

#[test]
fn meta_size_invariant_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    let mut stream = create_gcm(dir.path());
    for size in [0u64, 1, 4095, 4096, 4097, 40960, 100_000, 4096, 0] {
        stream.resize(size).unwrap();
        stream.flush().unwrap();
        let blocks = size.div_ceil(BLOCK_SIZE as u64);
        let expected = 32 + ENCRYPTED_HEADER_SIZE as u64 + blocks * RECORD_SIZE as u64;
        let actual = fs::metadata(dir.path().join("meta")).unwrap().len();
        assert_eq!(actual, expected, "meta size wrong at logical size {size}");
        assert_eq!(
            fs::metadata(dir.path().join("data")).unwrap().len(),
            size,
            "data size wrong at logical size {size}"
        );
    }
}

#[test]
fn memory_backed_streams_work_end_to_end() {
    let mut stream = AesGcmCryptStream::open(
        MemoryByteStore::new(),
        MemoryByteStore::new(),
        test_key(),
        test_key(),
        test_id(),
        true,
        BLOCK_SIZE,
        32,
    )
    .unwrap();
    let mut model = RefModel::new();
    exercise_stream(&mut stream, &mut model, 500);
}
