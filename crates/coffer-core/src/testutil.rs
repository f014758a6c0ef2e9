use std::path::Path;

use rand::Rng;

use crate::error::Result;
use crate::store::{ByteStore, FileByteStore};

/// Obviously-correct in-memory mirror of the ByteStore contract, used as the
/// reference side of equivalence tests.
#[derive(Default)]
pub struct RefModel {
    data: Vec<u8>,
}

impl RefModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return 0;
        }
        let n = buf.len().min(self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let end = offset as usize + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset as usize..end].copy_from_slice(data);
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn resize(&mut self, new_size: u64) {
        self.data.resize(new_size as usize, 0);
    }
}

/// Horribly insecure per-block cipher: XOR with the low byte of the block
/// number. Exercises the block-walk machinery without any crypto.
pub struct XorBlockCrypt;

impl crate::stream::BlockCrypt for XorBlockCrypt {
    fn encrypt_block(&mut self, block: u64, buf: &mut [u8]) -> Result<()> {
        let k = block as u8;
        for b in buf.iter_mut() {
            *b ^= k;
        }
        Ok(())
    }

    fn decrypt_block(&mut self, block: u64, buf: &mut [u8]) -> Result<()> {
        self.encrypt_block(block, buf)
    }
}

/// Drive `stream` and `model` through `ops` random operations, checking that
/// every read and size query agrees.
pub fn exercise_stream<S: ByteStore>(stream: &mut S, model: &mut RefModel, ops: usize) {
    let mut rng = rand::thread_rng();
    let data: Vec<u8> = (0..4096 * 5).map(|_| rng.gen()).collect();
    let mut buf = vec![0u8; data.len()];
    let mut model_buf = vec![0u8; data.len()];

    for _ in 0..ops {
        let a = rng.gen_range(0..=7 * 4096 + 1) as u64;
        let b = rng.gen_range(0..=7 * 4096 + 1usize);
        match rng.gen_range(0..5) {
            0 => {
                // A zero-length write past the end would grow an encrypted
                // stream (it resizes first) but not a plain file; keep the
                // two sides comparable.
                let len = b.min(data.len()).max(1);
                stream.write_at(a, &data[..len]).unwrap();
                model.write_at(a, &data[..len]);
            }
            1 => {
                let len = b.min(buf.len());
                let n = stream.read_at(a, &mut buf[..len]).unwrap();
                let m = model.read_at(a, &mut model_buf[..len]);
                assert_eq!(n, m, "read length diverged at offset {a}");
                assert_eq!(&buf[..n], &model_buf[..m], "read bytes diverged at offset {a}");
            }
            2 => {
                assert_eq!(stream.size().unwrap(), model.size());
            }
            3 => {
                stream.resize(a).unwrap();
                model.resize(a);
            }
            _ => {
                stream.flush().unwrap();
            }
        }
    }
}

/// Create a fresh file-backed store named `name` under `dir`.
pub fn file_store(dir: &Path, name: &str) -> FileByteStore {
    FileByteStore::create(&dir.join(name)).unwrap()
}

/// Reopen a file-backed store previously created with [`file_store`].
pub fn reopen_file_store(dir: &Path, name: &str) -> FileByteStore {
    FileByteStore::open(&dir.join(name)).unwrap()
}
