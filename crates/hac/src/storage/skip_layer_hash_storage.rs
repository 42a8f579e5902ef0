use crate::storage::{ReadableStorage, Storage, StorageError};

/// Splits reads at a fixed byte boundary between two storages of identical size: bytes
/// before the boundary come from `raw` unchanged, bytes at or after it come from
/// `decrypted`. Models the `AesCtrSkipLayerHash`/`AesCtrExSkipLayerHash` FS-section
/// encryption types, where the region covered by the section's own hash tree is left as
/// ciphertext (the hash tree itself provides the integrity check) and only the region
/// past it is actually CTR-decrypted.
#[derive(Debug, Clone)]
pub struct SkipLayerHashStorage<R: ReadableStorage, D: ReadableStorage> {
    raw: R,
    decrypted: D,
    boundary: u64,
}

impl<R: ReadableStorage, D: ReadableStorage> SkipLayerHashStorage<R, D> {
    pub fn new(raw: R, decrypted: D, boundary: u64) -> Self {
        assert_eq!(
            raw.get_size(),
            decrypted.get_size(),
            "raw and decrypted views of a skip-layer-hash section must have the same size"
        );
        Self {
            raw,
            decrypted,
            boundary,
        }
    }
}

impl<R: ReadableStorage, D: ReadableStorage> ReadableStorage for SkipLayerHashStorage<R, D> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let end = offset + buf.len() as u64;

        if end <= self.boundary {
            self.raw.read(offset, buf)
        } else if offset >= self.boundary {
            self.decrypted.read(offset, buf)
        } else {
            let split = (self.boundary - offset) as usize;
            let (head, tail) = buf.split_at_mut(split);
            self.raw.read(offset, head)?;
            self.decrypted.read(self.boundary, tail)
        }
    }

    fn get_size(&self) -> u64 {
        self.raw.get_size()
    }
}

impl<R: Storage, D: Storage> Storage for SkipLayerHashStorage<R, D> {
    fn write(&self, _offset: u64, _buf: &[u8]) -> Result<(), StorageError> {
        todo!("writing back through a skip-layer-hash view is not needed by the dump pipeline")
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.raw.flush()?;
        self.decrypted.flush()
    }

    fn set_size(&self, _new_size: u64) -> Result<(), StorageError> {
        Err(StorageError::FixedSize {})
    }
}
