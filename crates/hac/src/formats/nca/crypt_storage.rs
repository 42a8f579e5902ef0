use crate::crypto::{AesKey, AesXtsKey};
use crate::hexstring::HexData;
use crate::storage::block_transforms::{AesCtrBlockTransform, AesXtsBlockTransform};
use crate::storage::{
    AesCtrStorage, AesXtsStorage, BlockAdapterStorage, LinearAdapterStorage, ReadableStorage,
    SkipLayerHashStorage, Storage, StorageError,
};

type CtrBody<S> = LinearAdapterStorage<AesCtrStorage<BlockAdapterStorage<S>>>;
type XtsBody<S> = LinearAdapterStorage<AesXtsStorage<BlockAdapterStorage<S>>>;

#[derive(Debug)]
pub enum NcaCryptStorage<S: ReadableStorage + Clone> {
    Plaintext(S),
    AesCtr(CtrBody<S>),
    Xts(XtsBody<S>),
    /// `AesCtrSkipLayerHash`/`AesCtrExSkipLayerHash`: the region up to
    /// `hash_target_offset` is left as ciphertext, the rest is CTR-decrypted.
    SkipLayerHash(SkipLayerHashStorage<S, CtrBody<S>>),
}

fn build_ctr_body<S: ReadableStorage>(
    storage: S,
    key: AesKey,
    counter_upper: u64,
    start_offset: u64,
) -> CtrBody<S> {
    // base nonce: first 8 bytes are specified in the fs header, the rest is big-endian offset in the section counter in AES blocks
    // the section decryptor itself will add the inner offset
    let mut nonce = [0; 0x10];
    nonce[..8].copy_from_slice(&counter_upper.to_be_bytes());
    nonce[8..].copy_from_slice(&(start_offset / 16).to_be_bytes());

    let block_adapter = BlockAdapterStorage::new(storage, 0x10);
    let transform = AesCtrBlockTransform::new(key, HexData(nonce));
    let aes_ctr = AesCtrStorage::new(block_adapter, transform);
    LinearAdapterStorage::new(aes_ctr)
}

impl<S: ReadableStorage + Clone> NcaCryptStorage<S> {
    pub fn new_plaintext(storage: S) -> Self {
        Self::Plaintext(storage)
    }

    /// `upper_counter` is the FS header's `upper_counter` field, or (for `AesCtrEx`) the
    /// patch-info's `ctr_value` override in its place.
    pub fn new_ctr(storage: S, key: AesKey, upper_counter: u64, start_offset: u64) -> Self {
        Self::AesCtr(build_ctr_body(storage, key, upper_counter, start_offset))
    }

    /// Section-relative AES-XTS: sector 0 is the first `0x200` bytes of the section body.
    pub fn new_xts(storage: S, key: AesXtsKey) -> Self {
        let block_adapter = BlockAdapterStorage::new(storage, 0x200);
        let transform = AesXtsBlockTransform::new(key);
        let xts = AesXtsStorage::new(block_adapter, transform);
        Self::Xts(LinearAdapterStorage::new(xts))
    }

    pub fn new_skip_layer_hash(
        storage: S,
        key: AesKey,
        upper_counter: u64,
        start_offset: u64,
        hash_target_offset: u64,
    ) -> Self {
        let raw = storage.clone();
        let decrypted = build_ctr_body(storage, key, upper_counter, start_offset);
        Self::SkipLayerHash(SkipLayerHashStorage::new(raw, decrypted, hash_target_offset))
    }
}

impl<S: ReadableStorage + Clone> ReadableStorage for NcaCryptStorage<S> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        match self {
            NcaCryptStorage::Plaintext(storage) => storage.read(offset, buf),
            NcaCryptStorage::AesCtr(storage) => storage.read(offset, buf),
            NcaCryptStorage::Xts(storage) => storage.read(offset, buf),
            NcaCryptStorage::SkipLayerHash(storage) => storage.read(offset, buf),
        }
    }

    fn get_size(&self) -> u64 {
        match self {
            NcaCryptStorage::Plaintext(storage) => storage.get_size(),
            NcaCryptStorage::AesCtr(storage) => storage.get_size(),
            NcaCryptStorage::Xts(storage) => storage.get_size(),
            NcaCryptStorage::SkipLayerHash(storage) => storage.get_size(),
        }
    }
}

impl<S: Storage + Clone> Storage for NcaCryptStorage<S> {
    fn write(&self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        match self {
            NcaCryptStorage::Plaintext(storage) => storage.write(offset, buf),
            NcaCryptStorage::AesCtr(storage) => storage.write(offset, buf),
            NcaCryptStorage::Xts(storage) => storage.write(offset, buf),
            NcaCryptStorage::SkipLayerHash(storage) => storage.write(offset, buf),
        }
    }

    fn flush(&self) -> Result<(), StorageError> {
        match self {
            NcaCryptStorage::Plaintext(storage) => storage.flush(),
            NcaCryptStorage::AesCtr(storage) => storage.flush(),
            NcaCryptStorage::Xts(storage) => storage.flush(),
            NcaCryptStorage::SkipLayerHash(storage) => storage.flush(),
        }
    }

    fn set_size(&self, new_size: u64) -> Result<(), StorageError> {
        match self {
            NcaCryptStorage::Plaintext(storage) => storage.set_size(new_size),
            NcaCryptStorage::AesCtr(storage) => storage.set_size(new_size),
            NcaCryptStorage::Xts(storage) => storage.set_size(new_size),
            NcaCryptStorage::SkipLayerHash(storage) => storage.set_size(new_size),
        }
    }
}
