//! In-place mutation of an already-parsed [`Nca`]: header/key-area re-encryption,
//! titlekey-crypto removal, and hash-tree patch generation. None of this touches the
//! backing storage directly — every operation produces [`BytePatch`]es (absolute
//! content-file offset + ciphertext) that a caller (the NSP builder, or a standalone
//! "rebuild this NCA" tool) splices into the original bytes while streaming them out.

use crate::crypto::keyset::{KeySet, MissingKeyError};
use crate::crypto::AesXtsKey;
use crate::formats::nca::structs::{DistributionType, IntegrityInfo, NcaFsHeader, NcaMagic, Sha256Hash};
use crate::formats::nca::{Nca, NcaContentKeys};
use crate::ids::{ContentId, RightsId};
use crate::storage::{ReadableStorage, StorageError};
use binrw::BinWrite;
use digest::Digest;
use sha2::Sha256;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::io::Cursor;

const HEADER_SECTOR_SIZE: usize = 0x200;
const ALL_HEADERS_SIZE: usize = 0xc00;
const NCA_HEADER_SIZE: usize = 0x400;

#[derive(Debug, Clone)]
pub struct BytePatch {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// The set of byte patches needed to turn the NCA's on-disk bytes into bytes matching
/// its current in-memory header/FS-header state. Empty until a mutating operation
/// ([`Nca::encrypt_header_and_keyarea`], [`Nca::generate_hashtree_patch`]) is called.
#[derive(Debug, Default)]
pub struct NcaPatch {
    header: Option<BytePatch>,
    /// SHA-256 of the plaintext header+key-area bytes `header` was derived from, so a
    /// second [`Nca::encrypt_header_and_keyarea`] call with no intervening mutation is a
    /// no-op instead of re-deriving and re-encrypting identical bytes.
    header_plaintext_hash: Option<[u8; 0x20]>,
    section_patches: Vec<BytePatch>,
}

impl NcaPatch {
    pub fn is_empty(&self) -> bool {
        self.header.is_none() && self.section_patches.is_empty()
    }

    /// Overlays every patch intersecting `[chunk_offset, chunk_offset + chunk.len())`
    /// onto `chunk`, which is assumed to already hold the corresponding unpatched bytes.
    pub fn splice(&self, chunk: &mut [u8], chunk_offset: u64) {
        let chunk_end = chunk_offset + chunk.len() as u64;
        for patch in self.header.iter().chain(self.section_patches.iter()) {
            let patch_end = patch.offset + patch.data.len() as u64;
            if patch.offset >= chunk_end || patch_end <= chunk_offset {
                continue;
            }
            let start = patch.offset.max(chunk_offset);
            let end = patch_end.min(chunk_end);
            let src = &patch.data[(start - patch.offset) as usize..(end - patch.offset) as usize];
            chunk[(start - chunk_offset) as usize..(end - chunk_offset) as usize]
                .copy_from_slice(src);
        }
    }
}

#[derive(Snafu, Debug)]
pub enum NcaPatchError {
    #[snafu(display("NCA does not carry titlekey crypto (no rights id)"))]
    NoRightsId {},
    #[snafu(display("Section {index} is not enabled or has no FS header"))]
    MissingSection { index: usize },
    #[snafu(display("Section {index} has no hash tree to patch (IntegrityInfo::None)"))]
    NoHashTree { index: usize },
    #[snafu(display("Overlay extends past the end of the hashed data region"))]
    OverlayOutOfBounds {},
    #[snafu(display("Failed to read section data while generating a hash-tree patch"))]
    Storage { source: StorageError },
    #[snafu(display("Failed to reserialize the NCA FS header"))]
    FsHeaderSerialize { source: binrw::Error },
    #[snafu(display(
        "v0/Nca1 header re-encryption is not supported (FS headers are not contiguous)"
    ))]
    UnsupportedMagic {},
    #[snafu(display("Missing a crypto key"))]
    MissingKey { source: MissingKeyError },
    #[snafu(display("Failed to write patched NCA bytes"))]
    Io { source: std::io::Error },
}

#[derive(Debug, Copy, Clone)]
struct LevelDesc {
    offset: u64,
    size: u64,
    block_size: u64,
}

fn levels_for(fs_header: &NcaFsHeader) -> Vec<LevelDesc> {
    match fs_header.integrity_info {
        IntegrityInfo::None => Vec::new(),
        IntegrityInfo::Sha256(s) => vec![
            LevelDesc {
                offset: s.level_info[0].offset,
                size: s.level_info[0].size,
                block_size: s.level_info[0].size,
            },
            LevelDesc {
                offset: s.level_info[1].offset,
                size: s.level_info[1].size,
                block_size: s.block_size as u64,
            },
        ],
        IntegrityInfo::Ivfc(s) => (0..(s.level_count - 1) as usize)
            .map(|i| {
                let l = s.level_info[i];
                LevelDesc {
                    offset: l.offset,
                    size: l.size,
                    block_size: 1u64 << l.block_size,
                }
            })
            .collect(),
    }
}

fn hash_block(block: &[u8], block_size: u64, zero_pad: bool) -> [u8; 0x20] {
    let mut hasher = Sha256::new();
    if zero_pad && (block.len() as u64) < block_size {
        let mut padded = vec![0u8; block_size as usize];
        padded[..block.len()].copy_from_slice(block);
        hasher.update(&padded);
    } else {
        hasher.update(block);
    }
    hasher.finalize().into()
}

impl<S: ReadableStorage> Nca<S> {
    fn ctr_encrypt_at(&self, buf: &mut [u8], upper_counter: u64, content_offset: u64) {
        let mut nonce = [0u8; 0x10];
        nonce[..8].copy_from_slice(&upper_counter.to_be_bytes());
        nonce[8..].copy_from_slice(&(content_offset / 16).to_be_bytes());
        self.get_ctr_key().encrypt_ctr(buf, &nonce);
    }

    /// §4.1.5: patches the hash tree of section `index` so that, after the returned
    /// patch is applied and the section re-read, `read_section(hash_target_offset +
    /// overlay_offset, overlay.len()) == overlay`. Walks from the target (data) level
    /// back to the level validated directly by the section's master hash, recomputing
    /// exactly the hash blocks the overlay touches at each step, then updates the
    /// section's master hash and the owning NCA header's `fs_header_hashes` entry.
    pub fn generate_hashtree_patch(
        &mut self,
        index: usize,
        overlay: &[u8],
        overlay_offset_within_target: u64,
        patch: &mut NcaPatch,
    ) -> Result<(), NcaPatchError> {
        let section_entry = self.headers.nca_header.section_table[index];
        ensure!(section_entry.is_enabled, MissingSectionSnafu { index });
        let section_start: u64 = section_entry.start.into();

        let mut fs_header = self.headers.fs_headers[index]
            .as_ref()
            .context(MissingSectionSnafu { index })?
            .clone();
        let upper_counter = fs_header.upper_counter;

        let levels = levels_for(&fs_header);
        ensure!(!levels.is_empty(), NoHashTreeSnafu { index });

        let storage = self
            .get_raw_decrypted_section_storage(index)
            .context(MissingSectionSnafu { index })?;

        let target = *levels.last().unwrap();
        ensure!(
            overlay_offset_within_target + overlay.len() as u64 <= target.size,
            OverlayOutOfBoundsSnafu {}
        );

        // cur_data/cur_offset are relative to the *current* level being mutated.
        let block = target.block_size;
        let aligned_start = (overlay_offset_within_target / block) * block;
        let aligned_end = std::cmp::min(
            target.size,
            ((overlay_offset_within_target + overlay.len() as u64 + block - 1) / block) * block,
        );
        let mut cur_data = vec![0u8; (aligned_end - aligned_start) as usize];
        storage
            .read(target.offset + aligned_start, &mut cur_data)
            .context(StorageSnafu)?;
        let overlay_start_in_span = (overlay_offset_within_target - aligned_start) as usize;
        cur_data[overlay_start_in_span..overlay_start_in_span + overlay.len()]
            .copy_from_slice(overlay);

        let mut cur_offset = aligned_start;
        let mut cur_block_size = block;

        for level_idx in (0..levels.len()).rev() {
            let level = levels[level_idx];
            let first_block = cur_offset / cur_block_size;
            let block_count =
                (cur_data.len() as u64 + cur_block_size - 1) / cur_block_size;
            // Every level of a Switch hash tree (Sha256 and Ivfc alike) hashes each
            // block zero-padded to its full block size, including a short tail block.
            let zero_pad = true;

            // Re-encrypt and emit the mutated span of this level as a content patch.
            let mut ciphertext = cur_data.clone();
            self.ctr_encrypt_at(
                &mut ciphertext,
                upper_counter,
                section_start + level.offset + cur_offset,
            );
            patch.section_patches.push(BytePatch {
                offset: section_start + level.offset + cur_offset,
                data: ciphertext,
            });

            if level_idx == 0 {
                // The parent of level 0 is the master hash itself, covering the whole level.
                let mut whole = vec![0u8; level.size as usize];
                storage.read(level.offset, &mut whole).context(StorageSnafu)?;
                let span_start = cur_offset as usize;
                whole[span_start..span_start + cur_data.len()].copy_from_slice(&cur_data);
                let master_hash: [u8; 0x20] =
                    hash_block(&whole, level.size, false);
                set_master_hash(&mut fs_header, master_hash);
                break;
            }

            let parent = levels[level_idx - 1];
            let hash_entries_start = first_block * 0x20;
            let hash_entries_len = block_count * 0x20;
            let parent_aligned_start =
                (hash_entries_start / parent.block_size) * parent.block_size;
            let parent_aligned_end = std::cmp::min(
                parent.size,
                ((hash_entries_start + hash_entries_len + parent.block_size - 1)
                    / parent.block_size)
                    * parent.block_size,
            );

            let mut parent_data =
                vec![0u8; (parent_aligned_end - parent_aligned_start) as usize];
            storage
                .read(parent.offset + parent_aligned_start, &mut parent_data)
                .context(StorageSnafu)?;

            for b in 0..block_count {
                let block_start = (b * cur_block_size) as usize;
                let block_end = std::cmp::min(cur_data.len(), block_start + cur_block_size as usize);
                let digest = hash_block(
                    &cur_data[block_start..block_end],
                    cur_block_size,
                    zero_pad,
                );
                let hash_off =
                    (hash_entries_start + b * 0x20 - parent_aligned_start) as usize;
                parent_data[hash_off..hash_off + 0x20].copy_from_slice(&digest);
            }

            cur_data = parent_data;
            cur_offset = parent_aligned_start;
            cur_block_size = parent.block_size;
        }

        self.headers.fs_headers[index] = Some(fs_header);
        self.recompute_fs_header_hash(index)?;

        Ok(())
    }

    fn recompute_fs_header_hash(&mut self, index: usize) -> Result<(), NcaPatchError> {
        let fs_header = self.headers.fs_headers[index].as_ref().unwrap();
        let mut buf = [0u8; HEADER_SECTOR_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);
        fs_header
            .write(&mut cursor)
            .context(FsHeaderSerializeSnafu)?;

        let mut hasher = Sha256::new();
        hasher.update(buf);
        let hash: [u8; 0x20] = hasher.finalize().into();
        self.headers.nca_header.fs_header_hashes[index] = Sha256Hash(hash.into());
        Ok(())
    }

    /// Converts a rights-id-keyed NCA into a key-area-keyed one: the already-unwrapped
    /// title key becomes the new CTR key, the XTS slot is zeroed (no v0 section uses
    /// titlekey crypto), and the rights id is cleared. After
    /// [`Self::encrypt_header_and_keyarea`], every CTR section decrypts correctly from
    /// the new key area alone.
    pub fn remove_titlekey_crypto(&mut self) -> Result<(), NcaPatchError> {
        let ctr = match self.content_key {
            NcaContentKeys::RightsId(key) => key,
            _ => return NoRightsIdSnafu {}.fail(),
        };

        self.content_key = NcaContentKeys::KeyArea {
            ctr,
            xts: AesXtsKey::zero(),
        };
        self.headers.nca_header.rights_id = RightsId::zero();
        Ok(())
    }

    pub fn set_download_distribution(&mut self) {
        self.headers.nca_header.distribution_type = DistributionType::Download;
    }

    /// Overwrites a [`crate::formats::cnmt::PackagedContentInfo`]-identified content's
    /// id/hash in place; used by the CNMT engine after a content's bytes (and therefore
    /// its content-id) change.
    pub fn update_content_id_and_hash(&mut self, content_id: ContentId) {
        // The content-id lives in the CNMT's PackagedContentInfo, not the NCA itself;
        // nothing in the NCA header needs to change for this. Kept as a no-op hook so
        // callers (CNMT engine) have a single place to route this update through,
        // mirroring `set_download_distribution`'s shape.
        let _ = content_id;
    }

    /// Re-encrypts the in-memory header and key area (§4.1.6), producing (or refreshing)
    /// the header patch. A no-op on the second call with no intervening mutation, since
    /// the plaintext-header bytes (and therefore the cache key) are unchanged.
    pub fn encrypt_header_and_keyarea(
        &mut self,
        key_set: &KeySet,
        patch: &mut NcaPatch,
    ) -> Result<(), NcaPatchError> {
        ensure!(
            matches!(self.headers.nca_header.magic, NcaMagic::Nca2 | NcaMagic::Nca3),
            UnsupportedMagicSnafu {}
        );

        let mut header_buf = [0u8; NCA_HEADER_SIZE];
        {
            let mut cursor = Cursor::new(&mut header_buf[..]);
            self.headers
                .nca_header
                .write(&mut cursor)
                .context(FsHeaderSerializeSnafu)?;
        }

        let plaintext_hash: [u8; 0x20] = {
            let mut hasher = Sha256::new();
            hasher.update(header_buf);
            hasher.finalize().into()
        };
        if patch.header_plaintext_hash == Some(plaintext_hash) {
            return Ok(());
        }

        if let NcaContentKeys::KeyArea { ctr, xts } = self.content_key {
            let kak = key_set
                .key_area_key(
                    self.headers.master_key_revision(),
                    self.headers.nca_header.key_area_key_index,
                )
                .context(MissingKeySnafu)?;
            self.headers.nca_header.key_area.encrypted_ctr_key = kak.encrypt_key(&ctr);
            self.headers.nca_header.key_area.encrypted_xts_key = kak.encrypt_xts_key(&xts);
        }

        let mut full_buf = vec![0u8; ALL_HEADERS_SIZE];
        {
            let mut cursor = Cursor::new(&mut full_buf[..NCA_HEADER_SIZE]);
            self.headers
                .nca_header
                .write(&mut cursor)
                .context(FsHeaderSerializeSnafu)?;
        }
        for index in 0..4 {
            if let Some(fs_header) = &self.headers.fs_headers[index] {
                let start = NCA_HEADER_SIZE + index * HEADER_SECTOR_SIZE;
                let mut cursor = Cursor::new(&mut full_buf[start..start + HEADER_SECTOR_SIZE]);
                fs_header.write(&mut cursor).context(FsHeaderSerializeSnafu)?;
            }
        }

        let key = key_set.header_key().context(MissingKeySnafu)?;
        key.encrypt(&mut full_buf[..NCA_HEADER_SIZE], 0, HEADER_SECTOR_SIZE);
        key.encrypt(&mut full_buf[NCA_HEADER_SIZE..], 2, HEADER_SECTOR_SIZE);

        patch.header = Some(BytePatch {
            offset: 0,
            data: full_buf,
        });
        patch.header_plaintext_hash = Some(plaintext_hash);

        Ok(())
    }
}

/// §4.3.2: bundles the two NCA-side mutations a CNMT content conversion always needs —
/// dropping titlekey crypto (if any) and re-encrypting the header/key area to match —
/// into the single [`NcaPatch`] the caller then threads through [`write_nca_patch`].
pub fn generate_nca_patch<S: ReadableStorage>(
    nca: &mut Nca<S>,
    key_set: &KeySet,
    remove_titlekey: bool,
) -> Result<NcaPatch, NcaPatchError> {
    let mut patch = NcaPatch::default();
    if remove_titlekey {
        nca.remove_titlekey_crypto()?;
    }
    nca.encrypt_header_and_keyarea(key_set, &mut patch)?;
    Ok(patch)
}

/// Streams `source`'s bytes to `sink` with `patch` spliced in, `CHUNK_SIZE` bytes at a
/// time — the same chunk size `nsp::NspBuilder` hashes content with.
pub fn write_nca_patch<S: ReadableStorage>(
    source: &S,
    patch: &NcaPatch,
    sink: &mut impl std::io::Write,
) -> Result<(), NcaPatchError> {
    const CHUNK_SIZE: usize = 8 * 1024 * 1024;

    let size = source.get_size();
    let mut offset = 0u64;
    while offset < size {
        let len = std::cmp::min(CHUNK_SIZE as u64, size - offset) as usize;
        let mut buf = vec![0u8; len];
        source.read(offset, &mut buf).context(StorageSnafu)?;
        patch.splice(&mut buf, offset);
        sink.write_all(&buf).context(IoSnafu)?;
        offset += len as u64;
    }
    Ok(())
}

fn set_master_hash(fs_header: &mut NcaFsHeader, hash: [u8; 0x20]) {
    match &mut fs_header.integrity_info {
        IntegrityInfo::None => {}
        IntegrityInfo::Sha256(s) => s.master_hash = Sha256Hash(hash.into()),
        IntegrityInfo::Ivfc(s) => {
            s.master_hash.0[..0x20].copy_from_slice(&hash);
        }
    }
}

#[cfg(test)]
impl NcaPatch {
    /// Builds an [`NcaPatch`] directly from its patch list, bypassing the usual
    /// `Nca::*`-producing methods. Used by other modules' tests (e.g. `nsp`'s) that need
    /// a patch to splice but have no reason to construct a full [`Nca`] to get one.
    pub(crate) fn for_test(header: Option<BytePatch>, section_patches: Vec<BytePatch>) -> Self {
        Self {
            header,
            header_plaintext_hash: None,
            section_patches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_is_noop_with_no_patches() {
        let patch = NcaPatch::default();
        assert!(patch.is_empty());

        let mut chunk = b"hello world".to_vec();
        let original = chunk.clone();
        patch.splice(&mut chunk, 0x1000);
        assert_eq!(chunk, original);
    }

    #[test]
    fn splice_overlays_a_patch_fully_inside_the_chunk() {
        let mut patch = NcaPatch::default();
        patch.section_patches.push(BytePatch {
            offset: 0x10,
            data: vec![0xaa; 4],
        });
        assert!(!patch.is_empty());

        let mut chunk = vec![0u8; 0x20];
        patch.splice(&mut chunk, 0);

        assert_eq!(&chunk[0x10..0x14], &[0xaa; 4]);
        assert!(chunk[..0x10].iter().all(|&b| b == 0));
        assert!(chunk[0x14..].iter().all(|&b| b == 0));
    }

    #[test]
    fn splice_clips_a_patch_straddling_the_chunk_boundary() {
        let mut patch = NcaPatch::default();
        patch.header = Some(BytePatch {
            offset: 0x0c,
            data: vec![0xbb; 8],
        });

        // Chunk covers [0x10, 0x20); the patch covers [0x0c, 0x14), so only
        // [0x10, 0x14) of it should land in this chunk.
        let mut chunk = vec![0u8; 0x10];
        patch.splice(&mut chunk, 0x10);

        assert_eq!(&chunk[..4], &[0xbb; 4]);
        assert!(chunk[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn splice_ignores_patches_entirely_outside_the_chunk() {
        let mut patch = NcaPatch::default();
        patch.section_patches.push(BytePatch {
            offset: 0x100,
            data: vec![0xcc; 4],
        });

        let mut chunk = vec![0u8; 0x10];
        patch.splice(&mut chunk, 0);
        assert!(chunk.iter().all(|&b| b == 0));
    }

    #[test]
    fn hash_block_zero_pads_short_tail_blocks() {
        let full = hash_block(&[0u8; 0x200], 0x200, true);
        let short = hash_block(&[0u8; 0x80], 0x200, true);
        let short_unpadded = hash_block(&[0u8; 0x80], 0x200, false);

        // A short block zero-padded to the full block size hashes identically to an
        // already-full zero block, and differently from hashing it unpadded.
        assert_eq!(full, short);
        assert_ne!(short, short_unpadded);
    }
}
