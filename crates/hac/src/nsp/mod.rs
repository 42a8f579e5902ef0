//! NSP packaging: streams a set of finalized content entries into a PartitionFS whose
//! entry names are the SHA-256-derived content-ids of the data that was actually
//! written, following the two-pass placeholder-then-rewrite protocol.

mod sink;

pub use sink::{FileSink, Sink, SinkError};

use crate::formats::nca::NcaPatch;
use crate::formats::pfs::{PartitionFileSystemBuilder, PfsBuildError};
use crate::ids::ContentId;
use crate::storage::{ReadableStorage, StorageError};
use sha2::{Digest, Sha256};
use snafu::{ResultExt, Snafu};

/// Content is streamed and hashed in fixed-size chunks, matching the reference chunk
/// size so progress reporting and cancellation checks land at the same granularity.
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Snafu, Debug)]
pub enum NspBuildError {
    #[snafu(display("Failed to size the PartitionFS header"))]
    BuildHeader { source: PfsBuildError },
    #[snafu(display("Failed to write to the output sink"))]
    Sink { source: SinkError },
    #[snafu(display("Failed to read content entry {index} ({name:?})"))]
    ReadContent {
        index: usize,
        name: String,
        source: StorageError,
    },
    #[snafu(display("Failed to rename PartitionFS entry {index}"))]
    Rename { index: usize, source: PfsBuildError },
    #[snafu(display("Insufficient free space: need {needed}, sink reports {available}"))]
    InsufficientSpace { needed: u64, available: u64 },
}

/// One entry of the produced NSP, identified by a temporary (placeholder) name until
/// its content has been streamed and its real content-id is known.
pub struct NspEntry<S: ReadableStorage> {
    pub placeholder_name: String,
    pub storage: S,
    /// Given the content-id derived from the streamed bytes, produces the entry's
    /// final name (e.g. `"<id>.nca"`, `"<id>.cnmt.nca"`, a ticket/cert name that
    /// doesn't depend on a digest, or an XML name keyed off another entry's id).
    pub final_name: Box<dyn FnOnce(ContentId) -> String>,
    /// Header/key-area re-encryption (and any hash-tree edits) pending on this entry's
    /// NCA, applied chunk-by-chunk as it's streamed out. `None` for entries that are
    /// streamed byte-for-byte (tickets, certs, already up-to-date NCAs).
    pub patch: Option<NcaPatch>,
}

/// The content-id and full SHA-256 digest observed while streaming an entry.
pub struct StreamedContent {
    pub content_id: ContentId,
    pub hash: [u8; 0x20],
}

pub struct NspBuilder<S: ReadableStorage> {
    entries: Vec<NspEntry<S>>,
}

impl<S: ReadableStorage> Default for NspBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ReadableStorage> NspBuilder<S> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn add_entry(&mut self, entry: NspEntry<S>) {
        self.entries.push(entry);
    }

    fn total_size(&self, header_size: usize) -> u64 {
        header_size as u64 + self.entries.iter().map(|e| e.storage.get_size()).sum::<u64>()
    }

    /// Runs the full protocol: placeholder header, chunked streaming with hashing,
    /// final content-id renames, header re-write. `has_space` is handed the total
    /// output size up front and may reject the build before any I/O happens.
    pub fn build(
        self,
        sink: &mut impl Sink,
        has_space: impl FnOnce(u64) -> bool,
    ) -> Result<Vec<StreamedContent>, NspBuildError> {
        let mut pfs = PartitionFileSystemBuilder::new();
        let mut slots = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let index = pfs.add_entry(&entry.placeholder_name, entry.storage.get_size());
            slots.push(index);
        }

        let mut header_buf = Vec::new();
        let header_size = pfs_header_size(&pfs, &mut header_buf)?;

        let total_size = self.total_size(header_size);
        if !has_space(total_size) {
            return Err(NspBuildError::InsufficientSpace {
                needed: total_size,
                available: 0,
            });
        }

        sink.write(&header_buf[..header_size]).context(SinkSnafu)?;

        let mut streamed = Vec::with_capacity(self.entries.len());
        let mut chunk = vec![0u8; CHUNK_SIZE];
        for (index, entry) in self.entries.into_iter().enumerate() {
            let size = entry.storage.get_size();
            let mut hasher = Sha256::new();
            let mut offset = 0u64;
            while offset < size {
                let len = std::cmp::min(CHUNK_SIZE as u64, size - offset) as usize;
                let buf = &mut chunk[..len];
                entry
                    .storage
                    .read(offset, buf)
                    .context(ReadContentSnafu {
                        index,
                        name: entry.placeholder_name.clone(),
                    })?;
                if let Some(patch) = &entry.patch {
                    patch.splice(buf, offset);
                }
                hasher.update(&buf[..]);
                sink.write(buf).context(SinkSnafu)?;
                offset += len as u64;
            }

            let digest = hasher.finalize();
            let mut content_id = [0u8; 0x10];
            content_id.copy_from_slice(&digest[..0x10]);
            let content_id = ContentId::from(content_id);
            let mut hash = [0u8; 0x20];
            hash.copy_from_slice(&digest);

            let final_name = (entry.final_name)(content_id);
            pfs.update_entry_name(slots[index], &final_name)
                .context(RenameSnafu { index })?;

            streamed.push(StreamedContent { content_id, hash });
        }

        sink.seek(0).context(SinkSnafu)?;
        let written = pfs_header_size(&pfs, &mut header_buf)?;
        debug_assert_eq!(written, header_size);
        sink.write(&header_buf[..header_size]).context(SinkSnafu)?;

        Ok(streamed)
    }
}

fn pfs_header_size(
    pfs: &PartitionFileSystemBuilder,
    buf: &mut Vec<u8>,
) -> Result<usize, NspBuildError> {
    loop {
        match pfs.serialize_header(buf) {
            Ok(size) => return Ok(size),
            Err(PfsBuildError::BufferTooSmall { needed, .. }) => buf.resize(needed, 0),
            Err(source) => return Err(NspBuildError::BuildHeader { source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::nca::BytePatch;
    use crate::storage::VecStorage;

    struct VecSink {
        buf: Vec<u8>,
        pos: usize,
    }

    impl VecSink {
        fn new() -> Self {
            Self {
                buf: Vec::new(),
                pos: 0,
            }
        }
    }

    impl Sink for VecSink {
        fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
            let end = self.pos + bytes.len();
            if end > self.buf.len() {
                self.buf.resize(end, 0);
            }
            self.buf[self.pos..end].copy_from_slice(bytes);
            self.pos = end;
            Ok(())
        }

        fn seek(&mut self, offset: u64) -> Result<(), SinkError> {
            self.pos = offset as usize;
            Ok(())
        }

        fn finalize(self) -> Result<(), SinkError> {
            Ok(())
        }

        fn abort(self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn entry(name: &str, data: Vec<u8>, patch: Option<NcaPatch>) -> NspEntry<VecStorage> {
        NspEntry {
            placeholder_name: name.to_string(),
            storage: VecStorage::new(data),
            final_name: Box::new({
                let name = name.to_string();
                move |_id| name
            }),
            patch,
        }
    }

    #[test]
    fn build_streams_unpatched_entries_byte_for_byte() {
        let mut builder = NspBuilder::new();
        builder.add_entry(entry("a.nca", vec![0x11; 0x20], None));
        builder.add_entry(entry("b.nca", vec![0x22; 0x30], None));

        let mut sink = VecSink::new();
        let streamed = builder.build(&mut sink, |_| true).unwrap();
        assert_eq!(streamed.len(), 2);

        // The unpatched content bytes must appear verbatim somewhere in the output.
        assert!(sink
            .buf
            .windows(0x20)
            .any(|w| w == [0x11; 0x20].as_slice()));
        assert!(sink
            .buf
            .windows(0x30)
            .any(|w| w == [0x22; 0x30].as_slice()));
    }

    #[test]
    fn build_splices_a_dirty_header_before_hashing_and_writing() {
        let original = vec![0u8; 0x40];
        let patched_header = BytePatch {
            offset: 0,
            data: vec![0xaa; 0x10],
        };
        let patch = NcaPatch::for_test(Some(patched_header), Vec::new());

        let mut builder = NspBuilder::new();
        builder.add_entry(entry("dirty.nca", original, Some(patch)));

        let mut sink = VecSink::new();
        let streamed = builder.build(&mut sink, |_| true).unwrap();

        // The patched bytes, not the original zeroes, must be what got hashed...
        let mut expected = vec![0u8; 0x40];
        expected[..0x10].fill(0xaa);
        let expected_hash: [u8; 0x20] = Sha256::digest(&expected).into();
        assert_eq!(streamed[0].hash, expected_hash);

        // ...and what got written to the sink: content follows the header, so the
        // trailing 0x40 bytes of the output are this single entry's streamed bytes.
        let written = &sink.buf[sink.buf.len() - 0x40..];
        assert_eq!(written, expected.as_slice());
    }

    #[test]
    fn insufficient_space_is_rejected_before_any_write() {
        let mut builder = NspBuilder::new();
        builder.add_entry(entry("a.nca", vec![0x11; 0x100], None));

        let mut sink = VecSink::new();
        let err = builder.build(&mut sink, |_| false).unwrap_err();
        assert!(matches!(err, NspBuildError::InsufficientSpace { .. }));
        assert!(sink.buf.is_empty());
    }
}
