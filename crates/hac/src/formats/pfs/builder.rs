use crate::formats::pfs::structs::{PartitionFsEntry, PartitionFsHeader};
use binrw::BinWrite;
use snafu::{OptionExt, ResultExt, Snafu};

const ALIGNMENT: u64 = 0x20;

#[derive(Snafu, Debug)]
pub enum PfsBuildError {
    #[snafu(display("New entry name is longer than the slot it replaces"))]
    NameTooLong {},
    #[snafu(display("No such entry index {index}"))]
    NoSuchEntry { index: usize },
    #[snafu(display("Serialized header does not fit into the provided buffer"))]
    BufferTooSmall { needed: usize, available: usize },
    #[snafu(display("Failed to serialize the header"))]
    Serialize { source: binrw::Error },
}

struct BuilderEntry {
    offset: u64,
    size: u64,
    name_offset: u32,
    name_len: usize,
}

/// Incrementally assembles a PartitionFS (PFS0) header for a partition being written out.
///
/// Entry data itself is not buffered here; callers stream file contents directly to the
/// output sink at the offsets this builder hands back from [`PartitionFileSystemBuilder::add_entry`].
pub struct PartitionFileSystemBuilder {
    entries: Vec<BuilderEntry>,
    name_table: Vec<u8>,
    next_data_offset: u64,
}

impl Default for PartitionFileSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionFileSystemBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            name_table: Vec::new(),
            next_data_offset: 0,
        }
    }

    /// Appends a new entry whose data starts right after the previous entry's data.
    /// Returns the index to use with [`Self::update_entry_name`].
    pub fn add_entry(&mut self, name: &str, size: u64) -> usize {
        let name_offset = self.name_table.len() as u32;
        self.name_table.extend_from_slice(name.as_bytes());
        self.name_table.push(0);

        let offset = self.next_data_offset;
        self.next_data_offset += size;

        self.entries.push(BuilderEntry {
            offset,
            size,
            name_offset,
            name_len: name.len(),
        });

        self.entries.len() - 1
    }

    /// Rewrites an existing entry's name in place. The new name must not be longer than
    /// the slot that was reserved for it by [`Self::add_entry`] (used to fix up placeholder
    /// names with real content IDs once they are known, without reflowing the header).
    pub fn update_entry_name(
        &mut self,
        entry_index: usize,
        new_name: &str,
    ) -> Result<(), PfsBuildError> {
        let entry = self
            .entries
            .get_mut(entry_index)
            .context(NoSuchEntrySnafu { index: entry_index })?;
        if new_name.len() > entry.name_len {
            return Err(PfsBuildError::NameTooLong {});
        }

        let start = entry.name_offset as usize;
        self.name_table[start..start + new_name.len()].copy_from_slice(new_name.as_bytes());
        for b in &mut self.name_table[start + new_name.len()..start + entry.name_len] {
            *b = 0;
        }
        entry.name_len = new_name.len();

        Ok(())
    }

    fn unpadded_size(&self) -> usize {
        16 + self.entries.len() * 24 + self.name_table.len()
    }

    /// Writes the padded (to 0x20) PFS0 header into `buf`, returning the number of bytes
    /// written. The data region of the partition begins right after this.
    pub fn serialize_header(&self, buf: &mut [u8]) -> Result<usize, PfsBuildError> {
        let unpadded = self.unpadded_size();
        let padded = unpadded.div_ceil(ALIGNMENT as usize) * ALIGNMENT as usize;
        let padding = padded - unpadded;

        if buf.len() < padded {
            return Err(PfsBuildError::BufferTooSmall {
                needed: padded,
                available: buf.len(),
            });
        }

        let mut padded_names = self.name_table.clone();
        padded_names.resize(self.name_table.len() + padding, 0);

        let header = PartitionFsHeader {
            num_files: self.entries.len() as u32,
            string_table_size: padded_names.len() as u32,
            file_entries: self
                .entries
                .iter()
                .map(|e| PartitionFsEntry {
                    offset: e.offset,
                    size: e.size,
                    string_table_offset: e.name_offset,
                })
                .collect(),
            string_table: padded_names,
        };

        let mut cursor = std::io::Cursor::new(&mut buf[..padded]);
        header.write(&mut cursor).context(SerializeSnafu)?;

        Ok(padded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::BinRead;

    #[test]
    fn header_size_is_padded_to_the_alignment() {
        let mut pfs = PartitionFileSystemBuilder::new();
        pfs.add_entry("a", 0x10);

        let mut buf = vec![0u8; 0x100];
        let size = pfs.serialize_header(&mut buf).unwrap();
        assert_eq!(size % ALIGNMENT as usize, 0);
        assert!(size >= pfs.unpadded_size());
    }

    #[test]
    fn serialize_header_reports_the_needed_size_when_the_buffer_is_too_small() {
        let mut pfs = PartitionFileSystemBuilder::new();
        pfs.add_entry("entry-with-a-long-name.nca", 0x1000);

        let mut tiny = vec![0u8; 1];
        let err = pfs.serialize_header(&mut tiny).unwrap_err();
        match err {
            PfsBuildError::BufferTooSmall { needed, available } => {
                assert_eq!(available, 1);
                assert!(needed >= pfs.unpadded_size());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn update_entry_name_rejects_a_longer_replacement() {
        let mut pfs = PartitionFileSystemBuilder::new();
        let index = pfs.add_entry("short", 0x10);
        let err = pfs.update_entry_name(index, "way too long").unwrap_err();
        assert!(matches!(err, PfsBuildError::NameTooLong {}));
    }

    #[test]
    fn update_entry_name_overwrites_in_place_and_zero_pads_the_remainder() {
        let mut pfs = PartitionFileSystemBuilder::new();
        let index = pfs.add_entry("placeholder_name", 0x10);
        pfs.update_entry_name(index, "short").unwrap();

        let mut buf = vec![0u8; 0x200];
        let size = pfs.serialize_header(&mut buf).unwrap();

        let mut cursor = std::io::Cursor::new(&buf[..size]);
        let header = PartitionFsHeader::read(&mut cursor).unwrap();
        assert_eq!(header.num_files, 1);

        let start = header.file_entries[0].string_table_offset as usize;
        let name_bytes = &header.string_table[start..start + "short".len() + 1];
        assert_eq!(name_bytes, b"short\0");
    }

    #[test]
    fn entries_are_laid_out_back_to_back_in_insertion_order() {
        let mut pfs = PartitionFileSystemBuilder::new();
        pfs.add_entry("a", 0x10);
        pfs.add_entry("b", 0x20);
        pfs.add_entry("c", 0x5);

        let mut buf = vec![0u8; 0x200];
        let size = pfs.serialize_header(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(&buf[..size]);
        let header = PartitionFsHeader::read(&mut cursor).unwrap();

        assert_eq!(header.file_entries[0].offset, 0);
        assert_eq!(header.file_entries[1].offset, 0x10);
        assert_eq!(header.file_entries[2].offset, 0x30);
        assert_eq!(header.file_entries[2].size, 0x5);
    }
}
