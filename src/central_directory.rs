//! In-memory model of a ZIP archive's central directory, shared by the
//! reader (populated from parsed [`crate::spec::CentralDirectoryEntry`]
//! records) and the writer (populated as files are added, then serialized
//! via [`crate::writer`]).
//!
//! A name-indexed entry table in insertion order, expressed the way
//! [`crate::read::Directory`] expresses its own name-indexed map.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::read::CompressionMethod;
use crate::result::{ZipError, ZipResult};
use crate::source::ByteSource;
use crate::writer;

/// One extensible data field (APPNOTE 4.5.1) carried verbatim from a parsed
/// central directory entry's extra field. Only the Zip64 tag (0x0001) is
/// interpreted when an entry is read; every tag, including Zip64, is kept
/// here as-is so nothing in the extra field is silently dropped.
#[derive(Debug, Clone)]
pub struct ExtraField {
    pub tag: u16,
    pub blob: Vec<u8>,
}

/// Parses a raw extra field into its (tag, size, blob) records, the same
/// walk [`crate::spec`]'s own `parse_extra_field` does to pull out Zip64
/// values, but keeping every record instead of interpreting just one.
pub(crate) fn parse_extensible_fields(mut extra_field: &[u8]) -> Vec<ExtraField> {
    let mut fields = Vec::new();
    while extra_field.len() >= 4 {
        let tag = u16::from_le_bytes([extra_field[0], extra_field[1]]);
        let size = u16::from_le_bytes([extra_field[2], extra_field[3]]) as usize;
        extra_field = &extra_field[4..];
        if size > extra_field.len() {
            break;
        }
        let (blob, rest) = extra_field.split_at(size);
        fields.push(ExtraField { tag, blob: blob.to_vec() });
        extra_field = rest;
    }
    fields
}

/// One file or folder's worth of central directory metadata.
///
/// A folder is any entry with both sizes zero (matching the original
/// archiver's size-based classification), not name-suffix detection; a
/// zero-byte regular file has no trailing slash but is still a "folder" by
/// this rule, same as the archiver it was distilled from.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub compression_method: CompressionMethod,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub header_offset: u64,
    pub crc32: u32,
    pub last_modified: NaiveDateTime,
    pub comment: Vec<u8>,
    pub disk_number: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub extra_fields: Vec<ExtraField>,
}

impl Entry {
    pub fn is_folder(&self) -> bool {
        self.uncompressed_size == 0 && self.compressed_size == 0
    }
}

/// Aggregate counts and sizes across every entry in a directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub files: u64,
    pub folders: u64,
    pub compressed_bytes: u64,
    pub uncompressed_bytes: u64,
}

/// A ZIP archive's central directory: every entry, in insertion (i.e. the
/// order they'll be written, or were read) order, plus a name index.
#[derive(Debug, Default)]
pub struct CentralDirectory {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    cd_start_offset: u64,
    cd_size: u64,
    comment: Vec<u8>,
}

impl CentralDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `entry`, replacing any existing entry of the same name (an
    /// update job overwrites a stale entry rather than duplicating it).
    pub fn insert(&mut self, entry: Entry) {
        if let Some(&idx) = self.index.get(&entry.name) {
            self.entries[idx] = entry;
        } else {
            self.index.insert(entry.name.clone(), self.entries.len());
            self.entries.push(entry);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Entry> {
        self.index.get(name).map(|&idx| &self.entries[idx])
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for entry in &self.entries {
            if entry.is_folder() {
                totals.folders += 1;
            } else {
                totals.files += 1;
                totals.compressed_bytes += entry.compressed_size;
                totals.uncompressed_bytes += entry.uncompressed_size;
            }
        }
        totals
    }

    /// Records where the central directory will start in the archive
    /// being written. Must be called before [`CentralDirectory::write`].
    pub fn finalize(&mut self, cd_start_offset: u64) -> ZipResult<()> {
        for entry in &self.entries {
            if entry.header_offset >= cd_start_offset {
                return Err(ZipError::Corrupt(format!(
                    "entry {} has header offset {} at or past central directory start {}",
                    entry.name, entry.header_offset, cd_start_offset
                )));
            }
        }
        self.cd_start_offset = cd_start_offset;
        self.cd_size = self
            .entries
            .iter()
            .map(|e| writer::build_cd_entry(e).len() as u64)
            .sum();
        Ok(())
    }

    pub fn cd_size(&self) -> u64 {
        self.cd_size
    }

    pub fn cd_start_offset(&self) -> u64 {
        self.cd_start_offset
    }

    /// Writes every central directory entry followed by the Zip64
    /// end-of-CD record, its locator, and the end-of-CD record, at the
    /// current write position of `sink`.
    pub fn write(&self, sink: &dyn ByteSource) -> ZipResult<()> {
        use crate::source::Position;

        let mut offset = self.cd_start_offset;
        for entry in &self.entries {
            let bytes = writer::build_cd_entry(entry);
            sink.write(Position::Absolute(offset), &bytes)?;
            offset += bytes.len() as u64;
        }

        let zip64_eocdr_offset = offset;
        let zip64_eocdr =
            writer::build_zip64_eocdr(self.entries.len() as u64, self.cd_size, self.cd_start_offset);
        sink.write(Position::Absolute(offset), &zip64_eocdr)?;
        offset += zip64_eocdr.len() as u64;

        let locator = writer::build_zip64_locator(zip64_eocdr_offset);
        sink.write(Position::Absolute(offset), &locator)?;
        offset += locator.len() as u64;

        let eocdr = writer::build_eocdr(self.entries.len() as u64, self.cd_size, &self.comment);
        sink.write(Position::Absolute(offset), &eocdr)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    fn entry(name: &str, offset: u64) -> Entry {
        Entry {
            name: name.to_string(),
            compression_method: CompressionMethod::Deflate,
            uncompressed_size: 100,
            compressed_size: 40,
            header_offset: offset,
            crc32: 0,
            last_modified: NaiveDate::from_ymd_opt(2020, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            comment: Vec::new(),
            disk_number: 0,
            internal_attributes: 0,
            external_attributes: 0,
            extra_fields: Vec::new(),
        }
    }

    #[test]
    fn insert_then_lookup() {
        let mut cd = CentralDirectory::new();
        cd.insert(entry("a.txt", 0));
        assert!(cd.lookup("a.txt").is_some());
        assert!(cd.lookup("b.txt").is_none());
    }

    #[test]
    fn insert_replaces_same_name() {
        let mut cd = CentralDirectory::new();
        cd.insert(entry("a.txt", 0));
        cd.insert(entry("a.txt", 500));
        assert_eq!(cd.entries().len(), 1);
        assert_eq!(cd.lookup("a.txt").unwrap().header_offset, 500);
    }

    #[test]
    fn totals_split_files_and_folders() {
        let mut cd = CentralDirectory::new();
        cd.insert(entry("a.txt", 0));
        let mut folder = entry("dir/", 200);
        folder.uncompressed_size = 0;
        folder.compressed_size = 0;
        cd.insert(folder);
        let totals = cd.totals();
        assert_eq!(totals.files, 1);
        assert_eq!(totals.folders, 1);
        assert_eq!(totals.compressed_bytes, 40);
    }

    #[test]
    fn finalize_rejects_header_offset_past_cd_start() {
        let mut cd = CentralDirectory::new();
        cd.insert(entry("a.txt", 1000));
        assert!(cd.finalize(500).is_err());
    }

    #[test]
    fn finalize_computes_cd_size() {
        let mut cd = CentralDirectory::new();
        cd.insert(entry("a.txt", 0));
        cd.finalize(140).unwrap();
        assert!(cd.cd_size() > 0);
    }

    #[test]
    fn zero_byte_file_without_trailing_slash_counts_as_folder() {
        let mut cd = CentralDirectory::new();
        cd.insert(entry("a.txt", 0));
        let mut empty_file = entry("sub/empty.bin", 200);
        empty_file.uncompressed_size = 0;
        empty_file.compressed_size = 0;
        cd.insert(empty_file);
        let totals = cd.totals();
        assert_eq!(totals.files, 1);
        assert_eq!(totals.folders, 1);
    }

    #[test]
    fn parse_extensible_fields_keeps_every_record() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&0x0001u16.to_le_bytes());
        raw.extend_from_slice(&8u16.to_le_bytes());
        raw.extend_from_slice(&42u64.to_le_bytes());
        raw.extend_from_slice(&0x7075u16.to_le_bytes());
        raw.extend_from_slice(&2u16.to_le_bytes());
        raw.extend_from_slice(&[1, 2]);

        let fields = parse_extensible_fields(&raw);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].tag, 0x0001);
        assert_eq!(fields[0].blob, 42u64.to_le_bytes());
        assert_eq!(fields[1].tag, 0x7075);
        assert_eq!(fields[1].blob, vec![1, 2]);
    }
}
