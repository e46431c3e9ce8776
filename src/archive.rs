//! Archive façade: the single entry point the CLI and job engine drive.
//!
//! Wraps a [`ByteSource`] and a directory map behind `open_read`/`create`,
//! per-entry extract/add operations, and `close`, reusing [`crate::spec`]'s
//! parsers for discovery and [`crate::writer`] for emission the way
//! [`crate::read::ZipArchive`] reuses them for its own (slice-only)
//! discovery.

use std::io::Read;
use std::sync::Mutex;

use camino::Utf8Path;
use chrono::NaiveDateTime;
use flate2::Status;

use crate::central_directory::{self, CentralDirectory, Entry, Totals};
use crate::crc::Crc32Accumulator;
use crate::deflate::{Deflator, Inflator, Level};
use crate::glob;
use crate::read::{CompressionMethod, FileMetadata};
use crate::result::{ZipError, ZipResult};
use crate::source::{self, ByteSource, Credentials, Position};
use crate::spec;
use crate::writer;

const EOCDR_FIXED_SIZE: u64 = 22;
const EOCDR_COMMENT_MAX: u64 = 0xFFFF;
const ZIP64_LOCATOR_SIZE: u64 = 20;
const ZIP64_EOCDR_FIXED_SIZE: u64 = 56;
/// No real archive has a central directory bigger than this; treat one
/// that claims to as corrupt rather than trying to allocate for it.
const CD_SIZE_SANITY_CAP: u64 = 1 << 26;
const STREAM_CHUNK: usize = 256 * 1024;

/// A ZIP archive opened for reading or writing over a [`ByteSource`].
pub struct Archive {
    source: Box<dyn ByteSource>,
    directory: Mutex<CentralDirectory>,
    write_offset: Mutex<u64>,
    level: Level,
}

impl Archive {
    /// Opens `url` (a local path or an `http(s)://` URL) for reading,
    /// locating and parsing its central directory.
    pub fn open_read(
        url: &str,
        creds: Option<Credentials>,
        insecure: bool,
    ) -> ZipResult<Self> {
        let source = source::open(url, creds, insecure, false)?;
        let size = source.size()?;

        let tail_len = (EOCDR_FIXED_SIZE + EOCDR_COMMENT_MAX).min(size);
        let tail_start = size - tail_len;
        let mut tail_buf = vec![0u8; tail_len as usize];
        let n = source.read(Position::Absolute(tail_start), tail_len as usize, &mut tail_buf)?;
        tail_buf.truncate(n);

        let eocdr_pos_in_tail = spec::find_eocdr(&tail_buf)?;
        let eocdr = spec::EndOfCentralDirectory::parse(&tail_buf[eocdr_pos_in_tail..])?;
        let eocdr_absolute = tail_start + eocdr_pos_in_tail as u64;

        if eocdr.disk_number != eocdr.disk_with_central_directory
            || eocdr.entries != eocdr.entries_on_this_disk
        {
            return Err(ZipError::UnsupportedArchive(
                "multi-disk archives are not supported".into(),
            ));
        }

        let (cd_offset, cd_size, entry_count) = Self::locate_central_directory(
            source.as_ref(),
            &eocdr,
            eocdr_absolute,
        )?;

        if cd_size > CD_SIZE_SANITY_CAP || cd_size > size {
            return Err(ZipError::Corrupt(
                "central directory size exceeds the archive's own size".into(),
            ));
        }

        let mut cd_buf = vec![0u8; cd_size as usize];
        source.read(Position::Absolute(cd_offset), cd_size as usize, &mut cd_buf)?;

        let mut directory = CentralDirectory::new();
        let mut remaining: &[u8] = &cd_buf;
        for _ in 0..entry_count {
            let cde = spec::CentralDirectoryEntry::parse_and_consume(&mut remaining)?;
            let metadata = FileMetadata::from_cde(&cde)?;
            directory.insert(Entry {
                name: metadata.path.as_str().to_string(),
                compression_method: metadata.compression_method,
                uncompressed_size: metadata.size as u64,
                compressed_size: metadata.compressed_size as u64,
                header_offset: metadata.header_offset as u64,
                crc32: metadata.crc32,
                last_modified: metadata.last_modified,
                comment: cde.file_comment.to_vec(),
                disk_number: cde.disk_number,
                internal_attributes: cde.internal_file_attributes,
                external_attributes: cde.external_file_attributes,
                extra_fields: central_directory::parse_extensible_fields(cde.extra_field),
            });
        }

        Ok(Self {
            source,
            directory: Mutex::new(directory),
            write_offset: Mutex::new(0),
            level: Level::DEFAULT,
        })
    }

    /// Finds the central directory, preferring the Zip64 record when a
    /// valid locator points to one (see [`crate::read::ZipArchive`] for the
    /// slice-based equivalent, which also handles prepended bytes; this
    /// assumes no prepended data).
    fn locate_central_directory(
        source: &dyn ByteSource,
        eocdr: &spec::EndOfCentralDirectory,
        eocdr_absolute: u64,
    ) -> ZipResult<(u64, u64, u64)> {
        if eocdr_absolute < ZIP64_LOCATOR_SIZE {
            return Ok((
                eocdr.central_directory_offset as u64,
                eocdr.central_directory_size as u64,
                eocdr.entries as u64,
            ));
        }

        let locator_offset = eocdr_absolute - ZIP64_LOCATOR_SIZE;
        let mut locator_buf = [0u8; ZIP64_LOCATOR_SIZE as usize];
        source.read(
            Position::Absolute(locator_offset),
            ZIP64_LOCATOR_SIZE as usize,
            &mut locator_buf,
        )?;

        let locator = match spec::Zip64EndOfCentralDirectoryLocator::parse(&locator_buf) {
            Some(l) => l,
            None => {
                return Ok((
                    eocdr.central_directory_offset as u64,
                    eocdr.central_directory_size as u64,
                    eocdr.entries as u64,
                ))
            }
        };

        let mut fixed = [0u8; ZIP64_EOCDR_FIXED_SIZE as usize];
        source.read(
            Position::Absolute(locator.zip64_eocdr_offset),
            ZIP64_EOCDR_FIXED_SIZE as usize,
            &mut fixed,
        )?;
        let declared_size = u64::from_le_bytes(fixed[4..12].try_into().unwrap());
        let total_size = (declared_size + 12) as usize;

        let mut full = vec![0u8; total_size];
        source.read(Position::Absolute(locator.zip64_eocdr_offset), total_size, &mut full)?;
        let zip64_eocdr = spec::Zip64EndOfCentralDirectory::parse(&full)?;

        Ok((
            zip64_eocdr.central_directory_offset,
            zip64_eocdr.central_directory_size,
            zip64_eocdr.entries,
        ))
    }

    /// Creates a new archive for writing at the local path `path`.
    /// (Writing to an HTTP(S) URL is rejected by [`source::open`].)
    pub fn create(path: &str, level: Level) -> ZipResult<Self> {
        let source = source::open(path, None, false, true)?;
        Ok(Self {
            source,
            directory: Mutex::new(CentralDirectory::new()),
            write_offset: Mutex::new(0),
            level,
        })
    }

    /// A snapshot of every entry currently in the central directory, in
    /// insertion order.
    pub fn entries(&self) -> Vec<Entry> {
        self.directory.lock().unwrap().entries().to_vec()
    }

    pub fn lookup(&self, name: &str) -> Option<Entry> {
        self.directory.lock().unwrap().lookup(name).cloned()
    }

    pub fn totals(&self) -> Totals {
        self.directory.lock().unwrap().totals()
    }

    /// Entries whose name matches the glob `pattern` (see [`glob::matches`]).
    pub fn entries_matching(&self, pattern: &str) -> Vec<Entry> {
        self.entries()
            .into_iter()
            .filter(|e| glob::matches(pattern, &e.name))
            .collect()
    }

    /// Reads the raw (still-compressed) bytes for `entry`.
    pub fn extract_raw(&self, entry: &Entry) -> ZipResult<Vec<u8>> {
        let mut prefix = [0u8; 30];
        let n = self.source.read(Position::Absolute(entry.header_offset), 30, &mut prefix)?;
        if n < 30 || prefix[..4] != [b'P', b'K', 3, 4] {
            return Err(ZipError::Corrupt(format!(
                "missing or truncated local file header for {}",
                entry.name
            )));
        }
        let name_len = u16::from_le_bytes([prefix[26], prefix[27]]) as u64;
        let extra_len = u16::from_le_bytes([prefix[28], prefix[29]]) as u64;
        let data_offset = entry.header_offset + 30 + name_len + extra_len;

        let mut compressed = vec![0u8; entry.compressed_size as usize];
        let read_n = self.source.read(Position::Absolute(data_offset), compressed.len(), &mut compressed)?;
        if (read_n as u64) < entry.compressed_size {
            return Err(ZipError::Corrupt(format!(
                "truncated compressed data for {}",
                entry.name
            )));
        }
        Ok(compressed)
    }

    /// Decompresses `entry`'s data and validates its CRC.
    pub fn extract_to_buffer(&self, entry: &Entry) -> ZipResult<Vec<u8>> {
        let compressed = self.extract_raw(entry)?;
        let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
        let mut crc = Crc32Accumulator::new();

        match entry.compression_method {
            CompressionMethod::None => {
                crc.update(&compressed);
                out = compressed;
            }
            CompressionMethod::Deflate => {
                let mut inflator = Inflator::new();
                inflator.feed(&compressed);
                loop {
                    let status = inflator.step(true)?;
                    crc.update(inflator.output_view());
                    out.extend_from_slice(inflator.output_view());
                    if matches!(status, Status::StreamEnd) {
                        break;
                    }
                    if !inflator.has_more_output() && inflator.needs_more_input() {
                        break;
                    }
                }
            }
            CompressionMethod::Unsupported(code) => {
                return Err(ZipError::Unsupported(format!(
                    "compression method {code} for {}",
                    entry.name
                )));
            }
        }

        if crc.finalize() != entry.crc32 {
            return Err(ZipError::Corrupt(format!("CRC mismatch for {}", entry.name)));
        }
        Ok(out)
    }

    /// Decompresses `entry` to a local file at `dest`, creating parent
    /// directories as needed.
    pub fn extract_to_file(&self, entry: &Entry, dest: &Utf8Path) -> ZipResult<()> {
        let data = self.extract_to_buffer(entry)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ZipError::WriteFailed { label: dest.to_string(), detail: e.to_string() })?;
        }
        std::fs::write(dest, &data)
            .map_err(|e| ZipError::WriteFailed { label: dest.to_string(), detail: e.to_string() })
    }

    /// Adds an in-memory file entry.
    pub fn add_buffer(&self, name: &str, data: &[u8], modified: NaiveDateTime) -> ZipResult<()> {
        self.write_entry(name, data, modified)
    }

    /// Adds a local file's contents, streamed in fixed-size chunks so the
    /// whole file never needs to live in memory at once.
    pub fn add_file(&self, name: &str, local_path: &Utf8Path, modified: NaiveDateTime) -> ZipResult<()> {
        let file = std::fs::File::open(local_path)
            .map_err(|e| ZipError::OpenFailed(local_path.to_string(), e.to_string()))?;
        self.write_entry(name, file, modified)
    }

    /// Adds a zero-length folder entry (its name is forced to end in `/`).
    pub fn add_folder(&self, name: &str, modified: NaiveDateTime) -> ZipResult<()> {
        let name = if name.ends_with('/') { name.to_string() } else { format!("{name}/") };
        self.write_entry(&name, std::io::empty(), modified)
    }

    fn write_entry<R: Read>(&self, name: &str, mut reader: R, modified: NaiveDateTime) -> ZipResult<()> {
        let mut write_cursor = self.write_offset.lock().unwrap();
        let header_offset = *write_cursor;

        let placeholder = Entry {
            name: name.to_string(),
            compression_method: CompressionMethod::Deflate,
            uncompressed_size: 0,
            compressed_size: 0,
            header_offset,
            crc32: 0,
            last_modified: modified,
            comment: Vec::new(),
            disk_number: 0,
            internal_attributes: 0,
            external_attributes: 0,
            extra_fields: Vec::new(),
        };
        let header = writer::build_local_header(&placeholder);
        self.source.write(Position::Absolute(header_offset), &header.bytes)?;
        let mut write_pos = header_offset + header.bytes.len() as u64;

        let mut deflator = Deflator::new(self.level);
        let mut crc = Crc32Accumulator::new();
        let mut uncompressed_len: u64 = 0;
        let mut compressed_len: u64 = 0;
        let mut saw_any_input = false;

        let mut chunk = vec![0u8; STREAM_CHUNK];
        loop {
            let n = reader
                .read(&mut chunk)
                .map_err(|e| ZipError::ReadFailed { label: name.to_string(), detail: e.to_string() })?;
            if n == 0 {
                break;
            }
            saw_any_input = true;
            uncompressed_len += n as u64;
            crc.update(&chunk[..n]);
            deflator.feed(&chunk[..n]);

            loop {
                let status = deflator.step(false)?;
                if !deflator.output_view().is_empty() {
                    self.source.write(Position::Absolute(write_pos), deflator.output_view())?;
                    write_pos += deflator.output_view().len() as u64;
                    compressed_len += deflator.output_view().len() as u64;
                }
                if matches!(status, Status::StreamEnd) || deflator.needs_more_input() {
                    break;
                }
            }
        }

        // An empty source (directory entries, zero-length files) is stored,
        // not deflated: skip the finishing pass entirely so no terminator
        // bytes for an "empty" deflate stream land on disk, which would
        // otherwise leave compressed_size > 0 on an entry tagged Store.
        if saw_any_input {
            loop {
                let status = deflator.step(true)?;
                if !deflator.output_view().is_empty() {
                    self.source.write(Position::Absolute(write_pos), deflator.output_view())?;
                    write_pos += deflator.output_view().len() as u64;
                    compressed_len += deflator.output_view().len() as u64;
                }
                if matches!(status, Status::StreamEnd) {
                    break;
                }
            }
        }

        let method = if saw_any_input { CompressionMethod::Deflate } else { CompressionMethod::None };
        let crc_value = crc.finalize();

        self.source.write(
            Position::Absolute(header_offset + header.crc_offset as u64),
            &crc_value.to_le_bytes(),
        )?;
        let mut sizes = Vec::with_capacity(16);
        sizes.extend_from_slice(&uncompressed_len.to_le_bytes());
        sizes.extend_from_slice(&compressed_len.to_le_bytes());
        self.source.write(
            Position::Absolute(header_offset + header.zip64_sizes_offset as u64),
            &sizes,
        )?;
        if !saw_any_input {
            // Re-tag the local header's compression-method field: an empty
            // entry was written as Deflate above (we don't know it's empty
            // until we've read it), but deflate of nothing still costs two
            // bytes, so switch it to Store.
            let mut method_field = [0u8; 2];
            method_field.copy_from_slice(&0u16.to_le_bytes());
            self.source.write(
                Position::Absolute(header_offset + 8),
                &method_field,
            )?;
        }

        *write_cursor = write_pos;
        drop(write_cursor);

        self.directory.lock().unwrap().insert(Entry {
            name: name.to_string(),
            compression_method: method,
            uncompressed_size: uncompressed_len,
            compressed_size: compressed_len,
            header_offset,
            crc32: crc_value,
            last_modified: modified,
            comment: Vec::new(),
            disk_number: 0,
            internal_attributes: 0,
            external_attributes: 0,
            extra_fields: Vec::new(),
        });

        Ok(())
    }

    /// Finalizes the archive: writes the central directory and its Zip64
    /// records, then closes the underlying byte source.
    pub fn close(&self) -> ZipResult<()> {
        let cd_start = *self.write_offset.lock().unwrap();
        let mut directory = self.directory.lock().unwrap();
        directory.finalize(cd_start)?;
        directory.write(self.source.as_ref())?;
        drop(directory);
        self.source.close()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn create_add_close_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.zip");
        let path_str = path.to_str().unwrap();

        let archive = Archive::create(path_str, Level::DEFAULT).unwrap();
        archive.add_buffer("hello.txt", b"hello, world!", now()).unwrap();
        archive.add_folder("sub", now()).unwrap();
        archive.add_buffer("sub/empty.bin", b"", now()).unwrap();
        archive.close().unwrap();

        let reread = Archive::open_read(path_str, None, false).unwrap();
        let totals = reread.totals();
        // hello.txt is the only entry with a nonzero size; "sub/" is a
        // folder by name, and "sub/empty.bin" is a zero-byte entry that
        // counts as a folder too, even though its name has no trailing
        // slash.
        assert_eq!(totals.files, 1);
        assert_eq!(totals.folders, 2);

        let hello = reread.lookup("hello.txt").unwrap();
        let data = reread.extract_to_buffer(&hello).unwrap();
        assert_eq!(data, b"hello, world!");

        let empty = reread.lookup("sub/empty.bin").unwrap();
        assert_eq!(empty.compression_method, CompressionMethod::None);
        assert_eq!(reread.extract_to_buffer(&empty).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn entries_matching_filters_by_glob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.zip");
        let path_str = path.to_str().unwrap();

        let archive = Archive::create(path_str, Level::DEFAULT).unwrap();
        archive.add_buffer("a.txt", b"a", now()).unwrap();
        archive.add_buffer("b.bin", b"b", now()).unwrap();
        archive.close().unwrap();

        let reread = Archive::open_read(path_str, None, false).unwrap();
        let matches = reread.entries_matching("*.txt");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "a.txt");
    }
}
