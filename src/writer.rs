//! Emits the ZIP record types [`crate::spec`] parses: local file headers,
//! central directory entries, and the Zip64 end-of-CD record/locator/EOCDR
//! trio. Mirror-image of `spec.rs`'s parsing code (APPNOTE §4), written in
//! the same idiom: little-endian appenders, no intermediate
//! struct-of-bytes abstraction beyond what parsing already established.

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::central_directory::Entry;
use crate::read::CompressionMethod;

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Converts a wall-clock timestamp to packed MS-DOS (time, date).
///
/// Years before 1980 saturate to 1980 (the MS-DOS epoch); seconds are
/// halved (2-second precision) and an odd second rounds down. The month
/// field is always 1-based, per APPNOTE (see the Open Question in
/// DESIGN.md).
pub fn to_msdos(dt: NaiveDateTime) -> (u16, u16) {
    let year = (dt.year() - 1980).max(0) as u16;
    let month = dt.month() as u16; // 1-based
    let day = dt.day() as u16;
    let date = (year << 9) | (month << 5) | day;

    let hour = dt.hour() as u16;
    let minute = dt.minute() as u16;
    let second_halves = (dt.second() / 2) as u16;
    let time = (hour << 11) | (minute << 5) | second_halves;

    (time, date)
}

fn compression_method_code(method: CompressionMethod) -> u16 {
    match method {
        CompressionMethod::None => 0,
        CompressionMethod::Deflate => 8,
        CompressionMethod::Unsupported(code) => code,
    }
}

/// A placeholder local file header for `entry`, plus the byte offsets (from
/// the start of this header) where the CRC and Zip64 extra sizes must later
/// be patched once the real compressed bytes have been streamed out.
pub struct LocalHeader {
    pub bytes: Vec<u8>,
    pub crc_offset: usize,
    pub zip64_sizes_offset: usize,
}

/// Builds a local file header for `entry`, with sizes left as placeholders
/// (0xFFFFFFFF, per the always-Zip64-extra writer contract) and CRC left
/// as 0 — the caller patches both in once streaming finishes.
pub fn build_local_header(entry: &Entry) -> LocalHeader {
    let (time, date) = to_msdos(entry.last_modified);
    let name = entry.name.as_bytes();

    let mut zip64_extra = Vec::new();
    put_u16(&mut zip64_extra, 0x0001);
    put_u16(&mut zip64_extra, 16);
    put_u64(&mut zip64_extra, 0); // uncompressed, patched later
    put_u64(&mut zip64_extra, 0); // compressed, patched later

    let mut bytes = Vec::with_capacity(30 + name.len() + zip64_extra.len());
    bytes.extend_from_slice(&[b'P', b'K', 3, 4]);
    put_u16(&mut bytes, 45); // version needed to extract
    put_u16(&mut bytes, 0x0002); // general purpose flag
    put_u16(&mut bytes, compression_method_code(entry.compression_method));
    put_u16(&mut bytes, time);
    put_u16(&mut bytes, date);
    let crc_offset = bytes.len();
    put_u32(&mut bytes, 0); // crc32, patched later
    put_u32(&mut bytes, 0xFFFFFFFF); // compressed size
    put_u32(&mut bytes, 0xFFFFFFFF); // uncompressed size
    put_u16(&mut bytes, name.len() as u16);
    put_u16(&mut bytes, zip64_extra.len() as u16);
    bytes.extend_from_slice(name);
    let zip64_sizes_offset = bytes.len() + 4; // skip the extra's own tag+size header
    bytes.extend_from_slice(&zip64_extra);

    LocalHeader {
        bytes,
        crc_offset,
        zip64_sizes_offset,
    }
}

/// Builds a central directory entry record for `entry`.
pub fn build_cd_entry(entry: &Entry) -> Vec<u8> {
    let (time, date) = to_msdos(entry.last_modified);
    let name = entry.name.as_bytes();
    let comment = &entry.comment;

    let mut zip64_extra = Vec::new();
    put_u16(&mut zip64_extra, 0x0001);
    put_u16(&mut zip64_extra, 28);
    put_u64(&mut zip64_extra, entry.uncompressed_size);
    put_u64(&mut zip64_extra, entry.compressed_size);
    put_u64(&mut zip64_extra, entry.header_offset);
    put_u32(&mut zip64_extra, 0); // disk number, always emitted per the writer contract

    let mut bytes = Vec::with_capacity(46 + name.len() + zip64_extra.len() + comment.len());
    bytes.extend_from_slice(&[b'P', b'K', 1, 2]);
    put_u16(&mut bytes, 45); // version made by
    put_u16(&mut bytes, 45); // version needed to extract
    put_u16(&mut bytes, 0x0002);
    put_u16(&mut bytes, compression_method_code(entry.compression_method));
    put_u16(&mut bytes, time);
    put_u16(&mut bytes, date);
    put_u32(&mut bytes, entry.crc32);
    put_u32(&mut bytes, 0xFFFFFFFF);
    put_u32(&mut bytes, 0xFFFFFFFF);
    put_u16(&mut bytes, name.len() as u16);
    put_u16(&mut bytes, zip64_extra.len() as u16);
    put_u16(&mut bytes, comment.len() as u16);
    put_u16(&mut bytes, 0xFFFF); // disk number start, moved to the extra
    put_u16(&mut bytes, 0); // internal attributes
    put_u32(&mut bytes, 0); // external attributes
    put_u32(&mut bytes, 0xFFFFFFFF); // local header offset
    bytes.extend_from_slice(name);
    bytes.extend_from_slice(&zip64_extra);
    bytes.extend_from_slice(comment);
    bytes
}

/// Builds the Zip64 end-of-central-directory record.
pub fn build_zip64_eocdr(entry_count: u64, cd_size: u64, cd_offset: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(56);
    bytes.extend_from_slice(&[b'P', b'K', 6, 6]);
    put_u64(&mut bytes, 44); // size of remaining record (56 - 12), no extensible data
    put_u16(&mut bytes, 45); // version made by
    put_u16(&mut bytes, 45); // version needed to extract
    put_u32(&mut bytes, 0); // disk number
    put_u32(&mut bytes, 0); // disk with CD
    put_u64(&mut bytes, entry_count); // entries on this disk
    put_u64(&mut bytes, entry_count); // total entries
    put_u64(&mut bytes, cd_size);
    put_u64(&mut bytes, cd_offset);
    bytes
}

/// Builds the Zip64 end-of-CD locator, pointing at `zip64_eocdr_offset`.
pub fn build_zip64_locator(zip64_eocdr_offset: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(20);
    bytes.extend_from_slice(&[b'P', b'K', 6, 7]);
    put_u32(&mut bytes, 0); // disk with CD
    put_u64(&mut bytes, zip64_eocdr_offset);
    put_u32(&mut bytes, 1); // total disks
    bytes
}

/// Builds the end-of-CD record. Since this writer always promotes to
/// Zip64, the CD-start-offset field is always `0xFFFFFFFF`; the entry
/// count and CD size fields follow the same convention when they'd
/// otherwise overflow their 32-bit home.
pub fn build_eocdr(entry_count: u64, cd_size: u64, comment: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(22 + comment.len());
    bytes.extend_from_slice(&[b'P', b'K', 5, 6]);
    put_u16(&mut bytes, 0); // disk number
    put_u16(&mut bytes, 0); // disk with CD
    put_u16(&mut bytes, entry_count.min(0xFFFF) as u16);
    put_u16(&mut bytes, entry_count.min(0xFFFF) as u16);
    put_u32(&mut bytes, cd_size.min(0xFFFFFFFF) as u32);
    put_u32(&mut bytes, 0xFFFFFFFF);
    put_u16(&mut bytes, comment.len() as u16);
    bytes.extend_from_slice(comment);
    bytes
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn msdos_timestamp_round_numbers() {
        let dt = NaiveDate::from_ymd_opt(2020, 3, 15)
            .unwrap()
            .and_hms_opt(13, 45, 30)
            .unwrap();
        let (time, date) = to_msdos(dt);
        assert_eq!((date >> 9) + 1980, 2020);
        assert_eq!((date >> 5) & 0xF, 3);
        assert_eq!(date & 0x1F, 15);
        assert_eq!(time >> 11, 13);
        assert_eq!((time >> 5) & 0x3F, 45);
        assert_eq!((time & 0x1F) * 2, 30);
    }

    #[test]
    fn msdos_timestamp_saturates_pre_1980() {
        let dt = NaiveDate::from_ymd_opt(1975, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let (_, date) = to_msdos(dt);
        assert_eq!((date >> 9) + 1980, 1980);
    }

    #[test]
    fn msdos_timestamp_rounds_odd_seconds_down() {
        let dt = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 3)
            .unwrap();
        let (time, _) = to_msdos(dt);
        assert_eq!((time & 0x1F) * 2, 2);
    }
}
