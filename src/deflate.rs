//! Streaming deflate compressor/decompressor façade.
//!
//! Thin wrapper over [`flate2`]'s raw-deflate (no zlib/gzip framing)
//! `Compress`/`Decompress` primitives, pinning the usage contract the rest
//! of the crate relies on: feed input, pump `step()` until output stops
//! appearing, and convert the "no progress possible yet" condition into a
//! benign `Ok` so callers only ever see real errors.
//!
//! Mirrors the shape of [`crate::crc_reader::Crc32Reader`]: a small
//! stateful wrapper around a well-tested upstream primitive, not a
//! reimplementation of deflate itself.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::result::{ZipError, ZipResult};

const INFLATE_BUF_SIZE: usize = 256 * 1024;
const DEFLATE_BUF_SIZE: usize = 1024 * 1024;

/// Compression level, `-1..=9`. `-1` selects the codec's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level(i32);

impl Level {
    pub const DEFAULT: Level = Level(-1);

    pub fn new(level: i32) -> ZipResult<Self> {
        if !(-1..=9).contains(&level) {
            return Err(ZipError::BadArgument(format!(
                "compression level {level} out of range -1..=9"
            )));
        }
        Ok(Level(level))
    }

    fn as_flate2(self) -> Compression {
        if self.0 < 0 {
            Compression::default()
        } else {
            Compression::new(self.0 as u32)
        }
    }
}

/// Streaming deflate decompressor.
///
/// Drive it by: [`Inflator::feed`] some compressed bytes, then loop
/// [`Inflator::step`] while [`Inflator::has_more_output`], reading
/// [`Inflator::output_view`] after each step (the view is replaced, not
/// appended to, on the next `step()` call, so drain it first).
pub struct Inflator {
    inner: Decompress,
    out_buf: Vec<u8>,
    out_filled: usize,
    in_buf: Vec<u8>,
    in_consumed_total: u64,
    out_produced_total: u64,
    last_status: Status,
    final_pass_pending: bool,
}

impl Inflator {
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(false),
            out_buf: vec![0u8; INFLATE_BUF_SIZE],
            out_filled: 0,
            in_buf: Vec::new(),
            in_consumed_total: 0,
            out_produced_total: 0,
            last_status: Status::Ok,
            final_pass_pending: false,
        }
    }

    /// Queues more compressed input. Appends; a caller that hasn't fully
    /// consumed a previous `feed()` (via `step()`) just grows the backlog.
    pub fn feed(&mut self, input: &[u8]) {
        self.in_buf.extend_from_slice(input);
    }

    pub fn needs_more_input(&self) -> bool {
        self.in_buf.is_empty() && !self.final_pass_pending
    }

    pub fn has_more_output(&self) -> bool {
        self.out_filled > 0
    }

    pub fn output_view(&self) -> &[u8] {
        &self.out_buf[..self.out_filled]
    }

    /// Performs one decompression pass, filling `output_view()` from
    /// scratch. `final_=true` signals no more input will ever be fed
    /// (used to flush any last partial block).
    pub fn step(&mut self, final_: bool) -> ZipResult<Status> {
        if matches!(self.last_status, Status::StreamEnd) {
            return Ok(self.last_status);
        }

        let before_in = self.inner.total_in();
        let before_out = self.inner.total_out();

        let flush = if final_ {
            FlushDecompress::Finish
        } else {
            FlushDecompress::None
        };

        let result = self.inner.decompress(&self.in_buf, &mut self.out_buf, flush);

        let consumed = (self.inner.total_in() - before_in) as usize;
        let produced = (self.inner.total_out() - before_out) as usize;

        self.in_buf.drain(..consumed);
        self.in_consumed_total += consumed as u64;
        self.out_filled = produced;
        self.out_produced_total += produced as u64;

        let status = match result {
            Ok(s) => s,
            // Z_BUF_ERROR-equivalent: no progress possible yet, but not a
            // real error. Benign so long as we made *some* progress or
            // still have pending input/output to work with.
            Err(_) if consumed > 0 || produced > 0 => Status::Ok,
            Err(e) => return Err(ZipError::Corrupt(format!("inflate error: {e}"))),
        };

        // Exhausted both input and output but status is still Ok: the
        // decompressor wants another pass with the same (now-drained)
        // state before it'll report anything new.
        self.final_pass_pending =
            matches!(status, Status::Ok) && consumed == 0 && produced == 0 && !self.in_buf.is_empty();

        self.last_status = status;
        Ok(status)
    }

    pub fn reset(&mut self) {
        self.inner.reset(false);
        self.out_filled = 0;
        self.in_buf.clear();
        self.in_consumed_total = 0;
        self.out_produced_total = 0;
        self.last_status = Status::Ok;
        self.final_pass_pending = false;
    }

    pub fn total_in(&self) -> u64 {
        self.in_consumed_total
    }

    pub fn total_out(&self) -> u64 {
        self.out_produced_total
    }
}

impl Default for Inflator {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming deflate compressor. Same pump contract as [`Inflator`].
pub struct Deflator {
    inner: Compress,
    out_buf: Vec<u8>,
    out_filled: usize,
    in_buf: Vec<u8>,
    in_consumed_total: u64,
    out_produced_total: u64,
    last_status: Status,
}

impl Deflator {
    pub fn new(level: Level) -> Self {
        Self {
            inner: Compress::new(level.as_flate2(), false),
            out_buf: vec![0u8; DEFLATE_BUF_SIZE],
            out_filled: 0,
            in_buf: Vec::new(),
            in_consumed_total: 0,
            out_produced_total: 0,
            last_status: Status::Ok,
        }
    }

    pub fn feed(&mut self, input: &[u8]) {
        self.in_buf.extend_from_slice(input);
    }

    pub fn needs_more_input(&self) -> bool {
        self.in_buf.is_empty()
    }

    pub fn has_more_output(&self) -> bool {
        self.out_filled > 0
    }

    pub fn output_view(&self) -> &[u8] {
        &self.out_buf[..self.out_filled]
    }

    pub fn step(&mut self, final_: bool) -> ZipResult<Status> {
        if matches!(self.last_status, Status::StreamEnd) {
            return Ok(self.last_status);
        }

        let before_in = self.inner.total_in();
        let before_out = self.inner.total_out();

        let flush = if final_ {
            FlushCompress::Finish
        } else {
            FlushCompress::Sync
        };

        let result = self.inner.compress(&self.in_buf, &mut self.out_buf, flush);

        let consumed = (self.inner.total_in() - before_in) as usize;
        let produced = (self.inner.total_out() - before_out) as usize;

        self.in_buf.drain(..consumed);
        self.in_consumed_total += consumed as u64;
        self.out_filled = produced;
        self.out_produced_total += produced as u64;

        let status = match result {
            Ok(s) => s,
            Err(_) if consumed > 0 || produced > 0 => Status::Ok,
            Err(e) => return Err(ZipError::Corrupt(format!("deflate error: {e}"))),
        };

        self.last_status = status;
        Ok(status)
    }

    pub fn reset(&mut self, level: Level) {
        self.inner.reset();
        let _ = level; // flate2's Compress::reset() keeps the original level/header settings.
        self.out_filled = 0;
        self.in_buf.clear();
        self.in_consumed_total = 0;
        self.out_produced_total = 0;
        self.last_status = Status::Ok;
    }

    pub fn total_in(&self) -> u64 {
        self.in_consumed_total
    }

    pub fn total_out(&self) -> u64 {
        self.out_produced_total
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(data: &[u8], level: Level) -> Vec<u8> {
        let mut deflator = Deflator::new(level);
        let mut compressed = Vec::new();
        deflator.feed(data);
        loop {
            let status = deflator.step(true).unwrap();
            compressed.extend_from_slice(deflator.output_view());
            if matches!(status, Status::StreamEnd) {
                break;
            }
        }

        let mut inflator = Inflator::new();
        let mut decompressed = Vec::new();
        inflator.feed(&compressed);
        loop {
            let status = inflator.step(true).unwrap();
            decompressed.extend_from_slice(inflator.output_view());
            if matches!(status, Status::StreamEnd) {
                break;
            }
            if !inflator.has_more_output() && inflator.needs_more_input() {
                break;
            }
        }
        decompressed
    }

    #[test]
    fn roundtrip_default_level() {
        let data = b"Hello, World! Hello, World! Hello, World!".repeat(100);
        assert_eq!(roundtrip(&data, Level::DEFAULT), data);
    }

    #[test]
    fn roundtrip_all_levels() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        for level in 0..=9 {
            let lvl = Level::new(level).unwrap();
            assert_eq!(roundtrip(&data, lvl), data, "level {level}");
        }
    }

    #[test]
    fn rejects_out_of_range_level() {
        assert!(Level::new(10).is_err());
        assert!(Level::new(-2).is_err());
    }

    #[test]
    fn roundtrip_empty() {
        assert_eq!(roundtrip(b"", Level::DEFAULT), Vec::<u8>::new());
    }
}
