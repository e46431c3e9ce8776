//! Fixed-size line cache for HTTP range reads.
//!
//! Small, possibly-overlapping random reads over a high-latency connection
//! are expensive one at a time, so reads are grouped into fixed-size
//! "lines". A reader that wants bytes already covered by a line just waits
//! on it; a reader whose bytes aren't covered reserves a new line and is
//! responsible for filling it.
//!
//! Lines are shared via `Arc` and gated by a `Mutex`/`Condvar` pair per
//! line, so a reserving thread's network fetch never blocks the cache's
//! global lock while other lines are read or reserved.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::result::{ZipError, ZipResult};

/// Design-default line size: 32 KiB.
pub const DEFAULT_LINE_SIZE: u64 = 32 * 1024;
/// Design-default cache capacity: 64 lines.
pub const DEFAULT_MAX_LINES: usize = 64;
/// How long `get()` will wait for a reserving thread to commit.
const COMMIT_WAIT: Duration = Duration::from_secs(60);

struct LineState {
    /// Bytes backing this line, valid from `base_offset` through
    /// `base_offset + filled_len`. A reserver fetches the whole
    /// `unfulfilled` interval in one shot and commits it in one call, so
    /// there's no partial-fill bookkeeping to do beyond this single split.
    buf: Vec<u8>,
    filled_len: usize,
    committed: bool,
    fulfilled_at: Option<Instant>,
}

/// A fixed-size byte-range slot in the cache.
pub struct CacheLine {
    pub base_offset: u64,
    size: u64,
    /// `[lo, hi)` absolute file-offset interval that still needs fetching
    /// from the network as of reservation time; narrowed in place by
    /// [`CacheLine::prefill`] before the reserver ever sees it.
    unfulfilled: Mutex<(u64, u64)>,
    state: Mutex<LineState>,
    cond: Condvar,
}

impl CacheLine {
    fn new(base_offset: u64, size: u64) -> Self {
        Self {
            base_offset,
            size,
            unfulfilled: Mutex::new((base_offset, base_offset + size)),
            state: Mutex::new(LineState {
                buf: vec![0u8; size as usize],
                filled_len: 0,
                committed: false,
                fulfilled_at: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// The byte range the reserver must still fetch from the backend.
    pub fn unfulfilled_interval(&self) -> (u64, u64) {
        *self.unfulfilled.lock().unwrap()
    }

    /// Copies bytes already available in a committed `other` line into
    /// this not-yet-committed line, narrowing `unfulfilled` accordingly.
    /// No-op if the two lines don't overlap.
    fn prefill_from(&self, other: &CacheLine) {
        let other_state = other.state.lock().unwrap();
        if !other_state.committed {
            return;
        }
        let other_lo = other.base_offset;
        let other_hi = other.base_offset + other_state.filled_len as u64;

        let mut unfulfilled = self.unfulfilled.lock().unwrap();
        let (lo, hi) = *unfulfilled;
        let overlap_lo = lo.max(other_lo);
        let overlap_hi = hi.min(other_hi);
        if overlap_lo >= overlap_hi {
            return;
        }

        let mut state = self.state.lock().unwrap();
        let dst_start = (overlap_lo - self.base_offset) as usize;
        let dst_end = (overlap_hi - self.base_offset) as usize;
        let src_start = (overlap_lo - other.base_offset) as usize;
        let src_end = (overlap_hi - other.base_offset) as usize;
        state.buf[dst_start..dst_end].copy_from_slice(&other_state.buf[src_start..src_end]);
        state.filled_len = state.filled_len.max(dst_end);

        // Only the low end of `unfulfilled` is ever narrowed: reservers
        // fetch one contiguous remaining range, so a gap opening in the
        // middle never needs representing.
        if overlap_lo <= lo {
            *unfulfilled = (overlap_hi.max(lo), hi);
        }
    }

    /// Fills the (now possibly narrowed) unfulfilled interval with
    /// `bytes` and marks the line committed, waking any waiters. `bytes`
    /// must cover exactly `unfulfilled_interval()`.
    pub fn commit(&self, bytes: &[u8]) {
        let (lo, hi) = *self.unfulfilled.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        let start = (lo - self.base_offset) as usize;
        let end = (hi - self.base_offset) as usize;
        state.buf[start..start + bytes.len()].copy_from_slice(bytes);
        state.filled_len = state.filled_len.max(end.min(start + bytes.len()));
        state.committed = true;
        state.fulfilled_at = Some(Instant::now());
        self.cond.notify_all();
    }

    /// Blocks until committed (bounded by `COMMIT_WAIT`), then copies
    /// `len` bytes starting at absolute `offset` into `dst`.
    pub fn get(&self, offset: u64, len: usize, dst: &mut [u8]) -> ZipResult<()> {
        let mut state = self.state.lock().unwrap();
        while !state.committed {
            let (new_state, result) = self.cond.wait_timeout(state, COMMIT_WAIT).unwrap();
            state = new_state;
            if result.timed_out() && !state.committed {
                return Err(ZipError::Transient(
                    "timed out waiting for HTTP cache line to commit".into(),
                ));
            }
        }
        let start = (offset - self.base_offset) as usize;
        dst.copy_from_slice(&state.buf[start..start + len]);
        Ok(())
    }
}

/// Bounded mapping from base-offset to cache line, with committed-line
/// eviction when full.
pub struct RangeCache {
    line_size: u64,
    max_lines: usize,
    lines: Mutex<HashMap<u64, Arc<CacheLine>>>,
    bytes_reserved: std::sync::atomic::AtomicU64,
}

impl RangeCache {
    pub fn new(line_size: u64, max_lines: usize) -> Self {
        Self {
            line_size,
            max_lines,
            lines: Mutex::new(HashMap::new()),
            bytes_reserved: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn line_size(&self) -> u64 {
        self.line_size
    }

    pub fn bytes_reserved(&self) -> u64 {
        self.bytes_reserved
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Checks whether `[offset, offset+len)` is already covered by an
    /// existing line; if not, atomically reserves a new one, pre-filling
    /// it from whatever committed lines already overlap it. Returns
    /// `(line, is_new)`: if `is_new`, the caller must fetch
    /// `line.unfulfilled_interval()` from the backend and `commit()` it.
    pub fn check_or_reserve(&self, offset: u64, len: u64) -> ZipResult<(Arc<CacheLine>, bool)> {
        let mut lines = self.lines.lock().unwrap();

        for line in lines.values() {
            if line.base_offset <= offset && offset + len <= line.base_offset + self.line_size {
                return Ok((line.clone(), false));
            }
        }

        if lines.len() >= self.max_lines {
            let evictable = lines
                .iter()
                .filter_map(|(k, l)| l.state.lock().unwrap().fulfilled_at.map(|t| (*k, t)))
                .min_by_key(|(_, t)| *t);
            match evictable {
                Some((key, _)) => {
                    lines.remove(&key);
                }
                None => {
                    return Err(ZipError::Unsupported(
                        "HTTP range cache exhausted: every line is reserved but uncommitted"
                            .into(),
                    ));
                }
            }
        }

        let new_line = Arc::new(CacheLine::new(offset, self.line_size));
        for old in lines.values() {
            new_line.prefill_from(old);
        }
        self.bytes_reserved
            .fetch_add(self.line_size, std::sync::atomic::Ordering::Relaxed);
        lines.insert(offset, new_line.clone());
        Ok((new_line, true))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_reservation_is_new() {
        let cache = RangeCache::new(1024, 4);
        let (line, is_new) = cache.check_or_reserve(0, 100).unwrap();
        assert!(is_new);
        line.commit(&vec![0u8; 1024]);
        let (_line2, is_new2) = cache.check_or_reserve(10, 50).unwrap();
        assert!(!is_new2, "second read should be covered by the first line");
    }

    #[test]
    fn get_returns_committed_bytes() {
        let cache = RangeCache::new(16, 4);
        let (line, is_new) = cache.check_or_reserve(0, 8).unwrap();
        assert!(is_new);
        let data: Vec<u8> = (0..16).collect();
        line.commit(&data);

        let mut dst = [0u8; 8];
        line.get(0, 8, &mut dst).unwrap();
        assert_eq!(dst, data[0..8]);
    }

    #[test]
    fn exhaustion_when_all_reserved() {
        let cache = RangeCache::new(16, 1);
        let (_line, is_new) = cache.check_or_reserve(0, 8).unwrap();
        assert!(is_new);
        // The sole line is reserved but never committed; a second,
        // non-overlapping reservation can't evict it.
        let result = cache.check_or_reserve(1000, 8);
        assert!(result.is_err());
    }

    #[test]
    fn evicts_oldest_committed_line() {
        let cache = RangeCache::new(16, 1);
        let (line, _) = cache.check_or_reserve(0, 8).unwrap();
        line.commit(&vec![0u8; 16]);
        // Now the cache is full but the only line is committed, so a new
        // non-overlapping reservation should evict it rather than fail.
        let (line2, is_new2) = cache.check_or_reserve(1000, 8).unwrap();
        assert!(is_new2);
        line2.commit(&vec![1u8; 16]);
    }

    #[test]
    fn overlapping_reservation_prefills_from_committed_line() {
        let cache = RangeCache::new(16, 4);
        let (line1, _) = cache.check_or_reserve(0, 16).unwrap();
        let data: Vec<u8> = (0..16).collect();
        line1.commit(&data);

        // A read straddling the end of line1 reserves a new line whose
        // low end (the overlap with line1) should already be filled.
        let (line2, is_new2) = cache.check_or_reserve(8, 16).unwrap();
        assert!(is_new2);
        let (lo, hi) = line2.unfulfilled_interval();
        assert_eq!((lo, hi), (16, 24));
    }
}
