//! Standalone CRC-32 (IEEE 802.3) helpers, split out from [`crate::crc_reader`]
//! so non-streaming callers (the archive writer, the job engine's update
//! check) don't need to wrap a [`std::io::Read`] just to checksum a buffer.

use crc32fast::Hasher;

/// Extends a running CRC-32 with `bytes`, starting from `previous`.
///
/// `crc32(0, a)` computes the checksum of `a` from scratch. Checksums
/// compose: `crc32(0, [a, b].concat()) == crc32(crc32(0, a), b)`.
pub fn crc32(previous: u32, bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial(previous);
    hasher.update(bytes);
    hasher.finalize()
}

/// Incrementally computes a CRC-32 over a stream of chunks.
///
/// Used where a [`std::io::Read`] wrapper would be awkward: the job
/// engine's `update` check reads a local file in fixed-size chunks and
/// folds each one in before comparing against the archive's recorded CRC.
#[derive(Debug, Default, Clone)]
pub struct Crc32Accumulator {
    hasher: Hasher,
}

impl Crc32Accumulator {
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn composes() {
        let a = b"Hello, ";
        let b = b"World!";
        let whole = crc32(0, b"Hello, World!");
        let piecewise = crc32(crc32(0, a), b);
        assert_eq!(whole, piecewise);
    }

    #[test]
    fn accumulator_matches_one_shot() {
        let mut acc = Crc32Accumulator::new();
        acc.update(b"abc");
        acc.update(b"def");
        assert_eq!(acc.finalize(), crc32(0, b"abcdef"));
    }
}
