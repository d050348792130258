//! Cache-based bit reader over a pull-based byte source.
//!
//! Data flows source -> L2 -> L1. The L2 cache is a 4 KiB block refilled in
//! bulk from [`ByteSource::read`], amortizing the callback cost; the L1 cache
//! is a single 64-bit register from which the hot extraction paths operate.
//! At end of stream the bytes that do not fill a whole L1 word are tracked
//! separately and consumed through a slower bit-exact path.
//!
//! The reader keeps a rolling CRC-16 over consumed bytes, updated lazily one
//! L1 word at a time. The CRC can be re-seeded and sampled at any byte-aligned
//! position, which is how per-frame checksums are accumulated without a
//! second pass over the data.

use crate::crc;
use crate::error::{Error, Result};
use crate::source::{ByteSource, SeekOrigin};

/// Size of the L2 cache in bytes. One refill pulls this much from the source.
const L2_BYTES: usize = 4096;
const L2_WORDS: usize = L2_BYTES / 8;

#[inline]
fn shl64(value: u64, count: u32) -> u64 {
    if count >= 64 {
        0
    } else {
        value << count
    }
}

/// Bit reader with a two-level cache and a rolling CRC-16.
pub struct BitCache<S: ByteSource> {
    source: S,

    /// L1: the word currently being consumed. Remaining bits are justified to
    /// the most significant end; bits below `bits_avail` are always zero.
    cache: u64,
    /// Unconsumed bits left in `cache`.
    bits_avail: u32,
    /// Number of valid bits the current word started with (64, or a whole
    /// number of tail bytes at end of stream; 0 when no word is loaded).
    word_bits: u32,

    /// L2: bulk-refilled lines waiting to be promoted into L1.
    l2: Box<[u64; L2_WORDS]>,
    l2_next: usize,
    l2_count: usize,

    /// Trailing bytes that did not fill a whole word, MSB-justified. Only
    /// non-empty once the source has signalled end of stream.
    tail: u64,
    tail_bytes: u32,

    /// The source returned a short read; no further refills will be issued.
    exhausted: bool,

    /// Rolling CRC-16 state. `crc16_cache` holds the original value of the
    /// current word; `crc16_ignore` counts leading bytes of that word that
    /// predate the last reset and must not be folded in.
    crc16: u16,
    crc16_cache: u64,
    crc16_ignore: u32,

    /// Absolute byte offset one past the last byte pulled from the source.
    fetched: u64,
}

impl<S: ByteSource> BitCache<S> {
    /// Wrap a byte source, positioned at its current read position.
    pub fn new(source: S) -> Self {
        BitCache {
            source,
            cache: 0,
            bits_avail: 0,
            word_bits: 0,
            l2: Box::new([0; L2_WORDS]),
            l2_next: 0,
            l2_count: 0,
            tail: 0,
            tail_bytes: 0,
            exhausted: false,
            crc16: 0,
            crc16_cache: 0,
            crc16_ignore: 0,
            fetched: 0,
        }
    }

    /// Total stream length, if the underlying source knows it.
    pub fn byte_len(&mut self) -> Option<u64> {
        self.source.byte_len()
    }

    /// Absolute byte offset of the read cursor. Only meaningful at
    /// byte-aligned positions (partial bits round down).
    pub fn position(&self) -> u64 {
        let buffered = (self.l2_count - self.l2_next) as u64 * 8
            + self.tail_bytes as u64
            + (self.bits_avail / 8) as u64;
        self.fetched - buffered
    }

    /// Whether the cursor sits on a byte boundary.
    pub fn is_byte_aligned(&self) -> bool {
        (self.word_bits - self.bits_avail) % 8 == 0
    }

    /// Reposition the source to an absolute byte offset, discarding all
    /// cached data and CRC state.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        if !self.source.seek(offset, SeekOrigin::Start) {
            return Err(Error::SeekFailed { offset });
        }
        self.cache = 0;
        self.bits_avail = 0;
        self.word_bits = 0;
        self.l2_next = 0;
        self.l2_count = 0;
        self.tail = 0;
        self.tail_bytes = 0;
        self.exhausted = false;
        self.crc16 = 0;
        self.crc16_cache = 0;
        self.crc16_ignore = 0;
        self.fetched = offset;
        Ok(())
    }

    fn reload_l2(&mut self) {
        if self.exhausted {
            return;
        }
        let mut buf = [0u8; L2_BYTES];
        let n = self.source.read(&mut buf);
        self.fetched += n as u64;
        if n < L2_BYTES {
            self.exhausted = true;
        }
        let words = n / 8;
        for i in 0..words {
            let o = i * 8;
            self.l2[i] = u64::from_be_bytes([
                buf[o],
                buf[o + 1],
                buf[o + 2],
                buf[o + 3],
                buf[o + 4],
                buf[o + 5],
                buf[o + 6],
                buf[o + 7],
            ]);
        }
        self.l2_next = 0;
        self.l2_count = words;
        let rem = n - words * 8;
        if rem > 0 {
            let mut t = 0u64;
            for &b in &buf[words * 8..n] {
                t = (t << 8) | b as u64;
            }
            self.tail = t << (8 * (8 - rem as u32));
            self.tail_bytes = rem as u32;
        }
    }

    /// Promote the next word into L1. The current word must be fully
    /// consumed. Fails with `EndOfStream` when no data remains.
    fn reload_l1(&mut self) -> Result<()> {
        self.crc16_retire_word();
        if self.l2_next >= self.l2_count {
            self.reload_l2();
        }
        if self.l2_next < self.l2_count {
            let word = self.l2[self.l2_next];
            self.l2_next += 1;
            self.cache = word;
            self.bits_avail = 64;
            self.word_bits = 64;
            self.crc16_cache = word;
            return Ok(());
        }
        if self.tail_bytes > 0 {
            self.cache = self.tail;
            self.word_bits = self.tail_bytes * 8;
            self.bits_avail = self.word_bits;
            self.crc16_cache = self.tail;
            self.tail = 0;
            self.tail_bytes = 0;
            return Ok(());
        }
        Err(Error::EndOfStream)
    }

    /// Read up to 32 bits, MSB-first.
    pub fn read_u32(&mut self, n: u32) -> Result<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(Error::InvalidParameter("bit count exceeds 32"));
        }
        if self.bits_avail == 0 {
            self.reload_l1()?;
        }
        if n <= self.bits_avail {
            let value = (self.cache >> (64 - n)) as u32;
            self.cache = shl64(self.cache, n);
            self.bits_avail -= n;
            return Ok(value);
        }
        // Straddles a word boundary: take what is left, then the rest from
        // the next word.
        let hi_bits = self.bits_avail;
        let hi = (self.cache >> (64 - hi_bits)) as u32;
        self.cache = 0;
        self.bits_avail = 0;
        self.reload_l1()?;
        let lo_bits = n - hi_bits;
        if lo_bits > self.bits_avail {
            return Err(Error::EndOfStream);
        }
        let lo = (self.cache >> (64 - lo_bits)) as u32;
        self.cache = shl64(self.cache, lo_bits);
        self.bits_avail -= lo_bits;
        Ok((hi << lo_bits) | lo)
    }

    /// Read up to 64 bits, MSB-first.
    pub fn read_u64(&mut self, n: u32) -> Result<u64> {
        if n <= 32 {
            return Ok(self.read_u32(n)? as u64);
        }
        if n > 64 {
            return Err(Error::InvalidParameter("bit count exceeds 64"));
        }
        let hi = self.read_u32(n - 32)? as u64;
        let lo = self.read_u32(32)? as u64;
        Ok((hi << 32) | lo)
    }

    /// Read up to 32 bits as a sign-extended two's-complement value.
    pub fn read_i32(&mut self, n: u32) -> Result<i32> {
        if n == 0 {
            return Ok(0);
        }
        let value = self.read_u32(n)?;
        if n == 32 {
            return Ok(value as i32);
        }
        Ok(((value << (32 - n)) as i32) >> (32 - n))
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_u32(8)? as u8)
    }

    /// Fill `out` with the next bytes.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        for slot in out.iter_mut() {
            *slot = self.read_u8()?;
        }
        Ok(())
    }

    /// Consume and discard `count` bytes, reading through the cache so that
    /// CRC and tail state stay consistent even on unseekable sources.
    pub fn skip_bytes(&mut self, count: u64) -> Result<()> {
        let mut scratch = [0u8; 512];
        let mut remaining = count;
        while remaining > 0 {
            let n = remaining.min(scratch.len() as u64) as usize;
            self.read_bytes(&mut scratch[..n])?;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Count consecutive zero bits up to and including the terminating one
    /// bit, returning the zero count. Fails with `EndOfStream` if the stream
    /// ends before a terminator.
    pub fn read_unary(&mut self) -> Result<u32> {
        let mut count = 0u32;
        loop {
            if self.bits_avail == 0 {
                self.reload_l1()?;
            }
            let zeros = self.cache.leading_zeros();
            if zeros >= self.bits_avail {
                // Every remaining bit in this word is zero.
                count += self.bits_avail;
                self.cache = 0;
                self.bits_avail = 0;
                continue;
            }
            let consumed = zeros + 1;
            self.cache = shl64(self.cache, consumed);
            self.bits_avail -= consumed;
            return Ok(count + zeros);
        }
    }

    /// Consume padding bits up to the next byte boundary.
    pub fn align_to_byte(&mut self) -> Result<()> {
        let partial = (self.word_bits - self.bits_avail) % 8;
        if partial != 0 {
            self.read_u32(8 - partial)?;
        }
        Ok(())
    }

    /// Reset the rolling CRC-16 at a byte-aligned position, pre-folding
    /// `seed` — bytes that logically belong to the checksummed region but
    /// were already consumed (e.g. sync bytes recognised after the fact).
    pub fn reset_crc16(&mut self, seed: &[u8]) {
        debug_assert!(self.is_byte_aligned());
        self.crc16 = crc::crc16(0, seed);
        self.crc16_ignore = (self.word_bits - self.bits_avail) / 8;
    }

    /// Sample the rolling CRC-16 at a byte-aligned position, folding in all
    /// bytes consumed since the last reset.
    pub fn crc16(&mut self) -> u16 {
        debug_assert!(self.is_byte_aligned());
        let consumed = (self.word_bits - self.bits_avail) / 8;
        self.crc16_fold_range(self.crc16_ignore, consumed);
        self.crc16_ignore = consumed;
        self.crc16
    }

    fn crc16_retire_word(&mut self) {
        let valid = self.word_bits / 8;
        self.crc16_fold_range(self.crc16_ignore, valid);
        self.crc16_ignore = 0;
        self.word_bits = 0;
    }

    fn crc16_fold_range(&mut self, from: u32, to: u32) {
        for i in from..to {
            let byte = (self.crc16_cache >> (56 - 8 * i)) as u8;
            self.crc16 = crc::crc16_byte(self.crc16, byte);
        }
    }
}
