//! Bit-level writer, the mirror of the cached reader.
//!
//! Mainly used to synthesize coded streams in tests and tools; the writer is
//! buffer-backed and has no streaming requirements.

/// A bitstream writer producing MSB-first packed bytes.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    bit_pos: u8,
}

impl BitWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with a pre-allocated byte capacity.
    pub fn with_capacity(bytes: usize) -> Self {
        BitWriter {
            data: Vec::with_capacity(bytes),
            bit_pos: 0,
        }
    }

    /// Whether the writer is at a byte boundary.
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos == 0
    }

    /// Write a single bit.
    pub fn write_bit(&mut self, bit: bool) {
        if self.bit_pos == 0 {
            self.data.push(0);
        }
        if bit {
            let idx = self.data.len() - 1;
            self.data[idx] |= 1 << (7 - self.bit_pos);
        }
        self.bit_pos = (self.bit_pos + 1) % 8;
    }

    /// Write the low `n` bits of `value`, MSB-first.
    pub fn write_bits(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    /// Write the low `n` bits of a 64-bit `value`, MSB-first.
    pub fn write_bits_u64(&mut self, value: u64, n: u32) {
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    /// Write `count` zero bits followed by a terminating one bit.
    pub fn write_unary(&mut self, count: u32) {
        for _ in 0..count {
            self.write_bit(false);
        }
        self.write_bit(true);
    }

    /// Pad with zero bits to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        while self.bit_pos != 0 {
            self.write_bit(false);
        }
    }

    /// The bytes written so far.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the writer, returning its bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
