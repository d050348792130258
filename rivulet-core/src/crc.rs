//! CRC-8 and CRC-16 primitives used for frame integrity checking.
//!
//! CRC-8 (polynomial 0x07) guards frame headers; CRC-16 (polynomial 0x8005)
//! guards entire frames. Both are MSB-first with a zero initial value.

/// CRC-8 polynomial: x^8 + x^2 + x + 1.
const CRC8_POLY: u8 = 0x07;

/// CRC-16 polynomial: x^16 + x^15 + x^2 + 1.
const CRC16_POLY: u16 = 0x8005;

const fn make_crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const fn make_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC8_TABLE: [u8; 256] = make_crc8_table();
static CRC16_TABLE: [u16; 256] = make_crc16_table();

/// Update a CRC-8 with one byte.
#[inline]
pub fn crc8_byte(crc: u8, byte: u8) -> u8 {
    CRC8_TABLE[(crc ^ byte) as usize]
}

/// Update a CRC-8 with a run of bytes.
pub fn crc8(mut crc: u8, data: &[u8]) -> u8 {
    for &byte in data {
        crc = crc8_byte(crc, byte);
    }
    crc
}

/// Update a CRC-16 with one byte.
#[inline]
pub fn crc16_byte(crc: u16, byte: u8) -> u16 {
    (crc << 8) ^ CRC16_TABLE[(((crc >> 8) as u8) ^ byte) as usize]
}

/// Update a CRC-16 with a run of bytes.
pub fn crc16(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        crc = crc16_byte(crc, byte);
    }
    crc
}
