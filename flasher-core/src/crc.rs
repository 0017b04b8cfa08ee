//! CRC helpers.
//!
//! The file-integrity CRC-32 deliberately reproduces a wart present in both
//! the SD and NOR file CRC routines it was ported from: the last partial
//! 32-bit word of a file is folded in using whatever bytes happen to sit
//! past EOF in the read buffer, rather than being zero-padded. Both call
//! sites share this one implementation instead of duplicating the
//! subtlety, so SD-side and NOR-side CRCs of the same file continue to
//! agree with each other exactly as they did before.

use byteorder::{BigEndian, ByteOrder};

/// IEEE 802.3 CRC-32 polynomial, reflected form used by `crc32fast`-style
/// byte-at-a-time tables. We compute it the simple big-endian word-at-a-time
/// way the original firmware used, since the wart depends on that exact
/// accumulation order.
fn crc32_word(crc: u32, word: u32) -> u32 {
    let mut crc = crc ^ word;
    for _ in 0..32 {
        if crc & 0x8000_0000 != 0 {
            crc = (crc << 1) ^ 0x04C1_1DB7;
        } else {
            crc <<= 1;
        }
    }
    crc
}

/// Streaming accumulator for the file CRC-32. Feed it successive reads from
/// a file exactly as they arrive from the filesystem, including the final
/// short read; call [`Crc32Accumulator::finish`] once after the last chunk.
pub struct Crc32Accumulator {
    crc: u32,
    carry_len: usize,
    carry: [u8; 4],
}

impl Crc32Accumulator {
    pub fn new() -> Self {
        Crc32Accumulator { crc: 0, carry_len: 0, carry: [0u8; 4] }
    }

    /// Feed the next chunk read from the file. `buf` may be shorter than a
    /// multiple of 4 — the remainder is carried into the next call, or, if
    /// this is the final chunk, into whatever stale bytes are already
    /// sitting in the carry buffer when [`finish`](Self::finish) is called
    /// (this is the wart: those bytes are never re-zeroed).
    pub fn update(&mut self, buf: &[u8]) {
        let mut i = 0;
        if self.carry_len > 0 {
            while self.carry_len < 4 && i < buf.len() {
                self.carry[self.carry_len] = buf[i];
                self.carry_len += 1;
                i += 1;
            }
            if self.carry_len == 4 {
                let word = BigEndian::read_u32(&self.carry);
                self.crc = crc32_word(self.crc, word);
                self.carry_len = 0;
            }
        }
        while i + 4 <= buf.len() {
            let word = BigEndian::read_u32(&buf[i..i + 4]);
            self.crc = crc32_word(self.crc, word);
            i += 4;
        }
        while i < buf.len() {
            self.carry[self.carry_len] = buf[i];
            self.carry_len += 1;
            i += 1;
        }
    }

    /// Finish the computation. If a partial trailing word remains, it is
    /// folded in as-is — including whichever stale bytes from a prior,
    /// longer chunk still occupy the unwritten tail of `carry`. This
    /// matches the original routine's behavior bit for bit and must not be
    /// "fixed" on one side without fixing it on the other.
    pub fn finish(mut self) -> u32 {
        if self.carry_len > 0 {
            let word = BigEndian::read_u32(&self.carry);
            self.crc = crc32_word(self.crc, word);
        }
        self.crc
    }
}

impl Default for Crc32Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC-16/CCITT (poly 0x1021, init 0x0000, no reflection, no final xor) as
/// used by the XMODEM-CRC packet framing.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
