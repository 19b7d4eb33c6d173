// Bit-level I/O for entropy-coded segments.
//
// The reader removes 0xFF00 stuffing and stops at markers; the writer
// inserts stuffing and pads segments with 1-bits.

use super::error::DecodeError;

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// MSB-first bit reader over one scan's entropy-coded data.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    current: u8,
    bits_left: u8,
}

impl<'a> BitReader<'a> {
    /// Start reading at byte offset `pos` of `data`.
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos,
            current: 0,
            bits_left: 0,
        }
    }

    /// Byte offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn read_bit(&mut self) -> Result<u32, DecodeError> {
        if self.bits_left == 0 {
            self.fill()?;
        }
        self.bits_left -= 1;
        Ok(((self.current >> self.bits_left) & 1) as u32)
    }

    /// Read `n` bits (0..=16), MSB first.
    pub fn read_bits(&mut self, n: u8) -> Result<u32, DecodeError> {
        let mut v = 0u32;
        for _ in 0..n {
            v = (v << 1) | self.read_bit()?;
        }
        Ok(v)
    }

    fn fill(&mut self) -> Result<(), DecodeError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(DecodeError::Truncated(self.pos))?;
        if byte == 0xFF {
            match self.data.get(self.pos + 1) {
                Some(0x00) => self.pos += 2,
                Some(&marker) => {
                    return Err(DecodeError::UnexpectedMarker {
                        marker,
                        offset: self.pos,
                    });
                }
                None => return Err(DecodeError::Truncated(self.pos + 1)),
            }
        } else {
            self.pos += 1;
        }
        self.current = byte;
        self.bits_left = 8;
        Ok(())
    }

    /// Discard the rest of the current byte.
    pub fn byte_align(&mut self) {
        self.bits_left = 0;
    }

    /// Consume an RSTn marker (any n) at the current byte position.
    pub fn read_restart_marker(&mut self) -> Result<u8, DecodeError> {
        self.byte_align();
        // Fill bytes may precede the marker.
        while self.data.get(self.pos) == Some(&0xFF) && self.data.get(self.pos + 1) == Some(&0xFF)
        {
            self.pos += 1;
        }
        match (self.data.get(self.pos), self.data.get(self.pos + 1)) {
            (Some(0xFF), Some(&m)) if (0xD0..=0xD7).contains(&m) => {
                self.pos += 2;
                Ok(m - 0xD0)
            }
            (Some(0xFF), Some(&marker)) => Err(DecodeError::UnexpectedMarker {
                marker,
                offset: self.pos,
            }),
            (None, _) | (_, None) => Err(DecodeError::Truncated(self.pos)),
            _ => Err(DecodeError::CorruptScan {
                offset: self.pos,
                reason: "expected restart marker",
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// MSB-first bit writer with 0xFF stuffing.
pub struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    nbits: u8,
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BitWriter {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
            acc: 0,
            nbits: 0,
        }
    }

    /// Append the low `size` bits of `code` (`size` <= 16).
    #[inline]
    pub fn put_bits(&mut self, code: u32, size: u8) {
        debug_assert!(size <= 16);
        if size == 0 {
            return;
        }
        self.acc = (self.acc << size) | (code & ((1u32 << size) - 1));
        self.nbits += size;
        while self.nbits >= 8 {
            self.nbits -= 8;
            let byte = (self.acc >> self.nbits) as u8;
            self.out.push(byte);
            if byte == 0xFF {
                self.out.push(0x00);
            }
        }
        self.acc &= (1u32 << self.nbits) - 1;
    }

    /// Pad to a byte boundary with 1-bits.
    pub fn flush(&mut self) {
        if self.nbits > 0 {
            let pad = 8 - self.nbits;
            self.put_bits((1u32 << pad) - 1, pad);
        }
    }

    /// Flush, then write a marker (not stuffed).
    pub fn write_marker(&mut self, marker: u8) {
        self.flush();
        self.out.push(0xFF);
        self.out.push(marker);
    }

    /// Flush and return the bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
