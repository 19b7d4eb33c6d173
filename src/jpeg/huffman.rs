// Huffman tables for sequential JPEG.
//
// - `HuffmanSpec`: BITS/HUFFVAL as they appear in a DHT segment
// - `DecodeTable`: MAXCODE/MINCODE/VALPTR decoder (T.81 F.2.2.3)
// - `EncodeTable`: symbol -> (code, length) lookup (T.81 C.2)
// - `FrequencyCounter`: symbol statistics and optimal table generation
//   (T.81 K.2, code lengths limited to 16 bits)

use super::bitio::BitReader;
use super::error::{DecodeError, EncodeError};
use super::tables;

/// Longest code length a DHT segment can describe.
const MAX_CODE_LEN: usize = 16;

/// Working limit on code lengths before the 16-bit adjustment.
const MAX_CLEN: usize = 32;

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

/// Table class as stored in DHT (`Tc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableClass {
    Dc = 0,
    Ac = 1,
}

impl TableClass {
    pub fn name(self) -> &'static str {
        match self {
            Self::Dc => "DC",
            Self::Ac => "AC",
        }
    }
}

/// Code-length counts and symbol values of one Huffman table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanSpec {
    /// `bits[i]` = number of codes of length `i + 1`.
    pub bits: [u8; 16],
    /// Symbols in order of increasing code length.
    pub values: Vec<u8>,
}

impl HuffmanSpec {
    /// Annex K.3 table for the given class; `luma` picks the luminance one.
    pub fn standard(class: TableClass, luma: bool) -> Self {
        let (bits, values): (&[u8; 16], &[u8]) = match (class, luma) {
            (TableClass::Dc, true) => (&tables::STD_DC_LUMA_BITS, &tables::STD_DC_LUMA_VALUES),
            (TableClass::Dc, false) => {
                (&tables::STD_DC_CHROMA_BITS, &tables::STD_DC_CHROMA_VALUES)
            }
            (TableClass::Ac, true) => (&tables::STD_AC_LUMA_BITS, &tables::STD_AC_LUMA_VALUES),
            (TableClass::Ac, false) => {
                (&tables::STD_AC_CHROMA_BITS, &tables::STD_AC_CHROMA_VALUES)
            }
        };
        Self {
            bits: *bits,
            values: values.to_vec(),
        }
    }

    /// Canonical code assignment: `(symbol, code, length)` in table order.
    fn codes(&self) -> Result<Vec<(u8, u16, u8)>, &'static str> {
        let total: usize = self.bits.iter().map(|&b| b as usize).sum();
        if total != self.values.len() {
            return Err("code counts do not match symbol count");
        }
        if total > 256 {
            return Err("more than 256 symbols");
        }

        let mut out = Vec::with_capacity(total);
        let mut code: u32 = 0;
        let mut k = 0usize;
        for (i, &count) in self.bits.iter().enumerate() {
            let len = i + 1;
            for _ in 0..count {
                if code >= (1u32 << len) {
                    return Err("code space overflow");
                }
                out.push((self.values[k], code as u16, len as u8));
                code += 1;
                k += 1;
            }
            code <<= 1;
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Bit-serial decoder for one table.
#[derive(Debug, Clone)]
pub struct DecodeTable {
    /// Largest code of each length, -1 when the length is unused.
    maxcode: [i32; MAX_CODE_LEN + 1],
    mincode: [i32; MAX_CODE_LEN + 1],
    valptr: [usize; MAX_CODE_LEN + 1],
    values: Vec<u8>,
}

impl DecodeTable {
    pub fn build(spec: &HuffmanSpec) -> Result<Self, DecodeError> {
        let codes = spec.codes().map_err(DecodeError::InvalidHuffmanTable)?;

        let mut maxcode = [-1i32; MAX_CODE_LEN + 1];
        let mut mincode = [0i32; MAX_CODE_LEN + 1];
        let mut valptr = [0usize; MAX_CODE_LEN + 1];

        let mut k = 0usize;
        for len in 1..=MAX_CODE_LEN {
            let count = spec.bits[len - 1] as usize;
            if count > 0 {
                valptr[len] = k;
                mincode[len] = codes[k].1 as i32;
                k += count;
                maxcode[len] = codes[k - 1].1 as i32;
            }
        }

        Ok(Self {
            maxcode,
            mincode,
            valptr,
            values: spec.values.clone(),
        })
    }

    /// Read one symbol.
    pub fn decode(&self, reader: &mut BitReader<'_>) -> Result<u8, DecodeError> {
        let mut code: i32 = 0;
        for len in 1..=MAX_CODE_LEN {
            code = (code << 1) | reader.read_bit()? as i32;
            if code <= self.maxcode[len] {
                let idx = self.valptr[len] + (code - self.mincode[len]) as usize;
                return Ok(self.values[idx]);
            }
        }
        Err(DecodeError::CorruptScan {
            offset: reader.position(),
            reason: "no Huffman code matches",
        })
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Symbol -> `(code, length)`; length 0 means the symbol has no code.
#[derive(Debug, Clone)]
pub struct EncodeTable {
    codes: [(u16, u8); 256],
}

impl EncodeTable {
    pub fn build(spec: &HuffmanSpec) -> Result<Self, EncodeError> {
        let assigned = spec
            .codes()
            .map_err(|e| EncodeError::InvalidHeader(format!("Huffman table: {e}")))?;
        let mut codes = [(0u16, 0u8); 256];
        for (symbol, code, len) in assigned {
            codes[symbol as usize] = (code, len);
        }
        Ok(Self { codes })
    }

    /// `(code, length)` for `symbol`, or `None` if the table lacks it.
    #[inline]
    pub fn lookup(&self, symbol: u8) -> Option<(u16, u8)> {
        let entry = self.codes[symbol as usize];
        (entry.1 > 0).then_some(entry)
    }
}

// ---------------------------------------------------------------------------
// Value categories
// ---------------------------------------------------------------------------

/// Number of bits needed for the magnitude of `value` (the SSSS category).
#[inline]
pub fn category(value: i32) -> u8 {
    (32 - value.unsigned_abs().leading_zeros()) as u8
}

/// Appended bits for `value` in category `size`: the value itself when
/// positive, one's complement of the magnitude when negative.
#[inline]
pub fn value_bits(value: i32, size: u8) -> u32 {
    if value < 0 {
        (value - 1) as u32 & ((1u32 << size) - 1)
    } else {
        value as u32
    }
}

/// Inverse of [`value_bits`] (T.81 F.2.2.1 EXTEND).
#[inline]
pub fn extend(bits: u32, size: u8) -> i32 {
    if size == 0 {
        return 0;
    }
    let v = bits as i32;
    if v < (1 << (size - 1)) {
        v - (1 << size) + 1
    } else {
        v
    }
}

// ---------------------------------------------------------------------------
// Frequency counting / optimal tables
// ---------------------------------------------------------------------------

/// Symbol frequencies for one table.
#[derive(Debug, Clone)]
pub struct FrequencyCounter {
    counts: [u64; 256],
}

impl Default for FrequencyCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyCounter {
    pub fn new() -> Self {
        Self { counts: [0; 256] }
    }

    #[inline]
    pub fn count(&mut self, symbol: u8) {
        self.counts[symbol as usize] += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }

    /// Build an optimal table with no code longer than 16 bits and no
    /// all-ones code.
    ///
    /// Fails with [`EncodeError::CodeLengthOverflow`] when the unrestricted
    /// tree is deeper than 32 levels, which only extremely skewed statistics
    /// can produce.
    pub fn optimal_spec(&self) -> Result<HuffmanSpec, EncodeError> {
        // Slot 256 is a reserved pseudo-symbol with the lowest frequency; its
        // code ends up being the all-ones code and is dropped afterwards.
        let mut freq = [0u64; 257];
        freq[..256].copy_from_slice(&self.counts);
        if self.is_empty() {
            // A table must describe at least one symbol.
            freq[0] = 1;
        }
        freq[256] = 1;

        let mut codesize = [0usize; 257];
        let mut others = [-1i32; 257];

        loop {
            // Least frequent symbol; ties go to the larger index.
            let mut c1: i32 = -1;
            let mut v = u64::MAX;
            for (i, &f) in freq.iter().enumerate() {
                if f != 0 && f <= v {
                    v = f;
                    c1 = i as i32;
                }
            }
            // Next least frequent.
            let mut c2: i32 = -1;
            v = u64::MAX;
            for (i, &f) in freq.iter().enumerate() {
                if f != 0 && f <= v && i as i32 != c1 {
                    v = f;
                    c2 = i as i32;
                }
            }
            if c2 < 0 {
                break;
            }

            let (mut a, mut b) = (c1 as usize, c2 as usize);
            freq[a] += freq[b];
            freq[b] = 0;

            codesize[a] += 1;
            while others[a] >= 0 {
                a = others[a] as usize;
                codesize[a] += 1;
            }
            others[a] = c2;

            codesize[b] += 1;
            while others[b] >= 0 {
                b = others[b] as usize;
                codesize[b] += 1;
            }
        }

        let mut bits = [0usize; MAX_CLEN + 1];
        for &size in &codesize {
            if size > MAX_CLEN {
                return Err(EncodeError::CodeLengthOverflow { length: size });
            }
            if size > 0 {
                bits[size] += 1;
            }
        }

        // Push codes longer than 16 bits up the tree (K.3 Adjust_BITS).
        for i in (MAX_CODE_LEN + 1..=MAX_CLEN).rev() {
            while bits[i] > 0 {
                let mut j = i - 2;
                while bits[j] == 0 {
                    j -= 1;
                }
                bits[i] -= 2;
                bits[i - 1] += 1;
                bits[j + 1] += 2;
                bits[j] -= 1;
            }
        }

        // Drop the reserved symbol from the longest length in use.
        let mut i = MAX_CODE_LEN;
        while i > 0 && bits[i] == 0 {
            i -= 1;
        }
        if i > 0 {
            bits[i] -= 1;
        }

        let mut out_bits = [0u8; 16];
        for len in 1..=MAX_CODE_LEN {
            out_bits[len - 1] = bits[len] as u8;
        }

        let mut values = Vec::new();
        for len in 1..=MAX_CLEN {
            for (symbol, &size) in codesize.iter().enumerate().take(256) {
                if size == len {
                    values.push(symbol as u8);
                }
            }
        }

        Ok(HuffmanSpec {
            bits: out_bits,
            values,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
