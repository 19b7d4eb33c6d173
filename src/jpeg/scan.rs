// Entropy-coded scan data.
//
// Decoding, symbol counting and encoding all visit blocks through `walk`, so
// the three passes agree on MCU order, restart placement and DC prediction.

use super::bitio::{BitReader, BitWriter};
use super::error::{DecodeError, EncodeError};
use super::header::{FrameHeader, ScanHeader, marker};
use super::huffman::{self, DecodeTable, EncodeTable, FrequencyCounter, TableClass};
use super::tables::ZIGZAG_TO_NATURAL;
use crate::coeffs::{BLOCK_LEN, CoefficientMatrix};

// ---------------------------------------------------------------------------
// Block order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// A restart marker; the payload is its index modulo 8.
    Restart(u8),
    /// Block (`row`, `col`) of the scan's `slot`-th component.
    Block { slot: usize, row: usize, col: usize },
}

/// MCU grid `(tall, wide)` of a scan.
fn mcu_grid(frame: &FrameHeader, scan: &ScanHeader) -> (usize, usize) {
    if scan.is_interleaved() {
        (frame.mcus_tall(), frame.mcus_wide())
    } else {
        frame.scan_extent(scan.components[0].component)
    }
}

fn walk<E>(
    frame: &FrameHeader,
    scan: &ScanHeader,
    mut visit: impl FnMut(Step) -> Result<(), E>,
) -> Result<(), E> {
    let (mcus_tall, mcus_wide) = mcu_grid(frame, scan);
    let interval = scan.restart_interval as usize;

    for mcu_row in 0..mcus_tall {
        for mcu_col in 0..mcus_wide {
            let n = mcu_row * mcus_wide + mcu_col;
            if interval > 0 && n > 0 && n % interval == 0 {
                visit(Step::Restart(((n / interval - 1) % 8) as u8))?;
            }

            if !scan.is_interleaved() {
                visit(Step::Block {
                    slot: 0,
                    row: mcu_row,
                    col: mcu_col,
                })?;
                continue;
            }
            for (slot, sc) in scan.components.iter().enumerate() {
                let c = &frame.components[sc.component];
                let (h, v) = (c.h as usize, c.v as usize);
                for y in 0..v {
                    for x in 0..h {
                        visit(Step::Block {
                            slot,
                            row: mcu_row * v + y,
                            col: mcu_col * h + x,
                        })?;
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one scan starting at `start` into `planes` (indexed by frame
/// component). Returns the offset just past the scan's entropy-coded data.
pub fn decode_scan(
    data: &[u8],
    start: usize,
    frame: &FrameHeader,
    scan: &ScanHeader,
    dc_tables: &[Option<DecodeTable>; 4],
    ac_tables: &[Option<DecodeTable>; 4],
    planes: &mut [CoefficientMatrix],
) -> Result<usize, DecodeError> {
    let mut slots = Vec::with_capacity(scan.components.len());
    for sc in &scan.components {
        let dc = dc_tables[sc.dc_table as usize]
            .as_ref()
            .ok_or(DecodeError::MissingHuffmanTable {
                class: TableClass::Dc.name(),
                id: sc.dc_table,
            })?;
        let ac = ac_tables[sc.ac_table as usize]
            .as_ref()
            .ok_or(DecodeError::MissingHuffmanTable {
                class: TableClass::Ac.name(),
                id: sc.ac_table,
            })?;
        slots.push((sc.component, dc, ac));
    }

    let mut pred = vec![0i32; slots.len()];
    let mut reader = BitReader::new(data, start);

    walk::<DecodeError>(frame, scan, |step| match step {
        Step::Restart(_) => {
            // Any RSTn is accepted; the sequence number is not checked.
            reader.read_restart_marker()?;
            pred.fill(0);
            Ok(())
        }
        Step::Block { slot, row, col } => {
            let (component, dc, ac) = slots[slot];
            let block = decode_block(&mut reader, dc, ac, &mut pred[slot], component)?;
            planes[component].set_block(row, col, &block);
            Ok(())
        }
    })?;

    Ok(reader.position())
}

fn decode_block(
    reader: &mut BitReader<'_>,
    dc: &DecodeTable,
    ac: &DecodeTable,
    pred: &mut i32,
    component: usize,
) -> Result<[i16; BLOCK_LEN], DecodeError> {
    let mut block = [0i16; BLOCK_LEN];

    let size = dc.decode(reader)?;
    if size > 15 {
        return Err(DecodeError::CorruptScan {
            offset: reader.position(),
            reason: "DC difference category above 15",
        });
    }
    if size > 0 {
        *pred += huffman::extend(reader.read_bits(size)?, size);
    }
    block[0] = i16::try_from(*pred).map_err(|_| DecodeError::CoefficientOverflow {
        component,
        value: *pred,
    })?;

    let mut k = 1;
    while k < BLOCK_LEN {
        let rs = ac.decode(reader)?;
        let run = (rs >> 4) as usize;
        let size = rs & 0x0F;
        if size == 0 {
            if run == 15 {
                k += 16;
                continue;
            }
            // EOB; other zero-size symbols are read as EOB too.
            break;
        }
        k += run;
        if k >= BLOCK_LEN {
            return Err(DecodeError::CorruptScan {
                offset: reader.position(),
                reason: "AC run past end of block",
            });
        }
        block[ZIGZAG_TO_NATURAL[k]] = huffman::extend(reader.read_bits(size)?, size) as i16;
        k += 1;
    }
    Ok(block)
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Largest DC-difference and AC categories for a sample precision.
#[derive(Debug, Clone, Copy)]
struct Limits {
    precision: u8,
    dc: u8,
    ac: u8,
}

impl Limits {
    fn for_precision(precision: u8) -> Self {
        if precision > 8 {
            Self { precision, dc: 15, ac: 14 }
        } else {
            Self { precision, dc: 11, ac: 10 }
        }
    }
}

trait SymbolSink {
    fn dc(&mut self, table: u8, category: u8, bits: u32) -> Result<(), EncodeError>;
    fn ac(&mut self, table: u8, run_size: u8, bits: u32) -> Result<(), EncodeError>;
    fn restart(&mut self, index: u8);
}

/// Per-table symbol statistics of one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanStatistics {
    pub dc: [FrequencyCounter; 4],
    pub ac: [FrequencyCounter; 4],
}

impl SymbolSink for ScanStatistics {
    fn dc(&mut self, table: u8, category: u8, _bits: u32) -> Result<(), EncodeError> {
        self.dc[table as usize].count(category);
        Ok(())
    }

    fn ac(&mut self, table: u8, run_size: u8, _bits: u32) -> Result<(), EncodeError> {
        self.ac[table as usize].count(run_size);
        Ok(())
    }

    fn restart(&mut self, _index: u8) {}
}

struct BitSink<'a> {
    writer: BitWriter,
    dc: &'a [Option<EncodeTable>; 4],
    ac: &'a [Option<EncodeTable>; 4],
}

impl BitSink<'_> {
    fn emit(
        &mut self,
        class: TableClass,
        table: u8,
        symbol: u8,
        bits: u32,
        size: u8,
    ) -> Result<(), EncodeError> {
        let tables = match class {
            TableClass::Dc => self.dc,
            TableClass::Ac => self.ac,
        };
        let (code, len) = tables[table as usize]
            .as_ref()
            .and_then(|t| t.lookup(symbol))
            .ok_or(EncodeError::MissingSymbol {
                class: class.name(),
                id: table,
                symbol,
            })?;
        self.writer.put_bits(code as u32, len);
        self.writer.put_bits(bits, size);
        Ok(())
    }
}

impl SymbolSink for BitSink<'_> {
    fn dc(&mut self, table: u8, category: u8, bits: u32) -> Result<(), EncodeError> {
        self.emit(TableClass::Dc, table, category, bits, category)
    }

    fn ac(&mut self, table: u8, run_size: u8, bits: u32) -> Result<(), EncodeError> {
        self.emit(TableClass::Ac, table, run_size, bits, run_size & 0x0F)
    }

    fn restart(&mut self, index: u8) {
        self.writer.write_marker(marker::RST0 + index);
    }
}

fn code_block<S: SymbolSink + ?Sized>(
    sink: &mut S,
    block: &[i16; BLOCK_LEN],
    dc_table: u8,
    ac_table: u8,
    pred: &mut i32,
    limits: Limits,
    component: usize,
) -> Result<(), EncodeError> {
    let out_of_range = |value: i32| EncodeError::ValueOutOfRange {
        component,
        value,
        precision: limits.precision,
    };

    let dc = block[0] as i32;
    let diff = dc - *pred;
    *pred = dc;
    let cat = huffman::category(diff);
    if cat > limits.dc {
        return Err(out_of_range(diff));
    }
    sink.dc(dc_table, cat, huffman::value_bits(diff, cat))?;

    let mut run = 0u8;
    for &natural in &ZIGZAG_TO_NATURAL[1..] {
        let v = block[natural] as i32;
        if v == 0 {
            run += 1;
            continue;
        }
        while run > 15 {
            sink.ac(ac_table, 0xF0, 0)?;
            run -= 16;
        }
        let cat = huffman::category(v);
        if cat > limits.ac {
            return Err(out_of_range(v));
        }
        sink.ac(ac_table, (run << 4) | cat, huffman::value_bits(v, cat))?;
        run = 0;
    }
    if run > 0 {
        sink.ac(ac_table, 0x00, 0)?;
    }
    Ok(())
}

fn run_symbols<S: SymbolSink>(
    frame: &FrameHeader,
    scan: &ScanHeader,
    planes: &[CoefficientMatrix],
    sink: &mut S,
) -> Result<(), EncodeError> {
    let limits = Limits::for_precision(frame.precision);
    let mut pred = vec![0i32; scan.components.len()];

    walk::<EncodeError>(frame, scan, |step| match step {
        Step::Restart(index) => {
            sink.restart(index);
            pred.fill(0);
            Ok(())
        }
        Step::Block { slot, row, col } => {
            let sc = &scan.components[slot];
            let block = planes[sc.component].block(row, col);
            code_block(
                &mut *sink,
                &block,
                sc.dc_table,
                sc.ac_table,
                &mut pred[slot],
                limits,
                sc.component,
            )
        }
    })
}

/// Count the Huffman symbols one scan would emit.
pub fn count_scan(
    frame: &FrameHeader,
    scan: &ScanHeader,
    planes: &[CoefficientMatrix],
) -> Result<ScanStatistics, EncodeError> {
    let mut stats = ScanStatistics::default();
    run_symbols(frame, scan, planes, &mut stats)?;
    Ok(stats)
}

/// Entropy-code one scan, restart markers included.
pub fn encode_scan(
    frame: &FrameHeader,
    scan: &ScanHeader,
    planes: &[CoefficientMatrix],
    dc_tables: &[Option<EncodeTable>; 4],
    ac_tables: &[Option<EncodeTable>; 4],
) -> Result<Vec<u8>, EncodeError> {
    let blocks: usize = scan
        .components
        .iter()
        .map(|sc| {
            let (bt, bw) = frame.block_grid(sc.component);
            bt * bw
        })
        .sum();
    let mut sink = BitSink {
        writer: BitWriter::with_capacity(blocks * 8),
        dc: dc_tables,
        ac: ac_tables,
    };
    run_symbols(frame, scan, planes, &mut sink)?;
    Ok(sink.writer.finish())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
