// JPEG marker segments: frame/scan headers, Huffman and restart definitions,
// and the preserved metadata segments.
//
// Parsing works on segment payloads (the bytes after the 2-byte length);
// writing emits complete segments including marker and length.

use super::error::{DecodeError, EncodeError};
use super::huffman::{HuffmanSpec, TableClass};
use crate::coeffs::BLOCK_SIZE;

/// Marker codes (the byte following 0xFF).
pub mod marker {
    pub const SOF0: u8 = 0xC0;
    pub const SOF1: u8 = 0xC1;
    pub const SOF2: u8 = 0xC2;
    pub const SOF3: u8 = 0xC3;
    pub const DHT: u8 = 0xC4;
    pub const SOF5: u8 = 0xC5;
    pub const JPG: u8 = 0xC8;
    pub const DAC: u8 = 0xCC;
    pub const SOF15: u8 = 0xCF;
    pub const RST0: u8 = 0xD0;
    pub const RST7: u8 = 0xD7;
    pub const SOI: u8 = 0xD8;
    pub const EOI: u8 = 0xD9;
    pub const SOS: u8 = 0xDA;
    pub const DQT: u8 = 0xDB;
    pub const DNL: u8 = 0xDC;
    pub const DRI: u8 = 0xDD;
    pub const APP0: u8 = 0xE0;
    pub const APP15: u8 = 0xEF;
    pub const COM: u8 = 0xFE;

    /// True for RST0..RST7.
    pub fn is_restart(m: u8) -> bool {
        (RST0..=RST7).contains(&m)
    }
}

/// Largest number of blocks one MCU of an interleaved scan may hold.
const MAX_BLOCKS_IN_MCU: usize = 10;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One component as declared in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameComponent {
    /// Component identifier (`Ci`).
    pub id: u8,
    /// Horizontal sampling factor, 1..=4.
    pub h: u8,
    /// Vertical sampling factor, 1..=4.
    pub v: u8,
    /// Quantization table selector, 0..=3.
    pub tq: u8,
}

impl FrameComponent {
    pub const fn new(id: u8, h: u8, v: u8, tq: u8) -> Self {
        Self { id, h, v, tq }
    }

    /// Single luminance component.
    pub const fn grayscale() -> [Self; 1] {
        [Self::new(1, 1, 1, 0)]
    }

    /// Y, Cb, Cr with luma sampled `h`x`v` times relative to chroma.
    pub const fn ycbcr(h: u8, v: u8) -> [Self; 3] {
        [
            Self::new(1, h, v, 0),
            Self::new(2, 1, 1, 1),
            Self::new(3, 1, 1, 1),
        ]
    }
}

/// Frame header (SOF0 or SOF1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Written as SOF1 (extended sequential) rather than SOF0.
    pub extended: bool,
    /// Sample precision in bits: 8, or 12 for extended frames.
    pub precision: u8,
    pub height: u16,
    pub width: u16,
    pub components: Vec<FrameComponent>,
}

impl FrameHeader {
    pub fn h_max(&self) -> usize {
        self.components.iter().map(|c| c.h as usize).max().unwrap_or(1)
    }

    pub fn v_max(&self) -> usize {
        self.components.iter().map(|c| c.v as usize).max().unwrap_or(1)
    }

    /// MCUs per row of an interleaved scan.
    pub fn mcus_wide(&self) -> usize {
        (self.width as usize).div_ceil(BLOCK_SIZE * self.h_max())
    }

    /// MCU rows of an interleaved scan.
    pub fn mcus_tall(&self) -> usize {
        (self.height as usize).div_ceil(BLOCK_SIZE * self.v_max())
    }

    /// Stored block grid `(blocks_tall, blocks_wide)` of a component.
    ///
    /// Multi-component frames pad every component to whole MCUs; a
    /// single-component frame covers just the image.
    pub fn block_grid(&self, component: usize) -> (usize, usize) {
        if self.components.len() == 1 {
            return self.scan_extent(component);
        }
        let c = &self.components[component];
        (
            self.mcus_tall() * c.v as usize,
            self.mcus_wide() * c.h as usize,
        )
    }

    /// Coefficient matrix shape `(rows, cols)` of a component.
    pub fn coefficient_shape(&self, component: usize) -> (usize, usize) {
        let (bt, bw) = self.block_grid(component);
        (bt * BLOCK_SIZE, bw * BLOCK_SIZE)
    }

    /// Blocks `(tall, wide)` covered by a non-interleaved scan of a component.
    pub fn scan_extent(&self, component: usize) -> (usize, usize) {
        let c = &self.components[component];
        let w = (self.width as usize * c.h as usize).div_ceil(self.h_max());
        let h = (self.height as usize * c.v as usize).div_ceil(self.v_max());
        (h.div_ceil(BLOCK_SIZE), w.div_ceil(BLOCK_SIZE))
    }

    /// Structural checks shared by the parser and the encoder.
    pub fn validate(&self) -> Result<(), String> {
        match (self.precision, self.extended) {
            (8, _) | (12, true) => {}
            (p, _) => return Err(format!("unsupported sample precision {p}")),
        }
        if self.width == 0 || self.height == 0 {
            return Err(format!("image size {}x{}", self.width, self.height));
        }
        if self.components.is_empty() || self.components.len() > 4 {
            return Err(format!("{} components", self.components.len()));
        }
        for (i, c) in self.components.iter().enumerate() {
            if !(1..=4).contains(&c.h) || !(1..=4).contains(&c.v) {
                return Err(format!("component {i}: sampling {}x{}", c.h, c.v));
            }
            if c.tq > 3 {
                return Err(format!("component {i}: quantization table {}", c.tq));
            }
            if self.components[..i].iter().any(|o| o.id == c.id) {
                return Err(format!("duplicate component id {}", c.id));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

/// One component of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanComponent {
    /// Index into [`FrameHeader::components`].
    pub component: usize,
    pub dc_table: u8,
    pub ac_table: u8,
}

/// Scan header (SOS) plus the restart interval in force for the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHeader {
    pub components: Vec<ScanComponent>,
    /// MCUs between restart markers; 0 disables restarts.
    pub restart_interval: u16,
}

impl ScanHeader {
    pub fn is_interleaved(&self) -> bool {
        self.components.len() > 1
    }

    pub fn validate(&self, frame: &FrameHeader) -> Result<(), String> {
        if self.components.is_empty() || self.components.len() > 4 {
            return Err(format!("{} components in scan", self.components.len()));
        }
        let mut blocks = 0usize;
        for (i, sc) in self.components.iter().enumerate() {
            let fc = frame
                .components
                .get(sc.component)
                .ok_or_else(|| format!("scan references component {}", sc.component))?;
            if sc.dc_table > 3 || sc.ac_table > 3 {
                return Err(format!(
                    "component {}: table selectors {}/{}",
                    sc.component, sc.dc_table, sc.ac_table
                ));
            }
            if self.components[..i]
                .iter()
                .any(|o| o.component == sc.component)
            {
                return Err(format!("component {} repeated in scan", sc.component));
            }
            blocks += fc.h as usize * fc.v as usize;
        }
        if self.is_interleaved() && blocks > MAX_BLOCKS_IN_MCU {
            return Err(format!("{blocks} blocks per MCU"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// A marker segment carried through unchanged (APPn, COM, DQT).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub marker: u8,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn new(marker: u8, payload: Vec<u8>) -> Self {
        Self { marker, payload }
    }

    /// True for markers whose segments are preserved verbatim.
    pub fn is_preserved(code: u8) -> bool {
        matches!(code, marker::APP0..=marker::APP15 | marker::COM | marker::DQT)
    }
}

/// Everything besides the coefficients needed to write a JPEG back out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegHeader {
    pub frame: FrameHeader,
    /// Scans in stream order.
    pub scans: Vec<ScanHeader>,
    /// Preserved segments in stream order.
    pub segments: Vec<Segment>,
}

impl JpegHeader {
    /// Check frame and scans; every component may appear in at most one scan.
    pub fn validate(&self) -> Result<(), String> {
        self.frame.validate()?;
        if self.scans.is_empty() {
            return Err("no scans".into());
        }
        let mut seen = vec![false; self.frame.components.len()];
        for scan in &self.scans {
            scan.validate(&self.frame)?;
            for sc in &scan.components {
                if std::mem::replace(&mut seen[sc.component], true) {
                    return Err(format!("component {} coded by two scans", sc.component));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn be16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

pub fn parse_sof(marker_code: u8, payload: &[u8]) -> Result<FrameHeader, DecodeError> {
    if payload.len() < 6 {
        return Err(DecodeError::segment("SOF", "too short"));
    }
    let count = payload[5] as usize;
    if payload.len() != 6 + 3 * count {
        return Err(DecodeError::segment(
            "SOF",
            format!("length {} for {count} components", payload.len()),
        ));
    }
    let height = be16(payload, 1);
    if height == 0 {
        return Err(DecodeError::Unsupported("height defined by DNL".into()));
    }
    let components = payload[6..]
        .chunks_exact(3)
        .map(|c| FrameComponent {
            id: c[0],
            h: c[1] >> 4,
            v: c[1] & 0x0F,
            tq: c[2],
        })
        .collect();
    let frame = FrameHeader {
        extended: marker_code == marker::SOF1,
        precision: payload[0],
        height,
        width: be16(payload, 3),
        components,
    };
    if !matches!(frame.precision, 8 | 12) {
        return Err(DecodeError::Unsupported(format!(
            "{}-bit samples",
            frame.precision
        )));
    }
    frame.validate().map_err(|r| DecodeError::segment("SOF", r))?;
    Ok(frame)
}

/// Parse every table in a DHT payload.
pub fn parse_dht(payload: &[u8]) -> Result<Vec<(TableClass, u8, HuffmanSpec)>, DecodeError> {
    let mut tables = Vec::new();
    let mut pos = 0;
    while pos < payload.len() {
        if payload.len() < pos + 17 {
            return Err(DecodeError::segment("DHT", "truncated table"));
        }
        let class = match payload[pos] >> 4 {
            0 => TableClass::Dc,
            1 => TableClass::Ac,
            c => return Err(DecodeError::segment("DHT", format!("table class {c}"))),
        };
        let id = payload[pos] & 0x0F;
        if id > 3 {
            return Err(DecodeError::segment("DHT", format!("table id {id}")));
        }
        let mut bits = [0u8; 16];
        bits.copy_from_slice(&payload[pos + 1..pos + 17]);
        let total: usize = bits.iter().map(|&b| b as usize).sum();
        pos += 17;
        if total > 256 || payload.len() < pos + total {
            return Err(DecodeError::segment("DHT", "truncated symbol list"));
        }
        let values = payload[pos..pos + total].to_vec();
        pos += total;
        tables.push((class, id, HuffmanSpec { bits, values }));
    }
    Ok(tables)
}

pub fn parse_dri(payload: &[u8]) -> Result<u16, DecodeError> {
    if payload.len() != 2 {
        return Err(DecodeError::segment("DRI", format!("length {}", payload.len())));
    }
    Ok(be16(payload, 0))
}

/// Parse an SOS payload against `frame`. The restart interval is filled in
/// by the caller.
pub fn parse_sos(payload: &[u8], frame: &FrameHeader) -> Result<ScanHeader, DecodeError> {
    let count = *payload
        .first()
        .ok_or_else(|| DecodeError::segment("SOS", "empty"))? as usize;
    if payload.len() != 1 + 2 * count + 3 {
        return Err(DecodeError::segment(
            "SOS",
            format!("length {} for {count} components", payload.len()),
        ));
    }
    let mut components = Vec::with_capacity(count);
    for sel in payload[1..1 + 2 * count].chunks_exact(2) {
        let component = frame
            .components
            .iter()
            .position(|c| c.id == sel[0])
            .ok_or_else(|| DecodeError::segment("SOS", format!("unknown component id {}", sel[0])))?;
        components.push(ScanComponent {
            component,
            dc_table: sel[1] >> 4,
            ac_table: sel[1] & 0x0F,
        });
    }
    let tail = &payload[1 + 2 * count..];
    if tail != [0, 63, 0] {
        return Err(DecodeError::Unsupported(format!(
            "spectral selection {}..={} with approximation {:#04x}",
            tail[0], tail[1], tail[2]
        )));
    }
    let scan = ScanHeader {
        components,
        restart_interval: 0,
    };
    scan.validate(frame)
        .map_err(|r| DecodeError::segment("SOS", r))?;
    Ok(scan)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn write_segment(out: &mut Vec<u8>, marker_code: u8, payload: &[u8]) -> Result<(), EncodeError> {
    let len = u16::try_from(payload.len() + 2).map_err(|_| {
        EncodeError::InvalidHeader(format!(
            "segment 0xFF{marker_code:02X} payload of {} bytes",
            payload.len()
        ))
    })?;
    out.extend_from_slice(&[0xFF, marker_code]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

pub fn write_marker(out: &mut Vec<u8>, marker_code: u8) {
    out.extend_from_slice(&[0xFF, marker_code]);
}

pub fn write_preserved(out: &mut Vec<u8>, segment: &Segment) -> Result<(), EncodeError> {
    write_segment(out, segment.marker, &segment.payload)
}

/// SOF0, or SOF1 when the frame needs extended sequential coding.
pub fn write_sof(out: &mut Vec<u8>, frame: &FrameHeader, extended: bool) -> Result<(), EncodeError> {
    let mut p = Vec::with_capacity(6 + 3 * frame.components.len());
    p.push(frame.precision);
    p.extend_from_slice(&frame.height.to_be_bytes());
    p.extend_from_slice(&frame.width.to_be_bytes());
    p.push(frame.components.len() as u8);
    for c in &frame.components {
        p.extend_from_slice(&[c.id, (c.h << 4) | c.v, c.tq]);
    }
    let code = if extended { marker::SOF1 } else { marker::SOF0 };
    write_segment(out, code, &p)
}

/// One DHT segment holding every given table.
pub fn write_dht(
    out: &mut Vec<u8>,
    tables: &[(TableClass, u8, &HuffmanSpec)],
) -> Result<(), EncodeError> {
    if tables.is_empty() {
        return Ok(());
    }
    let mut p = Vec::new();
    for (class, id, spec) in tables {
        p.push(((*class as u8) << 4) | id);
        p.extend_from_slice(&spec.bits);
        p.extend_from_slice(&spec.values);
    }
    write_segment(out, marker::DHT, &p)
}

pub fn write_dri(out: &mut Vec<u8>, interval: u16) -> Result<(), EncodeError> {
    write_segment(out, marker::DRI, &interval.to_be_bytes())
}

pub fn write_sos(out: &mut Vec<u8>, scan: &ScanHeader, frame: &FrameHeader) -> Result<(), EncodeError> {
    let mut p = Vec::with_capacity(4 + 2 * scan.components.len());
    p.push(scan.components.len() as u8);
    for sc in &scan.components {
        p.push(frame.components[sc.component].id);
        p.push((sc.dc_table << 4) | sc.ac_table);
    }
    p.extend_from_slice(&[0, 63, 0]);
    write_segment(out, marker::SOS, &p)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
