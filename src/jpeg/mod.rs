// Sequential-Huffman JPEG coefficient codec.
//
// Decodes a JPEG stream into quantized DCT coefficients without running the
// inverse DCT, and writes coefficients back as a JPEG. Only the entropy
// coding is redone on encode; quantization tables and metadata segments pass
// through unchanged.
//
// # Modules
//
// - `bitio`:   bit reader/writer with byte stuffing and restart markers
// - `error`:   decode and encode errors
// - `header`:  frame/scan headers, marker segment parsing and writing
// - `huffman`: table construction, symbol coding, optimal table generation
// - `scan`:    entropy-coded scan data (MCU traversal, DC prediction)
// - `tables`:  zig-zag order and the Annex K example tables

pub mod bitio;
pub mod error;
pub mod header;
pub mod huffman;
pub mod scan;
pub mod tables;

pub use error::{DecodeError, EncodeError};
pub use header::{FrameComponent, FrameHeader, JpegHeader, ScanComponent, ScanHeader, Segment};

use log::{debug, trace};

use crate::coeffs::{CoefficientMatrix, ImageCoefficients};
use header::marker;
use huffman::{DecodeTable, EncodeTable, HuffmanSpec, TableClass};

/// Component layout for [`JpegImage::baseline`].
pub type ComponentSpec = FrameComponent;

/// Default cap on `width * height` accepted by the decoder.
pub const DEFAULT_MAX_PIXELS: u64 = 1 << 28;

// ---------------------------------------------------------------------------
// Codec trait
// ---------------------------------------------------------------------------

/// Converts between JPEG bytes and coefficient planes.
pub trait CoefficientCodec {
    fn decode(&self, data: &[u8]) -> Result<JpegImage, DecodeError>;
    fn encode(&self, image: &JpegImage) -> Result<Vec<u8>, EncodeError>;
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

/// A decoded JPEG: header metadata plus one coefficient plane per component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegImage {
    header: JpegHeader,
    coefficients: ImageCoefficients,
}

impl JpegImage {
    /// Pair a header with coefficients. Shapes are checked on encode.
    pub fn from_parts(header: JpegHeader, coefficients: ImageCoefficients) -> Self {
        Self {
            header,
            coefficients,
        }
    }

    /// An all-zero 8-bit image with a JFIF APP0 segment, the Annex K
    /// quantization tables (luminance for table 0, chrominance otherwise) and
    /// one scan, interleaved when the components fit one MCU.
    pub fn baseline(
        width: u16,
        height: u16,
        components: &[ComponentSpec],
    ) -> Result<Self, EncodeError> {
        let frame = FrameHeader {
            extended: false,
            precision: 8,
            height,
            width,
            components: components.to_vec(),
        };
        frame.validate().map_err(EncodeError::InvalidHeader)?;

        let mut segments = vec![Segment::new(marker::APP0, jfif_payload())];
        let mut seen_tq = Vec::new();
        for c in components {
            if !seen_tq.contains(&c.tq) {
                seen_tq.push(c.tq);
                segments.push(Segment::new(marker::DQT, dqt_payload(c.tq)));
            }
        }

        let table = |i: usize| if i == 0 { 0 } else { 1 };
        let all: Vec<ScanComponent> = (0..components.len())
            .map(|i| ScanComponent {
                component: i,
                dc_table: table(i),
                ac_table: table(i),
            })
            .collect();
        let one_scan = ScanHeader {
            components: all.clone(),
            restart_interval: 0,
        };
        let scans = if one_scan.validate(&frame).is_ok() {
            vec![one_scan]
        } else {
            all.into_iter()
                .map(|sc| ScanHeader {
                    components: vec![sc],
                    restart_interval: 0,
                })
                .collect()
        };

        let planes = (0..components.len())
            .map(|c| {
                let (bt, bw) = frame.block_grid(c);
                CoefficientMatrix::with_blocks(bt, bw)
            })
            .collect();

        Ok(Self {
            header: JpegHeader {
                frame,
                scans,
                segments,
            },
            coefficients: ImageCoefficients::new(planes),
        })
    }

    /// Set the restart interval of every scan.
    pub fn with_restart_interval(mut self, interval: u16) -> Self {
        for scan in &mut self.header.scans {
            scan.restart_interval = interval;
        }
        self
    }

    pub fn header(&self) -> &JpegHeader {
        &self.header
    }

    pub fn coefficients(&self) -> &ImageCoefficients {
        &self.coefficients
    }

    pub fn coefficients_mut(&mut self) -> &mut ImageCoefficients {
        &mut self.coefficients
    }

    pub fn into_parts(self) -> (JpegHeader, ImageCoefficients) {
        (self.header, self.coefficients)
    }

    pub fn into_coefficients(self) -> ImageCoefficients {
        self.coefficients
    }

    pub fn width(&self) -> u16 {
        self.header.frame.width
    }

    pub fn height(&self) -> u16 {
        self.header.frame.height
    }

    pub fn precision(&self) -> u8 {
        self.header.frame.precision
    }

    pub fn component_count(&self) -> usize {
        self.header.frame.components.len()
    }
}

fn jfif_payload() -> Vec<u8> {
    // Version 1.01, no units, 1:1 density, no thumbnail.
    let mut p = b"JFIF\0".to_vec();
    p.extend_from_slice(&[1, 1, 0, 0, 1, 0, 1, 0, 0]);
    p
}

fn dqt_payload(tq: u8) -> Vec<u8> {
    let natural = if tq == 0 {
        &tables::STD_LUMA_QUANT
    } else {
        &tables::STD_CHROMA_QUANT
    };
    let mut p = Vec::with_capacity(65);
    p.push(tq);
    p.extend(tables::ZIGZAG_TO_NATURAL.iter().map(|&n| natural[n] as u8));
    p
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// How Huffman tables are chosen when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HuffmanMode {
    /// Optimal tables built per scan from symbol frequencies.
    #[default]
    Optimized,
    /// The Annex K example tables.
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    pub huffman: HuffmanMode,
    /// Largest `width * height` the decoder accepts.
    pub max_pixels: u64,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            huffman: HuffmanMode::Optimized,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

// ---------------------------------------------------------------------------
// Baseline codec
// ---------------------------------------------------------------------------

/// Codec for SOF0/SOF1 sequential Huffman JPEGs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineCodec {
    options: CodecOptions,
}

impl BaselineCodec {
    pub fn new(options: CodecOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    fn check_size(&self, frame: &FrameHeader) -> Result<(), DecodeError> {
        let pixels = frame.width as u64 * frame.height as u64;
        if pixels > self.options.max_pixels {
            return Err(DecodeError::Unsupported(format!(
                "{}x{} exceeds the {} pixel limit",
                frame.width, frame.height, self.options.max_pixels
            )));
        }
        Ok(())
    }

    /// Huffman tables for one scan, keyed by class and table id.
    fn scan_tables(
        &self,
        frame: &FrameHeader,
        scan: &ScanHeader,
        planes: &[CoefficientMatrix],
    ) -> Result<Vec<(TableClass, u8, HuffmanSpec)>, EncodeError> {
        let mut used: Vec<(TableClass, u8)> = Vec::new();
        for sc in &scan.components {
            for key in [(TableClass::Dc, sc.dc_table), (TableClass::Ac, sc.ac_table)] {
                if !used.contains(&key) {
                    used.push(key);
                }
            }
        }

        match self.options.huffman {
            HuffmanMode::Standard => Ok(used
                .into_iter()
                .map(|(class, id)| (class, id, HuffmanSpec::standard(class, id == 0)))
                .collect()),
            HuffmanMode::Optimized => {
                let stats = scan::count_scan(frame, scan, planes)?;
                used.into_iter()
                    .map(|(class, id)| {
                        let counter = match class {
                            TableClass::Dc => &stats.dc[id as usize],
                            TableClass::Ac => &stats.ac[id as usize],
                        };
                        Ok((class, id, counter.optimal_spec()?))
                    })
                    .collect()
            }
        }
    }
}

impl CoefficientCodec for BaselineCodec {
    fn decode(&self, data: &[u8]) -> Result<JpegImage, DecodeError> {
        if !data.starts_with(&[0xFF, marker::SOI]) {
            return Err(DecodeError::NotJpeg);
        }

        let mut pos = 2;
        let mut frame: Option<FrameHeader> = None;
        let mut planes: Vec<CoefficientMatrix> = Vec::new();
        let mut coded = Vec::new();
        let mut scans = Vec::new();
        let mut segments = Vec::new();
        let mut dc_tables: [Option<DecodeTable>; 4] = Default::default();
        let mut ac_tables: [Option<DecodeTable>; 4] = Default::default();
        let mut restart_interval = 0u16;

        loop {
            let Some((code, at)) = next_marker(data, pos) else {
                if scans.is_empty() {
                    return Err(DecodeError::Truncated(data.len()));
                }
                debug!("stream ends without EOI");
                break;
            };
            pos = at + 2;

            match code {
                marker::EOI => break,
                marker::SOI | 0x01 => {
                    return Err(DecodeError::UnexpectedMarker {
                        marker: code,
                        offset: at,
                    });
                }
                _ => {}
            }

            let payload = segment_payload(data, pos)?;
            pos += 2 + payload.len();

            match code {
                marker::SOF0 | marker::SOF1 => {
                    if frame.is_some() {
                        return Err(DecodeError::segment("SOF", "second frame header"));
                    }
                    let f = header::parse_sof(code, payload)?;
                    self.check_size(&f)?;
                    planes = (0..f.components.len())
                        .map(|c| {
                            let (bt, bw) = f.block_grid(c);
                            CoefficientMatrix::with_blocks(bt, bw)
                        })
                        .collect();
                    coded = vec![false; f.components.len()];
                    debug!(
                        "frame {}x{}, {} components, {}-bit",
                        f.width,
                        f.height,
                        f.components.len(),
                        f.precision
                    );
                    frame = Some(f);
                }
                marker::DAC => {
                    return Err(DecodeError::Unsupported("arithmetic coding".into()));
                }
                marker::DHT => {
                    for (class, id, spec) in header::parse_dht(payload)? {
                        let table = DecodeTable::build(&spec)?;
                        match class {
                            TableClass::Dc => dc_tables[id as usize] = Some(table),
                            TableClass::Ac => ac_tables[id as usize] = Some(table),
                        }
                    }
                }
                marker::SOF2..=marker::SOF15 if code != marker::JPG => {
                    return Err(DecodeError::Unsupported(format!(
                        "SOF{} frames (only sequential Huffman is handled)",
                        code - marker::SOF0
                    )));
                }
                marker::DRI => restart_interval = header::parse_dri(payload)?,
                marker::DNL => {
                    return Err(DecodeError::Unsupported("DNL segment".into()));
                }
                marker::SOS => {
                    let f = frame.as_ref().ok_or(DecodeError::MissingFrame)?;
                    let mut scan = header::parse_sos(payload, f)?;
                    scan.restart_interval = restart_interval;
                    for sc in &scan.components {
                        if std::mem::replace(&mut coded[sc.component], true) {
                            return Err(DecodeError::segment(
                                "SOS",
                                format!("component {} coded by two scans", sc.component),
                            ));
                        }
                    }
                    let end =
                        scan::decode_scan(data, pos, f, &scan, &dc_tables, &ac_tables, &mut planes)?;
                    trace!(
                        "scan {}: {} components, {} bytes",
                        scans.len(),
                        scan.components.len(),
                        end - pos
                    );
                    pos = end;
                    scans.push(scan);
                }
                c if Segment::is_preserved(c) => segments.push(Segment::new(c, payload.to_vec())),
                c => trace!("skipping marker 0xFF{c:02X}"),
            }
        }

        let frame = frame.ok_or(DecodeError::MissingFrame)?;
        if scans.is_empty() {
            return Err(DecodeError::NoScans);
        }

        Ok(JpegImage {
            header: JpegHeader {
                frame,
                scans,
                segments,
            },
            coefficients: ImageCoefficients::new(planes),
        })
    }

    fn encode(&self, image: &JpegImage) -> Result<Vec<u8>, EncodeError> {
        let header = &image.header;
        header.validate().map_err(EncodeError::InvalidHeader)?;
        let frame = &header.frame;
        let planes = image.coefficients.components();

        if planes.len() != frame.components.len() {
            return Err(EncodeError::ComponentCount {
                expected: frame.components.len(),
                actual: planes.len(),
            });
        }
        for (component, plane) in planes.iter().enumerate() {
            let expected = frame.coefficient_shape(component);
            if plane.shape() != expected {
                return Err(EncodeError::ComponentShape {
                    component,
                    actual: plane.shape(),
                    expected,
                });
            }
        }
        check_uncoded_blocks(header, planes)?;

        let extended = frame.extended
            || frame.precision != 8
            || header
                .scans
                .iter()
                .flat_map(|s| &s.components)
                .any(|sc| sc.dc_table > 1 || sc.ac_table > 1);

        let mut out = Vec::new();
        header::write_marker(&mut out, marker::SOI);
        for segment in &header.segments {
            header::write_preserved(&mut out, segment)?;
        }
        header::write_sof(&mut out, frame, extended)?;

        let mut interval = 0u16;
        for (i, scan) in header.scans.iter().enumerate() {
            if scan.restart_interval != interval {
                header::write_dri(&mut out, scan.restart_interval)?;
                interval = scan.restart_interval;
            }

            let specs = self.scan_tables(frame, scan, planes)?;
            let mut dc: [Option<EncodeTable>; 4] = Default::default();
            let mut ac: [Option<EncodeTable>; 4] = Default::default();
            for (class, id, spec) in &specs {
                let table = EncodeTable::build(spec)?;
                match class {
                    TableClass::Dc => dc[*id as usize] = Some(table),
                    TableClass::Ac => ac[*id as usize] = Some(table),
                }
            }
            let refs: Vec<(TableClass, u8, &HuffmanSpec)> =
                specs.iter().map(|(c, id, s)| (*c, *id, s)).collect();
            header::write_dht(&mut out, &refs)?;
            header::write_sos(&mut out, scan, frame)?;

            let data = scan::encode_scan(frame, scan, planes, &dc, &ac)?;
            trace!("scan {i}: {} bytes", data.len());
            out.extend_from_slice(&data);
        }

        header::write_marker(&mut out, marker::EOI);
        Ok(out)
    }
}

/// Blocks that no scan visits are not written; they must be zero so the
/// encoded stream still decodes to the same coefficients.
fn check_uncoded_blocks(
    header: &JpegHeader,
    planes: &[CoefficientMatrix],
) -> Result<(), EncodeError> {
    let frame = &header.frame;
    let mut coded = vec![(0usize, 0usize); planes.len()];
    for scan in &header.scans {
        for sc in &scan.components {
            coded[sc.component] = if scan.is_interleaved() {
                frame.block_grid(sc.component)
            } else {
                frame.scan_extent(sc.component)
            };
        }
    }

    for (component, (plane, &(tall, wide))) in planes.iter().zip(&coded).enumerate() {
        let (bt, bw) = plane.block_shape();
        for block_row in 0..bt {
            for block_col in 0..bw {
                if block_row < tall && block_col < wide {
                    continue;
                }
                if plane.block(block_row, block_col).iter().any(|&c| c != 0) {
                    return Err(EncodeError::UncodedBlock {
                        component,
                        block_row,
                        block_col,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Next marker at or after `pos`: `(code, offset of its 0xFF)`. Fill bytes,
/// stuffed zeros, stray RSTn markers and other garbage are skipped.
fn next_marker(data: &[u8], mut pos: usize) -> Option<(u8, usize)> {
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        match data[pos + 1] {
            0xFF => pos += 1,
            0x00 => pos += 2,
            m if marker::is_restart(m) => pos += 2,
            m => return Some((m, pos)),
        }
    }
    None
}

/// Payload of the length-prefixed segment whose length field is at `pos`.
fn segment_payload(data: &[u8], pos: usize) -> Result<&[u8], DecodeError> {
    if pos + 2 > data.len() {
        return Err(DecodeError::Truncated(data.len()));
    }
    let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    if len < 2 {
        return Err(DecodeError::segment("marker", format!("length {len}")));
    }
    data.get(pos + 2..pos + len)
        .ok_or(DecodeError::Truncated(data.len()))
}

// ---------------------------------------------------------------------------
// Fuzz hooks
// ---------------------------------------------------------------------------

/// Decode arbitrary bytes under a small pixel limit; when the result
/// re-encodes, decoding the re-encoded stream must give the same image.
#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_decode_reencode(data: &[u8]) {
    let codec = BaselineCodec::new(CodecOptions {
        max_pixels: 1 << 16,
        ..CodecOptions::default()
    });
    let Ok(image) = codec.decode(data) else {
        return;
    };
    let Ok(bytes) = codec.encode(&image) else {
        return;
    };
    match codec.decode(&bytes) {
        Ok(back) => {
            assert_eq!(back.header().frame, image.header().frame);
            assert_eq!(back.coefficients(), image.coefficients());
        }
        Err(e) => panic!("re-encoded stream failed to decode: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
