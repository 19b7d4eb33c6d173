use jpegdelta::engine;
use jpegdelta::io;
use jpegdelta::jpeg::{
    BaselineCodec, CodecOptions, CoefficientCodec, ComponentSpec, DecodeError, HuffmanMode,
    JpegImage,
};
use tempfile::tempdir;

fn decode_pixels(bytes: &[u8]) -> (jpeg_decoder::ImageInfo, Vec<u8>) {
    let mut decoder = jpeg_decoder::Decoder::new(bytes);
    let pixels = decoder.decode().expect("jpeg-decoder rejected our output");
    (decoder.info().unwrap(), pixels)
}

/// Every block gets the same DC value: a flat gray image.
fn flat_gray(width: u16, height: u16, dc: i16) -> JpegImage {
    let mut img = JpegImage::baseline(width, height, &ComponentSpec::grayscale()).unwrap();
    let plane = &mut img.coefficients_mut().components_mut()[0];
    let (bt, bw) = plane.block_shape();
    for br in 0..bt {
        for bc in 0..bw {
            plane.set(br * 8, bc * 8, dc);
        }
    }
    img
}

/// A YCbCr image with a pattern of DC and low-frequency AC values.
fn textured(width: u16, height: u16, sampling: (u8, u8)) -> JpegImage {
    let mut img =
        JpegImage::baseline(width, height, &ComponentSpec::ycbcr(sampling.0, sampling.1)).unwrap();
    for (c, plane) in img.coefficients_mut().components_mut().iter_mut().enumerate() {
        let (bt, bw) = plane.block_shape();
        for br in 0..bt {
            for bc in 0..bw {
                let k = (br * 7 + bc * 3 + c) as i16;
                plane.set(br * 8, bc * 8, k % 40 - 20);
                plane.set(br * 8, bc * 8 + 1, k % 5 - 2);
                plane.set(br * 8 + 2, bc * 8 + 1, k % 3);
            }
        }
    }
    img
}

#[test]
fn flat_image_decodes_to_expected_gray() {
    let img = flat_gray(24, 16, 4);
    let bytes = BaselineCodec::default().encode(&img).unwrap();
    let (info, pixels) = decode_pixels(&bytes);
    assert_eq!((info.width, info.height), (24, 16));
    assert_eq!(pixels.len(), 24 * 16);
    // DC 4 with quantizer 16 lifts the level by 4 * 16 / 8 = 8.
    assert!(pixels.iter().all(|&p| (135..=137).contains(&p)), "{pixels:?}");
}

#[test]
fn color_output_decodes_with_both_table_modes() {
    for sampling in [(1, 1), (2, 1), (2, 2)] {
        for huffman in [HuffmanMode::Optimized, HuffmanMode::Standard] {
            let img = textured(53, 37, sampling).with_restart_interval(2);
            let codec = BaselineCodec::new(CodecOptions {
                huffman,
                ..CodecOptions::default()
            });
            let bytes = codec.encode(&img).unwrap();
            let (info, pixels) = decode_pixels(&bytes);
            assert_eq!((info.width, info.height), (53, 37));
            assert_eq!(pixels.len(), 53 * 37 * 3);
            assert_eq!(codec.decode(&bytes).unwrap(), img);
        }
    }
}

#[test]
fn diff_is_a_decodable_jpeg() {
    let base = textured(64, 48, (2, 2));
    let mut modified = base.clone();
    for b in 0..3 {
        modified.coefficients_mut().components_mut()[0].fill_block(b, b, 5);
    }

    let codec = BaselineCodec::default();
    let (header, coefficients) = modified.clone().into_parts();
    let d = engine::diff(base.coefficients(), coefficients).unwrap();
    let diff_image = JpegImage::from_parts(header, d);
    let bytes = codec.encode(&diff_image).unwrap();

    let (info, _) = decode_pixels(&bytes);
    assert_eq!((info.width, info.height), (64, 48));

    // A diff of mostly zero blocks is smaller than the full image.
    assert!(bytes.len() < codec.encode(&modified).unwrap().len());

    let decoded = codec.decode(&bytes).unwrap();
    let merged = engine::merge(base.into_coefficients(), decoded.coefficients()).unwrap();
    assert_eq!(&merged, modified.coefficients());
}

#[test]
fn file_roundtrip_keeps_metadata_of_each_side() {
    let dir = tempdir().unwrap();
    let base_path = dir.path().join("base.jpg");
    let modified_path = dir.path().join("modified.jpg");
    let diff_path = dir.path().join("diff.jpg");
    let merged_path = dir.path().join("merged.jpg");

    let codec = BaselineCodec::default();
    let base = textured(40, 40, (2, 2));
    let mut modified = base.clone();
    modified.coefficients_mut().components_mut()[1].set(3, 3, 9);
    std::fs::write(&base_path, codec.encode(&base).unwrap()).unwrap();
    std::fs::write(&modified_path, codec.encode(&modified).unwrap()).unwrap();

    let stats = io::diff_file(&base_path, &modified_path, &diff_path, CodecOptions::default())
        .unwrap();
    assert_eq!(stats.blocks.touched_blocks(), 1);
    io::merge_file(&base_path, &diff_path, &merged_path, CodecOptions::default()).unwrap();

    let merged = codec.decode(&std::fs::read(&merged_path).unwrap()).unwrap();
    assert_eq!(merged.coefficients(), modified.coefficients());
    assert_eq!(merged.header().segments, base.header().segments);
    decode_pixels(&std::fs::read(&merged_path).unwrap());
}

#[test]
fn diff_of_identical_files_has_no_changed_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("img.jpg");
    let diff_path = dir.path().join("diff.jpg");
    let img = textured(32, 32, (1, 1));
    std::fs::write(&path, BaselineCodec::default().encode(&img).unwrap()).unwrap();

    let stats = io::diff_file(&path, &path, &diff_path, CodecOptions::default()).unwrap();
    assert_eq!(stats.blocks.touched_blocks(), 0);

    let d = BaselineCodec::default()
        .decode(&std::fs::read(&diff_path).unwrap())
        .unwrap();
    assert!(d.coefficients().components().iter().all(|m| m.is_all_zero()));
}

#[test]
fn corrupt_inputs_are_errors_not_panics() {
    let codec = BaselineCodec::default();
    let bytes = codec.encode(&textured(48, 48, (2, 2))).unwrap();

    // Truncation at every length.
    for cut in 0..bytes.len() - 2 {
        let _ = codec.decode(&bytes[..cut]);
    }

    // Single-byte corruption across the stream.
    for i in (2..bytes.len()).step_by(7) {
        let mut broken = bytes.clone();
        broken[i] ^= 0x5A;
        let _ = codec.decode(&broken);
    }

    assert_eq!(codec.decode(b"\x89PNG\r\n"), Err(DecodeError::NotJpeg));
}

#[test]
fn scan_without_frame_is_rejected() {
    let bytes = [
        0xFF, 0xD8, // SOI
        0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, // SOS
        0xFF, 0xD9, // EOI
    ];
    assert_eq!(
        BaselineCodec::default().decode(&bytes),
        Err(DecodeError::MissingFrame)
    );
}

// ---------------------------------------------------------------------------
// Files from other encoders
// ---------------------------------------------------------------------------

fn fixture(name: &str) -> Vec<u8> {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()))
}

/// Decode, re-encode with both table modes and decode again: coefficients,
/// header and metadata come back unchanged, the self-diff is empty, and an
/// independent decoder renders identical pixels.
fn assert_reencodes_losslessly(name: &str, bytes: &[u8]) {
    let (info, original_pixels) = decode_pixels(bytes);
    for huffman in [HuffmanMode::Optimized, HuffmanMode::Standard] {
        let codec = BaselineCodec::new(CodecOptions {
            huffman,
            ..CodecOptions::default()
        });
        let img = codec.decode(bytes).unwrap();
        assert_eq!((img.width(), img.height()), (info.width, info.height), "{name}");

        let again = codec.encode(&img).unwrap();
        let back = codec.decode(&again).unwrap();
        assert_eq!(back, img, "{name} ({huffman:?})");

        let d = engine::diff(img.coefficients(), img.coefficients().clone()).unwrap();
        assert!(d.components().iter().all(|m| m.is_all_zero()), "{name}");

        let (_, pixels) = decode_pixels(&again);
        assert!(pixels == original_pixels, "{name} ({huffman:?}): pixels changed");
    }
}

#[test]
fn third_party_fixtures_reencode_losslessly() {
    for (name, components) in [
        ("python_16x16_420.jpg", 3),
        ("python_raw_16x16_420.jpg", 3),
        ("flower_161x161_444.jpg", 3),
        ("webtide_245x60_444.jpg", 3),
        ("tower_512x512_gray.jpg", 1),
    ] {
        let bytes = fixture(name);
        let img = BaselineCodec::default().decode(&bytes).unwrap();
        assert_eq!(img.component_count(), components, "{name}");
        assert_reencodes_losslessly(name, &bytes);
    }
}

#[test]
fn fixture_metadata_and_restart_interval_survive() {
    let img = BaselineCodec::default()
        .decode(&fixture("flower_161x161_444.jpg"))
        .unwrap();
    let markers: Vec<u8> = img.header().segments.iter().map(|s| s.marker).collect();
    // JFIF, Exif, Photoshop IRB, then two quantization tables.
    assert_eq!(markers, vec![0xE0, 0xE1, 0xED, 0xDB, 0xDB]);
    assert!(img.header().segments[1].payload.starts_with(b"Exif\0\0"));
    assert_eq!(img.header().scans.len(), 1);
    assert_eq!(img.header().scans[0].restart_interval, 21);
    // 161 pixels need 21 blocks per side.
    assert!(img.coefficients().components().iter().all(|m| m.block_shape() == (21, 21)));
}

#[test]
fn progressive_fixture_is_unsupported() {
    assert!(matches!(
        BaselineCodec::default().decode(&fixture("stripe_493x58_progressive.jpg")),
        Err(DecodeError::Unsupported(_))
    ));
}

#[test]
fn fixture_diff_and_merge_through_files() {
    let dir = tempdir().unwrap();
    let base_path = dir.path().join("base.jpg");
    let modified_path = dir.path().join("modified.jpg");
    let diff_path = dir.path().join("diff.jpg");
    let merged_path = dir.path().join("merged.jpg");

    let original = fixture("flower_161x161_444.jpg");
    std::fs::write(&base_path, &original).unwrap();

    let codec = BaselineCodec::default();
    let base = codec.decode(&original).unwrap();
    let mut modified = base.clone();
    for (c, plane) in modified.coefficients_mut().components_mut().iter_mut().enumerate() {
        plane.fill_block(10, 3 + c, 12);
        let dc = plane.get(0, 0);
        plane.set(0, 0, if dc == 40 { 41 } else { 40 });
    }
    std::fs::write(&modified_path, codec.encode(&modified).unwrap()).unwrap();

    let stats =
        io::diff_file(&base_path, &modified_path, &diff_path, CodecOptions::default()).unwrap();
    assert_eq!(stats.blocks.touched_blocks(), 6);
    io::merge_file(&base_path, &diff_path, &merged_path, CodecOptions::default()).unwrap();

    let merged = codec.decode(&std::fs::read(&merged_path).unwrap()).unwrap();
    assert_eq!(merged.coefficients(), modified.coefficients());
    assert_eq!(merged.header().segments, base.header().segments);
}

/// RGB gradient with a moving highlight, so nearby images differ in a few
/// blocks only.
fn rgb_pattern(width: u16, height: u16, highlight: (usize, usize)) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut data = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            let lit = x.abs_diff(highlight.0) < 4 && y.abs_diff(highlight.1) < 4;
            let boost = if lit { 90 } else { 0 };
            data.push(((x * 255 / w) + boost).min(255) as u8);
            data.push(((y * 255 / h) + boost).min(255) as u8);
            data.push((((x + y) * 4) % 256) as u8);
        }
    }
    data
}

fn encode_with_jpeg_encoder(
    width: u16,
    height: u16,
    highlight: (usize, usize),
    optimized: bool,
) -> Vec<u8> {
    let mut out = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut out, 85);
    encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::F_2_2);
    encoder.set_restart_interval(3);
    encoder.set_optimized_huffman_tables(optimized);
    encoder.add_app_segment(15, b"jpegdelta fixture").unwrap();
    encoder
        .encode(
            &rgb_pattern(width, height, highlight),
            width,
            height,
            jpeg_encoder::ColorType::Rgb,
        )
        .unwrap();
    out
}

#[test]
fn odd_sized_420_from_another_encoder() {
    for optimized in [false, true] {
        let bytes = encode_with_jpeg_encoder(37, 29, (5, 5), optimized);
        let img = BaselineCodec::default().decode(&bytes).unwrap();
        let sampling: Vec<(u8, u8)> = img
            .header()
            .frame
            .components
            .iter()
            .map(|c| (c.h, c.v))
            .collect();
        assert_eq!(sampling, vec![(2, 2), (1, 1), (1, 1)]);
        // 37x29 rounds up to 3x2 MCUs of 16x16.
        assert_eq!(img.coefficients()[0].block_shape(), (4, 6));
        assert_eq!(img.coefficients()[1].block_shape(), (2, 3));
        assert!(img.header().segments.iter().any(|s| s.marker == 0xEF));
        assert_reencodes_losslessly("jpeg-encoder 37x29", &bytes);
    }
}

#[test]
fn diff_between_two_foreign_encodes_merges_back() {
    let codec = BaselineCodec::default();
    let base = codec
        .decode(&encode_with_jpeg_encoder(61, 45, (8, 8), true))
        .unwrap();
    let modified = codec
        .decode(&encode_with_jpeg_encoder(61, 45, (40, 30), true))
        .unwrap();

    let d = engine::diff(base.coefficients(), modified.coefficients().clone()).unwrap();
    let merged = engine::merge(base.coefficients().clone(), &d).unwrap();

    // Exact except for blocks that changed to all zeros.
    for (c, plane) in merged.components().iter().enumerate() {
        let (bt, bw) = plane.block_shape();
        for br in 0..bt {
            for bc in 0..bw {
                let m = modified.coefficients()[c].block(br, bc);
                let expected = if m.iter().all(|&v| v == 0) {
                    base.coefficients()[c].block(br, bc)
                } else {
                    m
                };
                assert_eq!(plane.block(br, bc), expected, "component {c} block ({br}, {bc})");
            }
        }
    }
}
