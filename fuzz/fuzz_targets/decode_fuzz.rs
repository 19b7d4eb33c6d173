#![no_main]
use jpegdelta::jpeg::{BaselineCodec, CodecOptions, CoefficientCodec};
use jpegdelta::{diff, merge};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The decoder must never panic, only return errors.
    let codec = BaselineCodec::new(CodecOptions {
        max_pixels: 1 << 16,
        ..CodecOptions::default()
    });
    let Ok(image) = codec.decode(data) else {
        return;
    };

    // Diffing an image against itself leaves nothing; merging that back is
    // the identity.
    let coefficients = image.coefficients();
    let d = diff(coefficients, coefficients.clone()).unwrap();
    assert!(d.components().iter().all(|m| m.is_all_zero()));
    assert_eq!(&merge(coefficients.clone(), &d).unwrap(), coefficients);
});
