#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    jpegdelta::jpeg::fuzz_decode_reencode(data);
});
