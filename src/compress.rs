//! # Compression
//!
//! Thin wrapper over the Zstandard streaming codec. Every chunk is written as
//! an independent zstd frame so that any chunk can be decompressed without its
//! neighbours. The level is recorded per snapshot in the manifest; 3 is the
//! balanced default, 9 the "full" profile.

use std::io::{Read, Write};

/// Lowest accepted compression level.
pub const MIN_LEVEL: i32 = 1;
/// Highest accepted compression level.
pub const MAX_LEVEL: i32 = 19;
/// Default level for the balanced profile.
pub const DEFAULT_LEVEL: i32 = 3;
/// Level used by the `--compact-full` profile.
pub const FULL_LEVEL: i32 = 9;

/// Compresses a byte slice into a standalone zstd frame.
pub fn compress(data: &[u8], level: i32) -> std::io::Result<Vec<u8>> {
    let mut encoder = zstd::Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompresses a standalone zstd frame.
pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// Wraps a reader in a streaming decompressor.
pub fn reader<R: Read>(source: R) -> std::io::Result<zstd::Decoder<'static, std::io::BufReader<R>>> {
    zstd::Decoder::new(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"Hello, zstd compression! This is a test string that should compress.";
        let compressed = compress(data, DEFAULT_LEVEL).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn frames_are_independent() {
        let a = compress(b"first", 3).unwrap();
        let b = compress(b"second", 9).unwrap();
        assert_eq!(decompress(&a).unwrap(), b"first");
        assert_eq!(decompress(&b).unwrap(), b"second");
    }

    #[test]
    fn streaming_reader_matches_eager() {
        let data = vec![7u8; 4096];
        let compressed = compress(&data, DEFAULT_LEVEL).unwrap();
        let mut out = Vec::new();
        reader(&compressed[..]).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn actually_compresses() {
        let data = vec![0u8; 10000]; // highly compressible
        let compressed = compress(&data, DEFAULT_LEVEL).unwrap();
        assert!(compressed.len() < data.len());
    }
}
