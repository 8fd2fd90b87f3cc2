//! Compression and artifact I/O for the compiled bytecode stream.
//!
//! The on-disk artifact has no header or framing beyond what the codec
//! itself adds (§6): it is the raw opcode byte sequence run through a
//! deflate-class compressor at level 9, matching the source's
//! `zlib.compress(self.data, 9)`.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("compression level {0} out of range [0,9]")]
    InvalidLevel(u32),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// A compression codec, abstracted so `led-compiler`/`led-executor` don't
/// depend on a specific library.
pub trait Codec {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// zlib-wrapped deflate at a configurable level (default 9, matching the
/// source).
#[derive(Debug, Clone, Copy)]
pub struct DeflateCodec {
    level: Compression,
}

impl DeflateCodec {
    pub fn new(level: u32) -> Result<Self, CodecError> {
        if level > 9 {
            return Err(CodecError::InvalidLevel(level));
        }
        Ok(Self {
            level: Compression::new(level),
        })
    }
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self::new(9).expect("9 is a valid compression level")
    }
}

impl Codec for DeflateCodec {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Compresses `raw` and writes it to `path`, overwriting any existing file.
pub fn save_artifact(path: impl AsRef<Path>, raw: &[u8], codec: &dyn Codec) -> Result<usize, CodecError> {
    let compressed = codec.compress(raw)?;
    fs::write(path, &compressed)?;
    tracing::info!(
        target: "codec",
        raw_bytes = raw.len(),
        compressed_bytes = compressed.len(),
        "artifact_saved"
    );
    Ok(compressed.len())
}

/// Reads and decompresses the bytecode artifact at `path`.
pub fn load_artifact(path: impl AsRef<Path>, codec: &dyn Codec) -> Result<Vec<u8>, CodecError> {
    let compressed = fs::read(path)?;
    codec.decompress(&compressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_deflate() {
        let codec = DeflateCodec::default();
        let data = b"\x01\x00\xFF\x00\x00\x64\x04".to_vec();
        let compressed = codec.compress(&data).unwrap();
        let decompressed = codec.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn rejects_out_of_range_level() {
        assert!(matches!(
            DeflateCodec::new(10),
            Err(CodecError::InvalidLevel(10))
        ));
    }

    #[test]
    fn save_then_load_artifact_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.leds");
        let codec = DeflateCodec::default();
        let data = vec![0x02, 0, 0, 0, 0, 0x03, 0x01, 0xF4];

        let compressed_len = save_artifact(&path, &data, &codec).unwrap();
        assert!(compressed_len > 0);

        let loaded = load_artifact(&path, &codec).unwrap();
        assert_eq!(loaded, data);
    }
}
