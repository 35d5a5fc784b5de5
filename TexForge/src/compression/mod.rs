//! Compression utilities
//!
//! Block codecs used by the chunked compression envelope. Package bodies and
//! mod payloads use Zlib; LZ4 fills the slot the older platforms use for LZO.

pub mod envelope;

use std::io::{Read, Write};

use crate::error::{Error, Result};

pub use envelope::{DEFAULT_BLOCK_SIZE, ENVELOPE_TAG, decode, decode_prefix, encode};

/// Compression method applied to envelope blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    None,
    Zlib,
    Lz4,
}

impl CompressionMethod {
    /// Parse the codec id stored in package headers
    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::Zlib),
            2 => Ok(CompressionMethod::Lz4),
            _ => Err(Error::UnsupportedCompressionMethod { method: id }),
        }
    }

    /// Codec id for writing package headers
    #[must_use]
    pub fn to_id(self) -> u32 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Zlib => 1,
            CompressionMethod::Lz4 => 2,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Zlib => "zlib",
            CompressionMethod::Lz4 => "lz4",
        }
    }

    /// Parse a user-facing name (`none`, `zlib`, `lz4`)
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "store" => Some(CompressionMethod::None),
            "zlib" => Some(CompressionMethod::Zlib),
            "lz4" => Some(CompressionMethod::Lz4),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A block compressor/decompressor supplied to the envelope.
///
/// Implementations must be safe to call from several worker threads at once.
pub trait BlockCodec: Sync {
    /// Compress one block.
    fn compress_block(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress one block whose uncompressed size is known.
    fn decompress_block(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>>;
}

impl BlockCodec for CompressionMethod {
    fn compress_block(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            CompressionMethod::None => Ok(data.to_vec()),
            CompressionMethod::Zlib => compress_zlib(data),
            CompressionMethod::Lz4 => Ok(lz4_flex::block::compress(data)),
        }
    }

    fn decompress_block(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        match self {
            CompressionMethod::None => Ok(data.to_vec()),
            CompressionMethod::Zlib => decompress_zlib(data, expected_size),
            CompressionMethod::Lz4 => lz4_flex::block::decompress(data, expected_size).map_err(|e| {
                Error::Lz4DecompressionFailed {
                    message: e.to_string(),
                }
            }),
        }
    }
}

fn compress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress_zlib(compressed: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;

    // One byte past the expected size is enough to tell it is wrong
    let mut decoder = ZlibDecoder::new(compressed).take(expected_size as u64 + 1);
    let mut decompressed = Vec::with_capacity(expected_size);

    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| Error::ZlibDecompressionFailed {
            message: e.to_string(),
        })?;
    if decompressed.len() > expected_size {
        return Err(Error::ZlibDecompressionFailed {
            message: format!("block inflates past its declared {expected_size} bytes"),
        });
    }

    Ok(decompressed)
}
