//! Mipmap descriptors, storage kinds and pixel formats

use bitflags::bitflags;

use crate::compression::{self, CompressionMethod, DEFAULT_BLOCK_SIZE};
use crate::error::{Error, Result};

bitflags! {
    /// Where and how a mip's bytes are stored
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StorageKind: u32 {
        /// Bytes live in an external cache file
        const EXTERNAL = 0x1;
        /// Bytes are a zlib envelope frame
        const ZLIB = 0x2;
        /// Bytes are an LZ4 envelope frame
        const LZ4 = 0x10;
        /// Descriptor exists but carries no data
        const UNUSED = 0x20;
    }
}

impl StorageKind {
    pub const INLINE_UNCOMPRESSED: Self = Self::empty();
    pub const INLINE_ZLIB: Self = Self::from_bits_retain(0x2);
    pub const INLINE_LZ4: Self = Self::from_bits_retain(0x10);
    pub const EXTERNAL_UNCOMPRESSED: Self = Self::from_bits_retain(0x1);
    pub const EXTERNAL_ZLIB: Self = Self::from_bits_retain(0x3);
    pub const EXTERNAL_LZ4: Self = Self::from_bits_retain(0x11);
    pub const EMPTY: Self = Self::from_bits_retain(0x21);

    /// Placeholder without data
    #[must_use]
    pub fn is_unused(self) -> bool {
        self.contains(Self::UNUSED)
    }

    /// Data lives in an external cache file
    #[must_use]
    pub fn is_external(self) -> bool {
        self.contains(Self::EXTERNAL) && !self.is_unused()
    }

    /// Data follows the descriptor inside the export
    #[must_use]
    pub fn is_inline(self) -> bool {
        !self.contains(Self::EXTERNAL) && !self.is_unused()
    }

    /// Block codec of the stored bytes, `None` for uncompressed kinds
    #[must_use]
    pub fn codec(self) -> Option<CompressionMethod> {
        if self.contains(Self::ZLIB) {
            Some(CompressionMethod::Zlib)
        } else if self.contains(Self::LZ4) {
            Some(CompressionMethod::Lz4)
        } else {
            None
        }
    }

    /// Same compression, stored inline
    #[must_use]
    pub fn to_inline(self) -> Self {
        self.difference(Self::EXTERNAL | Self::UNUSED)
    }

    /// Same compression, stored in an external cache
    #[must_use]
    pub fn to_external(self) -> Self {
        self.difference(Self::UNUSED) | Self::EXTERNAL
    }

    /// Short label for listings
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            k if k.is_unused() => "empty",
            k if k == Self::INLINE_UNCOMPRESSED => "inline",
            k if k.is_inline() => "inline-compressed",
            k if k == Self::EXTERNAL_UNCOMPRESSED => "external",
            _ => "external-compressed",
        }
    }
}

/// One mip level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mipmap {
    pub storage: StorageKind,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
    /// Absolute package offset for inline kinds, cache offset for external ones
    pub data_offset: u32,
    pub width: u32,
    pub height: u32,
    /// Stored bytes of an inline mip (compressed when the kind is)
    pub data: Vec<u8>,
}

impl Mipmap {
    /// Inline mip holding `pixels`, compressed according to `storage`.
    pub fn inline(storage: StorageKind, width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
        let data = encode_payload(storage, pixels)?;
        Self::inline_stored(storage, width, height, pixels.len(), data)
    }

    /// Inline mip from bytes already encoded the way `storage` stores them
    pub fn inline_stored(
        storage: StorageKind,
        width: u32,
        height: u32,
        uncompressed_size: usize,
        data: Vec<u8>,
    ) -> Result<Self> {
        Ok(Self {
            storage: storage.to_inline(),
            uncompressed_size: len_u32(uncompressed_size)?,
            compressed_size: len_u32(data.len())?,
            data_offset: 0,
            width,
            height,
            data,
        })
    }

    /// Descriptor for bytes already written to an external cache.
    #[must_use]
    pub fn external(
        storage: StorageKind,
        width: u32,
        height: u32,
        uncompressed_size: u32,
        compressed_size: u32,
        data_offset: u32,
    ) -> Self {
        Self {
            storage: storage.to_external(),
            uncompressed_size,
            compressed_size,
            data_offset,
            width,
            height,
            data: Vec::new(),
        }
    }

    /// Placeholder descriptor without data
    #[must_use]
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            storage: StorageKind::EMPTY,
            uncompressed_size: 0,
            compressed_size: 0,
            data_offset: 0,
            width,
            height,
            data: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Decode the inline bytes of this mip
    pub fn inline_pixels(&self) -> Result<Vec<u8>> {
        self.decode_stored(&self.data)
    }

    /// Decode stored bytes (inline or read from a cache) into pixels
    pub fn decode_stored(&self, stored: &[u8]) -> Result<Vec<u8>> {
        let pixels = match self.storage.codec() {
            Some(method) => compression::decode(stored, &method)?,
            None => stored.to_vec(),
        };
        if pixels.len() != self.uncompressed_size as usize {
            return Err(Error::MipSizeMismatch {
                width: self.width,
                height: self.height,
                expected: self.uncompressed_size as usize,
                actual: pixels.len(),
            });
        }
        Ok(pixels)
    }
}

/// Encode pixel bytes the way `storage` stores them.
pub fn encode_payload(storage: StorageKind, pixels: &[u8]) -> Result<Vec<u8>> {
    match storage.codec() {
        Some(method) => compression::encode(pixels, DEFAULT_BLOCK_SIZE, &method),
        None => Ok(pixels.to_vec()),
    }
}

pub(crate) fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::PackageTooLarge { size: len })
}

/// Pixel format named by a texture's `Format` property
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    Dxt1,
    Dxt3,
    Dxt5,
    Ati2,
    Bc7,
    V8U8,
    A8R8G8B8,
    G8,
    /// Any other engine format, by name
    Other(String),
}

impl PixelFormat {
    /// Parse an engine enum name such as `PF_DXT1`
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "PF_DXT1" => PixelFormat::Dxt1,
            "PF_DXT3" => PixelFormat::Dxt3,
            "PF_DXT5" => PixelFormat::Dxt5,
            "PF_ATI2" | "PF_BC5" => PixelFormat::Ati2,
            "PF_BC7" => PixelFormat::Bc7,
            "PF_V8U8" => PixelFormat::V8U8,
            "PF_A8R8G8B8" => PixelFormat::A8R8G8B8,
            "PF_G8" => PixelFormat::G8,
            _ => PixelFormat::Other(name.to_string()),
        }
    }

    /// Engine enum name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            PixelFormat::Dxt1 => "PF_DXT1",
            PixelFormat::Dxt3 => "PF_DXT3",
            PixelFormat::Dxt5 => "PF_DXT5",
            PixelFormat::Ati2 => "PF_ATI2",
            PixelFormat::Bc7 => "PF_BC7",
            PixelFormat::V8U8 => "PF_V8U8",
            PixelFormat::A8R8G8B8 => "PF_A8R8G8B8",
            PixelFormat::G8 => "PF_G8",
            PixelFormat::Other(name) => name,
        }
    }

    /// Code stored in mod mip sets (0 = unknown)
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            PixelFormat::Dxt1 => 1,
            PixelFormat::Dxt3 => 2,
            PixelFormat::Dxt5 => 3,
            PixelFormat::Ati2 => 4,
            PixelFormat::Bc7 => 5,
            PixelFormat::V8U8 => 6,
            PixelFormat::A8R8G8B8 => 7,
            PixelFormat::G8 => 8,
            PixelFormat::Other(_) => 0,
        }
    }

    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => PixelFormat::Dxt1,
            2 => PixelFormat::Dxt3,
            3 => PixelFormat::Dxt5,
            4 => PixelFormat::Ati2,
            5 => PixelFormat::Bc7,
            6 => PixelFormat::V8U8,
            7 => PixelFormat::A8R8G8B8,
            8 => PixelFormat::G8,
            _ => return None,
        })
    }

    /// Byte size of one `width` x `height` mip, when the format is known
    #[must_use]
    pub fn mip_size(&self, width: u32, height: u32) -> Option<usize> {
        let (w, h) = (width.max(1) as usize, height.max(1) as usize);
        let blocks = w.div_ceil(4) * h.div_ceil(4);
        match self {
            PixelFormat::Dxt1 => Some(blocks * 8),
            PixelFormat::Dxt3 | PixelFormat::Dxt5 | PixelFormat::Ati2 | PixelFormat::Bc7 => {
                Some(blocks * 16)
            }
            PixelFormat::V8U8 => Some(w * h * 2),
            PixelFormat::A8R8G8B8 => Some(w * h * 4),
            PixelFormat::G8 => Some(w * h),
            PixelFormat::Other(_) => None,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
