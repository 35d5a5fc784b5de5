//! Game variants and their per-variant policies
//!
//! Everything that differs between the supported games is looked up in a
//! [`VariantPolicy`] instead of being branched on at each call site.

use crate::compression::CompressionMethod;
use crate::error::{Error, Result};
use crate::texture::StorageKind;

/// Package header layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLayout {
    /// Tables follow the flags word directly; names carry a 64-bit flags field.
    Legacy,
    /// One extra word after the flags shifts every table field by 4 bytes.
    Extended,
}

/// A supported game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameVariant {
    /// First game: external mips shared between packages through mirror sets
    Classic,
    /// Second game: texture caches, LZ4-class mip compression
    Streaming,
    /// Third game: extended header, zlib mip compression
    Extended,
}

/// Per-variant constants consulted by the package and texture layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantPolicy {
    /// Package file version written and accepted
    pub file_version: u16,
    /// Header layout selected by the version
    pub layout: HeaderLayout,
    /// Number of smallest mips kept inline when a texture uses a cache file
    pub inline_tail_count: usize,
    /// Storage kind for compressed inline mips
    pub inline_kind: StorageKind,
    /// Storage kind for compressed external mips
    pub external_kind: StorageKind,
    /// Whether several exports may alias the same mip bytes
    pub mirroring: bool,
    /// Serialized width of a bool property value
    pub bool_property_size: usize,
    /// Codec used when a package body is recompressed
    pub package_codec: CompressionMethod,
}

const CLASSIC: VariantPolicy = VariantPolicy {
    file_version: 491,
    layout: HeaderLayout::Legacy,
    inline_tail_count: 6,
    inline_kind: StorageKind::INLINE_LZ4,
    external_kind: StorageKind::EXTERNAL_LZ4,
    mirroring: true,
    bool_property_size: 4,
    package_codec: CompressionMethod::Lz4,
};

const STREAMING: VariantPolicy = VariantPolicy {
    file_version: 512,
    layout: HeaderLayout::Legacy,
    inline_tail_count: 6,
    inline_kind: StorageKind::INLINE_LZ4,
    external_kind: StorageKind::EXTERNAL_LZ4,
    mirroring: false,
    bool_property_size: 4,
    package_codec: CompressionMethod::Lz4,
};

const EXTENDED: VariantPolicy = VariantPolicy {
    file_version: 684,
    layout: HeaderLayout::Extended,
    inline_tail_count: 6,
    inline_kind: StorageKind::INLINE_ZLIB,
    external_kind: StorageKind::EXTERNAL_ZLIB,
    mirroring: false,
    bool_property_size: 1,
    package_codec: CompressionMethod::Zlib,
};

impl GameVariant {
    /// All variants, in id order
    pub const ALL: [GameVariant; 3] = [GameVariant::Classic, GameVariant::Streaming, GameVariant::Extended];

    /// Policy table entry for this variant
    #[must_use]
    pub fn policy(self) -> &'static VariantPolicy {
        match self {
            GameVariant::Classic => &CLASSIC,
            GameVariant::Streaming => &STREAMING,
            GameVariant::Extended => &EXTENDED,
        }
    }

    /// Select the variant from a package file version
    pub fn from_file_version(version: u16) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.policy().file_version == version)
            .ok_or(Error::UnsupportedPackageVersion { version })
    }

    /// Id stored in mod container directories
    #[must_use]
    pub fn id(self) -> u32 {
        match self {
            GameVariant::Classic => 1,
            GameVariant::Streaming => 2,
            GameVariant::Extended => 3,
        }
    }

    #[must_use]
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.id() == id)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GameVariant::Classic => "classic",
            GameVariant::Streaming => "streaming",
            GameVariant::Extended => "extended",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for GameVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_select_variants() {
        assert_eq!(GameVariant::from_file_version(684).unwrap(), GameVariant::Extended);
        assert_eq!(GameVariant::from_file_version(491).unwrap(), GameVariant::Classic);
        assert!(matches!(
            GameVariant::from_file_version(100),
            Err(Error::UnsupportedPackageVersion { version: 100 })
        ));
    }

    #[test]
    fn test_only_classic_mirrors() {
        let mirroring: Vec<_> = GameVariant::ALL
            .into_iter()
            .filter(|v| v.policy().mirroring)
            .collect();
        assert_eq!(mirroring, vec![GameVariant::Classic]);
    }
}
