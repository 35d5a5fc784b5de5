//! Texture mipmap model
//!
//! A [`Texture`] is a transient view over one export's bytes:
//!
//! ```text
//! net index        i32
//! property block   tagged properties until "None"
//! mip count        u32
//! per mip (index 0 = smallest):
//!   storage kind, uncompressed size, compressed size, data offset   (u32 each)
//!   inline bytes   (inline kinds only)
//!   width, height  (u32 each)
//! trailer          carried verbatim
//! ```

mod mipmap;
pub mod properties;
mod relocate;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::package::{NameTable, Package};
use crate::tfc::CacheStore;
use crate::variant::{GameVariant, VariantPolicy};

pub(crate) use mipmap::len_u32;
pub use mipmap::{Mipmap, PixelFormat, StorageKind, encode_payload};
pub use properties::{ByteValue, FName, Property, PropertyList, PropertyValue};
pub use relocate::TextureRelocator;

/// Well-known property names
pub mod prop {
    pub const SIZE_X: &str = "SizeX";
    pub const SIZE_Y: &str = "SizeY";
    pub const FORMAT: &str = "Format";
    pub const CACHE_NAME: &str = "TextureFileCacheName";
    pub const CACHE_GUID: &str = "TFCFileGuid";
    pub const NEVER_STREAM: &str = "NeverStream";
    pub const BASE_PACKAGE: &str = "BasePackageName";
}

/// Classes whose exports carry a mip list
pub const TEXTURE_CLASSES: &[&str] = &[
    "Texture2D",
    "LightMapTexture2D",
    "ShadowMapTexture2D",
    "TextureFlipBook",
];

/// Upper bound on mips in one texture (a 2^31 texture has 32 levels)
pub const MAX_MIPS: u32 = 32;

/// Size of a mip descriptor before its inline bytes
const MIP_HEADER_SIZE: usize = 16;

#[must_use]
pub fn is_texture_class(class_name: &str) -> bool {
    TEXTURE_CLASSES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(class_name))
}

/// Replace export `index` with `data`.
///
/// Texture exports are decoded and re-serialized so inline mip offsets point
/// at the export's position in this package. Anything else is stored as is.
pub fn replace_export_bytes(package: &mut Package, index: usize, data: Vec<u8>) -> Result<()> {
    let is_texture = package
        .export_class_name(index)
        .is_ok_and(|class| is_texture_class(&class));
    if is_texture {
        if let Ok(texture) = Texture::from_bytes(&data, package.names(), package.variant(), index) {
            tracing::debug!("Export {}: texture replaced verbatim", index);
            return texture.write_to_package(package, index);
        }
    }
    tracing::debug!("Export {}: {} bytes replaced", index, data.len());
    package.set_export_bytes(index, data)
}

/// A decoded texture export
#[derive(Debug, Clone)]
pub struct Texture {
    variant: GameVariant,
    export_index: usize,
    net_index: i32,
    properties: PropertyList,
    mipmaps: Vec<Mipmap>,
    trailer: Vec<u8>,
    /// Byte positions of inline mips' `data_offset` fields in the parsed bytes
    inline_offset_fields: Vec<usize>,
}

impl Texture {
    /// Build a texture from parts, for exports created from scratch.
    #[must_use]
    pub fn new(variant: GameVariant, properties: PropertyList, mipmaps: Vec<Mipmap>) -> Self {
        Self {
            variant,
            export_index: 0,
            net_index: 0,
            properties,
            mipmaps,
            trailer: Vec::new(),
            inline_offset_fields: Vec::new(),
        }
    }

    /// Decode export `index` of `package`.
    pub fn from_export(package: &Package, index: usize) -> Result<Self> {
        let data = package.export_data(index)?;
        Self::from_bytes(data, package.names(), package.variant(), index)
    }

    /// Decode texture bytes. `export_index` is only used in error reports.
    pub fn from_bytes(
        data: &[u8],
        names: &NameTable,
        variant: GameVariant,
        export_index: usize,
    ) -> Result<Self> {
        let malformed = |message: String| Error::MalformedTexture {
            export: export_index,
            message,
        };
        let policy = variant.policy();

        if data.len() < 4 {
            return Err(malformed(format!("{} bytes is too short", data.len())));
        }
        let net_index = LittleEndian::read_i32(&data[0..4]);
        let (properties, consumed) = PropertyList::parse(&data[4..], names, policy)?;
        let mut pos = 4 + consumed;

        let count = data
            .get(pos..pos + 4)
            .map(LittleEndian::read_u32)
            .ok_or_else(|| malformed("missing mip count".to_string()))?;
        if count > MAX_MIPS {
            return Err(malformed(format!("implausible mip count {count}")));
        }
        pos += 4;

        let mut mipmaps = Vec::with_capacity(count as usize);
        let mut inline_offset_fields = Vec::new();
        for i in 0..count {
            let head = data
                .get(pos..pos + MIP_HEADER_SIZE)
                .ok_or_else(|| malformed(format!("mip {i} descriptor truncated")))?;
            let storage = StorageKind::from_bits_retain(LittleEndian::read_u32(&head[0..4]));
            let uncompressed_size = LittleEndian::read_u32(&head[4..8]);
            let compressed_size = LittleEndian::read_u32(&head[8..12]);
            let data_offset = LittleEndian::read_u32(&head[12..16]);
            let offset_field = pos + 12;
            pos += MIP_HEADER_SIZE;

            let inline = if storage.is_inline() {
                inline_offset_fields.push(offset_field);
                let len = compressed_size as usize;
                let bytes = data
                    .get(pos..pos + len)
                    .ok_or_else(|| malformed(format!("mip {i} inline data truncated")))?;
                pos += len;
                bytes.to_vec()
            } else {
                Vec::new()
            };

            let dims = data
                .get(pos..pos + 8)
                .ok_or_else(|| malformed(format!("mip {i} dimensions truncated")))?;
            pos += 8;

            mipmaps.push(Mipmap {
                storage,
                uncompressed_size,
                compressed_size,
                data_offset,
                width: LittleEndian::read_u32(&dims[0..4]),
                height: LittleEndian::read_u32(&dims[4..8]),
                data: inline,
            });
        }

        Ok(Self {
            variant,
            export_index,
            net_index,
            properties,
            mipmaps,
            trailer: data[pos..].to_vec(),
            inline_offset_fields,
        })
    }

    /// Serialize the texture.
    ///
    /// With `update_internal_offsets`, inline mips record their absolute
    /// position in the uncompressed package image, `pcc_data_offset` being
    /// the export's data offset.
    pub fn to_bytes(
        &self,
        names: &mut NameTable,
        pcc_data_offset: u32,
        update_internal_offsets: bool,
    ) -> Result<Vec<u8>> {
        let policy = self.policy();
        let mut out = Vec::new();
        out.extend_from_slice(&self.net_index.to_le_bytes());
        self.properties.write_to(&mut out, names, policy)?;
        out.extend_from_slice(&(self.mipmaps.len() as u32).to_le_bytes());

        for mip in &self.mipmaps {
            let inline = mip.storage.is_inline();
            if inline && mip.data.len() != mip.compressed_size as usize {
                return Err(Error::MipSizeMismatch {
                    width: mip.width,
                    height: mip.height,
                    expected: mip.compressed_size as usize,
                    actual: mip.data.len(),
                });
            }
            out.extend_from_slice(&mip.storage.bits().to_le_bytes());
            out.extend_from_slice(&mip.uncompressed_size.to_le_bytes());
            out.extend_from_slice(&mip.compressed_size.to_le_bytes());
            let offset = if inline && update_internal_offsets {
                let position = mipmap::len_u32(out.len() + 4)?;
                pcc_data_offset.wrapping_add(position)
            } else {
                mip.data_offset
            };
            out.extend_from_slice(&offset.to_le_bytes());
            if inline {
                out.extend_from_slice(&mip.data);
            }
            out.extend_from_slice(&mip.width.to_le_bytes());
            out.extend_from_slice(&mip.height.to_le_bytes());
        }
        out.extend_from_slice(&self.trailer);
        Ok(out)
    }

    /// Serialize into export `index` of `package`, interning any new names.
    pub fn write_to_package(&self, package: &mut Package, index: usize) -> Result<()> {
        let offset = package.export_data_offset(index)?;
        let bytes = self.to_bytes(package.names_mut(), offset, true)?;
        package.set_export_bytes(index, bytes)
    }

    pub fn variant(&self) -> GameVariant {
        self.variant
    }

    pub fn policy(&self) -> &'static VariantPolicy {
        self.variant.policy()
    }

    pub fn export_index(&self) -> usize {
        self.export_index
    }

    pub fn properties(&self) -> &PropertyList {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyList {
        &mut self.properties
    }

    /// Mips, smallest first
    pub fn mipmaps(&self) -> &[Mipmap] {
        &self.mipmaps
    }

    pub(crate) fn inline_offset_fields(&self) -> &[usize] {
        &self.inline_offset_fields
    }

    /// Name of the external cache file, if the texture declares one
    pub fn cache_name(&self) -> Option<String> {
        self.properties.get_name(prop::CACHE_NAME)
    }

    pub fn cache_guid(&self) -> Option<[u8; 16]> {
        let data = self.properties.get_struct(prop::CACHE_GUID)?;
        data.try_into().ok()
    }

    /// Point external mips at another cache file
    pub fn set_cache(&mut self, name: &str, guid: [u8; 16]) {
        self.properties.set_name(prop::CACHE_NAME, name);
        self.properties.set_guid(prop::CACHE_GUID, guid);
    }

    pub fn has_external_cache(&self) -> bool {
        self.properties.contains(prop::CACHE_NAME)
    }

    /// Declared base package (mirroring platforms)
    pub fn base_package_name(&self) -> Option<String> {
        self.properties.get_name(prop::BASE_PACKAGE)
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        self.properties
            .get_name(prop::FORMAT)
            .map(|name| PixelFormat::from_name(&name))
    }

    /// `SizeX` x `SizeY`
    pub fn size(&self) -> Option<(u32, u32)> {
        let x = self.properties.get_int(prop::SIZE_X)?;
        let y = self.properties.get_int(prop::SIZE_Y)?;
        Some((u32::try_from(x).ok()?, u32::try_from(y).ok()?))
    }

    /// Index of the largest mip that carries data
    pub fn top_mip_index(&self) -> Option<usize> {
        self.mipmaps.iter().rposition(|m| !m.storage.is_unused())
    }

    pub fn top_mip(&self) -> Option<&Mipmap> {
        self.top_mip_index().map(|i| &self.mipmaps[i])
    }

    /// Number of mips that carry data
    pub fn populated_mip_count(&self) -> usize {
        self.mipmaps
            .iter()
            .filter(|m| !m.storage.is_unused())
            .count()
    }

    /// Decompressed pixels of mip `index`, reading external caches via `store`
    pub fn mip_pixels(&self, index: usize, store: &CacheStore) -> Result<Vec<u8>> {
        let mip = self.mipmaps.get(index).ok_or_else(|| Error::MalformedTexture {
            export: self.export_index,
            message: format!("mip {index} out of range ({} mips)", self.mipmaps.len()),
        })?;
        if mip.storage.is_unused() {
            return Err(Error::MalformedTexture {
                export: self.export_index,
                message: format!("mip {index} is empty"),
            });
        }
        if mip.storage.is_inline() {
            return mip.inline_pixels();
        }

        let cache = self.cache_name().ok_or_else(|| Error::MalformedTexture {
            export: self.export_index,
            message: "external mip without a cache name".to_string(),
        })?;
        if let Some(guid) = self.cache_guid() {
            if store.guid(&cache)? != guid {
                return Err(Error::CacheGuidMismatch { name: cache });
            }
        }
        let stored = store.read_at(&cache, u64::from(mip.data_offset), mip.compressed_size as usize)?;
        mip.decode_stored(&stored)
    }

    /// CRC32 of the top mip's pixels, the texture's identity in catalogs and mods
    pub fn checksum(&self, store: &CacheStore) -> Result<u32> {
        let top = self.top_mip_index().ok_or(Error::NoMipmaps)?;
        let pixels = self.mip_pixels(top, store)?;
        Ok(crc32fast::hash(&pixels))
    }

    /// Drop placeholder mips. Returns how many were removed.
    pub fn strip_empty_mips(&mut self) -> usize {
        let before = self.mipmaps.len();
        self.mipmaps.retain(|m| !m.storage.is_unused());
        before - self.mipmaps.len()
    }

    /// Storage kind for a mip of the given size that has no planned kind yet.
    ///
    /// Reuses the kind of an existing mip of the same size, else the top
    /// mip's kind, else picks from whether the texture uses a cache file.
    pub fn plan_storage_kind(&self, width: u32, height: u32) -> StorageKind {
        let policy = self.policy();
        if let Some(existing) = self
            .mipmaps
            .iter()
            .find(|m| m.width == width && m.height == height && !m.storage.is_unused())
        {
            return existing.storage;
        }
        if let Some(top) = self.top_mip() {
            return top.storage;
        }
        if self.has_external_cache() {
            policy.external_kind
        } else {
            policy.inline_kind
        }
    }

    /// Storage kinds for a new mip list (smallest first) of these sizes,
    /// with the inline tail rule applied.
    pub fn plan_storage(&self, dims: &[(u32, u32)]) -> Vec<StorageKind> {
        let tail = self.policy().inline_tail_count;
        let enforce = self.has_external_cache() && dims.len() > 1;
        dims.iter()
            .enumerate()
            .map(|(i, &(w, h))| {
                let kind = self.plan_storage_kind(w, h);
                if !enforce {
                    kind
                } else if i < tail {
                    kind.to_inline()
                } else {
                    kind.to_external()
                }
            })
            .collect()
    }

    /// Replace the whole mip list (smallest first).
    ///
    /// Updates `SizeX`/`SizeY` from the new top mip.
    pub fn replace_mipmaps(&mut self, mipmaps: Vec<Mipmap>) -> Result<()> {
        if mipmaps.iter().all(|m| m.storage.is_unused()) {
            return Err(Error::NoMipmaps);
        }
        if let Some(pair) = mipmaps
            .windows(2)
            .find(|w| w[0].width > w[1].width || w[0].height > w[1].height)
        {
            return Err(Error::InvalidStorageLayout {
                message: format!(
                    "mips must grow: {}x{} precedes {}x{}",
                    pair[0].width, pair[0].height, pair[1].width, pair[1].height
                ),
            });
        }
        self.check_tail_rule(&mipmaps)?;

        self.mipmaps = mipmaps;
        self.inline_offset_fields.clear();
        if let Some((w, h)) = self.top_mip().map(Mipmap::dimensions) {
            self.properties.set_int(prop::SIZE_X, w as i32);
            self.properties.set_int(prop::SIZE_Y, h as i32);
        }
        tracing::debug!(
            "Export {}: {} mips replaced, top {:?}",
            self.export_index,
            self.mipmaps.len(),
            self.size()
        );
        Ok(())
    }

    fn check_tail_rule(&self, mipmaps: &[Mipmap]) -> Result<()> {
        if !self.has_external_cache() || mipmaps.len() <= 1 {
            return Ok(());
        }
        let tail = self.policy().inline_tail_count;
        for (i, mip) in mipmaps.iter().enumerate() {
            let violation = if i < tail {
                mip.storage.is_external()
            } else {
                mip.storage.is_inline()
            };
            if violation {
                return Err(Error::InvalidStorageLayout {
                    message: format!(
                        "mip {i} ({}x{}) is {} but the {tail} smallest must be inline and the rest external",
                        mip.width,
                        mip.height,
                        mip.storage.label()
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Property list for a DXT1 texture with an optional cache reference
    pub(crate) fn texture_properties(width: u32, height: u32, cache: Option<(&str, [u8; 16])>) -> PropertyList {
        let mut list = PropertyList::new();
        list.set_int(prop::SIZE_X, width as i32);
        list.set_int(prop::SIZE_Y, height as i32);
        list.set(
            prop::FORMAT,
            PropertyValue::Byte {
                enum_name: Some(FName::new("EPixelFormat")),
                value: ByteValue::Name(FName::new("PF_DXT1")),
            },
        );
        if let Some((name, guid)) = cache {
            list.set_name(prop::CACHE_NAME, name);
            list.set_guid(prop::CACHE_GUID, guid);
        }
        list
    }

    fn two_mip_texture(variant: GameVariant) -> Texture {
        let kind = variant.policy().inline_kind;
        let mips = vec![
            Mipmap::inline(kind, 128, 128, &vec![1u8; 8192]).unwrap(),
            Mipmap::inline(kind, 256, 256, &vec![2u8; 32768]).unwrap(),
        ];
        Texture::new(variant, texture_properties(256, 256, None), mips)
    }

    #[test]
    fn test_bytes_round_trip_with_absolute_offsets() {
        let texture = two_mip_texture(GameVariant::Extended);
        let mut names = NameTable::new();
        let bytes = texture.to_bytes(&mut names, 1000, true).unwrap();
        let parsed = Texture::from_bytes(&bytes, &names, GameVariant::Extended, 0).unwrap();

        assert_eq!(parsed.mipmaps().len(), 2);
        assert_eq!(parsed.size(), Some((256, 256)));
        assert_eq!(parsed.pixel_format(), Some(PixelFormat::Dxt1));
        let fields = parsed.inline_offset_fields();
        for (mip, &field) in parsed.mipmaps().iter().zip(fields) {
            // Inline bytes start right after the offset field
            assert_eq!(mip.data_offset as usize, 1000 + field + 4);
        }
        assert_eq!(parsed.mipmaps()[1].inline_pixels().unwrap(), vec![2u8; 32768]);
    }

    #[test]
    fn test_trailer_is_preserved() {
        let texture = two_mip_texture(GameVariant::Classic);
        let mut names = NameTable::new();
        let mut bytes = texture.to_bytes(&mut names, 0, false).unwrap();
        bytes.extend_from_slice(&[9, 8, 7, 6, 5]);
        let parsed = Texture::from_bytes(&bytes, &names, GameVariant::Classic, 0).unwrap();
        let again = parsed.to_bytes(&mut names, 0, false).unwrap();
        assert_eq!(again, bytes);
    }

    #[test]
    fn test_storage_plan_applies_inline_tail() {
        let guid = [4u8; 16];
        let variant = GameVariant::Extended;
        let mut mips = Vec::new();
        for level in 0..8u32 {
            let size = 4u32 << level;
            mips.push(Mipmap::external(StorageKind::EXTERNAL_ZLIB, size, size, 0, 0, 0));
        }
        let texture = Texture::new(variant, texture_properties(512, 512, Some(("Textures", guid))), mips);

        let dims: Vec<_> = (0..8u32).map(|l| (4u32 << l, 4u32 << l)).collect();
        let plan = texture.plan_storage(&dims);
        assert!(plan[..6].iter().all(|k| *k == StorageKind::INLINE_ZLIB));
        assert!(plan[6..].iter().all(|k| *k == StorageKind::EXTERNAL_ZLIB));
    }

    #[test]
    fn test_plan_falls_back_to_cache_property() {
        let variant = GameVariant::Classic;
        let bare = Texture::new(variant, texture_properties(64, 64, None), Vec::new());
        assert_eq!(bare.plan_storage_kind(64, 64), StorageKind::INLINE_LZ4);
        let cached = Texture::new(
            variant,
            texture_properties(64, 64, Some(("Textures", [0; 16]))),
            Vec::new(),
        );
        assert_eq!(cached.plan_storage_kind(64, 64), StorageKind::EXTERNAL_LZ4);
    }

    #[test]
    fn test_replace_rejects_inline_outside_tail() {
        let variant = GameVariant::Streaming;
        let mut texture = Texture::new(
            variant,
            texture_properties(512, 512, Some(("Textures", [1; 16]))),
            Vec::new(),
        );
        let mips: Vec<_> = (0..7u32)
            .map(|l| {
                let size = 8u32 << l;
                Mipmap::inline(StorageKind::INLINE_UNCOMPRESSED, size, size, &[0u8; 4]).unwrap()
            })
            .collect();
        let err = texture.replace_mipmaps(mips).unwrap_err();
        assert!(matches!(err, Error::InvalidStorageLayout { .. }));
    }

    #[test]
    fn test_replace_updates_size_and_strip_removes_placeholders() {
        let mut texture = two_mip_texture(GameVariant::Extended);
        let kind = StorageKind::INLINE_ZLIB;
        texture
            .replace_mipmaps(vec![
                Mipmap::empty(256, 256),
                Mipmap::inline(kind, 512, 512, &[5u8; 64]).unwrap(),
                Mipmap::empty(1024, 1024),
            ])
            .unwrap();
        assert_eq!(texture.size(), Some((512, 512)));
        assert_eq!(texture.top_mip_index(), Some(1));
        assert_eq!(texture.strip_empty_mips(), 2);
        assert_eq!(texture.mipmaps().len(), 1);
    }

    #[test]
    fn test_checksum_hashes_top_mip() {
        let texture = two_mip_texture(GameVariant::Extended);
        let store = CacheStore::new();
        assert_eq!(texture.checksum(&store).unwrap(), crc32fast::hash(&vec![2u8; 32768]));
    }
}
