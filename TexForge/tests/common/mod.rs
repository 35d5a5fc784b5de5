//! Fixtures shared by the integration tests: packages, caches and mods
//! built from scratch in temporary directories.

#![allow(dead_code)]

use std::path::Path;

use texforge::modfile::{MipImage, MipSet};
use texforge::package::{ImportEntry, Package, SaveOptions};
use texforge::texture::{
    ByteValue, FName, Mipmap, PixelFormat, PropertyList, PropertyValue, StorageKind, Texture,
    TextureRelocator, encode_payload, prop,
};
use texforge::variant::GameVariant;

pub const STOCK_CACHE: &str = "Textures";
pub const STOCK_GUID: [u8; 16] = [0x5A; 16];

/// Byte size of a square DXT1 mip
pub fn dxt1_size(size: u32) -> usize {
    PixelFormat::Dxt1.mip_size(size, size).unwrap()
}

/// Incompressible bytes
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

/// DXT1 texture properties, optionally pointing at a cache and a base package
pub fn dxt1_properties(size: u32, cache: Option<(&str, [u8; 16])>, base_package: Option<&str>) -> PropertyList {
    let mut list = PropertyList::new();
    list.set_int(prop::SIZE_X, size as i32);
    list.set_int(prop::SIZE_Y, size as i32);
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
    if let Some(base) = base_package {
        list.set_name(prop::BASE_PACKAGE, base);
    }
    list
}

/// Inline DXT1 texture with one mip per size, smallest first
pub fn inline_texture(variant: GameVariant, sizes: &[u32], fill: u8) -> Texture {
    let kind = variant.policy().inline_kind;
    let mips = sizes
        .iter()
        .map(|&size| Mipmap::inline(kind, size, size, &vec![fill; dxt1_size(size)]).unwrap())
        .collect();
    Texture::new(variant, dxt1_properties(*sizes.last().unwrap(), None, None), mips)
}

/// Single-mip texture stored at `offset` of the stock cache
pub fn external_texture(
    variant: GameVariant,
    size: u32,
    stored_len: usize,
    offset: u32,
    base_package: Option<&str>,
) -> Texture {
    let mip = Mipmap::external(
        variant.policy().external_kind,
        size,
        size,
        dxt1_size(size) as u32,
        stored_len as u32,
        offset,
    );
    Texture::new(
        variant,
        dxt1_properties(size, Some((STOCK_CACHE, STOCK_GUID)), base_package),
        vec![mip],
    )
}

/// Stock cache holding each of `pixels` back to back; returns the stored
/// length and offset of each
pub fn write_stock_cache(dir: &Path, variant: GameVariant, pixels: &[Vec<u8>]) -> Vec<(usize, u32)> {
    let mut bytes = STOCK_GUID.to_vec();
    let mut placed = Vec::new();
    for data in pixels {
        let stored = encode_payload(variant.policy().external_kind, data).unwrap();
        placed.push((stored.len(), bytes.len() as u32));
        bytes.extend_from_slice(&stored);
    }
    std::fs::write(dir.join(format!("{STOCK_CACHE}.tfc")), bytes).unwrap();
    placed
}

/// Write a package whose exports are the given named textures
pub fn write_texture_package(path: &Path, variant: GameVariant, textures: &[(&str, Texture)]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut package = Package::new(path, variant, "None");
    let core = package.add_name("Core");
    let class = package.add_name("Class");
    let texture_class = package.add_name("Texture2D");
    let class_ref = package.add_import(ImportEntry::new(core, class, 0, texture_class));
    for (name, texture) in textures {
        let index = package.add_export(class_ref, name, Vec::new());
        texture.write_to_package(&mut package, index).unwrap();
    }
    package
        .save_with_relocator(&SaveOptions::default(), &TextureRelocator)
        .unwrap();
}

/// DXT1 mip set with one mip per size; every mip is noise from `seed`
pub fn noise_mip_set(sizes: &[u32], seed: u64) -> MipSet {
    let mips = sizes
        .iter()
        .map(|&size| MipImage {
            width: size,
            height: size,
            data: noise(dxt1_size(size), seed + u64::from(size)),
        })
        .collect();
    MipSet::new(PixelFormat::Dxt1, mips)
}
