mod common;

use pretty_assertions::assert_eq;
use tempfile::tempdir;
use texforge::package::{Package, SaveOptions};
use texforge::texture::{Texture, TextureRelocator};
use texforge::tfc::CacheStore;
use texforge::variant::GameVariant;

use common::{dxt1_size, inline_texture, write_texture_package};

#[test]
fn test_compressed_round_trip_keeps_textures_readable() {
    for variant in GameVariant::ALL {
        let dir = tempdir().unwrap();
        let path = dir.path().join("CookedPC").join("Level.pcc");
        write_texture_package(
            &path,
            variant,
            &[
                ("Rock", inline_texture(variant, &[32, 64], 3)),
                ("Moss", inline_texture(variant, &[16], 9)),
            ],
        );

        let mut package = Package::open(&path).unwrap();
        assert_eq!(package.variant(), variant);
        assert!(!package.is_compressed());

        let packed = dir.path().join("Packed.pcc");
        package
            .save_as(&packed, &SaveOptions::default().with_recompress(true), &TextureRelocator)
            .unwrap();
        let compressed = Package::open(&packed).unwrap();
        assert!(compressed.is_compressed());

        let store = CacheStore::new();
        for (index, size, fill) in [(0usize, 64u32, 3u8), (1, 16, 9)] {
            let texture = Texture::from_export(&compressed, index).unwrap();
            assert_eq!(texture.size(), Some((size, size)));
            let top = texture.top_mip_index().unwrap();
            assert_eq!(
                texture.mip_pixels(top, &store).unwrap(),
                vec![fill; dxt1_size(size)]
            );
        }

        // Back to uncompressed: export bytes survive both trips
        let mut compressed = compressed;
        let unpacked = dir.path().join("Unpacked.pcc");
        compressed
            .save_as(&unpacked, &SaveOptions::default().with_decompress(true), &TextureRelocator)
            .unwrap();
        let plain = Package::open(&unpacked).unwrap();
        assert!(!plain.is_compressed());
        let original = Package::open(&path).unwrap();
        assert_eq!(plain.exports().len(), 2);
        assert_eq!(plain.export_object_name(1).unwrap(), "Moss");
        assert_eq!(
            plain.get_export_bytes(1).unwrap(),
            original.get_export_bytes(1).unwrap()
        );
    }
}

#[test]
fn test_unchanged_package_is_not_rewritten() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Level.pcc");
    write_texture_package(
        &path,
        GameVariant::Extended,
        &[("Rock", inline_texture(GameVariant::Extended, &[16], 1))],
    );

    let mut package = Package::open(&path).unwrap();
    assert!(!package.save(&SaveOptions::default()).unwrap());
    assert!(package.save(&SaveOptions::default().with_end_marker(true)).unwrap());
    assert!(texforge::package::has_end_marker(&path).unwrap());
    assert!(Package::open(&path).unwrap().is_marked());
}
