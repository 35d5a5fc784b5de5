mod common;

use std::cell::Cell;
use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::tempdir;
use texforge::catalog::{ScanProgress, TextureCatalog, scan_game};
use texforge::install::{InstallOptions, InstallReport, Installer, PixelCodec};
use texforge::modfile::{MipImage, MipSet, ModWriter};
use texforge::package::{Package, has_end_marker};
use texforge::texture::{PixelFormat, Texture};
use texforge::tfc::CacheStore;
use texforge::variant::GameVariant;
use texforge::{ErrorKind, Result};

use common::{dxt1_size, inline_texture, noise, write_texture_package};

const VARIANT: GameVariant = GameVariant::Extended;
const LEVEL: &str = "CookedPCConsole/BioA_Level.pcc";

fn scan(root: &Path) -> TextureCatalog {
    scan_game(root, VARIANT, &|_: &ScanProgress| {}).unwrap().catalog
}

fn install(root: &Path, catalog: &TextureCatalog, mods: &[&Path]) -> InstallReport {
    let options = InstallOptions::new(root, VARIANT);
    Installer::new(options, catalog).install(mods, &|_| {}).unwrap()
}

/// Game with one 128x128 texture whose two mips are stored inline
fn setup_game(root: &Path) -> TextureCatalog {
    write_texture_package(
        &root.join(LEVEL),
        VARIANT,
        &[("Rock_Diff", inline_texture(VARIANT, &[64, 128], 2))],
    );
    scan(root)
}

fn upscaled_mips() -> MipSet {
    MipSet::new(
        PixelFormat::Dxt1,
        vec![
            MipImage {
                width: 256,
                height: 256,
                data: vec![8u8; dxt1_size(256)],
            },
            MipImage {
                width: 128,
                height: 128,
                data: vec![7u8; dxt1_size(128)],
            },
        ],
    )
}

fn write_mod(path: &Path, name: &str, crc: u32, mips: &MipSet) {
    let mut writer = ModWriter::create(path, VARIANT).unwrap();
    writer.add_texture(name, crc, mips, false).unwrap();
    writer.finish().unwrap();
}

#[test]
fn test_texture_replacement_end_to_end() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Game");
    let catalog = setup_game(&root);
    assert_eq!(catalog.textures.len(), 1);
    let crc = catalog.textures[0].crc;
    assert_eq!(crc, crc32fast::hash(&vec![2u8; dxt1_size(128)]));
    assert_eq!(catalog.textures[0].locations[0].package_path, LEVEL);

    let mod_path = dir.path().join("Upscale.tfmod");
    write_mod(&mod_path, "Rock_Diff", crc, &upscaled_mips());

    let report = install(&root, &catalog, &[mod_path.as_path()]);
    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
    assert_eq!(report.textures_applied, 1);
    assert_eq!(report.packages_saved, 1);
    assert_eq!(report.cache_bytes_appended, 0);

    let path = root.join(LEVEL);
    assert!(has_end_marker(&path).unwrap());
    let package = Package::open(&path).unwrap();
    let texture = Texture::from_export(&package, 0).unwrap();
    assert_eq!(texture.size(), Some((256, 256)));
    assert_eq!(texture.mipmaps().len(), 2);
    assert!(texture.mipmaps().iter().all(|m| m.storage.is_inline()));

    let store = CacheStore::new();
    assert_eq!(texture.mip_pixels(0, &store).unwrap(), vec![7u8; dxt1_size(128)]);
    assert_eq!(texture.mip_pixels(1, &store).unwrap(), vec![8u8; dxt1_size(256)]);
}

#[test]
fn test_second_run_leaves_processed_packages_alone() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Game");
    let catalog = setup_game(&root);
    let mod_path = dir.path().join("Upscale.tfmod");
    write_mod(&mod_path, "Rock_Diff", catalog.textures[0].crc, &upscaled_mips());

    install(&root, &catalog, &[mod_path.as_path()]);
    let after_first = std::fs::read(root.join(LEVEL)).unwrap();

    let report = install(&root, &catalog, &[mod_path.as_path()]);
    assert_eq!(report.packages_saved, 0);
    assert_eq!(report.packages_already_processed, 1);
    assert_eq!(report.applied(), 0);
    assert_eq!(std::fs::read(root.join(LEVEL)).unwrap(), after_first);
}

#[test]
fn test_unusable_input_is_reported_not_fatal() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Game");
    let catalog = setup_game(&root);
    let before = std::fs::read(root.join(LEVEL)).unwrap();

    let unknown = dir.path().join("Unknown.tfmod");
    write_mod(&unknown, "Cliff_Diff", 0xDEAD_BEEF, &upscaled_mips());
    let garbage = dir.path().join("Garbage.tfmod");
    std::fs::write(&garbage, b"definitely not a mod container").unwrap();
    let single = dir.path().join("Single.tfmod");
    let one_mip = MipSet::new(
        PixelFormat::Dxt1,
        vec![MipImage {
            width: 256,
            height: 256,
            data: vec![1u8; dxt1_size(256)],
        }],
    );
    write_mod(&single, "Rock_Diff", catalog.textures[0].crc, &one_mip);

    let report = install(&root, &catalog, &[unknown.as_path(), garbage.as_path(), single.as_path()]);
    assert_eq!(report.applied(), 0);
    assert_eq!(report.packages_saved, 0);
    let kinds: Vec<ErrorKind> = report.skipped.iter().map(|s| s.kind).collect();
    assert_eq!(kinds.len(), 3);
    assert!(kinds.contains(&ErrorKind::NotFound));
    assert!(kinds.contains(&ErrorKind::Format));
    let too_few = report
        .skipped
        .iter()
        .find(|s| s.context.mod_path.as_deref() == Some(single.as_path()))
        .unwrap();
    assert_eq!(too_few.kind, ErrorKind::CorruptData);
    assert_eq!(too_few.context.export_index, Some(0));
    assert_eq!(std::fs::read(root.join(LEVEL)).unwrap(), before);
}

#[test]
fn test_catalog_for_another_variant_is_rejected() {
    let dir = tempdir().unwrap();
    let catalog = TextureCatalog::new(GameVariant::Classic);
    let options = InstallOptions::new(dir.path(), VARIANT);
    let mods: [&Path; 0] = [];
    let err = Installer::new(options, &catalog).install(&mods, &|_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

fn noise_pair(seed: u64) -> MipSet {
    MipSet::new(
        PixelFormat::Dxt1,
        vec![
            MipImage {
                width: 256,
                height: 256,
                data: noise(dxt1_size(256), seed),
            },
            MipImage {
                width: 128,
                height: 128,
                data: noise(dxt1_size(128), seed + 1),
            },
        ],
    )
}

#[test]
fn test_same_size_replacement_survives_a_reinstall() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Game");
    write_texture_package(
        &root.join(LEVEL),
        VARIANT,
        &[("Rock_Diff", inline_texture(VARIANT, &[128, 256], 2))],
    );
    let catalog = scan(&root);
    let crc = catalog.textures[0].crc;
    let path = root.join(LEVEL);

    let check = |expected: &MipSet| {
        let package = Package::open(&path).unwrap();
        let texture = Texture::from_export(&package, 0).unwrap();
        assert_eq!(texture.size(), Some((256, 256)));
        let sizes: Vec<(u32, u32)> = texture.mipmaps().iter().map(|m| (m.width, m.height)).collect();
        assert_eq!(sizes, vec![(128, 128), (256, 256)]);
        assert!(texture.mipmaps().iter().all(|m| m.storage == VARIANT.policy().inline_kind));
        let store = CacheStore::new();
        for (level, image) in expected.mips.iter().enumerate() {
            assert_eq!(texture.mip_pixels(level, &store).unwrap(), image.data);
        }
    };

    let first = noise_pair(10);
    let mod_path = dir.path().join("Same.tfmod");
    write_mod(&mod_path, "Rock_Diff", crc, &first);
    let report = install(&root, &catalog, &[mod_path.as_path()]);
    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
    assert_eq!(report.packages_saved, 1);
    check(&first);

    // Marked packages are left alone, even for a different payload
    let second = noise_pair(20);
    let again = dir.path().join("Again.tfmod");
    write_mod(&again, "Rock_Diff", crc, &second);
    let report = install(&root, &catalog, &[again.as_path()]);
    assert_eq!(report.packages_saved, 0);
    assert_eq!(report.packages_already_processed, 1);
    check(&first);

    // With marker skipping off the same sizes are written over
    let options = InstallOptions::new(&root, VARIANT).with_skip_marked(false);
    let report = Installer::new(options, &catalog)
        .install(&[again.as_path()], &|_| {})
        .unwrap();
    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
    assert_eq!(report.packages_saved, 1);
    check(&second);
}

/// Grayscale to DXT1 stand-in that counts its calls
struct CountingCodec {
    decodes: Cell<usize>,
}

impl PixelCodec for CountingCodec {
    fn decode(&self, data: &[u8], _format: &PixelFormat, _w: u32, _h: u32) -> Result<Vec<u8>> {
        self.decodes.set(self.decodes.get() + 1);
        Ok(data.iter().flat_map(|&g| [g, g, g, 255]).collect())
    }

    fn encode(&self, rgba: &[u8], format: &PixelFormat, w: u32, h: u32) -> Result<Vec<u8>> {
        assert_eq!(*format, PixelFormat::Dxt1);
        Ok(vec![rgba[0]; format.mip_size(w, h).unwrap()])
    }
}

#[test]
fn test_conversion_runs_once_per_payload() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Game");
    let other = "CookedPCConsole/BioA_Other.pcc";
    for package in [LEVEL, other] {
        write_texture_package(
            &root.join(package),
            VARIANT,
            &[("Rock_Diff", inline_texture(VARIANT, &[64, 128], 2))],
        );
    }
    let catalog = scan(&root);
    assert_eq!(catalog.textures[0].locations.len(), 2);

    let gray = MipSet::new(
        PixelFormat::G8,
        vec![
            MipImage {
                width: 256,
                height: 256,
                data: vec![40u8; 256 * 256],
            },
            MipImage {
                width: 128,
                height: 128,
                data: vec![30u8; 128 * 128],
            },
        ],
    );
    let mod_path = dir.path().join("Gray.tfmod");
    write_mod(&mod_path, "Rock_Diff", catalog.textures[0].crc, &gray);

    let codec = CountingCodec {
        decodes: Cell::new(0),
    };
    let options = InstallOptions::new(&root, VARIANT);
    let report = Installer::new(options, &catalog)
        .with_pixel_codec(&codec)
        .install(&[mod_path.as_path()], &|_| {})
        .unwrap();
    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
    assert_eq!(report.textures_applied, 2);
    assert_eq!(codec.decodes.get(), 2);
    assert_eq!(report.payload_cache.misses, 1);
    assert_eq!(report.payload_cache.hits, 1);

    let store = CacheStore::new();
    for package in [LEVEL, other] {
        let package = Package::open(root.join(package)).unwrap();
        let texture = Texture::from_export(&package, 0).unwrap();
        assert_eq!(texture.mip_pixels(1, &store).unwrap(), vec![40u8; dxt1_size(256)]);
    }
}
