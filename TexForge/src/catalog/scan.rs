//! Building a catalog from a game installation

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use walkdir::WalkDir;

use super::{CatalogTexture, PACKAGE_EXTENSION, TextureCatalog, TextureLocation};
use crate::error::Result;
use crate::package::Package;
use crate::texture::{Texture, is_texture_class};
use crate::tfc::CacheStore;
use crate::variant::GameVariant;

/// Scan phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Discovering,
    ReadingPackages,
    Complete,
}

impl ScanPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Discovering => "Discovering packages",
            ScanPhase::ReadingPackages => "Reading textures",
            ScanPhase::Complete => "Complete",
        }
    }
}

/// Progress of a catalog scan
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    pub current: usize,
    pub total: usize,
    pub current_file: Option<String>,
}

/// Something that could not be read during a scan
#[derive(Debug, Clone)]
pub struct ScanFailure {
    pub package_path: String,
    pub export_index: Option<usize>,
    pub reason: String,
}

/// Catalog plus everything that was skipped
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub catalog: TextureCatalog,
    pub failures: Vec<ScanFailure>,
}

struct FoundTexture {
    name: String,
    crc: u32,
    width: u32,
    height: u32,
    pixel_format: String,
    location: TextureLocation,
}

/// Find every package below `root`, sorted
pub fn find_packages<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    let mut packages: Vec<_> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| {
            e.path().is_file()
                && e.path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(PACKAGE_EXTENSION))
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    packages.sort();
    packages
}

/// Path relative to `root` with `/` separators
pub(crate) fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Scan every package of a game installation for textures.
///
/// Packages are read in parallel. Unreadable packages and textures are
/// listed in the report instead of failing the scan.
pub fn scan_game<P: AsRef<Path>>(
    root: P,
    variant: GameVariant,
    progress: &(dyn Fn(&ScanProgress) + Sync),
) -> Result<ScanReport> {
    let root = root.as_ref();
    progress(&ScanProgress {
        phase: ScanPhase::Discovering,
        current: 0,
        total: 0,
        current_file: None,
    });
    let store = CacheStore::scan(root)?;
    let packages = find_packages(root);
    let total = packages.len();
    let processed = AtomicUsize::new(0);

    let results: Vec<(Vec<FoundTexture>, Vec<ScanFailure>)> = packages
        .par_iter()
        .map(|path| {
            let relative = relative_path(root, path);
            let current = processed.fetch_add(1, Ordering::SeqCst) + 1;
            progress(&ScanProgress {
                phase: ScanPhase::ReadingPackages,
                current,
                total,
                current_file: Some(relative.clone()),
            });
            scan_package(path, &relative, variant, &store)
        })
        .collect();

    // Group by checksum; BTreeMap keeps the output stable across runs
    let mut grouped: BTreeMap<u32, CatalogTexture> = BTreeMap::new();
    let mut failures = Vec::new();
    for (found, failed) in results {
        failures.extend(failed);
        for texture in found {
            grouped
                .entry(texture.crc)
                .or_insert_with(|| CatalogTexture {
                    name: texture.name.clone(),
                    crc: texture.crc,
                    width: texture.width,
                    height: texture.height,
                    pixel_format: texture.pixel_format.clone(),
                    locations: Vec::new(),
                })
                .locations
                .push(texture.location);
        }
    }

    let mut catalog = TextureCatalog::new(variant);
    catalog.textures = grouped.into_values().collect();
    tracing::info!(
        "Catalogued {} textures in {} locations ({} failures)",
        catalog.textures.len(),
        catalog.location_count(),
        failures.len()
    );
    progress(&ScanProgress {
        phase: ScanPhase::Complete,
        current: total,
        total,
        current_file: None,
    });
    Ok(ScanReport { catalog, failures })
}

fn scan_package(
    path: &Path,
    relative: &str,
    variant: GameVariant,
    store: &CacheStore,
) -> (Vec<FoundTexture>, Vec<ScanFailure>) {
    let mut found = Vec::new();
    let mut failures = Vec::new();

    let package = match Package::open_with_variant(path, variant) {
        Ok(package) => package,
        Err(e) => {
            tracing::warn!("Skipping package {}: {}", relative, e);
            failures.push(ScanFailure {
                package_path: relative.to_string(),
                export_index: None,
                reason: e.to_string(),
            });
            return (found, failures);
        }
    };

    for index in 0..package.exports().len() {
        let is_texture = package
            .export_class_name(index)
            .is_ok_and(|class| is_texture_class(&class));
        if !is_texture {
            continue;
        }
        match read_texture(&package, index, relative, store) {
            Ok(Some(texture)) => found.push(texture),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Skipping {} export {}: {}", relative, index, e);
                failures.push(ScanFailure {
                    package_path: relative.to_string(),
                    export_index: Some(index),
                    reason: e.to_string(),
                });
            }
        }
    }
    (found, failures)
}

fn read_texture(
    package: &Package,
    index: usize,
    relative: &str,
    store: &CacheStore,
) -> Result<Option<FoundTexture>> {
    let texture = Texture::from_export(package, index)?;
    let Some(top) = texture.top_mip() else {
        return Ok(None);
    };
    let mirroring = package.variant().policy().mirroring;
    Ok(Some(FoundTexture {
        name: package.export_object_name(index)?,
        crc: texture.checksum(store)?,
        width: top.width,
        height: top.height,
        pixel_format: texture
            .pixel_format()
            .map(|f| f.as_str().to_string())
            .unwrap_or_default(),
        location: TextureLocation {
            package_path: relative.to_string(),
            export_index: index,
            mip_count: texture.populated_mip_count(),
            top_offset: mirroring.then_some(top.data_offset),
            base_package: if mirroring {
                texture.base_package_name()
            } else {
                None
            },
        },
    }))
}
