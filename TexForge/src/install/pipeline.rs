//! The install run

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::cache::{PayloadCache, PayloadId, PreparedPayload};
use super::codec::{PixelCodec, convert_mip_set};
use super::{InstallOptions, InstallPhase, InstallProgress, InstallReport, SkipContext, SkippedItem};
use crate::catalog::TextureCatalog;
use crate::error::{Error, ErrorKind, Result};
use crate::mirror::{MemberKey, MirrorResolver, MirrorRole};
use crate::modfile::{EntryTarget, ModEntry, ModEntryKind, ModReader, apply_patch};
use crate::package::{Package, SaveOptions, has_end_marker};
use crate::texture::{
    Mipmap, PixelFormat, StorageKind, Texture, TextureRelocator, len_u32, replace_export_bytes,
};
use crate::tfc::{ReuseSlot, TfcAllocator};

/// Where a payload comes from
struct PayloadSource {
    mod_index: usize,
    entry: ModEntry,
}

/// One payload destined for one export
struct Job {
    payload: PayloadId,
    kind: ModEntryKind,
    export_index: usize,
    context: SkipContext,
}

/// External mips of one payload, as planned for a texture
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PlacementKey {
    payload: PayloadId,
    format: PixelFormat,
    /// Size and storage kind of each external mip, smallest first
    layout: Vec<(u32, u32, StorageKind)>,
}

/// Where a payload's external mips were written earlier in the run
#[derive(Debug, Clone)]
struct Placement {
    cache: (String, [u8; 16]),
    mipmaps: Vec<Mipmap>,
}

/// Jobs of one package
struct PackageJobs {
    package_path: String,
    jobs: Vec<Job>,
}

/// Installs mods into the game a catalog describes.
///
/// # Example
///
/// ```no_run
/// use texforge::catalog::TextureCatalog;
/// use texforge::install::{InstallOptions, Installer};
/// use texforge::variant::GameVariant;
///
/// let catalog = TextureCatalog::load("catalog.json")?;
/// let options = InstallOptions::new("/games/trilogy/Game", GameVariant::Extended);
/// let report = Installer::new(options, &catalog).install(&["hd_rocks.tfmod"], &|_| {})?;
/// println!("{} textures installed", report.textures_applied);
/// # Ok::<(), texforge::Error>(())
/// ```
pub struct Installer<'a> {
    options: InstallOptions,
    catalog: &'a TextureCatalog,
    codec: Option<&'a dyn PixelCodec>,
}

impl<'a> Installer<'a> {
    #[must_use]
    pub fn new(options: InstallOptions, catalog: &'a TextureCatalog) -> Self {
        Self {
            options,
            catalog,
            codec: None,
        }
    }

    /// Enable payloads whose pixel format differs from the destination's
    #[must_use]
    pub fn with_pixel_codec(mut self, codec: &'a dyn PixelCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn options(&self) -> &InstallOptions {
        &self.options
    }

    /// Install every entry of `mods`.
    ///
    /// # Errors
    /// Only run-level failures are returned: a catalog for another variant,
    /// or texture caches that are out of capacity. Everything else ends up
    /// in [`InstallReport::skipped`].
    pub fn install<P: AsRef<Path>>(
        &self,
        mods: &[P],
        progress: &dyn Fn(&InstallProgress),
    ) -> Result<InstallReport> {
        if self.catalog.variant != self.options.variant {
            return Err(Error::CatalogVariantMismatch {
                found: self.catalog.variant.to_string(),
                expected: self.options.variant.to_string(),
            });
        }

        let mut run = Run::new(&self.options, self.codec, self.catalog);
        run.load(mods, progress);
        let packages = run.match_entries(self.catalog, progress);
        run.apply_all(packages, progress)?;
        progress(&InstallProgress::new(InstallPhase::Complete, 1, 1));
        Ok(run.finish())
    }
}

/// Normalized form of a relative package path, for grouping
fn package_key(path: &str) -> String {
    path.replace('\\', "/").to_ascii_lowercase()
}

/// Slot an external mip of this size occupies in `cache`, if any
fn reuse_slot(texture: &Texture, cache: &str, width: u32, height: u32) -> Option<ReuseSlot> {
    let cache_name = texture.cache_name()?;
    if !cache_name.eq_ignore_ascii_case(cache) {
        return None;
    }
    let guid = texture.cache_guid()?;
    let old = texture
        .mipmaps()
        .iter()
        .find(|m| m.storage.is_external() && m.width == width && m.height == height)?;
    Some(ReuseSlot {
        cache_name,
        guid,
        offset: old.data_offset,
        compressed_size: old.compressed_size,
    })
}

struct Run<'r> {
    options: &'r InstallOptions,
    codec: Option<&'r dyn PixelCodec>,
    allocator: TfcAllocator,
    mirror: MirrorResolver,
    cache: PayloadCache,
    placements: HashMap<PlacementKey, Placement>,
    readers: Vec<(PathBuf, ModReader<File>)>,
    sources: Vec<PayloadSource>,
    report: InstallReport,
}

impl<'r> Run<'r> {
    fn new(
        options: &'r InstallOptions,
        codec: Option<&'r dyn PixelCodec>,
        catalog: &TextureCatalog,
    ) -> Self {
        let allocator = TfcAllocator::new(options.cache_dir(), &options.mod_cache_name)
            .with_ceiling(options.cache_ceiling)
            .with_margin(options.cache_margin)
            .with_reuse_boundary(options.reuse_boundary);
        Self {
            options,
            codec,
            allocator,
            mirror: MirrorResolver::from_catalog(catalog),
            cache: PayloadCache::new(options.effective_memory_limit()),
            placements: HashMap::new(),
            readers: Vec::new(),
            sources: Vec::new(),
            report: InstallReport::default(),
        }
    }

    fn skip(&mut self, context: SkipContext, error: &Error) {
        tracing::warn!("Skipping {}: {}", context, error);
        self.report
            .skipped
            .push(SkippedItem::from_error(context, error));
    }

    fn load<P: AsRef<Path>>(&mut self, mods: &[P], progress: &dyn Fn(&InstallProgress)) {
        let total = mods.len();
        for (i, path) in mods.iter().enumerate() {
            let path = path.as_ref();
            progress(&InstallProgress::with_file(
                InstallPhase::Loading,
                i + 1,
                total,
                path.display().to_string(),
            ));
            let context = SkipContext {
                mod_path: Some(path.to_path_buf()),
                ..SkipContext::default()
            };
            let reader = match ModReader::open(path) {
                Ok(reader) => reader,
                Err(e) => {
                    self.skip(context, &e);
                    continue;
                }
            };
            if reader.variant() != self.options.variant {
                let e = Error::ModVariantMismatch {
                    found: reader.variant().to_string(),
                    expected: self.options.variant.to_string(),
                };
                self.skip(context, &e);
                continue;
            }
            tracing::info!("Loaded {} ({} entries)", path.display(), reader.entries().len());
            self.readers.push((path.to_path_buf(), reader));
        }
    }

    fn match_entries(
        &mut self,
        catalog: &TextureCatalog,
        progress: &dyn Fn(&InstallProgress),
    ) -> Vec<PackageJobs> {
        let index = catalog.crc_index();
        let total: usize = self.readers.iter().map(|(_, r)| r.entries().len()).sum();
        let mut current = 0;
        let mut packages: BTreeMap<String, PackageJobs> = BTreeMap::new();

        for mod_index in 0..self.readers.len() {
            let (mod_path, entries) = {
                let (path, reader) = &self.readers[mod_index];
                (path.clone(), reader.entries().to_vec())
            };
            for entry in entries {
                current += 1;
                progress(&InstallProgress::with_file(
                    InstallPhase::Matching,
                    current,
                    total,
                    entry.name.clone(),
                ));
                let mut context = SkipContext {
                    mod_path: Some(mod_path.clone()),
                    entry_name: Some(entry.name.clone()),
                    ..SkipContext::default()
                };
                let target = match entry.target() {
                    Ok(target) => target,
                    Err(e) => {
                        self.skip(context, &e);
                        continue;
                    }
                };

                let payload = self.sources.len();
                let mut jobs = Vec::new();
                match target {
                    EntryTarget::Texture { name, crc } => {
                        context.texture_name = Some(name);
                        context.crc = Some(crc);
                        let Some(&texture_index) = index.get(&crc) else {
                            tracing::warn!("Skipping {}: not in the catalog", context);
                            self.report.skipped.push(SkippedItem {
                                context,
                                kind: ErrorKind::NotFound,
                                reason: "no catalogued texture has this checksum".to_string(),
                            });
                            continue;
                        };
                        for location in &catalog.textures[texture_index].locations {
                            jobs.push((
                                location.package_path.clone(),
                                Job {
                                    payload,
                                    kind: entry.kind,
                                    export_index: location.export_index,
                                    context: SkipContext {
                                        package_path: Some(location.package_path.clone()),
                                        export_index: Some(location.export_index),
                                        ..context.clone()
                                    },
                                },
                            ));
                        }
                    }
                    EntryTarget::Export {
                        package_path,
                        export_index,
                    } => {
                        jobs.push((
                            package_path.clone(),
                            Job {
                                payload,
                                kind: entry.kind,
                                export_index,
                                context: SkipContext {
                                    package_path: Some(package_path),
                                    export_index: Some(export_index),
                                    ..context
                                },
                            },
                        ));
                    }
                }

                self.cache.register(payload, jobs.len());
                self.sources.push(PayloadSource { mod_index, entry });
                for (package_path, job) in jobs {
                    packages
                        .entry(package_key(&package_path))
                        .or_insert_with(|| PackageJobs {
                            package_path,
                            jobs: Vec::new(),
                        })
                        .jobs
                        .push(job);
                }
            }
        }

        tracing::info!(
            "Matched {} payloads to {} packages",
            self.sources.len(),
            packages.len()
        );
        packages.into_values().collect()
    }

    fn apply_all(&mut self, packages: Vec<PackageJobs>, progress: &dyn Fn(&InstallProgress)) -> Result<()> {
        let total = packages.len();
        for (i, group) in packages.iter().enumerate() {
            progress(&InstallProgress::with_file(
                InstallPhase::Applying,
                i + 1,
                total,
                group.package_path.clone(),
            ));
            self.apply_package(group, i + 1, total, progress)?;
        }
        Ok(())
    }

    fn release_all(&mut self, group: &PackageJobs) {
        for job in &group.jobs {
            self.cache.release(job.payload);
        }
    }

    /// `None` when the package was already processed
    fn open_package(&self, path: &Path) -> Result<Option<Package>> {
        if !path.is_file() {
            return Err(Error::PackageNotFound {
                path: path.to_path_buf(),
            });
        }
        if self.options.skip_marked && has_end_marker(path)? {
            return Ok(None);
        }
        Package::open_with_variant(path, self.options.variant).map(Some)
    }

    fn apply_package(
        &mut self,
        group: &PackageJobs,
        current: usize,
        total: usize,
        progress: &dyn Fn(&InstallProgress),
    ) -> Result<()> {
        let path = self
            .options
            .game_root
            .join(group.package_path.replace('\\', "/"));
        let mut package = match self.open_package(&path) {
            Ok(Some(package)) => package,
            Ok(None) => {
                tracing::info!("{} was already processed, leaving it alone", group.package_path);
                self.report.packages_already_processed += 1;
                self.release_all(group);
                return Ok(());
            }
            Err(e) => {
                for job in &group.jobs {
                    self.skip(job.context.clone(), &e);
                }
                self.release_all(group);
                return Ok(());
            }
        };

        let mut textures = 0;
        let mut exports = 0;
        for job in &group.jobs {
            let result = if job.kind.is_texture() {
                self.apply_texture(&mut package, &group.package_path, job)
            } else {
                self.apply_export(&mut package, job)
            };
            self.cache.release(job.payload);
            match result {
                Ok(()) if job.kind.is_texture() => textures += 1,
                Ok(()) => exports += 1,
                Err(e) if e.is_fatal_for_run() => return Err(e),
                Err(e) => self.skip(job.context.clone(), &e),
            }
        }
        if textures + exports == 0 {
            return Ok(());
        }

        progress(&InstallProgress::with_file(
            InstallPhase::Saving,
            current,
            total,
            group.package_path.clone(),
        ));
        let save_options = SaveOptions::default()
            .with_end_marker(self.options.append_marker)
            .with_recompress(self.options.repack);
        match package.save_with_relocator(&save_options, &TextureRelocator) {
            Ok(_) => {
                tracing::info!(
                    "Saved {} ({} textures, {} exports)",
                    group.package_path,
                    textures,
                    exports
                );
                self.report.packages_saved += 1;
                self.report.textures_applied += textures;
                self.report.exports_applied += exports;
            }
            Err(e) => {
                let context = SkipContext {
                    package_path: Some(group.package_path.clone()),
                    ..SkipContext::default()
                };
                self.skip(context, &e);
            }
        }
        Ok(())
    }

    fn acquire(&mut self, id: PayloadId) -> Result<Rc<PreparedPayload>> {
        let source = &self.sources[id];
        let reader = &mut self.readers[source.mod_index].1;
        self.cache.acquire(id, || reader.read_mip_set(&source.entry))
    }

    fn apply_export(&mut self, package: &mut Package, job: &Job) -> Result<()> {
        let index = job.export_index;
        let source = &self.sources[job.payload];
        let payload = self.readers[source.mod_index].1.read_entry(&source.entry)?;
        let data = if job.kind == ModEntryKind::BinaryDiff {
            let old = package.get_export_bytes(index)?;
            apply_patch(&old, &payload)?
        } else {
            payload
        };

        replace_export_bytes(package, index, data)
    }

    fn apply_texture(&mut self, package: &mut Package, package_path: &str, job: &Job) -> Result<()> {
        let index = job.export_index;
        let mut texture = Texture::from_export(package, index)?;
        let original_count = texture.populated_mip_count();
        let key = MemberKey::new(package_path, index);

        let master_set = match self.mirror.role(&key) {
            MirrorRole::Poisoned(reason) => {
                return Err(Error::MirrorIntegrity {
                    message: reason.to_string(),
                });
            }
            MirrorRole::Slave(record) => {
                MirrorResolver::apply_slave(&mut texture, record)?;
                texture.write_to_package(package, index)?;
                tracing::debug!(
                    "{} export {}: mirrors {} export {}",
                    package_path,
                    index,
                    record.master.package_path,
                    record.master.export_index
                );
                return Ok(());
            }
            MirrorRole::Master(set) => Some(set),
            MirrorRole::Independent => None,
        };

        let payload = self.acquire(job.payload)?;
        let payload = self.convert_if_needed(&texture, payload, job.kind)?;
        let provided = payload.mips.mips.len();
        if provided == 1 && original_count > 1 {
            return Err(Error::NotEnoughMipmaps {
                provided,
                expected: original_count,
            });
        }

        let (mipmaps, cache) = self.build_mipmaps(job.payload, &texture, &payload)?;
        if let Some((name, guid)) = cache {
            texture.set_cache(&name, guid);
        }
        texture.replace_mipmaps(mipmaps)?;
        texture.write_to_package(package, index)?;

        if let Some(set) = master_set {
            self.mirror
                .record_master(set, key, original_count, &texture);
        }
        Ok(())
    }

    fn convert_if_needed(
        &self,
        texture: &Texture,
        payload: Rc<PreparedPayload>,
        kind: ModEntryKind,
    ) -> Result<Rc<PreparedPayload>> {
        let source = &payload.mips.format;
        let target = texture.pixel_format().unwrap_or_else(|| source.clone());
        if kind != ModEntryKind::TextureReencode && target == *source {
            return Ok(payload);
        }
        let Some(codec) = self.codec else {
            return Err(Error::PixelCodecUnavailable {
                from: source.to_string(),
                to: target.to_string(),
            });
        };
        payload.converted(&target, |mips| convert_mip_set(codec, mips, &target))
    }

    /// New descriptor list for `texture` plus the cache its external mips
    /// were written to.
    ///
    /// External mips are written once per payload and layout; later textures
    /// with the same layout point at the first copy.
    fn build_mipmaps(
        &mut self,
        id: PayloadId,
        texture: &Texture,
        payload: &PreparedPayload,
    ) -> Result<(Vec<Mipmap>, Option<(String, [u8; 16])>)> {
        let images = &payload.mips.mips;
        let dims: Vec<(u32, u32)> = images.iter().map(|m| (m.width, m.height)).collect();
        let kinds: Vec<StorageKind> = texture.plan_storage(&dims);

        let key = PlacementKey {
            payload: id,
            format: payload.mips.format.clone(),
            layout: kinds
                .iter()
                .zip(images)
                .filter(|(kind, _)| kind.is_external())
                .map(|(kind, image)| (image.width, image.height, *kind))
                .collect(),
        };
        let earlier = self.placements.get(&key).cloned();
        let mut shared = earlier.as_ref().map(|p| p.mipmaps.iter());

        let cache = if let Some(placement) = &earlier {
            Some(placement.cache.clone())
        } else if key.layout.is_empty() {
            None
        } else {
            let mut external_total = 0u64;
            for (i, kind) in kinds.iter().enumerate().filter(|(_, k)| k.is_external()) {
                external_total += payload.stored(kind.codec())?[i].len() as u64;
            }
            Some(self.allocator.reserve(external_total)?)
        };

        let mut mipmaps = Vec::with_capacity(kinds.len());
        let mut written = Vec::new();
        for (i, (kind, image)) in kinds.iter().zip(images).enumerate() {
            if let Some(mip) = shared
                .as_mut()
                .filter(|_| kind.is_external())
                .and_then(Iterator::next)
            {
                tracing::debug!(
                    "Export {}: {}x{} shares payload {} @ {}",
                    texture.export_index(),
                    image.width,
                    image.height,
                    key.payload,
                    mip.data_offset
                );
                mipmaps.push(mip.clone());
                continue;
            }
            let forms = payload.stored(kind.codec())?;
            let bytes = &forms[i];
            if kind.is_external() {
                let reuse = cache
                    .as_ref()
                    .and_then(|(name, _)| reuse_slot(texture, name, image.width, image.height));
                let allocation = self.allocator.allocate(bytes, reuse.as_ref())?;
                tracing::debug!(
                    "Export {}: {}x{} -> {} @ {}{}",
                    texture.export_index(),
                    image.width,
                    image.height,
                    allocation.cache_name,
                    allocation.offset,
                    if allocation.reused { " (in place)" } else { "" }
                );
                let mip = Mipmap::external(
                    *kind,
                    image.width,
                    image.height,
                    len_u32(image.data.len())?,
                    len_u32(bytes.len())?,
                    allocation.offset,
                );
                written.push(mip.clone());
                mipmaps.push(mip);
            } else {
                mipmaps.push(Mipmap::inline_stored(
                    *kind,
                    image.width,
                    image.height,
                    image.data.len(),
                    bytes.clone(),
                )?);
            }
        }
        if let (None, Some(cache)) = (&earlier, &cache) {
            self.placements.insert(
                key,
                Placement {
                    cache: cache.clone(),
                    mipmaps: written,
                },
            );
        }

        // Placeholders above the new top mip stay unless stripping
        if !self.options.strip_empty_mips {
            if let Some(&(top_w, top_h)) = dims.last() {
                mipmaps.extend(
                    texture
                        .mipmaps()
                        .iter()
                        .filter(|m| {
                            m.storage.is_unused()
                                && m.width >= top_w
                                && m.height >= top_h
                                && (m.width, m.height) != (top_w, top_h)
                        })
                        .cloned(),
                );
            }
        }
        Ok((mipmaps, cache))
    }

    fn finish(mut self) -> InstallReport {
        self.report.cache_bytes_appended = self.allocator.appended_bytes();
        self.report.payload_cache = self.cache.stats();
        tracing::info!(
            "Install finished: {} textures, {} exports, {} packages saved, {} skipped",
            self.report.textures_applied,
            self.report.exports_applied,
            self.report.packages_saved,
            self.report.skipped.len()
        );
        self.report
    }
}
