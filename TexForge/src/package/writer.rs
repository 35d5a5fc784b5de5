//! Package writer
//!
//! Lays the whole file out again: fixed header, names, imports, a reserved
//! export table, depends, guids, then export data in its original on-disk
//! order. The export table is filled in once every export's final offset is
//! known, and the header is patched from the buffer actually emitted.

use std::io::Write;
use std::path::Path;

use super::types::{END_MARKER, EXPORT_ENTRY_SIZE, ExportEntry, PKG_COMPRESSED, TableLayout};
use super::Package;
use crate::compression::{self, CompressionMethod, DEFAULT_BLOCK_SIZE};
use crate::error::{Error, Result};

/// Save behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Compress the body even if the package was stored uncompressed
    pub force_recompress: bool,
    /// Store the body uncompressed even if the package was compressed
    pub force_decompress: bool,
    /// Append the processed-package marker
    pub append_end_marker: bool,
}

impl SaveOptions {
    #[must_use]
    pub fn with_end_marker(mut self, append: bool) -> Self {
        self.append_end_marker = append;
        self
    }

    #[must_use]
    pub fn with_recompress(mut self, force: bool) -> Self {
        self.force_recompress = force;
        self
    }

    #[must_use]
    pub fn with_decompress(mut self, force: bool) -> Self {
        self.force_decompress = force;
        self
    }
}

/// Hook for patching offsets stored inside export data when an export moves.
pub trait ExportRelocator {
    /// Adjust `data` for export `index` moving from `old_offset` to `new_offset`.
    fn relocate(
        &self,
        package: &Package,
        index: usize,
        data: &mut Vec<u8>,
        old_offset: u32,
        new_offset: u32,
    ) -> Result<()>;
}

/// Relocator that leaves export data untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRelocation;

impl ExportRelocator for NoRelocation {
    fn relocate(&self, _: &Package, _: usize, _: &mut Vec<u8>, _: u32, _: u32) -> Result<()> {
        Ok(())
    }
}

/// Result of laying out a package
struct Layout {
    /// Uncompressed image
    image: Vec<u8>,
    /// Export records with final offsets
    exports: Vec<ExportEntry>,
    header: super::PackageHeader,
    compressed: Option<CompressionMethod>,
}

impl Package {
    /// Save the package over its own path.
    ///
    /// Returns `Ok(false)` without touching the file when nothing changed and
    /// nothing was forced.
    pub fn save(&mut self, options: &SaveOptions) -> Result<bool> {
        self.save_with_relocator(options, &NoRelocation)
    }

    /// Save over the package's own path, letting `relocator` patch export data
    /// whose offset changes.
    pub fn save_with_relocator(
        &mut self,
        options: &SaveOptions,
        relocator: &dyn ExportRelocator,
    ) -> Result<bool> {
        if !self.needs_write(options) {
            tracing::debug!("{} unchanged, not saving", self.path.display());
            return Ok(false);
        }
        let path = self.path.clone();
        self.write_to(&path, options, relocator)?;
        Ok(true)
    }

    /// Save to another path. The package then refers to that path.
    pub fn save_as<P: AsRef<Path>>(
        &mut self,
        path: P,
        options: &SaveOptions,
        relocator: &dyn ExportRelocator,
    ) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        self.write_to(&path, options, relocator)?;
        self.path = path;
        Ok(())
    }

    /// Serialize the package to file bytes without committing any state.
    pub fn to_file_bytes(
        &self,
        options: &SaveOptions,
        relocator: &dyn ExportRelocator,
    ) -> Result<Vec<u8>> {
        let layout = self.build(options, relocator)?;
        encode_file(&layout, options)
    }

    fn needs_write(&self, options: &SaveOptions) -> bool {
        self.is_modified()
            || options.force_recompress
            || (options.force_decompress && self.is_compressed())
            || (options.append_end_marker && !self.marked)
    }

    fn write_to(
        &mut self,
        path: &Path,
        options: &SaveOptions,
        relocator: &dyn ExportRelocator,
    ) -> Result<()> {
        let layout = self.build(options, relocator)?;
        let bytes = encode_file(&layout, options)?;

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::info!(
            "Saved {} ({} bytes{})",
            path.display(),
            bytes.len(),
            match layout.compressed {
                Some(method) => format!(", {method} compressed"),
                None => String::new(),
            }
        );

        self.image = layout.image;
        self.exports = layout.exports;
        self.header = layout.header;
        self.names_dirty = false;
        self.marked = options.append_end_marker;
        Ok(())
    }

    fn build(&self, options: &SaveOptions, relocator: &dyn ExportRelocator) -> Result<Layout> {
        let compressed = self.target_compression(options);
        let mut header = self.header.clone();
        let mut flags = header.package_flags() & !PKG_COMPRESSED;
        if compressed.is_some() {
            flags |= PKG_COMPRESSED;
        }
        header.set_package_flags(flags);
        header.set_compression(compressed.unwrap_or(CompressionMethod::None));

        let mut out = header.as_bytes().to_vec();
        let mut tables = TableLayout {
            names_count: self.names.len() as u32,
            exports_count: self.exports.len() as u32,
            imports_count: self.imports.len() as u32,
            ..TableLayout::default()
        };

        tables.names_offset = offset_of(&out)?;
        self.names.write_to(&mut out);

        tables.imports_offset = offset_of(&out)?;
        for import in &self.imports {
            out.extend_from_slice(import.as_bytes());
        }

        tables.exports_offset = offset_of(&out)?;
        let export_table_at = out.len();
        out.resize(out.len() + self.exports.len() * EXPORT_ENTRY_SIZE, 0);

        tables.depends_offset = offset_of(&out)?;
        out.extend_from_slice(&self.depends);

        tables.guids_offset = offset_of(&out)?;
        out.extend_from_slice(&self.guids);

        header.set_header_size(offset_of(&out)?);
        header.set_table_layout(&tables);

        // Existing exports keep their relative order; new ones go last
        let mut order: Vec<usize> = (0..self.exports.len()).collect();
        order.sort_by_key(|&i| {
            let export = &self.exports[i];
            (export.fresh, export.data_offset(), i)
        });

        let mut exports = self.exports.clone();
        for index in order {
            let old_offset = self.exports[index].data_offset();
            let new_offset = offset_of(&out)?;
            let mut data = self.export_data(index)?.to_vec();
            if old_offset != new_offset {
                relocator.relocate(self, index, &mut data, old_offset, new_offset)?;
            }
            let size = u32::try_from(data.len()).map_err(|_| Error::PackageTooLarge {
                size: data.len(),
            })?;
            out.extend_from_slice(&data);

            let export = &mut exports[index];
            export.set_data_range(new_offset, size);
            export.replacement = None;
            export.fresh = false;
        }
        // The finished image must stay addressable with 32-bit offsets
        offset_of(&out)?;

        for (i, export) in exports.iter().enumerate() {
            let at = export_table_at + i * EXPORT_ENTRY_SIZE;
            out[at..at + EXPORT_ENTRY_SIZE].copy_from_slice(export.as_bytes());
        }
        out[..header.len()].copy_from_slice(header.as_bytes());

        Ok(Layout {
            image: out,
            exports,
            header,
            compressed,
        })
    }

    fn target_compression(&self, options: &SaveOptions) -> Option<CompressionMethod> {
        if options.force_decompress {
            return None;
        }
        if !(self.is_compressed() || options.force_recompress) {
            return None;
        }
        match self.header.compression() {
            Ok(CompressionMethod::None) | Err(_) => Some(self.variant.policy().package_codec),
            Ok(method) => Some(method),
        }
    }
}

/// Final file bytes for a laid-out package
fn encode_file(layout: &Layout, options: &SaveOptions) -> Result<Vec<u8>> {
    let header_len = layout.header.len();
    let mut bytes = match layout.compressed {
        Some(method) => {
            let body = compression::encode(&layout.image[header_len..], DEFAULT_BLOCK_SIZE, &method)?;
            let mut bytes = Vec::with_capacity(header_len + body.len() + END_MARKER.len());
            bytes.extend_from_slice(&layout.image[..header_len]);
            bytes.extend_from_slice(&body);
            bytes
        }
        None => layout.image.clone(),
    };
    if options.append_end_marker {
        bytes.extend_from_slice(END_MARKER);
    }
    Ok(bytes)
}

fn offset_of(out: &[u8]) -> Result<u32> {
    u32::try_from(out.len()).map_err(|_| Error::PackageTooLarge { size: out.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::ImportEntry;
    use crate::variant::GameVariant;
    use pretty_assertions::assert_eq;

    struct CountingRelocator(std::cell::Cell<usize>);

    impl ExportRelocator for CountingRelocator {
        fn relocate(&self, _: &Package, _: usize, _: &mut Vec<u8>, _: u32, _: u32) -> Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    fn build_package(dir: &Path, variant: GameVariant) -> Package {
        let mut package = Package::new(dir.join("Level.pcc"), variant, "None");
        let core = package.add_name("Core");
        let class = package.add_name("Class");
        let texture = package.add_name("Texture2D");
        let class_ref = package.add_import(ImportEntry::new(core, class, 0, texture));
        package.add_export(class_ref, "A", vec![0xAA; 100]);
        package.add_export(class_ref, "B", vec![0xBB; 50]);
        package.add_export(class_ref, "C", vec![0xCC; 10]);
        package
    }

    #[test]
    fn test_save_then_reopen_preserves_tables() {
        let dir = tempfile::tempdir().unwrap();
        let mut package = build_package(dir.path(), GameVariant::Extended);
        assert!(package.save(&SaveOptions::default()).unwrap());

        let first = Package::open(package.path()).unwrap();
        let mut second = first.clone();
        assert!(second.save(&SaveOptions::default().with_end_marker(true)).unwrap());
        let reopened = Package::open(package.path()).unwrap();

        assert!(reopened.is_marked());
        assert_eq!(reopened.names().entries(), first.names().entries());
        assert_eq!(reopened.imports(), first.imports());
        for i in 0..3 {
            assert_eq!(reopened.exports()[i].as_bytes(), first.exports()[i].as_bytes());
        }
    }

    #[test]
    fn test_unchanged_package_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut package = build_package(dir.path(), GameVariant::Classic);
        package.save(&SaveOptions::default()).unwrap();
        let mut reopened = Package::open(package.path()).unwrap();
        assert!(!reopened.save(&SaveOptions::default()).unwrap());
    }

    #[test]
    fn test_growing_an_export_shifts_later_exports() {
        let dir = tempfile::tempdir().unwrap();
        let mut package = build_package(dir.path(), GameVariant::Streaming);
        package.save(&SaveOptions::default()).unwrap();

        let mut package = Package::open(package.path()).unwrap();
        let b_before = package.exports()[1].data_offset();
        package.set_export_bytes(0, vec![0x11; 400]).unwrap();
        let relocator = CountingRelocator(std::cell::Cell::new(0));
        assert!(package.save_with_relocator(&SaveOptions::default(), &relocator).unwrap());
        // B and C moved, A did not
        assert_eq!(relocator.0.get(), 2);

        let reopened = Package::open(package.path()).unwrap();
        assert_eq!(reopened.exports()[1].data_offset(), b_before + 300);
        assert_eq!(reopened.export_data(0).unwrap(), &[0x11; 400][..]);
        assert_eq!(reopened.export_data(1).unwrap(), &[0xBB; 50][..]);
        assert_eq!(reopened.export_data(2).unwrap(), &[0xCC; 10][..]);
    }

    #[test]
    fn test_compressed_save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut package = build_package(dir.path(), GameVariant::Extended);
        package
            .save(&SaveOptions::default().with_recompress(true))
            .unwrap();
        let reopened = Package::open(package.path()).unwrap();
        assert!(reopened.is_compressed());
        assert_eq!(reopened.header().compression().unwrap(), CompressionMethod::Zlib);
        assert_eq!(reopened.export_data(0).unwrap(), &[0xAA; 100][..]);

        let mut plain = reopened.clone();
        plain
            .save(&SaveOptions::default().with_decompress(true))
            .unwrap();
        let reopened = Package::open(plain.path()).unwrap();
        assert!(!reopened.is_compressed());
        assert_eq!(reopened.export_data(2).unwrap(), &[0xCC; 10][..]);
    }

    #[test]
    fn test_header_size_matches_first_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut package = build_package(dir.path(), GameVariant::Classic);
        package.save(&SaveOptions::default()).unwrap();
        let reopened = Package::open(package.path()).unwrap();
        assert_eq!(
            reopened.header().header_size(),
            reopened.exports()[0].data_offset()
        );
        let file_len = std::fs::metadata(reopened.path()).unwrap().len();
        let last = &reopened.exports()[2];
        assert_eq!(u64::from(last.data_offset() + last.data_size()), file_len);
    }
}
