//! Package container
//!
//! A package is one game asset container: a name table, an import table, an
//! export table and the serialized data of every export. [`Package`] owns the
//! uncompressed image for the lifetime of a session; replacement export data
//! is held beside it until [`Package::save`] lays the file out again.

mod reader;
pub mod types;
mod writer;

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::variant::GameVariant;

pub use reader::has_end_marker;
pub use types::{
    END_MARKER, ExportEntry, ImportEntry, NameEntry, NameTable, ObjectRef, PKG_COMPRESSED,
    PACKAGE_MAGIC, PackageHeader,
};
pub use writer::{ExportRelocator, NoRelocation, SaveOptions};

/// An opened package
#[derive(Debug, Clone)]
pub struct Package {
    path: PathBuf,
    variant: GameVariant,
    header: PackageHeader,
    names: NameTable,
    imports: Vec<ImportEntry>,
    exports: Vec<ExportEntry>,
    depends: Vec<u8>,
    guids: Vec<u8>,
    /// Uncompressed image: fixed header, tables and export data
    image: Vec<u8>,
    marked: bool,
    names_dirty: bool,
}

impl Package {
    /// Open a package, selecting the variant from its file version.
    ///
    /// # Errors
    /// Fails with a format error on a bad magic, unknown version or a table
    /// outside the file, and with corrupt data when the body envelope is broken.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::PackageNotFound {
                path: path.to_path_buf(),
            },
            _ => Error::Io(e),
        })?;
        reader::parse(path, bytes)
    }

    /// Open a package that must belong to `variant`.
    pub fn open_with_variant<P: AsRef<Path>>(path: P, variant: GameVariant) -> Result<Self> {
        let package = Self::open(path)?;
        if package.variant != variant {
            return Err(Error::UnsupportedPackageVersion {
                version: package.header.file_version(),
            });
        }
        Ok(package)
    }

    /// Decode a package from bytes already in memory.
    ///
    /// `path` is only used as the default save destination.
    pub fn from_bytes<P: AsRef<Path>>(path: P, bytes: Vec<u8>) -> Result<Self> {
        reader::parse(path.as_ref(), bytes)
    }

    /// Create an empty, uncompressed package for `variant`.
    ///
    /// The package has a single `None` name; nothing is written until saved.
    #[must_use]
    pub fn new<P: AsRef<Path>>(path: P, variant: GameVariant, folder_name: &str) -> Self {
        let header = PackageHeader::new(variant, folder_name);
        let image = header.as_bytes().to_vec();
        let mut names = NameTable::new();
        names.intern("None", variant.policy().layout);
        Self {
            path: path.as_ref().to_path_buf(),
            variant,
            header,
            names,
            imports: Vec::new(),
            exports: Vec::new(),
            depends: Vec::new(),
            guids: vec![0u8; 4],
            image,
            marked: false,
            names_dirty: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn variant(&self) -> GameVariant {
        self.variant
    }

    pub fn header(&self) -> &PackageHeader {
        &self.header
    }

    pub fn names(&self) -> &NameTable {
        &self.names
    }

    pub fn imports(&self) -> &[ImportEntry] {
        &self.imports
    }

    pub fn exports(&self) -> &[ExportEntry] {
        &self.exports
    }

    /// File name without directory or extension
    pub fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Whether the body is stored compressed on disk
    pub fn is_compressed(&self) -> bool {
        self.header.is_compressed()
    }

    /// Whether the file carried the processed-package marker when opened
    pub fn is_marked(&self) -> bool {
        self.marked
    }

    /// Whether anything changed since the package was opened or last saved
    pub fn is_modified(&self) -> bool {
        self.names_dirty || self.exports.iter().any(ExportEntry::is_dirty)
    }

    /// Index of `name` in the name table
    pub fn name_index(&self, name: &str) -> Option<i32> {
        self.names.find(name)
    }

    /// Index of `name`, appending it to the name table when missing
    pub fn add_name(&mut self, name: &str) -> i32 {
        let before = self.names.len();
        let index = self.names.intern(name, self.variant.policy().layout);
        if self.names.len() != before {
            self.names_dirty = true;
        }
        index
    }

    /// Mutable name table, for serializers that intern several names
    pub fn names_mut(&mut self) -> &mut NameTable {
        self.names_dirty = true;
        &mut self.names
    }

    pub fn add_import(&mut self, import: ImportEntry) -> i32 {
        self.imports.push(import);
        -(self.imports.len() as i32)
    }

    /// Append a new export and return its index.
    ///
    /// `class` is a raw object reference; the data is laid out on save.
    pub fn add_export(&mut self, class: i32, name: &str, data: Vec<u8>) -> usize {
        let name_index = self.add_name(name);
        self.exports.push(ExportEntry::new(class, name_index, data));
        self.depends.extend_from_slice(&[0u8; 4]);
        self.exports.len() - 1
    }

    pub fn export(&self, index: usize) -> Result<&ExportEntry> {
        self.exports.get(index).ok_or(Error::ExportIndexOutOfRange {
            index,
            count: self.exports.len(),
        })
    }

    /// Name of the object behind a raw reference
    pub fn object_name(&self, reference: i32) -> Result<String> {
        match ObjectRef::from_raw(reference) {
            ObjectRef::Null => Ok("Class".to_string()),
            ObjectRef::Export(index) => self.export_object_name(index),
            ObjectRef::Import(index) => {
                let import = self.imports.get(index).ok_or(Error::ExportIndexOutOfRange {
                    index,
                    count: self.imports.len(),
                })?;
                Ok(self.names.get(import.object_name())?.to_string())
            }
        }
    }

    /// Object name of an export, with the instance number suffix when set
    pub fn export_object_name(&self, index: usize) -> Result<String> {
        let export = self.export(index)?;
        let name = self.names.get(export.name_index())?;
        Ok(match export.name_number() {
            n if n > 0 => format!("{name}_{}", n - 1),
            _ => name.to_string(),
        })
    }

    /// Class name of an export
    pub fn export_class_name(&self, index: usize) -> Result<String> {
        self.object_name(self.export(index)?.class())
    }

    /// Dotted path of an export inside this package (`Group.Name`)
    pub fn export_path(&self, index: usize) -> Result<String> {
        let mut parts = vec![self.export_object_name(index)?];
        let mut link = self.export(index)?.link();
        // Guard against reference cycles in damaged files
        let mut depth = 0;
        while let ObjectRef::Export(outer) = ObjectRef::from_raw(link) {
            if depth > 64 {
                break;
            }
            parts.push(self.export_object_name(outer)?);
            link = self.export(outer)?.link();
            depth += 1;
        }
        parts.reverse();
        Ok(parts.join("."))
    }

    /// Indices of every export whose class name matches `class_name`
    pub fn find_exports_by_class(&self, class_name: &str) -> Vec<usize> {
        (0..self.exports.len())
            .filter(|&i| {
                self.export_class_name(i)
                    .is_ok_and(|name| name.eq_ignore_ascii_case(class_name))
            })
            .collect()
    }

    /// Offset of an export's data in the current image
    pub fn export_data_offset(&self, index: usize) -> Result<u32> {
        Ok(self.export(index)?.data_offset())
    }

    /// Current serialized bytes of an export (pending replacement if any)
    pub fn export_data(&self, index: usize) -> Result<&[u8]> {
        let export = self.export(index)?;
        if let Some(data) = &export.replacement {
            return Ok(data);
        }
        let offset = export.data_offset() as usize;
        let size = export.data_size() as usize;
        offset
            .checked_add(size)
            .and_then(|end| self.image.get(offset..end))
            .ok_or(Error::ExportDataTruncated {
                index,
                offset: export.data_offset(),
                size: export.data_size(),
                image_size: self.image.len(),
            })
    }

    /// Owned copy of an export's serialized bytes
    pub fn get_export_bytes(&self, index: usize) -> Result<Vec<u8>> {
        self.export_data(index).map(<[u8]>::to_vec)
    }

    /// Replace an export's serialized bytes.
    ///
    /// The export is marked dirty; offsets are recomputed on save.
    pub fn set_export_bytes(&mut self, index: usize, data: Vec<u8>) -> Result<()> {
        let count = self.exports.len();
        let export = self
            .exports
            .get_mut(index)
            .ok_or(Error::ExportIndexOutOfRange { index, count })?;
        tracing::debug!(
            "Export {} replaced: {} -> {} bytes",
            index,
            export.data_size(),
            data.len()
        );
        export.replacement = Some(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_package(variant: GameVariant) -> Package {
        let mut package = Package::new("Sample.pcc", variant, "None");
        let core = package.add_name("Core");
        let class = package.add_name("Class");
        let texture = package.add_name("Texture2D");
        let class_ref = package.add_import(ImportEntry::new(core, class, 0, texture));
        package.add_export(class_ref, "Rock_Diff", vec![1, 2, 3, 4]);
        package.add_export(class_ref, "Rock_Norm", vec![5, 6]);
        package
    }

    #[test]
    fn test_class_and_object_names() {
        let package = sample_package(GameVariant::Extended);
        assert_eq!(package.export_class_name(0).unwrap(), "Texture2D");
        assert_eq!(package.export_object_name(1).unwrap(), "Rock_Norm");
        assert_eq!(package.find_exports_by_class("texture2d"), vec![0, 1]);
        assert!(package.export(2).is_err());
    }

    #[test]
    fn test_set_export_bytes_marks_dirty() {
        let mut package = sample_package(GameVariant::Classic);
        package.set_export_bytes(1, vec![9; 10]).unwrap();
        assert!(package.is_modified());
        assert_eq!(package.export_data(1).unwrap(), &[9; 10][..]);
        assert!(matches!(
            package.set_export_bytes(5, Vec::new()),
            Err(Error::ExportIndexOutOfRange { index: 5, count: 2 })
        ));
    }

    #[test]
    fn test_bytes_round_trip_through_parser() {
        let package = sample_package(GameVariant::Streaming);
        let bytes = package.to_file_bytes(&SaveOptions::default(), &NoRelocation).unwrap();
        let reopened = Package::from_bytes("Sample.pcc", bytes).unwrap();
        assert_eq!(reopened.variant(), GameVariant::Streaming);
        assert_eq!(reopened.exports().len(), 2);
        assert_eq!(reopened.export_data(0).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(reopened.export_data(1).unwrap(), &[5, 6]);
        assert!(!reopened.is_modified());
    }

    #[test]
    fn test_bad_magic_fails_closed() {
        let mut bytes = vec![0u8; 64];
        bytes[0] = 0x11;
        let err = Package::from_bytes("x.pcc", bytes).unwrap_err();
        assert!(matches!(err, Error::InvalidPackageMagic(0x11)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Format);
    }
}
