//! Types for package container handling
//!
//! Table records are kept as owned byte arrays with accessor functions at named
//! field offsets, so a record is always re-emitted exactly as it was read apart
//! from the fields that are explicitly patched.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};

use crate::compression::CompressionMethod;
use crate::error::{Error, Result};
use crate::variant::HeaderLayout;

/// Package magic tag
pub const PACKAGE_MAGIC: u32 = 0x9E2A_83C1;

/// Package flag: body is wrapped in a compression envelope
pub const PKG_COMPRESSED: u32 = 0x0200_0000;

/// Literal appended to files this tool has processed
pub const END_MARKER: &[u8] = b"TexForgeEndOfFileMarker";

/// Size of an export table record
pub const EXPORT_ENTRY_SIZE: usize = 64;

/// Size of an import table record
pub const IMPORT_ENTRY_SIZE: usize = 28;

/// Size of one guids table record (GUID + export index)
pub const GUID_ENTRY_SIZE: usize = 20;

/// Offset of the folder name length field
pub(crate) const FOLDER_NAME_OFFSET: usize = 12;

/// Default flags for names added by this tool (legacy layout only)
const DEFAULT_NAME_FLAGS: u64 = 0x0007_0010_0000_0000;

// Field offsets relative to the start of the table block
mod field {
    pub const NAMES_COUNT: usize = 0;
    pub const NAMES_OFFSET: usize = 4;
    pub const EXPORTS_COUNT: usize = 8;
    pub const EXPORTS_OFFSET: usize = 12;
    pub const IMPORTS_COUNT: usize = 16;
    pub const IMPORTS_OFFSET: usize = 20;
    pub const DEPENDS_OFFSET: usize = 24;
    pub const GUIDS_OFFSET: usize = 28;
    pub const PACKAGE_GUID: usize = 32;
    pub const COMPRESSION: usize = 48;
    pub const END: usize = 52;
}

/// Fixed package header
#[derive(Debug, Clone)]
pub struct PackageHeader {
    raw: Vec<u8>,
    /// Offset of the flags word
    base: usize,
    /// Offset of the table block
    tables_at: usize,
    layout: HeaderLayout,
}

impl PackageHeader {
    /// Build an empty header for a new package of `variant`
    pub(crate) fn new(variant: crate::variant::GameVariant, folder_name: &str) -> Self {
        let policy = variant.policy();
        let mut raw = vec![0u8; FOLDER_NAME_OFFSET + 4];
        LittleEndian::write_u32(&mut raw[0..4], PACKAGE_MAGIC);
        LittleEndian::write_u16(&mut raw[4..6], policy.file_version);
        LittleEndian::write_i32(
            &mut raw[FOLDER_NAME_OFFSET..FOLDER_NAME_OFFSET + 4],
            (folder_name.len() + 1) as i32,
        );
        raw.extend_from_slice(folder_name.as_bytes());
        raw.push(0);
        let base = raw.len();
        let tables_at = match policy.layout {
            HeaderLayout::Legacy => base + 4,
            HeaderLayout::Extended => base + 8,
        };
        raw.resize(tables_at + field::END, 0);
        Self {
            raw,
            base,
            tables_at,
            layout: policy.layout,
        }
    }

    /// Parse the fixed header from the start of a package file.
    ///
    /// Only the magic and version are validated here; the caller checks the
    /// layout against the selected variant.
    pub(crate) fn parse(bytes: &[u8], layout: HeaderLayout) -> Result<Self> {
        if bytes.len() < FOLDER_NAME_OFFSET + 4 {
            return Err(Error::malformed_header("file too short for a package header"));
        }
        let folder_len = LittleEndian::read_i32(&bytes[FOLDER_NAME_OFFSET..FOLDER_NAME_OFFSET + 4]);
        let folder_bytes = match folder_len {
            n if n >= 0 => n as usize,
            n => (n.unsigned_abs() as usize) * 2,
        };
        let base = FOLDER_NAME_OFFSET + 4 + folder_bytes;
        let tables_at = match layout {
            HeaderLayout::Legacy => base + 4,
            HeaderLayout::Extended => base + 8,
        };
        let end = tables_at + field::END;
        if bytes.len() < end {
            return Err(Error::malformed_header(format!(
                "header needs {end} bytes, file has {}",
                bytes.len()
            )));
        }
        Ok(Self {
            raw: bytes[..end].to_vec(),
            base,
            tables_at,
            layout,
        })
    }

    fn read(&self, at: usize) -> u32 {
        LittleEndian::read_u32(&self.raw[self.tables_at + at..self.tables_at + at + 4])
    }

    fn write(&mut self, at: usize, value: u32) {
        let at = self.tables_at + at;
        LittleEndian::write_u32(&mut self.raw[at..at + 4], value);
    }

    /// Raw bytes of the fixed header
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Length of the fixed header
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn layout(&self) -> HeaderLayout {
        self.layout
    }

    pub fn file_version(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[4..6])
    }

    pub fn licensee_version(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[6..8])
    }

    /// Offset of the first export-data byte in the uncompressed image
    pub fn header_size(&self) -> u32 {
        LittleEndian::read_u32(&self.raw[8..12])
    }

    pub(crate) fn set_header_size(&mut self, value: u32) {
        LittleEndian::write_u32(&mut self.raw[8..12], value);
    }

    /// Folder name stored in the header (lossy for UTF-16 names)
    pub fn folder_name(&self) -> String {
        let start = FOLDER_NAME_OFFSET + 4;
        let bytes = &self.raw[start..self.base];
        String::from_utf8_lossy(bytes)
            .trim_end_matches('\0')
            .to_string()
    }

    pub fn package_flags(&self) -> u32 {
        LittleEndian::read_u32(&self.raw[self.base..self.base + 4])
    }

    pub(crate) fn set_package_flags(&mut self, value: u32) {
        let at = self.base;
        LittleEndian::write_u32(&mut self.raw[at..at + 4], value);
    }

    /// Extra word present only in the extended layout
    pub fn package_type(&self) -> Option<u32> {
        match self.layout {
            HeaderLayout::Legacy => None,
            HeaderLayout::Extended => {
                Some(LittleEndian::read_u32(&self.raw[self.base + 4..self.base + 8]))
            }
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.package_flags() & PKG_COMPRESSED != 0
    }

    pub fn names_count(&self) -> u32 {
        self.read(field::NAMES_COUNT)
    }

    pub fn names_offset(&self) -> u32 {
        self.read(field::NAMES_OFFSET)
    }

    pub fn exports_count(&self) -> u32 {
        self.read(field::EXPORTS_COUNT)
    }

    pub fn exports_offset(&self) -> u32 {
        self.read(field::EXPORTS_OFFSET)
    }

    pub fn imports_count(&self) -> u32 {
        self.read(field::IMPORTS_COUNT)
    }

    pub fn imports_offset(&self) -> u32 {
        self.read(field::IMPORTS_OFFSET)
    }

    pub fn depends_offset(&self) -> u32 {
        self.read(field::DEPENDS_OFFSET)
    }

    pub fn guids_offset(&self) -> u32 {
        self.read(field::GUIDS_OFFSET)
    }

    pub fn package_guid(&self) -> [u8; 16] {
        let at = self.tables_at + field::PACKAGE_GUID;
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&self.raw[at..at + 16]);
        guid
    }

    /// Codec id recorded for the body envelope
    pub fn compression_id(&self) -> u32 {
        self.read(field::COMPRESSION)
    }

    pub fn compression(&self) -> Result<CompressionMethod> {
        CompressionMethod::from_id(self.compression_id())
    }

    pub(crate) fn set_compression(&mut self, method: CompressionMethod) {
        self.write(field::COMPRESSION, method.to_id());
    }

    pub(crate) fn set_table_layout(&mut self, layout: &TableLayout) {
        self.write(field::NAMES_COUNT, layout.names_count);
        self.write(field::NAMES_OFFSET, layout.names_offset);
        self.write(field::EXPORTS_COUNT, layout.exports_count);
        self.write(field::EXPORTS_OFFSET, layout.exports_offset);
        self.write(field::IMPORTS_COUNT, layout.imports_count);
        self.write(field::IMPORTS_OFFSET, layout.imports_offset);
        self.write(field::DEPENDS_OFFSET, layout.depends_offset);
        self.write(field::GUIDS_OFFSET, layout.guids_offset);
    }
}

/// Table positions computed while writing a package
#[derive(Debug, Clone, Default)]
pub(crate) struct TableLayout {
    pub names_count: u32,
    pub names_offset: u32,
    pub exports_count: u32,
    pub exports_offset: u32,
    pub imports_count: u32,
    pub imports_offset: u32,
    pub depends_offset: u32,
    pub guids_offset: u32,
}

/// One entry of the name table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub name: String,
    /// Stored as UTF-16 on disk
    pub wide: bool,
    /// Name flags (legacy layout only)
    pub flags: Option<u64>,
}

/// The package name table
///
/// Names are matched case-insensitively, as the engine does.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    entries: Vec<NameEntry>,
    lookup: HashMap<String, usize>,
}

impl NameTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: Vec<NameEntry>) -> Self {
        let mut lookup = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            lookup.entry(entry.name.to_ascii_lowercase()).or_insert(i);
        }
        Self { entries, lookup }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[NameEntry] {
        &self.entries
    }

    /// Name at `index`
    pub fn get(&self, index: i32) -> Result<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.entries.get(i))
            .map(|e| e.name.as_str())
            .ok_or(Error::InvalidNameIndex(index))
    }

    /// Index of `name`, if present
    pub fn find(&self, name: &str) -> Option<i32> {
        self.lookup
            .get(&name.to_ascii_lowercase())
            .map(|&i| i as i32)
    }

    /// Index of `name`, appending it to the table when missing
    pub fn intern(&mut self, name: &str, layout: HeaderLayout) -> i32 {
        if let Some(index) = self.find(name) {
            return index;
        }
        let index = self.entries.len();
        self.entries.push(NameEntry {
            name: name.to_string(),
            wide: false,
            flags: match layout {
                HeaderLayout::Legacy => Some(DEFAULT_NAME_FLAGS),
                HeaderLayout::Extended => None,
            },
        });
        self.lookup.insert(name.to_ascii_lowercase(), index);
        index as i32
    }

    /// Serialize the table in on-disk form
    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        let mut word = [0u8; 8];
        for entry in &self.entries {
            if entry.wide {
                let units: Vec<u16> = entry.name.encode_utf16().collect();
                LittleEndian::write_i32(&mut word[..4], -((units.len() + 1) as i32));
                out.extend_from_slice(&word[..4]);
                for unit in units {
                    LittleEndian::write_u16(&mut word[..2], unit);
                    out.extend_from_slice(&word[..2]);
                }
                out.extend_from_slice(&[0, 0]);
            } else {
                LittleEndian::write_i32(&mut word[..4], (entry.name.len() + 1) as i32);
                out.extend_from_slice(&word[..4]);
                out.extend_from_slice(entry.name.as_bytes());
                out.push(0);
            }
            if let Some(flags) = entry.flags {
                LittleEndian::write_u64(&mut word, flags);
                out.extend_from_slice(&word);
            }
        }
    }
}

/// One entry of the import table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    raw: [u8; IMPORT_ENTRY_SIZE],
}

impl ImportEntry {
    /// Build an import record from name indices
    #[must_use]
    pub fn new(class_package: i32, class_name: i32, link: i32, object_name: i32) -> Self {
        let mut raw = [0u8; IMPORT_ENTRY_SIZE];
        LittleEndian::write_i32(&mut raw[0..4], class_package);
        LittleEndian::write_i32(&mut raw[8..12], class_name);
        LittleEndian::write_i32(&mut raw[16..20], link);
        LittleEndian::write_i32(&mut raw[20..24], object_name);
        Self { raw }
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        let mut raw = [0u8; IMPORT_ENTRY_SIZE];
        raw.copy_from_slice(&bytes[..IMPORT_ENTRY_SIZE]);
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn package_name(&self) -> i32 {
        LittleEndian::read_i32(&self.raw[0..4])
    }

    pub fn class_name(&self) -> i32 {
        LittleEndian::read_i32(&self.raw[8..12])
    }

    pub fn link(&self) -> i32 {
        LittleEndian::read_i32(&self.raw[16..20])
    }

    pub fn object_name(&self) -> i32 {
        LittleEndian::read_i32(&self.raw[20..24])
    }
}

// Export record field offsets
mod export_field {
    pub const CLASS: usize = 0;
    pub const SUPER: usize = 4;
    pub const LINK: usize = 8;
    pub const NAME: usize = 12;
    pub const NAME_NUMBER: usize = 16;
    pub const ARCHETYPE: usize = 20;
    pub const OBJECT_FLAGS: usize = 24;
    pub const DATA_SIZE: usize = 32;
    pub const DATA_OFFSET: usize = 36;
    pub const EXPORT_FLAGS: usize = 40;
}

/// One entry of the export table plus its pending replacement data
#[derive(Debug, Clone)]
pub struct ExportEntry {
    raw: [u8; EXPORT_ENTRY_SIZE],
    /// Replacement bytes set since the package was opened or last saved
    pub(crate) replacement: Option<Vec<u8>>,
    /// Added in memory; has no data in the image yet
    pub(crate) fresh: bool,
}

impl ExportEntry {
    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        let mut raw = [0u8; EXPORT_ENTRY_SIZE];
        raw.copy_from_slice(&bytes[..EXPORT_ENTRY_SIZE]);
        Self {
            raw,
            replacement: None,
            fresh: false,
        }
    }

    pub(crate) fn new(class: i32, name_index: i32, data: Vec<u8>) -> Self {
        let mut raw = [0u8; EXPORT_ENTRY_SIZE];
        LittleEndian::write_i32(&mut raw[export_field::CLASS..export_field::CLASS + 4], class);
        LittleEndian::write_i32(&mut raw[export_field::NAME..export_field::NAME + 4], name_index);
        Self {
            raw,
            replacement: Some(data),
            fresh: true,
        }
    }

    fn i32_at(&self, at: usize) -> i32 {
        LittleEndian::read_i32(&self.raw[at..at + 4])
    }

    fn u32_at(&self, at: usize) -> u32 {
        LittleEndian::read_u32(&self.raw[at..at + 4])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Class reference (0 = `Class`, > 0 export, < 0 import)
    pub fn class(&self) -> i32 {
        self.i32_at(export_field::CLASS)
    }

    pub fn super_ref(&self) -> i32 {
        self.i32_at(export_field::SUPER)
    }

    pub fn link(&self) -> i32 {
        self.i32_at(export_field::LINK)
    }

    pub fn name_index(&self) -> i32 {
        self.i32_at(export_field::NAME)
    }

    pub fn name_number(&self) -> i32 {
        self.i32_at(export_field::NAME_NUMBER)
    }

    pub fn archetype(&self) -> i32 {
        self.i32_at(export_field::ARCHETYPE)
    }

    pub fn object_flags(&self) -> u64 {
        LittleEndian::read_u64(&self.raw[export_field::OBJECT_FLAGS..export_field::OBJECT_FLAGS + 8])
    }

    pub fn export_flags(&self) -> u32 {
        self.u32_at(export_field::EXPORT_FLAGS)
    }

    /// Serialized size recorded in the table
    pub fn data_size(&self) -> u32 {
        self.u32_at(export_field::DATA_SIZE)
    }

    /// Serialized offset recorded in the table
    pub fn data_offset(&self) -> u32 {
        self.u32_at(export_field::DATA_OFFSET)
    }

    pub(crate) fn set_data_range(&mut self, offset: u32, size: u32) {
        LittleEndian::write_u32(
            &mut self.raw[export_field::DATA_OFFSET..export_field::DATA_OFFSET + 4],
            offset,
        );
        LittleEndian::write_u32(
            &mut self.raw[export_field::DATA_SIZE..export_field::DATA_SIZE + 4],
            size,
        );
    }

    /// Whether replacement bytes are pending
    pub fn is_dirty(&self) -> bool {
        self.replacement.is_some()
    }
}

/// Resolved object reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRef {
    Null,
    Export(usize),
    Import(usize),
}

impl ObjectRef {
    #[must_use]
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => ObjectRef::Null,
            n if n > 0 => ObjectRef::Export((n - 1) as usize),
            n => ObjectRef::Import((-n - 1) as usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_table_interns_case_insensitively() {
        let mut table = NameTable::new();
        let a = table.intern("Texture2D", HeaderLayout::Extended);
        let b = table.intern("texture2d", HeaderLayout::Extended);
        let c = table.intern("SizeX", HeaderLayout::Extended);
        assert_eq!(a, b);
        assert_eq!(c, 1);
        assert_eq!(table.get(1).unwrap(), "SizeX");
        assert!(table.get(5).is_err());
        assert!(table.get(-1).is_err());
    }

    #[test]
    fn test_name_table_serialization() {
        let mut table = NameTable::new();
        table.intern("None", HeaderLayout::Legacy);
        let mut out = Vec::new();
        table.write_to(&mut out);
        assert_eq!(&out[..4], &5i32.to_le_bytes());
        assert_eq!(&out[4..9], b"None\0");
        assert_eq!(out.len(), 4 + 5 + 8);
    }

    #[test]
    fn test_object_ref_decoding() {
        assert_eq!(ObjectRef::from_raw(0), ObjectRef::Null);
        assert_eq!(ObjectRef::from_raw(3), ObjectRef::Export(2));
        assert_eq!(ObjectRef::from_raw(-1), ObjectRef::Import(0));
    }
}
