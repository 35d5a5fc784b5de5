//! Package reader
//!
//! Parses the fixed header, inflates a compressed body and decodes the name,
//! import, export, depends and guids tables. Export data is left in the image
//! and sliced on demand, so one broken export does not prevent opening the
//! rest of the package.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use super::types::{
    END_MARKER, EXPORT_ENTRY_SIZE, ExportEntry, GUID_ENTRY_SIZE, IMPORT_ENTRY_SIZE, ImportEntry,
    NameEntry, NameTable, PACKAGE_MAGIC, PackageHeader,
};
use super::Package;
use crate::compression::{self, CompressionMethod};
use crate::error::{Error, Result};
use crate::variant::GameVariant;

/// Bytes needed to read the magic and version fields
const PREAMBLE_SIZE: usize = 8;

/// Decode a package from raw file bytes.
pub(crate) fn parse(path: &Path, mut bytes: Vec<u8>) -> Result<Package> {
    let marked = bytes.ends_with(END_MARKER);
    if marked {
        bytes.truncate(bytes.len() - END_MARKER.len());
    }

    if bytes.len() < PREAMBLE_SIZE {
        return Err(Error::malformed_header(format!(
            "file is only {} bytes",
            bytes.len()
        )));
    }
    let magic = LittleEndian::read_u32(&bytes[0..4]);
    if magic != PACKAGE_MAGIC {
        return Err(Error::InvalidPackageMagic(magic));
    }
    let version = LittleEndian::read_u16(&bytes[4..6]);
    let variant = GameVariant::from_file_version(version)?;

    let mut header = PackageHeader::parse(&bytes, variant.policy().layout)?;

    let image = if header.is_compressed() {
        let method = header.compression()?;
        if method == CompressionMethod::None {
            return Err(Error::malformed_header(
                "package is flagged compressed but names no codec",
            ));
        }
        let body = compression::decode(&bytes[header.len()..], &method)?;
        tracing::debug!(
            "Inflated {} package body: {} -> {} bytes",
            method,
            bytes.len() - header.len(),
            body.len()
        );
        let mut image = Vec::with_capacity(header.len() + body.len());
        image.extend_from_slice(header.as_bytes());
        image.extend_from_slice(&body);
        image
    } else {
        bytes
    };
    // The header inside the image is the reference from here on
    header = PackageHeader::parse(&image, header.layout())?;

    let names = read_names(&image, &header)?;
    let imports = read_imports(&image, &header)?;
    let exports = read_exports(&image, &header)?;
    let depends = read_depends(&image, &header)?;
    let guids = read_guids(&image, &header)?;

    tracing::debug!(
        "Opened {}: {} names, {} imports, {} exports",
        path.display(),
        names.len(),
        imports.len(),
        exports.len()
    );

    Ok(Package {
        path: path.to_path_buf(),
        variant,
        header,
        names,
        imports,
        exports,
        depends,
        guids,
        image,
        marked,
        names_dirty: false,
    })
}

fn table_range(
    table: &'static str,
    offset: u32,
    len: usize,
    image: &[u8],
) -> Result<std::ops::Range<usize>> {
    let start = offset as usize;
    let end = start.checked_add(len).filter(|&end| end <= image.len());
    match end {
        Some(end) => Ok(start..end),
        None => Err(Error::TableOutOfBounds {
            table,
            offset: u64::from(offset),
            size: image.len() as u64,
        }),
    }
}

fn read_names(image: &[u8], header: &PackageHeader) -> Result<NameTable> {
    let out_of_bounds = || Error::TableOutOfBounds {
        table: "names",
        offset: u64::from(header.names_offset()),
        size: image.len() as u64,
    };
    let has_flags = header.layout() == crate::variant::HeaderLayout::Legacy;

    let count = header.names_count() as usize;
    let mut entries = Vec::with_capacity(count.min(image.len() / 5));
    let mut cursor = header.names_offset() as usize;

    for _ in 0..count {
        let len_bytes = image.get(cursor..cursor + 4).ok_or_else(out_of_bounds)?;
        let len = LittleEndian::read_i32(len_bytes);
        cursor += 4;

        let (name, wide) = if len >= 0 {
            let len = len as usize;
            let raw = image.get(cursor..cursor + len).ok_or_else(out_of_bounds)?;
            cursor += len;
            let text = raw.strip_suffix(&[0]).unwrap_or(raw);
            (String::from_utf8_lossy(text).into_owned(), false)
        } else {
            let units = len.unsigned_abs() as usize;
            let raw = image
                .get(cursor..cursor + units * 2)
                .ok_or_else(out_of_bounds)?;
            cursor += units * 2;
            let mut utf16: Vec<u16> = raw.chunks_exact(2).map(LittleEndian::read_u16).collect();
            if utf16.last() == Some(&0) {
                utf16.pop();
            }
            (String::from_utf16_lossy(&utf16), true)
        };

        let flags = if has_flags {
            let raw = image.get(cursor..cursor + 8).ok_or_else(out_of_bounds)?;
            cursor += 8;
            Some(LittleEndian::read_u64(raw))
        } else {
            None
        };

        entries.push(NameEntry { name, wide, flags });
    }

    Ok(NameTable::from_entries(entries))
}

fn read_imports(image: &[u8], header: &PackageHeader) -> Result<Vec<ImportEntry>> {
    let count = header.imports_count() as usize;
    let range = table_range(
        "imports",
        header.imports_offset(),
        count.saturating_mul(IMPORT_ENTRY_SIZE),
        image,
    )?;
    Ok(image[range]
        .chunks_exact(IMPORT_ENTRY_SIZE)
        .map(ImportEntry::from_bytes)
        .collect())
}

fn read_exports(image: &[u8], header: &PackageHeader) -> Result<Vec<ExportEntry>> {
    let count = header.exports_count() as usize;
    let range = table_range(
        "exports",
        header.exports_offset(),
        count.saturating_mul(EXPORT_ENTRY_SIZE),
        image,
    )?;
    Ok(image[range]
        .chunks_exact(EXPORT_ENTRY_SIZE)
        .map(ExportEntry::from_bytes)
        .collect())
}

fn read_depends(image: &[u8], header: &PackageHeader) -> Result<Vec<u8>> {
    if header.depends_offset() == 0 {
        return Ok(vec![0u8; header.exports_count() as usize * 4]);
    }
    let range = table_range(
        "depends",
        header.depends_offset(),
        (header.exports_count() as usize).saturating_mul(4),
        image,
    )?;
    Ok(image[range].to_vec())
}

fn read_guids(image: &[u8], header: &PackageHeader) -> Result<Vec<u8>> {
    if header.guids_offset() == 0 {
        return Ok(vec![0u8; 4]);
    }
    let count_range = table_range("guids", header.guids_offset(), 4, image)?;
    let count = LittleEndian::read_u32(&image[count_range]) as usize;
    let range = table_range(
        "guids",
        header.guids_offset(),
        count.saturating_mul(GUID_ENTRY_SIZE).saturating_add(4),
        image,
    )?;
    Ok(image[range].to_vec())
}

/// Whether a file on disk ends with the processed-package marker.
///
/// Reads only the tail of the file.
pub fn has_end_marker(path: &Path) -> Result<bool> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    let marker_len = END_MARKER.len() as u64;
    if len < marker_len {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - marker_len))?;
    let mut tail = vec![0u8; END_MARKER.len()];
    file.read_exact(&mut tail)?;
    Ok(tail == END_MARKER)
}
