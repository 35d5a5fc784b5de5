//! CLI commands for mod containers
//!
//! `mod create` reads a JSON manifest; paths in it are relative to the
//! manifest's directory:
//!
//! ```json
//! {
//!   "variant": "extended",
//!   "entries": [
//!     { "kind": "texture", "name": "Rock_Diff", "crc": "0x1A2B3C4D", "mips": "rock.mips" },
//!     { "kind": "raw_export", "package": "CookedPC/BioA_Nor.pcc", "export": 12, "file": "export12.bin" },
//!     { "kind": "binary_diff", "package": "CookedPC/BioA_Nor.pcc", "export": 13,
//!       "original": "old13.bin", "modified": "new13.bin" },
//!     { "kind": "patch", "package": "CookedPC/BioA_Nor.pcc", "export": 14, "patch": "export14.diff" }
//!   ]
//! }
//! ```
//!
//! `mod extract` writes the payloads plus a manifest that rebuilds the same
//! container.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::cli::progress::format_size;
use crate::modfile::{EntryTarget, MipSet, ModEntryKind, ModReader, ModWriter, export_entry_name};
use crate::variant::GameVariant;

/// File name of the manifest written by `mod extract`
pub const MANIFEST_NAME: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub variant: GameVariant,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestEntry {
    Texture {
        name: String,
        /// Checksum of the original top mip, `0x` hex
        crc: String,
        /// Mip set file
        mips: PathBuf,
        #[serde(default)]
        reencode: bool,
    },
    RawExport {
        package: String,
        export: usize,
        file: PathBuf,
    },
    BinaryDiff {
        package: String,
        export: usize,
        original: PathBuf,
        modified: PathBuf,
    },
    /// Prebuilt binary diff
    Patch {
        package: String,
        export: usize,
        patch: PathBuf,
    },
}

fn parse_crc(text: &str) -> anyhow::Result<u32> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16).with_context(|| format!("invalid checksum '{text}'"))
}

fn read_input(base: &Path, path: &Path) -> anyhow::Result<Vec<u8>> {
    let full = base.join(path);
    fs::read(&full).with_context(|| format!("failed to read {}", full.display()))
}

/// Build a mod container from a manifest
pub fn create(manifest_path: &Path, destination: &Path) -> anyhow::Result<()> {
    let file = File::open(manifest_path)
        .with_context(|| format!("failed to open {}", manifest_path.display()))?;
    let manifest: Manifest = serde_json::from_reader(BufReader::new(file))?;
    let base = manifest_path.parent().unwrap_or(Path::new("."));

    let mut writer = ModWriter::create(destination, manifest.variant)?;
    for entry in &manifest.entries {
        match entry {
            ManifestEntry::Texture {
                name,
                crc,
                mips,
                reencode,
            } => {
                let set = MipSet::from_bytes(&read_input(base, mips)?)?;
                writer.add_texture(name, parse_crc(crc)?, &set, *reencode)?;
            }
            ManifestEntry::RawExport {
                package,
                export,
                file,
            } => {
                writer.add_raw_export(package, *export, &read_input(base, file)?)?;
            }
            ManifestEntry::BinaryDiff {
                package,
                export,
                original,
                modified,
            } => {
                let old = read_input(base, original)?;
                let new = read_input(base, modified)?;
                writer.add_binary_diff(package, *export, &old, &new)?;
            }
            ManifestEntry::Patch {
                package,
                export,
                patch,
            } => {
                writer.add_entry(
                    ModEntryKind::BinaryDiff,
                    &export_entry_name(package, *export),
                    &read_input(base, patch)?,
                )?;
            }
        }
    }

    let count = writer.entry_count();
    writer.finish()?;
    println!("Wrote {count} entries to {}", destination.display());
    Ok(())
}

/// List the entries of a mod container
pub fn list(source: &Path) -> anyhow::Result<()> {
    let reader = ModReader::open(source)?;
    println!("Mod: {} ({})", source.display(), reader.variant());
    println!();
    for entry in reader.entries() {
        println!(
            "  {:<18} {:>10}  {}",
            entry.kind.as_str(),
            format_size(entry.length),
            entry.name
        );
    }
    println!();
    println!("{} entries", reader.entries().len());
    Ok(())
}

/// File name for an entry's payload
fn payload_file_name(kind: ModEntryKind, target: &EntryTarget) -> String {
    match target {
        EntryTarget::Texture { .. } => format!("{}.mips", target.entry_name()),
        EntryTarget::Export {
            package_path,
            export_index,
        } => {
            let flat = package_path.replace(['/', '\\'], "_");
            let extension = if kind == ModEntryKind::BinaryDiff { "diff" } else { "bin" };
            format!("{flat}_{export_index}.{extension}")
        }
    }
}

/// Write every payload of a mod container plus a rebuilding manifest
pub fn extract(source: &Path, destination: &Path) -> anyhow::Result<()> {
    let mut reader = ModReader::open(source)?;
    fs::create_dir_all(destination)?;

    let entries = reader.entries().to_vec();
    let mut manifest = Manifest {
        variant: reader.variant(),
        entries: Vec::with_capacity(entries.len()),
    };

    for entry in &entries {
        let target = entry.target()?;
        let payload = reader.read_entry(entry)?;
        let file_name = payload_file_name(entry.kind, &target);
        fs::write(destination.join(&file_name), &payload)?;

        let file = PathBuf::from(file_name);
        manifest.entries.push(match (entry.kind, target) {
            (kind, EntryTarget::Texture { name, crc }) => ManifestEntry::Texture {
                name,
                crc: format!("0x{crc:08X}"),
                mips: file,
                reencode: kind == ModEntryKind::TextureReencode,
            },
            (ModEntryKind::BinaryDiff, EntryTarget::Export {
                package_path,
                export_index,
            }) => ManifestEntry::Patch {
                package: package_path,
                export: export_index,
                patch: file,
            },
            (_, EntryTarget::Export {
                package_path,
                export_index,
            }) => ManifestEntry::RawExport {
                package: package_path,
                export: export_index,
                file,
            },
        });
    }

    let json = serde_json::to_string_pretty(&manifest)?;
    fs::write(destination.join(MANIFEST_NAME), json)?;
    println!(
        "Extracted {} entries to {}",
        entries.len(),
        destination.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modfile::MipImage;
    use crate::texture::PixelFormat;

    #[test]
    fn test_extract_writes_rebuilding_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let set = MipSet::new(
            PixelFormat::G8,
            vec![MipImage {
                width: 4,
                height: 4,
                data: vec![9u8; 16],
            }],
        );
        fs::write(dir.path().join("rock.mips"), set.to_bytes()).unwrap();
        fs::write(dir.path().join("old.bin"), b"old export bytes").unwrap();
        fs::write(dir.path().join("new.bin"), b"new export bytes!").unwrap();
        let manifest = r#"{
            "variant": "classic",
            "entries": [
                { "kind": "texture", "name": "Rock", "crc": "0x0000BEEF", "mips": "rock.mips" },
                { "kind": "raw_export", "package": "CookedPC/A.pcc", "export": 3, "file": "new.bin" },
                { "kind": "binary_diff", "package": "CookedPC/A.pcc", "export": 4,
                  "original": "old.bin", "modified": "new.bin" }
            ]
        }"#;
        fs::write(dir.path().join("input.json"), manifest).unwrap();

        let first = dir.path().join("first.tfmod");
        create(&dir.path().join("input.json"), &first).unwrap();

        let out = dir.path().join("out");
        extract(&first, &out).unwrap();
        let written: Manifest =
            serde_json::from_str(&fs::read_to_string(out.join(MANIFEST_NAME)).unwrap()).unwrap();
        assert_eq!(written.variant, GameVariant::Classic);
        assert_eq!(written.entries.len(), 3);
        assert!(matches!(
            &written.entries[2],
            ManifestEntry::Patch { export: 4, .. }
        ));

        let second = dir.path().join("second.tfmod");
        create(&out.join(MANIFEST_NAME), &second).unwrap();
        let mut a = ModReader::open(&first).unwrap();
        let mut b = ModReader::open(&second).unwrap();
        assert_eq!(a.entries().len(), b.entries().len());
        for (ea, eb) in a.entries().to_vec().iter().zip(b.entries().to_vec().iter()) {
            assert_eq!(ea.name, eb.name);
            assert_eq!(ea.kind, eb.kind);
            assert_eq!(a.read_entry(ea).unwrap(), b.read_entry(eb).unwrap());
        }
    }

    #[test]
    fn test_parse_crc() {
        assert_eq!(parse_crc("0x1A2B3C4D").unwrap(), 0x1A2B3C4D);
        assert_eq!(parse_crc("beef").unwrap(), 0xBEEF);
        assert!(parse_crc("0xnothex").is_err());
    }
}
