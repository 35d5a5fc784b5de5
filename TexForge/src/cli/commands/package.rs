//! CLI commands for package operations

use std::path::Path;

use anyhow::{Context, bail};

use crate::cli::progress::format_size;
use crate::modfile::{MipImage, MipSet};
use crate::package::{Package, SaveOptions};
use crate::texture::{TEXTURE_CLASSES, Texture, TextureRelocator, replace_export_bytes};
use crate::tfc::CacheStore;

/// Show header and table summary of a package
pub fn info(source: &Path) -> anyhow::Result<()> {
    let package = Package::open(source)?;
    let header = package.header();

    println!("Package Information: {}", source.display());
    println!();
    println!("Variant: {}", package.variant());
    println!(
        "Version: {} (licensee {})",
        header.file_version(),
        header.licensee_version()
    );
    println!("Folder: {}", header.folder_name());
    println!("Flags: 0x{:08X}", header.package_flags());
    if package.is_compressed() {
        println!("Body: compressed ({})", header.compression()?.as_str());
    } else {
        println!("Body: uncompressed");
    }
    println!("Processed marker: {}", if package.is_marked() { "yes" } else { "no" });
    println!();
    println!("Names: {}", package.names().len());
    println!("Imports: {}", package.imports().len());
    println!("Exports: {}", package.exports().len());

    let textures: usize = TEXTURE_CLASSES
        .iter()
        .map(|class| package.find_exports_by_class(class).len())
        .sum();
    println!("Texture exports: {textures}");

    Ok(())
}

/// List texture exports
pub fn textures(source: &Path, detailed: bool) -> anyhow::Result<()> {
    let package = Package::open(source)?;
    let mut indices: Vec<usize> = TEXTURE_CLASSES
        .iter()
        .flat_map(|class| package.find_exports_by_class(class))
        .collect();
    indices.sort_unstable();

    for index in indices {
        let name = package.export_object_name(index)?;
        let texture = match Texture::from_export(&package, index) {
            Ok(texture) => texture,
            Err(e) => {
                println!("{index:>6}  {name}  <unreadable: {e}>");
                continue;
            }
        };
        let (width, height) = texture.size().unwrap_or((0, 0));
        let format = texture
            .pixel_format()
            .map(|f| f.as_str().to_string())
            .unwrap_or_default();
        let cache = texture.cache_name().unwrap_or_default();
        println!(
            "{index:>6}  {name}  {width}x{height}  {format}  {} mips  {cache}",
            texture.populated_mip_count()
        );

        if detailed {
            for (level, mip) in texture.mipmaps().iter().enumerate().rev() {
                println!(
                    "          [{level:>2}] {:>5}x{:<5} {:<14} {:>10} @ 0x{:08X}",
                    mip.width,
                    mip.height,
                    mip.storage.label(),
                    format_size(u64::from(mip.compressed_size)),
                    mip.data_offset
                );
            }
        }
    }

    Ok(())
}

/// Rewrite a package, compressed unless `decompress` is set
pub fn repack(source: &Path, output: Option<&Path>, decompress: bool) -> anyhow::Result<()> {
    let mut package = Package::open(source)?;
    let options = SaveOptions::default()
        .with_recompress(!decompress)
        .with_decompress(decompress);

    match output {
        Some(path) => {
            package.save_as(path, &options, &TextureRelocator)?;
            println!("Wrote {}", path.display());
        }
        None => {
            package.save_with_relocator(&options, &TextureRelocator)?;
            println!("Rewrote {}", source.display());
        }
    }

    Ok(())
}

/// Write one export to a file: raw bytes, or the texture's mips as a mip set
pub fn export(
    source: &Path,
    index: usize,
    destination: &Path,
    raw: bool,
    cache_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let package = Package::open(source)?;

    if raw {
        let data = package.get_export_bytes(index)?;
        std::fs::write(destination, &data)?;
        println!("Wrote {} bytes to {}", data.len(), destination.display());
        return Ok(());
    }

    let texture = Texture::from_export(&package, index)
        .with_context(|| format!("export {index} is not a readable texture"))?;
    let Some(format) = texture.pixel_format() else {
        bail!("export {index} has no pixel format");
    };
    if format.code() == 0 {
        bail!("texture format '{format}' cannot be stored in a mip set");
    }

    let cache_root = match cache_dir {
        Some(dir) => dir.to_path_buf(),
        None => source.parent().unwrap_or(Path::new(".")).to_path_buf(),
    };
    let store = CacheStore::scan(&cache_root)?;

    let mut mips = Vec::new();
    for (level, mip) in texture.mipmaps().iter().enumerate() {
        if mip.storage.is_unused() {
            continue;
        }
        mips.push(MipImage {
            width: mip.width,
            height: mip.height,
            data: texture.mip_pixels(level, &store)?,
        });
    }
    let set = MipSet::new(format, mips);
    std::fs::write(destination, set.to_bytes())?;
    println!(
        "Wrote {} mips ({}) to {}",
        set.mips.len(),
        format_size(set.byte_len() as u64),
        destination.display()
    );

    Ok(())
}

/// Replace one export's bytes and save the package
pub fn import(source: &Path, index: usize, data: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(data)?;
    let mut package = Package::open(source)?;
    replace_export_bytes(&mut package, index, bytes)?;
    package.save_with_relocator(&SaveOptions::default(), &TextureRelocator)?;
    println!("Replaced export {index} of {}", source.display());
    Ok(())
}
