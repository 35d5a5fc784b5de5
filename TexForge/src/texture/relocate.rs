//! Keeps inline mip offsets valid when a package save moves texture exports

use byteorder::{ByteOrder, LittleEndian};

use super::{Texture, is_texture_class};
use crate::error::Result;
use crate::package::{ExportRelocator, Package};

/// Adds the move delta to every inline mip `data_offset` of a moved texture.
///
/// Exports of other classes are left alone. A texture that fails to parse is
/// written unchanged with a warning; its data is still carried verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureRelocator;

impl ExportRelocator for TextureRelocator {
    fn relocate(
        &self,
        package: &Package,
        index: usize,
        data: &mut Vec<u8>,
        old_offset: u32,
        new_offset: u32,
    ) -> Result<()> {
        let is_texture = package
            .export_class_name(index)
            .is_ok_and(|class| is_texture_class(&class));
        if !is_texture {
            return Ok(());
        }

        let texture = match Texture::from_bytes(data, package.names(), package.variant(), index) {
            Ok(texture) => texture,
            Err(e) => {
                tracing::warn!(
                    "{}: export {} moved but its mips could not be read: {}",
                    package.path().display(),
                    index,
                    e
                );
                return Ok(());
            }
        };

        let delta = new_offset.wrapping_sub(old_offset);
        for &field in texture.inline_offset_fields() {
            let slot = &mut data[field..field + 4];
            let value = LittleEndian::read_u32(slot).wrapping_add(delta);
            LittleEndian::write_u32(slot, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{ImportEntry, SaveOptions};
    use crate::texture::tests::texture_properties;
    use crate::texture::{Mipmap, StorageKind};
    use crate::variant::GameVariant;

    #[test]
    fn test_inline_offsets_follow_the_export() {
        let dir = tempfile::tempdir().unwrap();
        let variant = GameVariant::Extended;
        let mut package = Package::new(dir.path().join("Tex.pcc"), variant, "None");
        let core = package.add_name("Core");
        let class = package.add_name("Class");
        let texture_class = package.add_name("Texture2D");
        let class_ref = package.add_import(ImportEntry::new(core, class, 0, texture_class));
        package.add_export(class_ref, "Padding", vec![0u8; 16]);
        let tex_index = package.add_export(class_ref, "Rock", Vec::new());

        let texture = Texture::new(
            variant,
            texture_properties(16, 16, None),
            vec![Mipmap::inline(StorageKind::INLINE_UNCOMPRESSED, 16, 16, &[3u8; 128]).unwrap()],
        );
        texture.write_to_package(&mut package, tex_index).unwrap();
        package
            .save_with_relocator(&SaveOptions::default(), &TextureRelocator)
            .unwrap();

        let check = |package: &Package| {
            let export = &package.exports()[tex_index];
            let parsed = Texture::from_export(package, tex_index).unwrap();
            let field = parsed.inline_offset_fields()[0];
            assert_eq!(
                parsed.mipmaps()[0].data_offset,
                export.data_offset() + field as u32 + 4
            );
        };
        let mut reopened = Package::open(package.path()).unwrap();
        check(&reopened);

        // Growing the export in front moves the texture
        reopened.set_export_bytes(0, vec![0u8; 400]).unwrap();
        reopened
            .save_with_relocator(&SaveOptions::default(), &TextureRelocator)
            .unwrap();
        check(&Package::open(reopened.path()).unwrap());
    }
}
