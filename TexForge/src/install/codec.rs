//! Pixel format conversion hook

use crate::error::{Error, Result};
use crate::modfile::{MipImage, MipSet};
use crate::texture::PixelFormat;

/// Converts mip pixels between GPU formats and 8-bit RGBA.
///
/// Only consulted when a payload's format differs from the destination's
/// `Format` property, or when an entry asks for re-encoding.
pub trait PixelCodec {
    /// Decode one mip of `format` into RGBA8
    fn decode(&self, data: &[u8], format: &PixelFormat, width: u32, height: u32) -> Result<Vec<u8>>;

    /// Encode one RGBA8 mip into `format`
    fn encode(&self, rgba: &[u8], format: &PixelFormat, width: u32, height: u32) -> Result<Vec<u8>>;
}

/// Re-encode every mip of `set` into `target`
pub fn convert_mip_set(codec: &dyn PixelCodec, set: &MipSet, target: &PixelFormat) -> Result<MipSet> {
    let mut mips = Vec::with_capacity(set.mips.len());
    for mip in &set.mips {
        let rgba = codec.decode(&mip.data, &set.format, mip.width, mip.height)?;
        let expected = mip.width as usize * mip.height as usize * 4;
        if rgba.len() != expected {
            return Err(Error::PixelCodecFailed {
                message: format!(
                    "decoding {}x{} {} produced {} bytes, expected {expected}",
                    mip.width,
                    mip.height,
                    set.format,
                    rgba.len()
                ),
            });
        }
        let data = codec.encode(&rgba, target, mip.width, mip.height)?;
        mips.push(MipImage {
            width: mip.width,
            height: mip.height,
            data,
        });
    }
    tracing::debug!("Converted {} mips {} -> {}", mips.len(), set.format, target);
    Ok(MipSet::new(target.clone(), mips))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Handles the uncompressed formats only
    pub(crate) struct RawCodec;

    impl PixelCodec for RawCodec {
        fn decode(&self, data: &[u8], format: &PixelFormat, _w: u32, _h: u32) -> Result<Vec<u8>> {
            match format {
                PixelFormat::A8R8G8B8 => Ok(data
                    .chunks_exact(4)
                    .flat_map(|p| [p[2], p[1], p[0], p[3]])
                    .collect()),
                PixelFormat::G8 => Ok(data.iter().flat_map(|&g| [g, g, g, 255]).collect()),
                other => Err(Error::PixelCodecFailed {
                    message: format!("cannot decode {other}"),
                }),
            }
        }

        fn encode(&self, rgba: &[u8], format: &PixelFormat, _w: u32, _h: u32) -> Result<Vec<u8>> {
            match format {
                PixelFormat::A8R8G8B8 => Ok(rgba
                    .chunks_exact(4)
                    .flat_map(|p| [p[2], p[1], p[0], p[3]])
                    .collect()),
                PixelFormat::G8 => Ok(rgba.chunks_exact(4).map(|p| p[0]).collect()),
                other => Err(Error::PixelCodecFailed {
                    message: format!("cannot encode {other}"),
                }),
            }
        }
    }

    #[test]
    fn test_convert_between_raw_formats() {
        let set = MipSet::new(
            PixelFormat::G8,
            vec![MipImage {
                width: 2,
                height: 2,
                data: vec![10, 20, 30, 40],
            }],
        );
        let converted = convert_mip_set(&RawCodec, &set, &PixelFormat::A8R8G8B8).unwrap();
        assert_eq!(converted.format, PixelFormat::A8R8G8B8);
        assert_eq!(&converted.mips[0].data[..4], &[10, 10, 10, 255]);

        let back = convert_mip_set(&RawCodec, &converted, &PixelFormat::G8).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_codec_errors_propagate() {
        let set = MipSet::new(
            PixelFormat::Dxt1,
            vec![MipImage {
                width: 4,
                height: 4,
                data: vec![0u8; 8],
            }],
        );
        assert!(matches!(
            convert_mip_set(&RawCodec, &set, &PixelFormat::G8),
            Err(Error::PixelCodecFailed { .. })
        ));
    }
}
