//! Texture payloads: a list of mip images in one pixel format

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::texture::{MAX_MIPS, PixelFormat};

/// Magic tag of a mip set payload
pub const MIPSET_MAGIC: &[u8; 4] = b"MIPS";

/// Pixels of one mip level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Decoded texture payload, mips smallest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipSet {
    pub format: PixelFormat,
    pub mips: Vec<MipImage>,
}

impl MipSet {
    /// Build a set from mips in any order
    #[must_use]
    pub fn new(format: PixelFormat, mut mips: Vec<MipImage>) -> Self {
        mips.sort_by_key(|m| (m.width, m.height));
        Self { format, mips }
    }

    pub fn top(&self) -> Option<&MipImage> {
        self.mips.last()
    }

    /// Total pixel bytes
    pub fn byte_len(&self) -> usize {
        self.mips.iter().map(|m| m.data.len()).sum()
    }

    /// Serialize, largest mip first
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.byte_len() + self.mips.len() * 12);
        out.extend_from_slice(MIPSET_MAGIC);
        out.extend_from_slice(&self.format.code().to_le_bytes());
        out.extend_from_slice(&(self.mips.len() as u32).to_le_bytes());
        for mip in self.mips.iter().rev() {
            out.extend_from_slice(&mip.width.to_le_bytes());
            out.extend_from_slice(&mip.height.to_le_bytes());
            out.extend_from_slice(&(mip.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&mip.data);
        }
        out
    }

    /// Parse a payload and normalize it to smallest first
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let malformed = |message: String| Error::MalformedMipSet { message };
        if bytes.len() < 12 || &bytes[0..4] != MIPSET_MAGIC {
            return Err(malformed("missing MIPS header".to_string()));
        }
        let code = LittleEndian::read_u32(&bytes[4..8]);
        let format = PixelFormat::from_code(code)
            .ok_or_else(|| malformed(format!("unknown pixel format code {code}")))?;
        let count = LittleEndian::read_u32(&bytes[8..12]);
        if count == 0 || count > MAX_MIPS {
            return Err(malformed(format!("implausible mip count {count}")));
        }

        let mut pos = 12;
        let mut mips = Vec::with_capacity(count as usize);
        for i in 0..count {
            let head = bytes
                .get(pos..pos + 12)
                .ok_or_else(|| malformed(format!("mip {i} header truncated")))?;
            let width = LittleEndian::read_u32(&head[0..4]);
            let height = LittleEndian::read_u32(&head[4..8]);
            let len = LittleEndian::read_u32(&head[8..12]) as usize;
            pos += 12;
            let data = bytes
                .get(pos..pos + len)
                .ok_or_else(|| malformed(format!("mip {i} ({width}x{height}) data truncated")))?;
            pos += len;
            if width == 0 || height == 0 {
                return Err(malformed(format!("mip {i} has zero size")));
            }
            mips.push(MipImage {
                width,
                height,
                data: data.to_vec(),
            });
        }
        if pos != bytes.len() {
            return Err(malformed(format!("{} trailing bytes", bytes.len() - pos)));
        }
        Ok(Self::new(format, mips))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(size: u32) -> MipImage {
        MipImage {
            width: size,
            height: size,
            data: vec![size as u8; (size * size / 2) as usize],
        }
    }

    #[test]
    fn test_largest_first_on_disk() {
        let set = MipSet::new(PixelFormat::Dxt1, vec![image(8), image(16), image(4)]);
        assert_eq!(set.top().unwrap().width, 16);
        let bytes = set.to_bytes();
        assert_eq!(LittleEndian::read_u32(&bytes[12..16]), 16);
        assert_eq!(MipSet::from_bytes(&bytes).unwrap(), set);
    }

    #[test]
    fn test_rejects_damage() {
        let bytes = MipSet::new(PixelFormat::Dxt5, vec![image(8)]).to_bytes();
        assert!(MipSet::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(MipSet::from_bytes(&trailing).is_err());
        let mut unknown = bytes;
        unknown[4] = 99;
        assert!(matches!(
            MipSet::from_bytes(&unknown),
            Err(Error::MalformedMipSet { .. })
        ));
    }
}
