//! Tagged property block
//!
//! Properties are decoded with their names resolved to strings so the block
//! can be edited without tracking name indices, and interned back into the
//! package name table when serialized.

use byteorder::{ByteOrder, LittleEndian};
use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::package::NameTable;
use crate::variant::{HeaderLayout, VariantPolicy};

/// Property list terminator
pub const NONE_NAME: &str = "None";

/// A name reference with its instance number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FName {
    pub name: String,
    pub number: i32,
}

impl FName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number: 0,
        }
    }
}

impl std::fmt::Display for FName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.number > 0 {
            write!(f, "{}_{}", self.name, self.number - 1)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Value of a `ByteProperty`
#[derive(Debug, Clone, PartialEq)]
pub enum ByteValue {
    /// Enum value stored as a name
    Name(FName),
    Raw(Vec<u8>),
}

/// Decoded property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i32),
    Float(f32),
    Bool(bool),
    Name(FName),
    Byte {
        /// Enum type name (extended layout only)
        enum_name: Option<FName>,
        value: ByteValue,
    },
    Struct {
        struct_name: FName,
        data: Vec<u8>,
    },
    /// Any other property type, carried verbatim
    Raw(Vec<u8>),
}

/// One tagged property
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: FName,
    pub type_name: FName,
    pub array_index: i32,
    pub value: PropertyValue,
}

impl Property {
    fn type_for(value: &PropertyValue) -> Option<&'static str> {
        Some(match value {
            PropertyValue::Int(_) => "IntProperty",
            PropertyValue::Float(_) => "FloatProperty",
            PropertyValue::Bool(_) => "BoolProperty",
            PropertyValue::Name(_) => "NameProperty",
            PropertyValue::Byte { .. } => "ByteProperty",
            PropertyValue::Struct { .. } => "StructProperty",
            PropertyValue::Raw(_) => return None,
        })
    }
}

/// Ordered property list keyed by (name, array index)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyList {
    entries: IndexMap<(String, i32), Property>,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize, context: &str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(Error::MalformedProperty {
                name: context.to_string(),
                message: format!("needs {len} bytes at {}, block ends at {}", self.pos, self.data.len()),
            }),
        }
    }

    fn i32(&mut self, context: &str) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4, context)?))
    }

    fn fname(&mut self, names: &NameTable, context: &str) -> Result<FName> {
        let index = self.i32(context)?;
        let number = self.i32(context)?;
        Ok(FName {
            name: names.get(index)?.to_string(),
            number,
        })
    }
}

impl PropertyList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a property block from the start of `data`.
    ///
    /// Returns the list and the number of bytes consumed, terminator included.
    pub fn parse(data: &[u8], names: &NameTable, policy: &VariantPolicy) -> Result<(Self, usize)> {
        let mut cursor = Cursor { data, pos: 0 };
        let mut list = Self::new();

        loop {
            let name = cursor.fname(names, "<tag>")?;
            if name.name.eq_ignore_ascii_case(NONE_NAME) {
                break;
            }
            let context = name.name.clone();
            let type_name = cursor.fname(names, &context)?;
            let size = cursor.i32(&context)?;
            let array_index = cursor.i32(&context)?;
            let size = usize::try_from(size).map_err(|_| Error::MalformedProperty {
                name: context.clone(),
                message: format!("negative size {size}"),
            })?;

            let value = match type_name.name.as_str() {
                "IntProperty" => PropertyValue::Int(cursor.i32(&context)?),
                "FloatProperty" => {
                    PropertyValue::Float(LittleEndian::read_f32(cursor.take(4, &context)?))
                }
                "BoolProperty" => {
                    let raw = cursor.take(policy.bool_property_size, &context)?;
                    PropertyValue::Bool(raw.iter().any(|&b| b != 0))
                }
                "NameProperty" => PropertyValue::Name(cursor.fname(names, &context)?),
                "ByteProperty" => {
                    let enum_name = match policy.layout {
                        HeaderLayout::Extended => Some(cursor.fname(names, &context)?),
                        HeaderLayout::Legacy => None,
                    };
                    let value = if size == 8 {
                        ByteValue::Name(cursor.fname(names, &context)?)
                    } else {
                        ByteValue::Raw(cursor.take(size, &context)?.to_vec())
                    };
                    PropertyValue::Byte { enum_name, value }
                }
                "StructProperty" => {
                    let struct_name = cursor.fname(names, &context)?;
                    PropertyValue::Struct {
                        struct_name,
                        data: cursor.take(size, &context)?.to_vec(),
                    }
                }
                _ => PropertyValue::Raw(cursor.take(size, &context)?.to_vec()),
            };

            list.entries.insert(
                (name.name.clone(), array_index),
                Property {
                    name,
                    type_name,
                    array_index,
                    value,
                },
            );
        }

        Ok((list, cursor.pos))
    }

    /// Serialize the block, terminator included, interning names as needed.
    pub fn write_to(
        &self,
        out: &mut Vec<u8>,
        names: &mut NameTable,
        policy: &VariantPolicy,
    ) -> Result<()> {
        let put_i32 = |out: &mut Vec<u8>, v: i32| out.extend_from_slice(&v.to_le_bytes());
        let put_name = |out: &mut Vec<u8>, names: &mut NameTable, name: &FName| {
            let index = names.intern(&name.name, policy.layout);
            out.extend_from_slice(&index.to_le_bytes());
            out.extend_from_slice(&name.number.to_le_bytes());
        };

        for property in self.entries.values() {
            let mut value = Vec::new();
            let mut prefix = Vec::new();
            match &property.value {
                PropertyValue::Int(v) => value.extend_from_slice(&v.to_le_bytes()),
                PropertyValue::Float(v) => value.extend_from_slice(&v.to_le_bytes()),
                PropertyValue::Bool(v) => {
                    prefix.extend_from_slice(&u32::from(*v).to_le_bytes()[..policy.bool_property_size]);
                }
                PropertyValue::Name(name) => put_name(&mut value, names, name),
                PropertyValue::Byte { enum_name, value: byte } => {
                    if policy.layout == HeaderLayout::Extended {
                        let enum_name = enum_name.clone().unwrap_or_else(|| FName::new(NONE_NAME));
                        put_name(&mut prefix, names, &enum_name);
                    }
                    match byte {
                        ByteValue::Name(name) => put_name(&mut value, names, name),
                        ByteValue::Raw(raw) => value.extend_from_slice(raw),
                    }
                }
                PropertyValue::Struct { struct_name, data } => {
                    put_name(&mut prefix, names, struct_name);
                    value.extend_from_slice(data);
                }
                PropertyValue::Raw(raw) => value.extend_from_slice(raw),
            }

            put_name(out, names, &property.name);
            put_name(out, names, &property.type_name);
            put_i32(out, super::mipmap::len_u32(value.len())? as i32);
            put_i32(out, property.array_index);
            out.extend_from_slice(&prefix);
            out.extend_from_slice(&value);
        }
        put_name(out, names, &FName::new(NONE_NAME));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.entries.values()
    }

    /// Property at array index 0
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.entries
            .iter()
            .find(|((key, index), _)| *index == 0 && key.eq_ignore_ascii_case(name))
            .map(|(_, property)| property)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace a property at array index 0, keeping its position
    pub fn set(&mut self, name: &str, value: PropertyValue) {
        let key = self
            .entries
            .keys()
            .find(|(key, index)| *index == 0 && key.eq_ignore_ascii_case(name))
            .cloned()
            .unwrap_or_else(|| (name.to_string(), 0));

        let type_name = match (self.entries.get(&key), Property::type_for(&value)) {
            (_, Some(type_name)) => FName::new(type_name),
            (Some(existing), None) => existing.type_name.clone(),
            (None, None) => FName::new("ArrayProperty"),
        };
        let property = Property {
            name: FName::new(key.0.clone()),
            type_name,
            array_index: 0,
            value,
        };
        self.entries.insert(key, property);
    }

    pub fn remove(&mut self, name: &str) -> Option<Property> {
        let key = self
            .entries
            .keys()
            .find(|(key, index)| *index == 0 && key.eq_ignore_ascii_case(name))
            .cloned()?;
        self.entries.shift_remove(&key)
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        match self.get(name)?.value {
            PropertyValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)?.value {
            PropertyValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Value of a name property, or of a byte property stored as a name
    pub fn get_name(&self, name: &str) -> Option<String> {
        match &self.get(name)?.value {
            PropertyValue::Name(n) => Some(n.to_string()),
            PropertyValue::Byte {
                value: ByteValue::Name(n),
                ..
            } => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn get_struct(&self, name: &str) -> Option<&[u8]> {
        match &self.get(name)?.value {
            PropertyValue::Struct { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn set_int(&mut self, name: &str, value: i32) {
        self.set(name, PropertyValue::Int(value));
    }

    pub fn set_bool(&mut self, name: &str, value: bool) {
        self.set(name, PropertyValue::Bool(value));
    }

    pub fn set_name(&mut self, name: &str, value: &str) {
        self.set(name, PropertyValue::Name(FName::new(value)));
    }

    /// Set a 16-byte `Guid` struct property
    pub fn set_guid(&mut self, name: &str, guid: [u8; 16]) {
        self.set(
            name,
            PropertyValue::Struct {
                struct_name: FName::new("Guid"),
                data: guid.to_vec(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::GameVariant;
    use pretty_assertions::assert_eq;

    fn sample() -> PropertyList {
        let mut list = PropertyList::new();
        list.set_int("SizeX", 256);
        list.set_int("SizeY", 128);
        list.set(
            "Format",
            PropertyValue::Byte {
                enum_name: Some(FName::new("EPixelFormat")),
                value: ByteValue::Name(FName::new("PF_DXT5")),
            },
        );
        list.set_bool("NeverStream", true);
        list.set_name("TextureFileCacheName", "Textures");
        list.set_guid("TFCFileGuid", [3u8; 16]);
        list
    }

    #[test]
    fn test_block_round_trips_for_each_layout() {
        for variant in [GameVariant::Classic, GameVariant::Extended] {
            let policy = variant.policy();
            let list = sample();
            let mut names = NameTable::new();
            let mut out = Vec::new();
            list.write_to(&mut out, &mut names, policy).unwrap();
            out.extend_from_slice(&[0xEE; 4]);

            let (parsed, consumed) = PropertyList::parse(&out, &names, policy).unwrap();
            assert_eq!(consumed, out.len() - 4);
            assert_eq!(parsed.get_int("SizeX"), Some(256));
            assert_eq!(parsed.get_name("Format").as_deref(), Some("PF_DXT5"));
            assert_eq!(parsed.get_bool("NeverStream"), Some(true));
            assert_eq!(parsed.get_struct("TFCFileGuid"), Some(&[3u8; 16][..]));
            assert_eq!(parsed.get_name("texturefilecachename").as_deref(), Some("Textures"));
        }
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut list = sample();
        list.set_int("SizeX", 512);
        let names: Vec<_> = list.iter().map(|p| p.name.name.clone()).collect();
        assert_eq!(names[0], "SizeX");
        assert_eq!(list.get_int("SizeX"), Some(512));
        assert!(list.remove("NeverStream").is_some());
        assert!(!list.contains("NeverStream"));
    }

    #[test]
    fn test_truncated_block_is_malformed() {
        let policy = GameVariant::Extended.policy();
        let list = sample();
        let mut names = NameTable::new();
        let mut out = Vec::new();
        list.write_to(&mut out, &mut names, policy).unwrap();
        let err = PropertyList::parse(&out[..out.len() - 12], &names, policy).unwrap_err();
        assert!(matches!(err, Error::MalformedProperty { .. }));
    }
}
