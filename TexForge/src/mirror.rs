//! Master/slave mirror sets
//!
//! On platforms that allow it, several exports in different packages alias the
//! same mip bytes. Two locations of one catalog texture belong to the same set
//! when their top mips resolve to the same offset and one declares the
//! other's package as its base package; the relation is closed transitively.
//!
//! The first member rewritten in a run becomes the master. Every other member
//! copies the master's descriptors instead of writing pixel bytes again.

use std::collections::HashMap;

use crate::catalog::{TextureCatalog, TextureLocation};
use crate::error::{Error, Result};
use crate::texture::{Mipmap, Texture};

/// Identity of one (package, export) location
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberKey {
    /// Normalized package path (lowercase, `/` separated)
    pub package_path: String,
    pub export_index: usize,
}

impl MemberKey {
    #[must_use]
    pub fn new(package_path: &str, export_index: usize) -> Self {
        Self {
            package_path: package_path.replace('\\', "/").to_ascii_lowercase(),
            export_index,
        }
    }

    fn of(location: &TextureLocation) -> Self {
        Self::new(&location.package_path, location.export_index)
    }
}

/// One set of aliasing locations
#[derive(Debug, Clone)]
pub struct MirrorSet {
    pub members: Vec<MemberKey>,
    /// Why the set cannot be trusted, if it cannot
    pub poisoned: Option<String>,
    /// Mip count shared by all members
    pub mip_count: usize,
}

/// Descriptors written by a set's master
#[derive(Debug, Clone)]
pub struct MasterRecord {
    pub master: MemberKey,
    pub cache: Option<(String, [u8; 16])>,
    /// Populated mips the master had before it was rewritten
    pub original_mip_count: usize,
    /// Full mip list, inline bytes included
    pub mipmaps: Vec<Mipmap>,
}

/// What a location has to do when it is rewritten
#[derive(Debug, Clone, Copy)]
pub enum MirrorRole<'a> {
    /// Not part of any set
    Independent,
    /// First member written; must call [`MirrorResolver::record_master`]
    Master(usize),
    /// Copies the master's descriptors
    Slave(&'a MasterRecord),
    /// The set's aliasing assumption does not hold
    Poisoned(&'a str),
}

/// Mirror sets of one install run
#[derive(Debug, Default)]
pub struct MirrorResolver {
    sets: Vec<MirrorSet>,
    membership: HashMap<MemberKey, usize>,
    masters: HashMap<usize, MasterRecord>,
}

/// Disjoint-set forest over location indices
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb.max(ra)] = ra.min(rb);
        }
    }
}

fn is_mirror_pair(a: &TextureLocation, b: &TextureLocation) -> bool {
    let (Some(offset_a), Some(offset_b)) = (a.top_offset, b.top_offset) else {
        return false;
    };
    if offset_a != offset_b {
        return false;
    }
    let declares = |x: &TextureLocation, y: &TextureLocation| {
        x.base_package
            .as_deref()
            .is_some_and(|base| base.eq_ignore_ascii_case(y.package_stem()))
    };
    declares(a, b) || declares(b, a)
}

impl MirrorResolver {
    /// Resolver with no sets, for platforms without mirroring
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Discover sets from the catalog. Empty unless the variant mirrors.
    #[must_use]
    pub fn from_catalog(catalog: &TextureCatalog) -> Self {
        let mut resolver = Self::default();
        if !catalog.variant.policy().mirroring {
            return resolver;
        }

        for texture in &catalog.textures {
            let locations = &texture.locations;
            if locations.len() < 2 {
                continue;
            }
            let mut forest = UnionFind::new(locations.len());
            for i in 0..locations.len() {
                for j in i + 1..locations.len() {
                    if is_mirror_pair(&locations[i], &locations[j]) {
                        forest.union(i, j);
                    }
                }
            }

            let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
            for i in 0..locations.len() {
                groups.entry(forest.find(i)).or_default().push(i);
            }
            let mut groups: Vec<Vec<usize>> = groups
                .into_values()
                .filter(|members| members.len() > 1)
                .collect();
            groups.sort();

            for members in groups {
                let counts: Vec<usize> = members.iter().map(|&i| locations[i].mip_count).collect();
                let mip_count = counts[0];
                let poisoned = counts.iter().any(|&c| c != mip_count).then(|| {
                    format!(
                        "members of '{}' disagree on mip count: {:?}",
                        texture.name, counts
                    )
                });
                if let Some(reason) = &poisoned {
                    tracing::warn!("Mirror set poisoned: {}", reason);
                }

                let set_index = resolver.sets.len();
                let keys: Vec<MemberKey> = members.iter().map(|&i| MemberKey::of(&locations[i])).collect();
                for key in &keys {
                    resolver.membership.insert(key.clone(), set_index);
                }
                resolver.sets.push(MirrorSet {
                    members: keys,
                    poisoned,
                    mip_count,
                });
            }
        }

        tracing::debug!("Discovered {} mirror sets", resolver.sets.len());
        resolver
    }

    pub fn sets(&self) -> &[MirrorSet] {
        &self.sets
    }

    pub fn set_of(&self, key: &MemberKey) -> Option<&MirrorSet> {
        self.membership.get(key).map(|&i| &self.sets[i])
    }

    /// Role of a location in this run
    pub fn role(&self, key: &MemberKey) -> MirrorRole<'_> {
        let Some(&set_index) = self.membership.get(key) else {
            return MirrorRole::Independent;
        };
        let set = &self.sets[set_index];
        if let Some(reason) = &set.poisoned {
            return MirrorRole::Poisoned(reason);
        }
        match self.masters.get(&set_index) {
            Some(record) if record.master != *key => MirrorRole::Slave(record),
            _ => MirrorRole::Master(set_index),
        }
    }

    /// Record the descriptors the master of set `set_index` was given
    pub fn record_master(
        &mut self,
        set_index: usize,
        key: MemberKey,
        original_mip_count: usize,
        texture: &Texture,
    ) {
        let cache = texture.cache_name().zip(texture.cache_guid());
        tracing::debug!(
            "Mirror master for set {}: {} export {}",
            set_index,
            key.package_path,
            key.export_index
        );
        self.masters.insert(
            set_index,
            MasterRecord {
                master: key,
                cache,
                original_mip_count,
                mipmaps: texture.mipmaps().to_vec(),
            },
        );
    }

    /// Point a slave at the master's data.
    ///
    /// External descriptors take the master's offsets and cache, inline ones
    /// take the master's bytes. No pixel data is written.
    pub fn apply_slave(texture: &mut Texture, record: &MasterRecord) -> Result<()> {
        let master_count = record.original_mip_count;
        let slave_count = texture.populated_mip_count();
        if slave_count != master_count {
            return Err(Error::MirrorIntegrity {
                message: format!(
                    "slave export {} has {slave_count} mips, master {} export {} had {master_count}",
                    texture.export_index(),
                    record.master.package_path,
                    record.master.export_index
                ),
            });
        }
        if let Some((name, guid)) = &record.cache {
            texture.set_cache(name, *guid);
        }
        texture.replace_mipmaps(record.mipmaps.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogTexture;
    use crate::texture::StorageKind;
    use crate::texture::tests::texture_properties;
    use crate::variant::GameVariant;

    fn location(path: &str, index: usize, mips: usize, offset: u32, base: Option<&str>) -> TextureLocation {
        TextureLocation {
            package_path: path.to_string(),
            export_index: index,
            mip_count: mips,
            top_offset: Some(offset),
            base_package: base.map(str::to_string),
        }
    }

    fn catalog(variant: GameVariant, locations: Vec<TextureLocation>) -> TextureCatalog {
        TextureCatalog {
            variant,
            textures: vec![CatalogTexture {
                name: "Rock".to_string(),
                crc: 1,
                width: 256,
                height: 256,
                pixel_format: "PF_DXT1".to_string(),
                locations,
            }],
        }
    }

    #[test]
    fn test_sets_close_transitively() {
        let catalog = catalog(
            GameVariant::Classic,
            vec![
                location("Base.pcc", 1, 9, 4096, None),
                location("LevelA.pcc", 7, 9, 4096, Some("Base")),
                location("Sub/LevelB.pcc", 2, 9, 4096, Some("LevelA")),
                location("Other.pcc", 3, 9, 8192, Some("Base")),
            ],
        );
        let resolver = MirrorResolver::from_catalog(&catalog);
        assert_eq!(resolver.sets().len(), 1);
        assert_eq!(resolver.sets()[0].members.len(), 3);
        assert!(matches!(
            resolver.role(&MemberKey::new("Other.pcc", 3)),
            MirrorRole::Independent
        ));
        assert!(matches!(
            resolver.role(&MemberKey::new("sub\\levelb.pcc", 2)),
            MirrorRole::Master(0)
        ));
    }

    #[test]
    fn test_mirroring_disabled_for_other_variants() {
        let catalog = catalog(
            GameVariant::Extended,
            vec![
                location("Base.pcc", 1, 9, 4096, None),
                location("LevelA.pcc", 7, 9, 4096, Some("Base")),
            ],
        );
        assert!(MirrorResolver::from_catalog(&catalog).sets().is_empty());
    }

    #[test]
    fn test_mip_count_disagreement_poisons_every_member() {
        let catalog = catalog(
            GameVariant::Classic,
            vec![
                location("Base.pcc", 1, 9, 4096, None),
                location("LevelA.pcc", 7, 8, 4096, Some("Base")),
            ],
        );
        let resolver = MirrorResolver::from_catalog(&catalog);
        for key in [MemberKey::new("Base.pcc", 1), MemberKey::new("LevelA.pcc", 7)] {
            assert!(matches!(resolver.role(&key), MirrorRole::Poisoned(_)));
        }
    }

    #[test]
    fn test_slave_copies_master_descriptors() {
        let stock = Some(("Textures", [1u8; 16]));
        let external = |size: u32, offset: u32| {
            Mipmap::external(StorageKind::EXTERNAL_LZ4, size, size, size * size / 2, 100, offset)
        };

        let mut master = Texture::new(GameVariant::Classic, texture_properties(64, 64, stock), vec![external(64, 4096)]);
        master.set_cache("TexturesMod", [4u8; 16]);
        let mut resolver = MirrorResolver::disabled();
        resolver.record_master(0, MemberKey::new("Base.pcc", 1), 1, &master);
        let record = resolver.masters[&0].clone();

        let mut slave = Texture::new(GameVariant::Classic, texture_properties(64, 64, stock), vec![external(64, 9000)]);
        MirrorResolver::apply_slave(&mut slave, &record).unwrap();
        assert_eq!(slave.mipmaps(), master.mipmaps());
        assert_eq!(slave.cache_name().as_deref(), Some("TexturesMod"));
        assert_eq!(slave.cache_guid(), Some([4u8; 16]));

        let mut longer = Texture::new(
            GameVariant::Classic,
            texture_properties(64, 64, stock),
            vec![external(32, 100), external(64, 200)],
        );
        let err = MirrorResolver::apply_slave(&mut longer, &record).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IntegrityMismatch);
    }
}
