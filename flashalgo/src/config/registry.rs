//! Chip descriptions which are known to the engine.

use std::io::Read;
use std::ops::Range;

use super::target::Target;
use crate::flashing::FlashError;
use flashalgo_target::{ChipFamily, TargetDescriptionSource};

/// Error type for all errors which occur when working with the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The requested chip was not found in the registry.
    #[error("The requested chip '{0}' was not found in the list of known targets.")]
    ChipNotFound(String),
    /// The name of the chip is the beginning of several known chip names.
    #[error("The chip name '{0}' is ambiguous, it matches {1:?}.")]
    AmbiguousChipName(String, Vec<String>),
    /// Two memory regions of a chip overlap.
    #[error("The memory regions {first:#010x?} and {second:#010x?} of {chip} overlap.")]
    OverlappingRegions {
        /// The chip with the invalid memory map.
        chip: String,
        /// The range of the first region.
        first: Range<u64>,
        /// The range of the region which overlaps the first one.
        second: Range<u64>,
    },
    /// A flash region refers to a flash algorithm the family does not have.
    #[error("The flash algorithm '{algorithm}' used by {chip} does not exist.")]
    AlgorithmNotFound {
        /// The chip with the invalid memory map.
        chip: String,
        /// The name of the missing algorithm.
        algorithm: String,
    },
    /// A flash algorithm of the target cannot be used.
    #[error("A flash algorithm of the target is invalid.")]
    InvalidFlashAlgorithm {
        /// The reason why the algorithm was rejected.
        #[source]
        source: FlashError,
    },
    /// The chip family definition is inconsistent.
    #[error("Invalid chip family definition ({0}): {1}")]
    InvalidChipFamilyDefinition(String, String),
    /// Reading or deserializing a YAML target description failed.
    #[error("Deserializing the yaml encountered an error")]
    Yaml(#[from] serde_yaml::Error),
}

/// Registry of all available targets.
#[derive(Debug, Default)]
pub struct Registry {
    /// All the available chips.
    families: Vec<ChipFamily>,
}

impl Registry {
    /// An empty registry, without any known targets.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the target descriptions compiled into the crate.
    #[cfg(feature = "builtin-targets")]
    pub fn from_builtin_families() -> Result<Self, RegistryError> {
        const BUILTIN_TARGETS: &[&str] = &[include_str!("../../targets/Kinetis_KW24D.yaml")];

        let mut families = Vec::with_capacity(BUILTIN_TARGETS.len());
        for yaml in BUILTIN_TARGETS {
            let mut family: ChipFamily = serde_yaml::from_str(yaml)?;
            family.source = TargetDescriptionSource::BuiltIn;
            validate_family(&family)?;
            families.push(family);
        }

        Ok(Self { families })
    }

    /// A registry with the target descriptions compiled into the crate.
    #[cfg(not(feature = "builtin-targets"))]
    pub fn from_builtin_families() -> Result<Self, RegistryError> {
        Ok(Self::new())
    }

    /// All chip families known to the registry.
    pub fn families(&self) -> &[ChipFamily] {
        &self.families
    }

    /// Get a target from the registry by its name.
    ///
    /// The name is matched case insensitively. If no chip has exactly that
    /// name, a unique chip whose name starts with it is used.
    pub fn get_target_by_name(&self, name: impl AsRef<str>) -> Result<Target, RegistryError> {
        let name = name.as_ref();
        tracing::debug!("Searching registry for chip with name {name}");

        let lowercase = name.to_ascii_lowercase();
        let mut partial_matches = Vec::new();

        for family in &self.families {
            for variant in &family.variants {
                let variant_name = variant.name.to_ascii_lowercase();

                if variant_name == lowercase {
                    tracing::debug!("Exact match for chip name: {}", variant.name);
                    return Target::new(family, &variant.name);
                }

                if variant_name.starts_with(&lowercase) {
                    partial_matches.push((family, variant));
                }
            }
        }

        match partial_matches[..] {
            [] => Err(RegistryError::ChipNotFound(name.to_string())),
            [(family, variant)] => {
                tracing::warn!(
                    "Found chip {} which matches given partial name {}. Consider specifying its full name.",
                    variant.name,
                    name,
                );
                Target::new(family, &variant.name)
            }
            _ => Err(RegistryError::AmbiguousChipName(
                name.to_string(),
                partial_matches
                    .iter()
                    .map(|(_, variant)| variant.name.clone())
                    .collect(),
            )),
        }
    }

    /// Adds the chip family read from `yaml_reader` to the registry.
    ///
    /// A family with the same name is replaced. Returns the name of the family.
    pub fn add_target_from_yaml<R>(&mut self, yaml_reader: R) -> Result<String, RegistryError>
    where
        R: Read,
    {
        let mut family: ChipFamily = serde_yaml::from_reader(yaml_reader)?;
        family.source = TargetDescriptionSource::External;
        validate_family(&family)?;

        let family_name = family.name.clone();

        self.families.retain(|old| old.name != family_name);
        self.families.push(family);

        Ok(family_name)
    }
}

fn validate_family(family: &ChipFamily) -> Result<(), RegistryError> {
    family
        .validate()
        .map_err(|reason| RegistryError::InvalidChipFamilyDefinition(family.name.clone(), reason))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    const FAMILY: &str = r#"
name: Test Family
variants:
  - name: TEST1_A
    memory_map:
      - !Nvm
        range:
          start: 0x0
          end: 0x1000
        block_size: 0x400
  - name: TEST1_B
    memory_map:
      - !Nvm
        range:
          start: 0x0
          end: 0x2000
        block_size: 0x400
"#;

    #[test_case("MKW24D512xxx5"; "exact name")]
    #[test_case("mkw24d512XXX5"; "case insensitive")]
    #[test_case("MKW24D"; "unique prefix")]
    fn builtin_target_by_name(name: &str) {
        let registry = Registry::from_builtin_families().unwrap();

        let target = registry.get_target_by_name(name).unwrap();

        assert_eq!(target.name, "MKW24D512xxx5");
        assert_eq!(target.source, TargetDescriptionSource::BuiltIn);
        assert_eq!(target.svd.unwrap().filename, "MKW24D5.svd");
    }

    #[test]
    fn unknown_target() {
        let registry = Registry::from_builtin_families().unwrap();

        assert!(matches!(
            registry.get_target_by_name("nrf51822"),
            Err(RegistryError::ChipNotFound(name)) if name == "nrf51822"
        ));
    }

    #[test]
    fn ambiguous_prefix() {
        let mut registry = Registry::new();
        registry.add_target_from_yaml(FAMILY.as_bytes()).unwrap();

        let error = registry.get_target_by_name("test1").unwrap_err();

        assert!(matches!(error, RegistryError::AmbiguousChipName(_, names) if names.len() == 2));
        assert_eq!(
            registry.get_target_by_name("test1_b").unwrap().source,
            TargetDescriptionSource::External
        );
    }

    #[test]
    fn adding_a_family_replaces_the_old_one() {
        let mut registry = Registry::new();
        registry.add_target_from_yaml(FAMILY.as_bytes()).unwrap();

        let replacement = FAMILY.replace("TEST1_B", "TEST1_C");
        let name = registry
            .add_target_from_yaml(replacement.as_bytes())
            .unwrap();

        assert_eq!(name, "Test Family");
        assert_eq!(registry.families().len(), 1);
        assert!(registry.get_target_by_name("TEST1_C").is_ok());
        assert!(registry.get_target_by_name("TEST1_B").is_err());
    }

    #[test]
    fn invalid_family_is_rejected() {
        let mut registry = Registry::new();
        let invalid = FAMILY.replace("end: 0x2000", "end: 0x2100");

        assert!(matches!(
            registry.add_target_from_yaml(invalid.as_bytes()),
            Err(RegistryError::InvalidChipFamilyDefinition(..))
        ));
        assert!(registry.families().is_empty());
    }
}
