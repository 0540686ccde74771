use super::chip::Chip;
use super::flash_algorithm::RawFlashAlgorithm;
use crate::memory::{MemoryRange, MemoryRegion};

use serde::{Deserialize, Serialize};

/// Source of a target description.
///
/// This is used for diagnostics, when
/// an error related to a target description occurs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetDescriptionSource {
    /// The target description is a built-in target description,
    /// which was included at compile time.
    BuiltIn,
    /// The target description was from an external source
    /// during runtime.
    External,
}

/// This describes a chip family with all its variants.
///
/// This struct is usually read from a target description
/// file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChipFamily {
    /// This is the name of the chip family in base form.
    /// E.g. `Kinetis KW24D`.
    pub name: String,
    /// The name of the manufacturer, for display purposes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// This vector holds all the variants of the family.
    pub variants: Vec<Chip>,
    /// This vector holds all available algorithms.
    #[serde(default)]
    pub flash_algorithms: Vec<RawFlashAlgorithm>,
    #[serde(skip, default = "default_source")]
    /// Source of the target description, used for diagnostics
    pub source: TargetDescriptionSource,
}

fn default_source() -> TargetDescriptionSource {
    TargetDescriptionSource::External
}

impl ChipFamily {
    /// Validates the [`ChipFamily`] such that the engine can make assumptions about the
    /// correctness without validating thereafter.
    ///
    /// This method should be called right after the [`ChipFamily`] is created!
    pub fn validate(&self) -> Result<(), String> {
        self.reject_duplicate_target_names()?;
        self.ensure_algorithms_exist()?;
        self.validate_memory_regions()?;

        Ok(())
    }

    /// Rejects target descriptions with duplicate target names. Only one of these targets can
    /// be selected, so having multiple is probably a mistake.
    fn reject_duplicate_target_names(&self) -> Result<(), String> {
        use std::collections::HashSet;

        let mut seen = HashSet::new();

        for chip in &self.variants {
            if !seen.insert(&chip.name) {
                return Err(format!(
                    "Target {} appears multiple times in {}",
                    chip.name, self.name,
                ));
            }
        }

        Ok(())
    }

    /// Make sure the algorithms referenced by flash regions actually exist on the family
    /// (this is basically a check for typos).
    fn ensure_algorithms_exist(&self) -> Result<(), String> {
        for variant in &self.variants {
            let referenced = variant
                .memory_map
                .iter()
                .filter_map(MemoryRegion::as_nvm_region)
                .filter_map(|region| region.algorithm.as_ref());

            for algorithm_name in referenced {
                if self.get_algorithm(algorithm_name).is_none() {
                    return Err(format!(
                        "unknown flash algorithm `{}` for variant `{}`",
                        algorithm_name, variant.name
                    ));
                }
            }
        }

        Ok(())
    }

    /// Ensures that regions are well formed and never overlap.
    fn validate_memory_regions(&self) -> Result<(), String> {
        for variant in &self.variants {
            for (index, region) in variant.memory_map.iter().enumerate() {
                let range = region.address_range();
                if range.is_empty() {
                    return Err(format!(
                        "Variant {}, memory region {:#010x?} is empty",
                        variant.name, range
                    ));
                }

                if let MemoryRegion::Nvm(nvm) = region {
                    if nvm.block_size == 0 || nvm.page_size() == 0 {
                        return Err(format!(
                            "Variant {}, flash region {:#010x?} has a zero block or page size",
                            variant.name, range
                        ));
                    }

                    if nvm.block_size % nvm.page_size() != 0 {
                        return Err(format!(
                            "Variant {}, flash region {:#010x?}: block size {:#x} is not a multiple of the page size {:#x}",
                            variant.name, range, nvm.block_size, nvm.page_size()
                        ));
                    }

                    let block_size = nvm.block_size as u64;
                    if range.start % block_size != 0 || range.end % block_size != 0 {
                        return Err(format!(
                            "Variant {}, flash region {:#010x?} is not aligned to its block size {:#x}",
                            variant.name, range, nvm.block_size
                        ));
                    }
                }

                let overlapping = variant.memory_map[index + 1..]
                    .iter()
                    .find(|other| other.address_range().intersects_range(&range));

                if let Some(other) = overlapping {
                    return Err(format!(
                        "Variant {}, memory region {:#010x?} overlaps with {:#010x?}",
                        variant.name,
                        range,
                        other.address_range()
                    ));
                }
            }
        }

        Ok(())
    }
}

impl ChipFamily {
    /// Get the different [Chip]s which are part of this
    /// family.
    pub fn variants(&self) -> &[Chip] {
        &self.variants
    }

    /// Get all flash algorithms for this family of chips.
    pub fn algorithms(&self) -> &[RawFlashAlgorithm] {
        &self.flash_algorithms
    }

    /// Try to find a [RawFlashAlgorithm] with a given name.
    pub fn get_algorithm(&self, name: impl AsRef<str>) -> Option<&RawFlashAlgorithm> {
        let name = name.as_ref();
        self.flash_algorithms.iter().find(|elem| elem.name == name)
    }
}
