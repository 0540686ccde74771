use std::sync::Arc;

use super::registry::RegistryError;
use crate::flashing::{FlashAlgorithm, FlashError};
use flashalgo_target::{
    ChipFamily, MemoryRange, MemoryRegion, NvmRegion, SvdFile, TargetDescriptionSource,
};

/// This describes a complete target with a fixed chip model and variant.
#[derive(Debug, Clone)]
pub struct Target {
    /// The name of the target.
    pub name: String,
    /// The memory map of the target, sorted by address.
    pub memory_map: Vec<MemoryRegion>,
    /// The register description of the target, if one is known.
    pub svd: Option<SvdFile>,
    /// Source of the target description. Used for diagnostics.
    pub source: TargetDescriptionSource,
    /// The flash algorithms referenced by the flash regions, assembled once.
    flash_algorithms: Vec<Arc<FlashAlgorithm>>,
}

impl Target {
    /// Create a new target for the given details.
    ///
    /// The memory map is sorted by address and checked for overlaps, and
    /// every algorithm a flash region refers to is assembled and validated.
    pub fn new(family: &ChipFamily, chip_name: &str) -> Result<Target, RegistryError> {
        let chip = family
            .variants
            .iter()
            .find(|chip| chip.name == chip_name)
            .ok_or_else(|| RegistryError::ChipNotFound(chip_name.to_string()))?;

        let mut memory_map = chip.memory_map.clone();
        memory_map.sort_by_key(|region| region.address_range().start);

        for pair in memory_map.windows(2) {
            let (first, second) = (pair[0].address_range(), pair[1].address_range());
            if first.intersects_range(&second) {
                return Err(RegistryError::OverlappingRegions {
                    chip: chip.name.clone(),
                    first,
                    second,
                });
            }
        }

        let mut flash_algorithms: Vec<Arc<FlashAlgorithm>> = Vec::new();
        let referenced = memory_map
            .iter()
            .filter_map(MemoryRegion::as_nvm_region)
            .filter_map(|region| region.algorithm.as_deref());

        for name in referenced {
            if flash_algorithms.iter().any(|algorithm| algorithm.name == name) {
                continue;
            }

            let raw = family
                .get_algorithm(name)
                .ok_or_else(|| RegistryError::AlgorithmNotFound {
                    chip: chip.name.clone(),
                    algorithm: name.to_string(),
                })?;

            let algorithm = FlashAlgorithm::assemble_from_raw(raw)
                .map_err(|source| RegistryError::InvalidFlashAlgorithm { source })?;

            flash_algorithms.push(Arc::new(algorithm));
        }

        Ok(Target {
            name: chip.name.clone(),
            memory_map,
            svd: chip.svd.clone(),
            source: family.source.clone(),
            flash_algorithms,
        })
    }

    /// Returns the memory region which contains `address`.
    pub fn region_for(&self, address: u64) -> Result<&MemoryRegion, FlashError> {
        // The regions are sorted and disjoint, so only the last region starting
        // at or below the address can contain it.
        let index = self
            .memory_map
            .partition_point(|region| region.address_range().start <= address);

        index
            .checked_sub(1)
            .map(|index| &self.memory_map[index])
            .filter(|region| region.contains(address))
            .ok_or(FlashError::AddressNotMapped(address))
    }

    /// Returns the flash algorithm which programs the memory at `address`.
    pub fn algorithm_for(&self, address: u64) -> Result<&Arc<FlashAlgorithm>, FlashError> {
        match self.region_for(address)? {
            MemoryRegion::Nvm(region) => self.algorithm_for_region(region),
            _ => Err(FlashError::NoAlgorithm { address }),
        }
    }

    /// Returns the flash algorithm attached to `region`.
    pub fn algorithm_for_region(
        &self,
        region: &NvmRegion,
    ) -> Result<&Arc<FlashAlgorithm>, FlashError> {
        region
            .algorithm
            .as_deref()
            .and_then(|name| {
                self.flash_algorithms
                    .iter()
                    .find(|algorithm| algorithm.name == name)
            })
            .ok_or(FlashError::NoAlgorithm {
                address: region.range.start,
            })
    }

    /// All flash algorithms used by this target.
    pub fn flash_algorithms(&self) -> &[Arc<FlashAlgorithm>] {
        &self.flash_algorithms
    }

    /// The non-volatile memory regions of the target.
    pub fn nvm_regions(&self) -> impl Iterator<Item = &NvmRegion> {
        self.memory_map.iter().filter_map(MemoryRegion::as_nvm_region)
    }
}
