use crate::serialize::{hex_option, hex_range, hex_u_int};
use serde::{Deserialize, Serialize};
use std::ops::Range;

fn default_erased_byte_value() -> u8 {
    0xff
}

/// Represents a region in non-volatile memory (e.g. flash or EEPROM).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NvmRegion {
    /// A name to describe the region
    #[serde(default)]
    pub name: Option<String>,
    /// Address range of the region
    #[serde(serialize_with = "hex_range")]
    pub range: Range<u64>,
    /// Size of the smallest erasable unit of the region.
    #[serde(serialize_with = "hex_u_int")]
    pub block_size: u32,
    /// Size of a single program operation.
    ///
    /// Defaults to the block size when not given.
    #[serde(default, serialize_with = "hex_option")]
    pub page_size: Option<u32>,
    /// The value of a byte in flash that was just erased.
    #[serde(
        default = "default_erased_byte_value",
        serialize_with = "hex_u_int"
    )]
    pub erased_byte_value: u8,
    /// True if the chip boots from this memory.
    #[serde(default)]
    pub is_boot_memory: bool,
    /// Name of the flash algorithm which programs this region.
    ///
    /// The name refers to an entry of [`ChipFamily::flash_algorithms`].
    ///
    /// [`ChipFamily::flash_algorithms`]: crate::ChipFamily::flash_algorithms
    #[serde(default)]
    pub algorithm: Option<String>,
}

impl NvmRegion {
    /// Returns the size of a page, which is the unit handed to a single `ProgramPage()` call.
    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(self.block_size)
    }

    /// Returns the sector which contains `address`, if the address belongs to this region.
    pub fn sector_info(&self, address: u64) -> Option<SectorInfo> {
        if !self.range.contains(&address) {
            return None;
        }

        let size = self.block_size as u64;
        let index = (address - self.range.start) / size;

        Some(SectorInfo {
            base_address: self.range.start + index * size,
            size,
        })
    }

    /// Returns the page which contains `address`, if the address belongs to this region.
    pub fn page_info(&self, address: u64) -> Option<PageInfo> {
        if !self.range.contains(&address) {
            return None;
        }

        let size = self.page_size();
        let offset = (address - self.range.start) % size as u64;

        Some(PageInfo {
            base_address: address - offset,
            size,
        })
    }

    /// Iterate over all sectors which intersect `range`, in ascending address order.
    ///
    /// Parts of `range` outside of the region are ignored.
    pub fn sectors_in(&self, range: Range<u64>) -> impl Iterator<Item = SectorInfo> + '_ {
        let start = range.start.max(self.range.start);
        let end = range.end.min(self.range.end);
        let mut next = if start < end {
            self.sector_info(start)
        } else {
            None
        };

        std::iter::from_fn(move || {
            let sector = next?;
            let following = sector.base_address + sector.size;
            next = if following < end {
                self.sector_info(following)
            } else {
                None
            };
            Some(sector)
        })
    }
}

/// Represents a region in RAM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RamRegion {
    /// A name to describe the region
    #[serde(default)]
    pub name: Option<String>,
    /// Address range of the region
    #[serde(serialize_with = "hex_range")]
    pub range: Range<u64>,
    /// True if the chip boots from this memory.
    #[serde(default)]
    pub is_boot_memory: bool,
}

/// Represents a region in read-only memory, such as a boot ROM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RomRegion {
    /// A name to describe the region
    #[serde(default)]
    pub name: Option<String>,
    /// Address range of the region
    #[serde(serialize_with = "hex_range")]
    pub range: Range<u64>,
    /// True if the chip boots from this memory.
    #[serde(default)]
    pub is_boot_memory: bool,
}

/// Represents a generic region, e.g. memory mapped peripherals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenericRegion {
    /// A name to describe the region
    #[serde(default)]
    pub name: Option<String>,
    /// Address range of the region
    #[serde(serialize_with = "hex_range")]
    pub range: Range<u64>,
}

/// Holds information about a specific, individual flash
/// sector.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SectorInfo {
    /// Base address of the flash sector
    pub base_address: u64,
    /// Size of the flash sector
    pub size: u64,
}

impl SectorInfo {
    /// Returns the address range of the sector.
    pub fn address_range(&self) -> Range<u64> {
        self.base_address..self.base_address + self.size
    }
}

/// Holds information about a page in flash.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageInfo {
    /// Base address of the page in flash.
    pub base_address: u64,
    /// Size of the page
    pub size: u32,
}

impl PageInfo {
    /// Returns the address range of the page.
    pub fn address_range(&self) -> Range<u64> {
        self.base_address..self.base_address + self.size as u64
    }
}

/// Enables the user to do range intersection testing.
pub trait MemoryRange {
    /// Returns true if `self` contains `range` fully.
    fn contains_range(&self, range: &Range<u64>) -> bool;

    /// Returns true if `self` intersects `range` partially.
    fn intersects_range(&self, range: &Range<u64>) -> bool;
}

impl MemoryRange for Range<u64> {
    fn contains_range(&self, range: &Range<u64>) -> bool {
        if range.is_empty() {
            false
        } else {
            self.contains(&range.start) && self.contains(&(range.end - 1))
        }
    }

    fn intersects_range(&self, range: &Range<u64>) -> bool {
        !range.is_empty() && !self.is_empty() && self.start < range.end && range.start < self.end
    }
}

/// The kind of memory a [`MemoryRegion`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Flash, EEPROM or other non-volatile memory which needs a flash algorithm.
    Flash,
    /// RAM.
    Ram,
    /// Read-only memory.
    Rom,
    /// Anything else, e.g. peripherals.
    Device,
}

/// Declares the type of a memory region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryRegion {
    /// Memory region describing RAM.
    Ram(RamRegion),
    /// Memory region describing read-only memory.
    Rom(RomRegion),
    /// Generic memory region, which is neither
    /// flash, RAM nor ROM.
    #[serde(alias = "Device")]
    Generic(GenericRegion),
    /// Memory region describing flash, EEPROM or other non-volatile memory.
    #[serde(alias = "Flash")]
    Nvm(NvmRegion),
}

impl MemoryRegion {
    /// Returns the RAM region if this is a RAM region, otherwise None.
    pub fn as_ram_region(&self) -> Option<&RamRegion> {
        match self {
            MemoryRegion::Ram(region) => Some(region),
            _ => None,
        }
    }

    /// Returns the NVM region if this is a NVM region, otherwise None.
    pub fn as_nvm_region(&self) -> Option<&NvmRegion> {
        match self {
            MemoryRegion::Nvm(region) => Some(region),
            _ => None,
        }
    }

    /// Returns the address range of the memory region.
    pub fn address_range(&self) -> Range<u64> {
        match self {
            MemoryRegion::Ram(region) => region.range.clone(),
            MemoryRegion::Rom(region) => region.range.clone(),
            MemoryRegion::Generic(region) => region.range.clone(),
            MemoryRegion::Nvm(region) => region.range.clone(),
        }
    }

    /// Returns whether the memory region contains the given address.
    pub fn contains(&self, address: u64) -> bool {
        self.address_range().contains(&address)
    }

    /// Returns the name of the region, if one was given.
    pub fn name(&self) -> Option<&str> {
        match self {
            MemoryRegion::Ram(region) => region.name.as_deref(),
            MemoryRegion::Rom(region) => region.name.as_deref(),
            MemoryRegion::Generic(region) => region.name.as_deref(),
            MemoryRegion::Nvm(region) => region.name.as_deref(),
        }
    }

    /// Returns the kind of memory backing this region.
    pub fn kind(&self) -> MemoryKind {
        match self {
            MemoryRegion::Ram(_) => MemoryKind::Ram,
            MemoryRegion::Rom(_) => MemoryKind::Rom,
            MemoryRegion::Generic(_) => MemoryKind::Device,
            MemoryRegion::Nvm(_) => MemoryKind::Flash,
        }
    }

    /// Returns whether the chip boots from this region.
    pub fn is_boot_memory(&self) -> bool {
        match self {
            MemoryRegion::Ram(region) => region.is_boot_memory,
            MemoryRegion::Rom(region) => region.is_boot_memory,
            MemoryRegion::Generic(_) => false,
            MemoryRegion::Nvm(region) => region.is_boot_memory,
        }
    }

    /// Returns `true` if the memory region is [`Ram`].
    ///
    /// [`Ram`]: MemoryRegion::Ram
    #[must_use]
    pub fn is_ram(&self) -> bool {
        matches!(self, Self::Ram(..))
    }

    /// Returns `true` if the memory region is [`Nvm`].
    ///
    /// [`Nvm`]: MemoryRegion::Nvm
    #[must_use]
    pub fn is_nvm(&self) -> bool {
        matches!(self, Self::Nvm(..))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn flash() -> NvmRegion {
        NvmRegion {
            name: Some("flash".into()),
            range: 0x0..0x8_0000,
            block_size: 0x800,
            page_size: None,
            erased_byte_value: 0xff,
            is_boot_memory: true,
            algorithm: Some("kinetis".into()),
        }
    }

    #[test]
    fn contains_range() {
        assert!((0..1).contains_range(&(0..1)));
        assert!(!(0..1).contains_range(&(0..2)));
        assert!((0..4).contains_range(&(0..1)));
        assert!(!(4..8).contains_range(&(3..9)));
        assert!((4..8).contains_range(&(6..8)));
        assert!(!(4..8).contains_range(&(6..6)));
    }

    #[test]
    fn intersects_range() {
        assert!((0..1).intersects_range(&(0..2)));
        assert!((4..8).intersects_range(&(3..9)));
        assert!((4..8).intersects_range(&(6..8)));
        assert!(!(4..8).intersects_range(&(0..1)));
        assert!(!(4..8).intersects_range(&(3..4)));
        assert!(!(8..9).intersects_range(&(6..8)));
    }

    #[test]
    fn sector_info_is_block_aligned() {
        let region = flash();

        assert_eq!(
            region.sector_info(0x1234),
            Some(SectorInfo {
                base_address: 0x1000,
                size: 0x800
            })
        );
        assert_eq!(region.sector_info(0x8_0000), None);
    }

    #[test]
    fn page_size_defaults_to_block_size() {
        let mut region = flash();
        assert_eq!(region.page_size(), 0x800);
        assert_eq!(
            region.page_info(0x1801).map(|p| p.address_range()),
            Some(0x1800..0x2000)
        );

        region.page_size = Some(0x100);
        assert_eq!(
            region.page_info(0x1801).map(|p| p.address_range()),
            Some(0x1800..0x1900)
        );
    }

    #[test]
    fn sectors_in_covers_every_intersecting_block() {
        let region = flash();

        let sectors: Vec<u64> = region
            .sectors_in(0x1000..0x1800)
            .map(|s| s.base_address)
            .collect();
        assert_eq!(sectors, vec![0x1000]);

        let sectors: Vec<u64> = region
            .sectors_in(0x17ff..0x1801)
            .map(|s| s.base_address)
            .collect();
        assert_eq!(sectors, vec![0x1000, 0x1800]);

        assert_eq!(region.sectors_in(0x1000..0x1000).count(), 0);
        assert_eq!(region.sectors_in(0x7_f800..0x9_0000).count(), 1);
    }

    #[test]
    fn parse_flash_alias() {
        let yaml = r#"
- !Flash
  range:
    start: 0x0
    end: 0x80000
  block_size: 0x800
  is_boot_memory: true
  algorithm: kinetis
- !Ram
  range:
    start: 0x1fff8000
    end: 0x20008000
"#;

        let regions: Vec<MemoryRegion> = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(regions[0], MemoryRegion::Nvm(NvmRegion { name: None, ..flash() }));
        assert_eq!(regions[1].kind(), MemoryKind::Ram);
        assert!(!regions[1].is_boot_memory());
    }
}
