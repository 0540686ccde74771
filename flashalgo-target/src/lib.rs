//! Target description schema
//!
//! Programming the flash of a chip through a debug probe needs some chip
//! specific configuration: the memory map of the chip, and for every flash
//! region a small *flash algorithm* which is downloaded into RAM and does the
//! actual erasing and programming from inside the target.
//!
//! This crate contains the schema structs for the YAML target description files.
//! The instruction bytes of a flash algorithm are opaque here; only the
//! addresses needed to load and call it are interpreted.
#![warn(missing_docs)]

mod chip;
mod chip_family;
mod flash_algorithm;
mod memory;
pub(crate) mod serialize;

pub use chip::{Chip, SvdFile};
pub use chip_family::{ChipFamily, TargetDescriptionSource};
pub use flash_algorithm::{AlgorithmTimeouts, RawFlashAlgorithm};
pub use memory::{
    GenericRegion, MemoryKind, MemoryRange, MemoryRegion, NvmRegion, PageInfo, RamRegion,
    RomRegion, SectorInfo,
};
