use super::memory::MemoryRegion;
use serde::{Deserialize, Serialize};

/// A single chip variant.
///
/// This describes an exact chip variant, including its memory map and the
/// flash algorithms attached to the flash regions of that map. For example,
/// the Kinetis KW24D family has the `MKW24D512xxx5` variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Chip {
    /// This is the name of the chip variant. It is the identifier
    /// used to select a target, e.g. `MKW24D512xxx5`.
    pub name: String,
    /// The memory regions available on the chip.
    pub memory_map: Vec<MemoryRegion>,
    /// The register description file of the chip, if one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svd: Option<SvdFile>,
}

/// Reference to a CMSIS-SVD register description of a chip.
///
/// The file itself is not loaded here, only the location is recorded so
/// tooling can find it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SvdFile {
    /// The vendor directory the file is stored in, e.g. `Freescale`.
    pub vendor: String,
    /// The file name, e.g. `MKW24D5.svd`.
    pub filename: String,
}
