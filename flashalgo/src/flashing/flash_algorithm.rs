use std::{fmt, ops::Range};

use super::{analyzer::ANALYZER_SIZE, FlashError};
use flashalgo_target::{AlgorithmTimeouts, MemoryRange, RawFlashAlgorithm};

/// The routines a flash algorithm image exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// `Init(address, clock, function)`
    Init,
    /// `UnInit(function)`
    UnInit,
    /// `EraseSector(address)`
    EraseSector,
    /// `EraseChip()`
    EraseAll,
    /// `ProgramPage(address, size, buffer)`
    ProgramPage,
    /// The CRC analyzer, `analyzer(commands, count)`.
    Analyzer,
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryPoint::Init => "Init",
            EntryPoint::UnInit => "UnInit",
            EntryPoint::EraseSector => "EraseSector",
            EntryPoint::EraseAll => "EraseAll",
            EntryPoint::ProgramPage => "ProgramPage",
            EntryPoint::Analyzer => "Analyzer",
        };
        f.write_str(name)
    }
}

/// A flash algorithm, which has been assembled for a specific
/// chip.
///
/// To create a [FlashAlgorithm], call the [`assemble_from_raw`] function.
/// Assembled algorithms are immutable and shared between all users of a target.
///
/// [`assemble_from_raw`]: FlashAlgorithm::assemble_from_raw
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlashAlgorithm {
    /// The name of the flash algorithm.
    pub name: String,
    /// Whether this flash algorithm is the default one or not.
    pub default: bool,
    /// Memory address where the flash algo instructions will be loaded to.
    pub load_address: u64,
    /// List of 32-bit words containing the position-independent code for the algo.
    pub instructions: Vec<u32>,
    /// Address of the `Init()` entry point. Optional.
    pub pc_init: Option<u64>,
    /// Address of the `UnInit()` entry point. Optional.
    pub pc_uninit: Option<u64>,
    /// Address of the `ProgramPage()` entry point.
    pub pc_program_page: u64,
    /// Address of the `EraseSector()` entry point.
    pub pc_erase_sector: u64,
    /// Address of the `EraseAll()` entry point. Optional.
    pub pc_erase_all: Option<u64>,
    /// Initial value of the R9 register for calling flash algo entry points, which
    /// determines where the position-independent data resides.
    pub static_base: u64,
    /// Initial value of the stack pointer when calling any flash algo API.
    pub begin_stack: u64,
    /// Start of the data area in RAM.
    pub begin_data: u64,
    /// A list of base addresses for page buffers. If 2 buffers are included in
    /// the list, then double buffered programming will be enabled.
    pub page_buffers: Vec<u64>,
    /// The smallest amount of bytes `ProgramPage()` accepts.
    pub min_program_length: Option<u32>,
    /// Where the CRC analyzer is placed, if the algorithm supports it.
    pub analyzer_address: Option<u64>,
    /// Execution watchdogs of the entry points.
    pub timeouts: AlgorithmTimeouts,
}

impl FlashAlgorithm {
    /// Constructs a flash algorithm from its description and checks that the
    /// described RAM layout is usable.
    pub fn assemble_from_raw(raw: &RawFlashAlgorithm) -> Result<Self, FlashError> {
        let assembled_instructions = raw.instructions.chunks_exact(4);

        let remainder = assembled_instructions.remainder();
        let last_elem = if !remainder.is_empty() {
            // Pad with up to three bytes
            let mut bytes = [0u8; 4];
            bytes[..remainder.len()].copy_from_slice(remainder);
            Some(u32::from_le_bytes(bytes))
        } else {
            None
        };

        let instructions: Vec<u32> = assembled_instructions
            .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .chain(last_elem)
            .collect();

        let algorithm = FlashAlgorithm {
            name: raw.name.clone(),
            default: raw.default,
            load_address: raw.load_address,
            instructions,
            pc_init: raw.pc_init,
            pc_uninit: raw.pc_uninit,
            pc_program_page: raw.pc_program_page,
            pc_erase_sector: raw.pc_erase_sector,
            pc_erase_all: raw.pc_erase_all,
            static_base: raw.static_base,
            begin_stack: raw.begin_stack,
            begin_data: raw.begin_data,
            page_buffers: raw.page_buffers.clone(),
            min_program_length: raw.min_program_length,
            analyzer_address: raw.analyzer_address,
            timeouts: raw.timeouts,
        };

        algorithm.validate()?;

        Ok(algorithm)
    }

    /// The RAM occupied by the instruction image.
    pub fn image_range(&self) -> Range<u64> {
        self.load_address..self.load_address + self.instructions.len() as u64 * 4
    }

    /// The RAM occupied by the analyzer and its lookup table.
    pub fn analyzer_range(&self) -> Option<Range<u64>> {
        self.analyzer_address
            .map(|address| address..address + ANALYZER_SIZE)
    }

    /// Whether pages can be transferred while the previous one is programmed.
    pub fn double_buffering_supported(&self) -> bool {
        self.page_buffers.len() > 1
    }

    /// The address of an entry point, `None` if the algorithm does not implement it.
    pub fn entry_point(&self, entry_point: EntryPoint) -> Option<u64> {
        match entry_point {
            EntryPoint::Init => self.pc_init,
            EntryPoint::UnInit => self.pc_uninit,
            EntryPoint::EraseSector => Some(self.pc_erase_sector),
            EntryPoint::EraseAll => self.pc_erase_all,
            EntryPoint::ProgramPage => Some(self.pc_program_page),
            EntryPoint::Analyzer => self.analyzer_address,
        }
    }

    /// Checks that pages of `page_size` bytes can be programmed with this algorithm.
    pub fn check_page_size(&self, page_size: u32) -> Result<(), FlashError> {
        let min_program_length = self.min_program_length.unwrap_or(page_size);

        if min_program_length == 0 || page_size % min_program_length != 0 {
            return Err(self.invalid(format!(
                "the page size {page_size:#x} is not a multiple of the minimum program length {min_program_length:#x}"
            )));
        }

        let image = self.image_range();
        for (index, &buffer) in self.page_buffers.iter().enumerate() {
            let range = buffer..buffer + page_size as u64;

            if range.intersects_range(&image) {
                return Err(self.invalid(format!(
                    "page buffer {index} at {buffer:#010x} overlaps the algorithm image"
                )));
            }

            if let Some(analyzer) = self.analyzer_range() {
                if range.intersects_range(&analyzer) {
                    return Err(self.invalid(format!(
                        "page buffer {index} at {buffer:#010x} overlaps the analyzer"
                    )));
                }
            }
        }

        if let [first, second] = self.page_buffers[..] {
            if first.abs_diff(second) < page_size as u64 {
                return Err(self.invalid(format!(
                    "the page buffers {first:#010x} and {second:#010x} are closer than one page ({page_size:#x})"
                )));
            }
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), FlashError> {
        if self.instructions.is_empty() {
            return Err(self.invalid("the instruction image is empty".to_string()));
        }

        if !(self.load_address <= self.static_base && self.static_base <= self.begin_stack) {
            return Err(self.invalid(format!(
                "expected load address <= static base <= stack top, got {:#010x}, {:#010x}, {:#010x}",
                self.load_address, self.static_base, self.begin_stack
            )));
        }

        let image = self.image_range();
        let entry_points = [
            (EntryPoint::Init, self.pc_init),
            (EntryPoint::UnInit, self.pc_uninit),
            (EntryPoint::EraseSector, Some(self.pc_erase_sector)),
            (EntryPoint::EraseAll, self.pc_erase_all),
            (EntryPoint::ProgramPage, Some(self.pc_program_page)),
        ];
        for (entry_point, address) in entry_points {
            if let Some(address) = address {
                // The thumb bit is set on Cortex-M entry points.
                if !image.contains(&(address & !1)) {
                    return Err(self.invalid(format!(
                        "{entry_point} at {address:#010x} lies outside of the image {:#010x}..{:#010x}",
                        image.start, image.end
                    )));
                }
            }
        }

        match self.page_buffers.len() {
            1 | 2 => {}
            count => {
                return Err(self.invalid(format!(
                    "expected one or two page buffers, got {count}"
                )))
            }
        }

        for (index, &buffer) in self.page_buffers.iter().enumerate() {
            if buffer < self.begin_data {
                return Err(self.invalid(format!(
                    "page buffer {index} at {buffer:#010x} lies below the data area at {:#010x}",
                    self.begin_data
                )));
            }

            if image.contains(&buffer) {
                return Err(self.invalid(format!(
                    "page buffer {index} at {buffer:#010x} lies inside the algorithm image"
                )));
            }
        }

        if let Some(analyzer) = self.analyzer_range() {
            if analyzer.intersects_range(&image) {
                return Err(self.invalid(format!(
                    "the analyzer at {:#010x} overlaps the algorithm image",
                    analyzer.start
                )));
            }
        }

        Ok(())
    }

    fn invalid(&self, reason: String) -> FlashError {
        FlashError::InvalidFlashAlgorithm {
            name: self.name.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw() -> RawFlashAlgorithm {
        RawFlashAlgorithm {
            name: "test".into(),
            load_address: 0x2000_0000,
            // 0x100 bytes of code
            instructions: vec![0; 0x100],
            pc_init: Some(0x2000_0021),
            pc_uninit: Some(0x2000_0071),
            pc_program_page: 0x2000_00e1,
            pc_erase_sector: 0x2000_00b5,
            pc_erase_all: None,
            static_base: 0x2000_00f0,
            begin_stack: 0x2000_0800,
            begin_data: 0x2000_0a00,
            page_buffers: vec![0x2000_0a00, 0x2000_1200],
            min_program_length: Some(4),
            analyzer_address: Some(0x1fff_f800),
            ..Default::default()
        }
    }

    fn reason(error: FlashError) -> String {
        match error {
            FlashError::InvalidFlashAlgorithm { reason, .. } => reason,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn assemble_pads_the_last_word() {
        let mut raw = raw();
        raw.instructions = vec![0x00, 0xbe, 0x0a, 0xe0, 0x0d, 0x78];

        let algorithm = FlashAlgorithm::assemble_from_raw(&RawFlashAlgorithm {
            pc_init: None,
            pc_uninit: None,
            pc_program_page: 0x2000_0001,
            pc_erase_sector: 0x2000_0005,
            static_base: 0x2000_0008,
            ..raw
        })
        .unwrap();

        assert_eq!(algorithm.instructions, vec![0xe00a_be00, 0x0000_780d]);
        assert_eq!(algorithm.image_range(), 0x2000_0000..0x2000_0008);
    }

    #[test]
    fn assemble_valid_layout() {
        let algorithm = FlashAlgorithm::assemble_from_raw(&raw()).unwrap();

        assert!(algorithm.double_buffering_supported());
        assert_eq!(algorithm.entry_point(EntryPoint::EraseAll), None);
        assert_eq!(
            algorithm.entry_point(EntryPoint::ProgramPage),
            Some(0x2000_00e1)
        );
        algorithm.check_page_size(0x800).unwrap();
    }

    #[test]
    fn static_base_below_load_address() {
        let raw = RawFlashAlgorithm {
            static_base: 0x1fff_0000,
            ..raw()
        };

        let error = FlashAlgorithm::assemble_from_raw(&raw).unwrap_err();

        assert!(reason(error).contains("static base"));
    }

    #[test]
    fn three_page_buffers_are_rejected() {
        let raw = RawFlashAlgorithm {
            page_buffers: vec![0x2000_0a00, 0x2000_1200, 0x2000_1a00],
            ..raw()
        };

        let error = FlashAlgorithm::assemble_from_raw(&raw).unwrap_err();

        assert_eq!(reason(error), "expected one or two page buffers, got 3");
    }

    #[test]
    fn no_page_buffers_are_rejected() {
        let raw = RawFlashAlgorithm {
            page_buffers: vec![],
            ..raw()
        };

        assert!(FlashAlgorithm::assemble_from_raw(&raw).is_err());
    }

    #[test]
    fn page_buffer_below_data() {
        let raw = RawFlashAlgorithm {
            page_buffers: vec![0x2000_0900],
            ..raw()
        };

        let error = FlashAlgorithm::assemble_from_raw(&raw).unwrap_err();

        assert!(reason(error).contains("below the data area"));
    }

    #[test]
    fn entry_point_outside_of_image() {
        let raw = RawFlashAlgorithm {
            pc_erase_sector: 0x2000_0401,
            ..raw()
        };

        let error = FlashAlgorithm::assemble_from_raw(&raw).unwrap_err();

        assert!(reason(error).starts_with("EraseSector at 0x20000401"));
    }

    #[test]
    fn page_buffers_closer_than_a_page() {
        let algorithm = FlashAlgorithm::assemble_from_raw(&raw()).unwrap();

        let error = algorithm.check_page_size(0x1000).unwrap_err();

        assert!(reason(error).contains("closer than one page"));
    }

    #[test]
    fn page_size_not_a_multiple_of_min_program_length() {
        let raw = RawFlashAlgorithm {
            min_program_length: Some(0x300),
            ..raw()
        };
        let algorithm = FlashAlgorithm::assemble_from_raw(&raw).unwrap();

        assert!(algorithm.check_page_size(0x800).is_err());
        algorithm.check_page_size(0x600).unwrap();
    }
}
