use std::fmt::{Debug, Formatter};
use std::ops::Range;

use super::{FillPolicy, FlashError};
use flashalgo_target::{MemoryRange, NvmRegion, SectorInfo};

/// The description of a page in flash.
#[derive(Clone, PartialEq, Eq)]
pub struct FlashPage {
    address: u64,
    data: Vec<u8>,
}

impl Debug for FlashPage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashPage")
            .field("address", &format_args!("{:#010x}", self.address))
            .field("size", &format_args!("{:#x}", self.size()))
            .finish()
    }
}

impl FlashPage {
    /// Returns the start address of the page.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the size of the page in bytes.
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Returns the data slice of the page.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the mut data slice of the page.
    pub(super) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// A part of a page which is not covered by the data and has to be read
/// back from flash before the page is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashFill {
    address: u64,
    size: u64,
    page_index: usize,
}

impl FlashFill {
    /// Returns the start address of the fill.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the size of the fill in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the index of the page the fill belongs to.
    pub fn page_index(&self) -> usize {
        self.page_index
    }
}

/// The sectors to erase and the pages to program for a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashLayout {
    sectors: Vec<SectorInfo>,
    pages: Vec<FlashPage>,
    fills: Vec<FlashFill>,
}

impl FlashLayout {
    /// Splits `data`, which is to be written at `address`, into pages of `region`.
    ///
    /// With `erase` set, the layout also lists every sector touched by the
    /// data, and the pages cover those sectors completely so that nothing is
    /// lost when restoring unwritten bytes. Pages without data are left out
    /// unless their contents are restored.
    pub(super) fn new(
        region: &NvmRegion,
        address: u64,
        data: &[u8],
        fill: FillPolicy,
        erase: bool,
    ) -> Result<Self, FlashError> {
        if data.is_empty() {
            return Ok(Self::default());
        }

        let end = address.checked_add(data.len() as u64);
        let data_range = match end {
            Some(end) if region.range.contains_range(&(address..end)) => address..end,
            _ => {
                return Err(FlashError::AddressNotInRegion {
                    start: address,
                    end: end.unwrap_or(u64::MAX),
                    region: region.clone(),
                })
            }
        };

        let restore = fill == FillPolicy::Restore;
        let fill_value = fill.byte(region.erased_byte_value);
        let page_size = region.page_size() as u64;

        let sectors: Vec<SectorInfo> = if erase {
            region.sectors_in(data_range.clone()).collect()
        } else {
            vec![]
        };

        let extent = match (sectors.first(), sectors.last()) {
            (Some(first), Some(last)) => first.base_address..last.base_address + last.size,
            _ => {
                let start = region.range.start
                    + (data_range.start - region.range.start) / page_size * page_size;
                let end = region.range.start
                    + (data_range.end - region.range.start).div_ceil(page_size) * page_size;
                start..end
            }
        };

        let mut pages = Vec::new();
        let mut fills = Vec::new();

        for page_address in extent.step_by(page_size as usize) {
            let page_range = page_address..page_address + page_size;
            let covered =
                page_range.start.max(data_range.start)..page_range.end.min(data_range.end);

            if covered.is_empty() && !restore {
                continue;
            }

            let mut page = FlashPage {
                address: page_address,
                data: vec![fill_value; page_size as usize],
            };

            if !covered.is_empty() {
                let source = offset(&data_range, &covered);
                let target = offset(&page_range, &covered);
                page.data[target].copy_from_slice(&data[source]);
            }

            if restore {
                let page_index = pages.len();
                let gaps = if covered.is_empty() {
                    [page_range.clone(), page_range.end..page_range.end]
                } else {
                    [
                        page_range.start..covered.start,
                        covered.end..page_range.end,
                    ]
                };

                fills.extend(
                    gaps.into_iter()
                        .filter(|gap| !gap.is_empty())
                        .map(|gap| FlashFill {
                            address: gap.start,
                            size: gap.end - gap.start,
                            page_index,
                        }),
                );
            }

            pages.push(page);
        }

        Ok(Self {
            sectors,
            pages,
            fills,
        })
    }

    /// Get all sectors of the flash layout.
    pub fn sectors(&self) -> &[SectorInfo] {
        &self.sectors
    }

    /// Get all pages of the flash layout.
    pub fn pages(&self) -> &[FlashPage] {
        &self.pages
    }

    /// Get all pages of the flash layout mutably.
    pub(super) fn pages_mut(&mut self) -> &mut [FlashPage] {
        &mut self.pages
    }

    /// Get all fills of the flash layout.
    pub fn fills(&self) -> &[FlashFill] {
        &self.fills
    }
}

/// The position of `inner` relative to the start of `outer`, as a slice index.
fn offset(outer: &Range<u64>, inner: &Range<u64>) -> Range<usize> {
    (inner.start - outer.start) as usize..(inner.end - outer.start) as usize
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn region() -> NvmRegion {
        NvmRegion {
            name: Some("Flash".into()),
            range: 0x0..0x1_0000,
            block_size: 0x1000,
            page_size: Some(0x400),
            erased_byte_value: 0xff,
            is_boot_memory: true,
            algorithm: None,
        }
    }

    fn addresses(layout: &FlashLayout) -> Vec<u64> {
        layout.pages().iter().map(FlashPage::address).collect()
    }

    #[test]
    fn pages_cover_the_data() {
        let data = vec![0xaa; 0x500];

        let layout = FlashLayout::new(&region(), 0x1200, &data, FillPolicy::Erased, false).unwrap();

        assert_eq!(addresses(&layout), vec![0x1000, 0x1400]);
        assert!(layout.sectors().is_empty());
        assert!(layout.fills().is_empty());

        let first = &layout.pages()[0];
        assert_eq!(first.size(), 0x400);
        assert!(first.data()[..0x200].iter().all(|&b| b == 0xff));
        assert!(first.data()[0x200..].iter().all(|&b| b == 0xaa));

        let second = &layout.pages()[1];
        assert!(second.data()[..0x300].iter().all(|&b| b == 0xaa));
        assert!(second.data()[0x300..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn fill_with_value() {
        let layout =
            FlashLayout::new(&region(), 0x2002, &[1, 2], FillPolicy::Value(0x00), false).unwrap();

        assert_eq!(layout.pages()[0].data()[..4], [0, 0, 1, 2]);
        assert_eq!(layout.pages()[0].data()[4], 0);
    }

    #[test]
    fn erase_lists_touched_sectors() {
        let data = vec![0xaa; 0x1000];

        let layout = FlashLayout::new(&region(), 0x1800, &data, FillPolicy::Erased, true).unwrap();

        let sectors: Vec<u64> = layout.sectors().iter().map(|s| s.base_address).collect();
        assert_eq!(sectors, vec![0x1000, 0x2000]);
        // Pages without data are only programmed when they are restored.
        assert_eq!(addresses(&layout), vec![0x1800, 0x1c00, 0x2000, 0x2400]);
    }

    #[test]
    fn restore_covers_whole_sectors() {
        let layout = FlashLayout::new(&region(), 0x1100, &[0; 0x10], FillPolicy::Restore, true).unwrap();

        assert_eq!(addresses(&layout), vec![0x1000, 0x1400, 0x1800, 0x1c00]);
        assert_eq!(
            layout.fills(),
            &[
                FlashFill {
                    address: 0x1000,
                    size: 0x100,
                    page_index: 0
                },
                FlashFill {
                    address: 0x1110,
                    size: 0x2f0,
                    page_index: 0
                },
                FlashFill {
                    address: 0x1400,
                    size: 0x400,
                    page_index: 1
                },
                FlashFill {
                    address: 0x1800,
                    size: 0x400,
                    page_index: 2
                },
                FlashFill {
                    address: 0x1c00,
                    size: 0x400,
                    page_index: 3
                },
            ]
        );
    }

    #[test]
    fn data_outside_of_region() {
        let error = FlashLayout::new(&region(), 0xff00, &[0; 0x200], FillPolicy::Erased, false)
            .unwrap_err();

        assert!(matches!(
            error,
            FlashError::AddressNotInRegion {
                start: 0xff00,
                end: 0x1_0100,
                ..
            }
        ));
    }

    #[test]
    fn data_past_the_end_of_the_address_space() {
        let error = FlashLayout::new(&region(), u64::MAX - 1, &[0; 4], FillPolicy::Erased, false)
            .unwrap_err();

        assert!(matches!(
            error,
            FlashError::AddressNotInRegion {
                start: 0xffff_ffff_ffff_fffe,
                end: u64::MAX,
                ..
            }
        ));
    }

    #[test]
    fn empty_data() {
        let layout = FlashLayout::new(&region(), 0x0, &[], FillPolicy::Restore, true).unwrap();

        assert_eq!(layout, FlashLayout::default());
    }
}
