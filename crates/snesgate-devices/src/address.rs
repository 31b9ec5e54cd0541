/*!
 * Address-space translation.
 *
 * Clients address console memory with the 24-bit bus layout used by
 * flash-cartridge firmware. Backends that expose a flat memory view map
 * ranges of that layout onto their own offsets through a static table of
 * [`AddressWindow`]s. The first matching window wins.
 */

/// A contiguous client address range mapped onto backend offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressWindow {
    /// First client address covered by the window
    pub start: u32,
    /// One past the last covered address, `None` for an open-ended window
    pub end: Option<u32>,
    /// Backend offset that `start` maps to
    pub backend_base: u32,
}

impl AddressWindow {
    /// Create a bounded window `[start, end)`
    pub const fn bounded(start: u32, end: u32, backend_base: u32) -> Self {
        Self {
            start,
            end: Some(end),
            backend_base,
        }
    }

    /// Create a window starting at `start` with no upper bound
    pub const fn open_ended(start: u32, backend_base: u32) -> Self {
        Self {
            start,
            end: None,
            backend_base,
        }
    }

    /// Check whether `address` falls inside the window
    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && self.end.map_or(true, |end| address < end)
    }

    /// Translate `address` if it falls inside the window
    pub fn translate(&self, address: u32) -> Option<u32> {
        if !self.contains(address) {
            return None;
        }
        (address - self.start).checked_add(self.backend_base)
    }
}

/// Translate `address` through the first window that contains it
pub fn translate(windows: &[AddressWindow], address: u32) -> Option<u32> {
    windows.iter().find_map(|window| window.translate(address))
}

/// Console work RAM as seen on the bus
pub const WRAM_START: u32 = 0xF5_0000;
/// End of the work RAM window (exclusive)
pub const WRAM_END: u32 = 0xF7_0000;
/// Cartridge save RAM as seen on the bus
pub const SRAM_START: u32 = 0xE0_0000;
/// Backend offset at which save RAM is placed, right after work RAM
pub const SRAM_BACKEND_BASE: u32 = 0x2_0000;

/// Windows of the RetroArch core-memory view: WRAM at offset 0, SRAM after it.
///
/// The SRAM window has no upper bound. Addresses far beyond the cartridge's
/// save RAM still translate and are left for the backend to reject.
pub const RETROARCH_WINDOWS: [AddressWindow; 2] = [
    AddressWindow::bounded(WRAM_START, WRAM_END, 0),
    AddressWindow::open_ended(SRAM_START, SRAM_BACKEND_BASE),
];
