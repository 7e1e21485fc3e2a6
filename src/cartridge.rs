//! Cartridge header inspection.
//!
//! The harness only needs to know whether a cartridge carries battery-backed
//! RAM and a clock, and how much RAM to persist; everything else belongs to
//! the engine.

const HEADER_END: usize = 0x0150;

/// Facts about the loaded cartridge that drive save-file handling.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RomInformation {
    pub title: String,
    pub cgb: bool,
    pub cart_type: u8,
    pub has_ram: bool,
    pub has_battery: bool,
    pub has_timer: bool,
    /// Number of external RAM bytes persisted to the save file.
    pub saved_ram_size: usize,
}

impl RomInformation {
    pub fn from_rom(rom: &[u8]) -> Self {
        let header = Header::parse(rom);
        let saved_ram_size = header.ram_size();
        Self {
            title: header.title(),
            cgb: header.cgb_supported(),
            cart_type: header.cart_type(),
            has_ram: saved_ram_size > 0,
            has_battery: header.has_battery(),
            has_timer: header.has_timer(),
            saved_ram_size,
        }
    }

    /// Whether the cartridge state outlives the session in a `.sav` file.
    pub fn is_persistent(&self) -> bool {
        self.has_ram && self.has_battery
    }
}

struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    fn parse(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn title(&self) -> String {
        let end = 0x0143.min(self.data.len());
        let mut slice = &self.data[0x0134.min(self.data.len())..end];
        if let Some(pos) = slice.iter().position(|&b| b == 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }

    fn cgb_supported(&self) -> bool {
        self.data.get(0x0143).copied().unwrap_or(0) & 0x80 != 0
    }

    fn cart_type(&self) -> u8 {
        if self.data.len() < HEADER_END {
            return 0x00;
        }
        self.data[0x0147]
    }

    fn has_battery(&self) -> bool {
        matches!(
            self.cart_type(),
            0x03 | 0x06 | 0x09 | 0x0D | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E | 0x22 | 0xFF
        )
    }

    fn has_timer(&self) -> bool {
        matches!(self.cart_type(), 0x0F | 0x10)
    }

    fn ram_size(&self) -> usize {
        if self.data.len() < HEADER_END {
            return 0;
        }

        // MBC2 has 512x4-bit internal RAM regardless of header RAM size.
        if matches!(self.cart_type(), 0x05 | 0x06) {
            return 0x200;
        }

        match self.data[0x0149] {
            0x01 => 0x800,
            0x02 => 0x2000,
            0x03 => 0x8000,
            0x04 => 0x20000,
            0x05 => 0x10000,
            _ => 0,
        }
    }
}
