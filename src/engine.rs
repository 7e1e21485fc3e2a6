//! Boundary to the emulation core.
//!
//! The harness drives an [`Engine`] without knowing anything about CPU or
//! PPU internals. [`NullEngine`] understands cartridge headers, external RAM
//! and the cartridge clock but executes no instructions, which is enough to
//! exercise the full harness end to end.

use std::collections::VecDeque;
use std::time::SystemTime;

use log::info;
use serde::{Deserialize, Serialize};

use crate::cartridge::RomInformation;
use crate::error::{Error, Result};
use crate::render::{BORDER_HEIGHT, BORDER_WIDTH, SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::rtc::RtcState;

/// Hardware model the engine emulates after a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareType {
    GameBoy,
    #[default]
    GameBoyColor,
    SuperGameBoy,
    SuperGameBoy2,
}

/// Notification produced by the engine while it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    FrameReady,
    /// Battery-backed RAM (or the cartridge clock) was written.
    RamUpdated,
    BorderChanged,
    /// Execution hit a breakpoint; the session pauses.
    Breakpoint,
}

/// Emulation core driven by the run loop.
pub trait Engine: Send {
    fn reset(&mut self, hardware: HardwareType) -> Result<()>;
    fn hardware_type(&self) -> HardwareType;
    fn load_rom(&mut self, rom: Vec<u8>) -> Result<()>;
    fn unload_rom(&mut self);

    /// Whether resets start from the boot ROM instead of the post-boot state.
    fn uses_boot_rom(&self) -> bool;

    /// Execute one instruction.
    fn step(&mut self);
    /// Execute until the next video frame completes.
    fn run_frame(&mut self);

    /// Header facts of the loaded cartridge, `None` when no ROM is loaded.
    fn rom_information(&self) -> Option<&RomInformation>;
    fn saved_ram_size(&self) -> usize;
    fn external_ram(&self) -> &[u8];
    fn external_ram_mut(&mut self) -> &mut [u8];
    fn rtc_state(&self) -> Option<&RtcState>;
    fn rtc_state_mut(&mut self) -> Option<&mut RtcState>;

    /// Joypad mask (see [`crate::input::GameBoyKey::mask`]) sampled by the
    /// next frame.
    fn set_joypad(&mut self, down_keys: u8);

    /// Write the last completed frame as 32-bit pixels, `stride` bytes per row.
    fn write_frame(&self, buffer: &mut [u8], stride: usize);
    /// Write the Super Game Boy border as 32-bit pixels, `stride` bytes per row.
    fn write_border(&self, buffer: &mut [u8], stride: usize);
    fn has_custom_border(&self) -> bool;

    fn poll_event(&mut self) -> Option<EngineEvent>;
}

const DMG_PALETTE: [u32; 4] = [0x009BBC0F, 0x008BAC0F, 0x00306230, 0x000F380F];

/// Engine stand-in without a CPU.
///
/// Every frame ticks the cartridge clock; the frame shows a flat shade chosen
/// by how many buttons are held.
#[derive(Debug)]
pub struct NullEngine {
    hardware: HardwareType,
    use_boot_rom: bool,
    rom: Option<RomInformation>,
    external_ram: Vec<u8>,
    rtc: Option<RtcState>,
    down_keys: u8,
    frames: u64,
    steps: u64,
    events: VecDeque<EngineEvent>,
}

impl NullEngine {
    pub fn new(use_boot_rom: bool) -> Self {
        Self {
            hardware: HardwareType::default(),
            use_boot_rom,
            rom: None,
            external_ram: Vec::new(),
            rtc: None,
            down_keys: 0,
            frames: 0,
            steps: 0,
            events: VecDeque::new(),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn shade(&self) -> u32 {
        DMG_PALETTE[(self.down_keys.count_ones() as usize).min(DMG_PALETTE.len() - 1)]
    }
}

impl Default for NullEngine {
    fn default() -> Self {
        Self::new(false)
    }
}

fn fill(buffer: &mut [u8], stride: usize, width: usize, height: usize, color: u32) {
    let pixel = (color | 0xFF00_0000).to_le_bytes();
    for row in buffer.chunks_mut(stride).take(height) {
        for dst in row.chunks_exact_mut(4).take(width) {
            dst.copy_from_slice(&pixel);
        }
    }
}

impl Engine for NullEngine {
    fn reset(&mut self, hardware: HardwareType) -> Result<()> {
        self.hardware = hardware;
        self.frames = 0;
        self.steps = 0;
        self.events.clear();
        Ok(())
    }

    fn hardware_type(&self) -> HardwareType {
        self.hardware
    }

    fn load_rom(&mut self, rom: Vec<u8>) -> Result<()> {
        if rom.len() < 0x150 {
            return Err(Error::Engine("ROM has no cartridge header".into()));
        }
        let info = RomInformation::from_rom(&rom);
        info!(
            "Loaded ROM: {} (type {:02X}, RAM {} bytes, timer: {})",
            info.title,
            info.cart_type,
            info.saved_ram_size,
            if info.has_timer { "yes" } else { "no" }
        );
        self.external_ram = vec![0; info.saved_ram_size];
        self.rtc = info.has_timer.then(|| RtcState::new(SystemTime::now()));
        self.rom = Some(info);
        self.frames = 0;
        self.events.clear();
        Ok(())
    }

    fn unload_rom(&mut self) {
        self.rom = None;
        self.external_ram.clear();
        self.rtc = None;
        self.events.clear();
    }

    fn uses_boot_rom(&self) -> bool {
        self.use_boot_rom
    }

    fn step(&mut self) {
        self.steps += 1;
    }

    fn run_frame(&mut self) {
        self.frames += 1;
        if let Some(rtc) = self.rtc.as_mut() {
            let before = (rtc.seconds, rtc.minutes, rtc.hours, rtc.days);
            rtc.update(SystemTime::now());
            if before != (rtc.seconds, rtc.minutes, rtc.hours, rtc.days) {
                self.events.push_back(EngineEvent::RamUpdated);
            }
        }
        self.events.push_back(EngineEvent::FrameReady);
    }

    fn rom_information(&self) -> Option<&RomInformation> {
        self.rom.as_ref()
    }

    fn saved_ram_size(&self) -> usize {
        self.rom.as_ref().map_or(0, |r| r.saved_ram_size)
    }

    fn external_ram(&self) -> &[u8] {
        &self.external_ram
    }

    fn external_ram_mut(&mut self) -> &mut [u8] {
        &mut self.external_ram
    }

    fn rtc_state(&self) -> Option<&RtcState> {
        self.rtc.as_ref()
    }

    fn rtc_state_mut(&mut self) -> Option<&mut RtcState> {
        self.rtc.as_mut()
    }

    fn set_joypad(&mut self, down_keys: u8) {
        self.down_keys = down_keys;
    }

    fn write_frame(&self, buffer: &mut [u8], stride: usize) {
        fill(buffer, stride, SCREEN_WIDTH, SCREEN_HEIGHT, self.shade());
    }

    fn write_border(&self, buffer: &mut [u8], stride: usize) {
        fill(buffer, stride, BORDER_WIDTH, BORDER_HEIGHT, DMG_PALETTE[3]);
    }

    fn has_custom_border(&self) -> bool {
        false
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        self.events.pop_front()
    }
}
