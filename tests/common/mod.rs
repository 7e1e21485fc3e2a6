#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use gbrun::cartridge::RomInformation;
use gbrun::dispatch::{DispatchQueue, dispatch_queue};
use gbrun::engine::{Engine, EngineEvent, HardwareType};
use gbrun::events::SessionEvent;
use gbrun::rtc::RtcState;
use gbrun::{Error, Result, SessionController};

pub const WAIT: Duration = Duration::from_secs(5);

/// Write a 32 KiB ROM with the given cartridge type and RAM size code.
pub fn write_rom(dir: &Path, name: &str, cart_type: u8, ram_code: u8) -> PathBuf {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0134..0x0138].copy_from_slice(b"TEST");
    rom[0x0147] = cart_type;
    rom[0x0149] = ram_code;
    let path = dir.join(name);
    fs::write(&path, &rom).unwrap();
    path
}

/// What a [`ScriptedEngine`] was asked to do, readable after the engine has
/// moved onto the emulation thread.
#[derive(Debug, Default)]
pub struct EngineCalls {
    pub resets: Vec<HardwareType>,
    pub roms_loaded: usize,
    pub frames: u64,
    pub steps: u64,
    pub joypad: u8,
    pub dropped: bool,
    /// External RAM and clock as the first frame found them.
    pub first_frame: Option<(Vec<u8>, Option<RtcState>)>,
}

pub type SharedCalls = Arc<Mutex<EngineCalls>>;

/// Engine double that records every call and can be told to misbehave.
pub struct ScriptedEngine {
    calls: SharedCalls,
    pub fail_reset: bool,
    pub touch_ram: bool,
    pub breakpoint_at: Option<u64>,
    pub panic_at: Option<u64>,
    boot_rom: bool,
    hardware: HardwareType,
    rom: Option<RomInformation>,
    ram: Vec<u8>,
    rtc: Option<RtcState>,
    events: VecDeque<EngineEvent>,
}

impl ScriptedEngine {
    pub fn new() -> (Self, SharedCalls) {
        let calls = SharedCalls::default();
        (
            Self {
                calls: Arc::clone(&calls),
                fail_reset: false,
                touch_ram: false,
                breakpoint_at: None,
                panic_at: None,
                boot_rom: false,
                hardware: HardwareType::default(),
                rom: None,
                ram: Vec::new(),
                rtc: None,
                events: VecDeque::new(),
            },
            calls,
        )
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.calls.lock().unwrap().dropped = true;
    }
}

impl Engine for ScriptedEngine {
    fn reset(&mut self, hardware: HardwareType) -> Result<()> {
        if self.fail_reset {
            return Err(Error::Engine("scripted reset failure".into()));
        }
        self.hardware = hardware;
        self.calls.lock().unwrap().resets.push(hardware);
        Ok(())
    }

    fn hardware_type(&self) -> HardwareType {
        self.hardware
    }

    fn load_rom(&mut self, rom: Vec<u8>) -> Result<()> {
        let info = RomInformation::from_rom(&rom);
        self.ram = vec![0; info.saved_ram_size];
        self.rtc = info.has_timer.then(|| RtcState::new(SystemTime::now()));
        self.rom = Some(info);
        self.calls.lock().unwrap().roms_loaded += 1;
        Ok(())
    }

    fn unload_rom(&mut self) {
        self.rom = None;
        self.ram.clear();
        self.rtc = None;
    }

    fn uses_boot_rom(&self) -> bool {
        self.boot_rom
    }

    fn step(&mut self) {
        self.calls.lock().unwrap().steps += 1;
    }

    fn run_frame(&mut self) {
        let frame = {
            let mut calls = self.calls.lock().unwrap();
            calls.frames += 1;
            if calls.frames == 1 {
                calls.first_frame = Some((self.ram.clone(), self.rtc.clone()));
            }
            calls.frames
        };
        if self.panic_at == Some(frame) {
            panic!("scripted panic at frame {frame}");
        }
        if self.touch_ram && !self.ram.is_empty() {
            self.ram[0] = frame as u8;
            self.events.push_back(EngineEvent::RamUpdated);
        }
        self.events.push_back(EngineEvent::FrameReady);
        if self.breakpoint_at == Some(frame) {
            self.events.push_back(EngineEvent::Breakpoint);
        }
    }

    fn rom_information(&self) -> Option<&RomInformation> {
        self.rom.as_ref()
    }

    fn saved_ram_size(&self) -> usize {
        self.ram.len()
    }

    fn external_ram(&self) -> &[u8] {
        &self.ram
    }

    fn external_ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    fn rtc_state(&self) -> Option<&RtcState> {
        self.rtc.as_ref()
    }

    fn rtc_state_mut(&mut self) -> Option<&mut RtcState> {
        self.rtc.as_mut()
    }

    fn set_joypad(&mut self, down_keys: u8) {
        self.calls.lock().unwrap().joypad = down_keys;
    }

    /// Every byte of the frame holds the low byte of the frame number.
    fn write_frame(&self, buffer: &mut [u8], _stride: usize) {
        buffer.fill(self.calls.lock().unwrap().frames as u8);
    }

    fn write_border(&self, buffer: &mut [u8], _stride: usize) {
        buffer.fill(0x80);
    }

    fn has_custom_border(&self) -> bool {
        false
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        self.events.pop_front()
    }
}

/// Session event names in delivery order.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_name(event: &SessionEvent) -> String {
    match event {
        SessionEvent::StatusChanged(status) => format!("StatusChanged({status:?})"),
        SessionEvent::Failed(_) => "Failed".to_string(),
        other => format!("{other:?}"),
    }
}

/// Controller whose events are delivered on the returned queue and recorded
/// into the returned log.
pub fn controller(
    settings: gbrun::config::Settings,
) -> (SessionController, DispatchQueue, EventLog) {
    let (dispatcher, queue) = dispatch_queue();
    let controller = SessionController::new(settings, Arc::new(dispatcher));
    let log = EventLog::default();
    let sink = Arc::clone(&log);
    controller.subscribe(move |event| sink.lock().unwrap().push(event_name(event)));
    (controller, queue, log)
}

/// Pump `queue` until `done` holds or [`WAIT`] elapses.
pub fn wait_until(queue: &DispatchQueue, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        queue.run_for(Duration::from_millis(5));
        if done() {
            return true;
        }
    }
    false
}

pub fn wait_for_event(queue: &DispatchQueue, log: &EventLog, name: &str) -> bool {
    wait_until(queue, || log.lock().unwrap().iter().any(|e| e == name))
}

pub fn count_events(log: &EventLog, name: &str) -> usize {
    log.lock().unwrap().iter().filter(|e| *e == name).count()
}
