//! Emulation status state machine around an [`Engine`].

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use log::{debug, info};

use crate::engine::{Engine, EngineEvent, HardwareType};
use crate::error::Result;
use crate::events::{EventHub, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmulationStatus {
    #[default]
    Stopped,
    Paused,
    Running,
}

impl EmulationStatus {
    const fn to_u8(self) -> u8 {
        match self {
            EmulationStatus::Stopped => 0,
            EmulationStatus::Paused => 1,
            EmulationStatus::Running => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => EmulationStatus::Paused,
            2 => EmulationStatus::Running,
            _ => EmulationStatus::Stopped,
        }
    }
}

/// Status and frame rate published by the emulation thread for readers on
/// other threads.
#[derive(Debug, Default)]
pub struct StatusSnapshot {
    status: AtomicU8,
    frame_rate: AtomicU64,
}

impl StatusSnapshot {
    pub fn status(&self) -> EmulationStatus {
        EmulationStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: EmulationStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    pub fn frame_rate(&self) -> f64 {
        f64::from_bits(self.frame_rate.load(Ordering::Relaxed))
    }

    pub fn set_frame_rate(&self, fps: f64) {
        self.frame_rate.store(fps.to_bits(), Ordering::Relaxed);
    }
}

/// Owns the engine and the only copy of the emulation status.
///
/// Every transition is published to the [`StatusSnapshot`] and announced
/// through the [`EventHub`].
pub struct EmulationSession<E: Engine + ?Sized = dyn Engine> {
    engine: Box<E>,
    status: EmulationStatus,
    run_requested: bool,
    events: EventHub<SessionEvent>,
    snapshot: std::sync::Arc<StatusSnapshot>,
}

impl<E: Engine + ?Sized> EmulationSession<E> {
    pub fn new(
        engine: Box<E>,
        events: EventHub<SessionEvent>,
        snapshot: std::sync::Arc<StatusSnapshot>,
    ) -> Self {
        let status = if engine.uses_boot_rom() {
            EmulationStatus::Paused
        } else {
            EmulationStatus::Stopped
        };
        snapshot.set_status(status);
        Self {
            engine,
            status,
            run_requested: false,
            events,
            snapshot,
        }
    }

    pub fn status(&self) -> EmulationStatus {
        self.status
    }

    /// Running, or about to run its first frame.
    pub fn is_running(&self) -> bool {
        self.status == EmulationStatus::Running || self.run_requested
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_engine(self) -> Box<E> {
        self.engine
    }

    fn set_status(&mut self, status: EmulationStatus) {
        if self.status == status {
            return;
        }
        debug!("Emulation status {:?} -> {:?}", self.status, status);
        self.status = status;
        self.snapshot.set_status(status);
        self.events.emit(SessionEvent::StatusChanged(status));
    }

    /// Re-initialise the engine as `hardware`.
    ///
    /// On failure the status is left untouched.
    pub fn reset(&mut self, hardware: HardwareType) -> Result<()> {
        self.engine.reset(hardware)?;
        if self.status == EmulationStatus::Stopped && self.engine.uses_boot_rom() {
            self.set_status(EmulationStatus::Paused);
        }
        info!("Reset as {hardware:?}");
        self.events.emit(SessionEvent::AfterReset);
        Ok(())
    }

    pub fn load_rom(&mut self, rom: Vec<u8>) -> Result<()> {
        self.run_requested = false;
        self.set_status(EmulationStatus::Stopped);
        self.engine.load_rom(rom)?;
        self.set_status(EmulationStatus::Paused);
        self.events.emit(SessionEvent::RomChanged);
        Ok(())
    }

    pub fn unload_rom(&mut self) {
        self.run_requested = false;
        self.set_status(EmulationStatus::Stopped);
        self.engine.unload_rom();
        if self.engine.uses_boot_rom() {
            self.set_status(EmulationStatus::Paused);
        }
        self.events.emit(SessionEvent::RomChanged);
    }

    /// Request running. The status becomes Running once the first frame has
    /// executed. Returns `false` when running isn't possible from here.
    pub fn run(&mut self) -> bool {
        let allowed = match self.status {
            EmulationStatus::Paused => true,
            EmulationStatus::Stopped => self.engine.uses_boot_rom(),
            EmulationStatus::Running => false,
        };
        if !allowed || self.run_requested {
            return false;
        }
        self.run_requested = true;
        if self.status == EmulationStatus::Paused {
            self.events.emit(SessionEvent::Resumed);
        }
        true
    }

    pub fn pause(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.run_requested = false;
        self.set_status(EmulationStatus::Paused);
        self.events.emit(SessionEvent::Paused);
        true
    }

    fn single_steppable(&self) -> bool {
        self.status == EmulationStatus::Paused && !self.run_requested
    }

    /// Execute one instruction while paused. `None` when not paused.
    pub fn step(&mut self) -> Option<Vec<EngineEvent>> {
        if !self.single_steppable() {
            return None;
        }
        self.engine.step();
        self.events.emit(SessionEvent::Break);
        Some(self.drain_engine_events())
    }

    /// Execute one video frame while paused. `None` when not paused.
    pub fn run_frame(&mut self) -> Option<Vec<EngineEvent>> {
        if !self.single_steppable() {
            return None;
        }
        self.engine.run_frame();
        Some(self.drain_engine_events())
    }

    /// Advance one frame of free-running emulation.
    ///
    /// Returns the engine events the frame produced; empty when the session
    /// isn't running.
    pub fn advance_frame(&mut self) -> Vec<EngineEvent> {
        if !self.is_running() {
            return Vec::new();
        }
        self.engine.run_frame();
        if self.run_requested {
            self.run_requested = false;
            self.set_status(EmulationStatus::Running);
            self.events.emit(SessionEvent::EmulationStarted);
        }
        self.drain_engine_events()
    }

    fn drain_engine_events(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.engine.poll_event() {
            match event {
                EngineEvent::Breakpoint if self.status == EmulationStatus::Running => {
                    self.set_status(EmulationStatus::Paused);
                    self.events.emit(SessionEvent::Break);
                }
                EngineEvent::BorderChanged => self.events.emit(SessionEvent::BorderChanged),
                _ => {}
            }
            events.push(event);
        }
        events
    }
}
