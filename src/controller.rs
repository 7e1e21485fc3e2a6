//! UI-side handle to the emulation thread.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel as cb;
use log::{debug, info, warn};

use crate::backend::PresentationBackend;
use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::engine::{Engine, HardwareType};
use crate::error::{Error, Result};
use crate::events::{EventHub, SessionEvent, SubscriptionId};
use crate::run_loop::{Command, WorkerSetup, run_worker};
use crate::save::save_path_for;
use crate::session::{EmulationStatus, StatusSnapshot};

pub const MIN_ROM_SIZE: u64 = 512;
pub const MAX_ROM_SIZE: u64 = 8 * 1024 * 1024;

/// Check that `path` names a plausibly sized ROM and read it.
pub fn read_rom(path: &Path) -> Result<Vec<u8>> {
    let meta = match fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        _ => return Err(Error::RomNotFound(path.to_path_buf())),
    };
    let len = meta.len();
    if len < MIN_ROM_SIZE {
        return Err(Error::RomTooSmall {
            len,
            min: MIN_ROM_SIZE,
        });
    }
    if len > MAX_ROM_SIZE {
        return Err(Error::RomTooLarge {
            len,
            max: MAX_ROM_SIZE,
        });
    }
    fs::read(path).map_err(|e| Error::io(e, format!("reading ROM {}", path.display())))
}

struct Worker {
    commands: cb::Sender<Command>,
    handle: JoinHandle<()>,
}

/// Starts, drives and stops one emulation thread at a time.
///
/// Commands are fire-and-forget: the worker ignores the ones its current
/// status doesn't allow. Session events are delivered through the
/// dispatcher given to [`SessionController::new`].
pub struct SessionController {
    settings: Mutex<Arc<Settings>>,
    events: EventHub<SessionEvent>,
    snapshot: Arc<StatusSnapshot>,
    quit: Arc<AtomicBool>,
    worker: Option<Worker>,
}

impl SessionController {
    pub fn new(settings: Settings, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            settings: Mutex::new(Arc::new(settings)),
            events: EventHub::new(dispatcher),
            snapshot: Arc::new(StatusSnapshot::default()),
            quit: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.settings.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Validate `rom_path`, then start the emulation thread on it.
    ///
    /// `backend_factory` runs on the emulation thread, which owns the
    /// backend for its whole life.
    pub fn start<F>(
        &mut self,
        rom_path: &Path,
        engine: Box<dyn Engine>,
        backend_factory: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn PresentationBackend>> + Send + 'static,
    {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        // Reap a worker that already exited on its own.
        if let Err(e) = self.join() {
            warn!("Previous emulation thread ended badly: {e}");
        }

        let rom = read_rom(rom_path)?;
        info!("Starting {} ({} bytes)", rom_path.display(), rom.len());

        let (tx, rx) = cb::unbounded();
        self.quit.store(false, Ordering::Release);
        let setup = WorkerSetup {
            rom,
            save_path: save_path_for(rom_path),
            engine,
            backend_factory: Box::new(backend_factory),
            settings: self.settings(),
            commands: rx,
            quit: Arc::clone(&self.quit),
            events: self.events.clone(),
            snapshot: Arc::clone(&self.snapshot),
        };
        let handle = thread::Builder::new()
            .name("emulation".into())
            .spawn(move || run_worker(setup))
            .map_err(|e| Error::io(e, "spawning emulation thread"))?;

        self.worker = Some(Worker {
            commands: tx,
            handle,
        });
        Ok(())
    }

    /// Whether an emulation thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    fn send(&self, command: Command) -> Result<()> {
        let worker = self.worker.as_ref().ok_or(Error::NotRunning)?;
        worker
            .commands
            .send(command)
            .map_err(|_| Error::NotRunning)
    }

    pub fn set_pause(&self, paused: bool) -> Result<()> {
        self.send(if paused {
            Command::Pause
        } else {
            Command::Resume
        })
    }

    pub fn is_paused(&self) -> bool {
        self.snapshot.status() == EmulationStatus::Paused
    }

    /// Run one video frame while paused.
    pub fn frame_step(&self) -> Result<()> {
        self.send(Command::FrameStep)
    }

    /// Execute one instruction while paused.
    pub fn step(&self) -> Result<()> {
        self.send(Command::Step)
    }

    pub fn reset(&self, hardware: HardwareType) -> Result<()> {
        self.send(Command::Reset(hardware))
    }

    /// Replace the settings; a running worker picks them up between frames.
    pub fn set_settings(&self, settings: Settings) {
        let settings = Arc::new(settings);
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&settings);
        if self.send(Command::ApplySettings(settings)).is_err() {
            debug!("Settings stored; no emulation thread to notify");
        }
    }

    pub fn status(&self) -> EmulationStatus {
        self.snapshot.status()
    }

    pub fn emulated_frame_rate(&self) -> f64 {
        self.snapshot.frame_rate()
    }

    /// Ask the emulation thread to stop after its current iteration.
    pub fn quit(&self) {
        self.quit.store(true, Ordering::Release);
    }

    /// Wait for the emulation thread to finish its teardown.
    pub fn join(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        drop(worker.commands);
        worker.handle.join().map_err(|_| Error::WorkerPanicked)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.quit();
        let _ = self.join();
    }
}
