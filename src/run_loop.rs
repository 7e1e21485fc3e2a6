//! Body of the `emulation` worker thread.
//!
//! The worker owns the engine, the key table, the save file and the render
//! pipeline. The controller talks to it only through [`Command`]s and the
//! shared quit flag.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel as cb;
use log::{debug, error, info, trace, warn};

use crate::backend::{DeviceEvent, PresentationBackend};
use crate::clock::{FRAME_INTERVAL, FrameClock};
use crate::config::{BorderVisibility, Settings};
use crate::dispatch::{DispatchQueue, dispatch_queue};
use crate::engine::{Engine, EngineEvent, HardwareType};
use crate::error::Result;
use crate::events::{EventHub, SessionEvent};
use crate::input::KeyStateTable;
use crate::render::{CancellationToken, RenderPipeline, Surface};
use crate::save::SaveFile;
use crate::session::{EmulationSession, EmulationStatus, StatusSnapshot};

/// Request sent from the controller to the worker.
#[derive(Debug, Clone)]
pub(crate) enum Command {
    Pause,
    Resume,
    FrameStep,
    Step,
    Reset(HardwareType),
    ApplySettings(Arc<Settings>),
}

pub(crate) type BackendFactory =
    Box<dyn FnOnce() -> Result<Box<dyn PresentationBackend>> + Send>;

/// Everything the worker needs, moved onto the thread at spawn.
pub(crate) struct WorkerSetup {
    pub rom: Vec<u8>,
    pub save_path: PathBuf,
    pub engine: Box<dyn Engine>,
    pub backend_factory: BackendFactory,
    pub settings: Arc<Settings>,
    pub commands: cb::Receiver<Command>,
    pub quit: Arc<AtomicBool>,
    pub events: EventHub<SessionEvent>,
    pub snapshot: Arc<StatusSnapshot>,
}

struct RunLoop {
    session: EmulationSession,
    renderer: RenderPipeline,
    backend_jobs: DispatchQueue,
    keys: KeyStateTable,
    clock: FrameClock,
    save: Option<SaveFile>,
    border_visibility: BorderVisibility,
    cancel: CancellationToken,
    commands: cb::Receiver<Command>,
    quit: Arc<AtomicBool>,
    events: EventHub<SessionEvent>,
    snapshot: Arc<StatusSnapshot>,
}

/// Thread entry point. Always finishes with [`SessionEvent::Stopped`].
pub(crate) fn run_worker(setup: WorkerSetup) {
    let events = setup.events.clone();
    let snapshot = Arc::clone(&setup.snapshot);

    let mut run_loop = match RunLoop::start(setup) {
        Ok(run_loop) => run_loop,
        Err(e) => {
            error!("Failed to start emulation: {e}");
            snapshot.set_status(EmulationStatus::Stopped);
            events.emit(SessionEvent::Failed(Arc::new(e)));
            events.emit(SessionEvent::Stopped);
            return;
        }
    };

    let result = run_loop.run();
    run_loop.finish(result);
}

impl RunLoop {
    fn start(setup: WorkerSetup) -> Result<Self> {
        let WorkerSetup {
            rom,
            save_path,
            engine,
            backend_factory,
            settings,
            commands,
            quit,
            events,
            snapshot,
        } = setup;

        let mut session = EmulationSession::new(engine, events.clone(), Arc::clone(&snapshot));
        if let Err(e) = session.reset(settings.hardware_type) {
            warn!("Engine reset as {:?} failed: {e}", settings.hardware_type);
        }
        session.load_rom(rom)?;

        let save = open_save(session.engine_mut(), save_path)?;

        let backend = backend_factory()?;
        let (dispatcher, backend_jobs) = dispatch_queue();
        let renderer = RenderPipeline::new(
            backend,
            Arc::new(dispatcher),
            settings.border_visibility.shows_border(false),
        );

        let mut keys = KeyStateTable::new();
        keys.load_settings(&settings.key_binds);

        let mut run_loop = Self {
            session,
            renderer,
            backend_jobs,
            keys,
            clock: FrameClock::new(settings.limit_speed),
            save,
            border_visibility: settings.border_visibility,
            cancel: CancellationToken::new(),
            commands,
            quit,
            events,
            snapshot,
        };
        run_loop.refresh_border();
        run_loop.events.emit(SessionEvent::Started);
        run_loop.session.run();
        info!("Emulation thread started");
        Ok(run_loop)
    }

    fn run(&mut self) -> Result<()> {
        while !self.quit.load(Ordering::Acquire) {
            self.backend_jobs.run_pending();
            self.pump_device_events();
            if self.quit.load(Ordering::Acquire) {
                break;
            }

            if !self.session.is_running() {
                match self.commands.recv_timeout(FRAME_INTERVAL) {
                    Ok(command) => self.apply(command)?,
                    Err(cb::RecvTimeoutError::Timeout) => {}
                    Err(cb::RecvTimeoutError::Disconnected) => break,
                }
            }
            while let Ok(command) = self.commands.try_recv() {
                self.apply(command)?;
            }

            if self.session.is_running() {
                let down_keys = self.keys.down_keys();
                self.session.engine_mut().set_joypad(down_keys);
                let engine_events = self.session.advance_frame();
                self.handle_engine_events(&engine_events)?;
                self.clock.wait();
                let fps = self.clock.emulated_frame_rate(self.session.status());
                self.snapshot.set_frame_rate(fps);
                trace!("Frame done at {fps:.2} fps");
            } else {
                self.snapshot.set_frame_rate(0.0);
            }
        }
        Ok(())
    }

    fn pump_device_events(&mut self) {
        while let Some(event) = self.renderer.poll_device_event() {
            match event {
                DeviceEvent::KeyDown(key) => self.keys.set_state(key, true),
                DeviceEvent::KeyUp(key) => self.keys.set_state(key, false),
                DeviceEvent::Resized => self.renderer.recalculate_draw_rectangle(),
                DeviceEvent::Quit => {
                    debug!("Window closed");
                    self.quit.store(true, Ordering::Release);
                }
            }
        }
    }

    fn apply(&mut self, command: Command) -> Result<()> {
        debug!("Command {command:?}");
        match command {
            Command::Pause => {
                self.session.pause();
            }
            Command::Resume => {
                if self.session.run() {
                    self.clock.reset();
                }
            }
            Command::FrameStep => {
                if let Some(engine_events) = self.session.run_frame() {
                    self.handle_engine_events(&engine_events)?;
                }
            }
            Command::Step => {
                if let Some(engine_events) = self.session.step() {
                    self.handle_engine_events(&engine_events)?;
                }
            }
            Command::Reset(hardware) => {
                if let Err(e) = self.session.reset(hardware) {
                    warn!("Engine reset as {hardware:?} failed: {e}");
                }
                self.refresh_border();
            }
            Command::ApplySettings(settings) => self.apply_settings(&settings),
        }
        Ok(())
    }

    /// Settings land between two frames, so the session status is left
    /// alone and subscribers see no pause or resume.
    fn apply_settings(&mut self, settings: &Settings) {
        if self.clock.limiter_enabled() != settings.limit_speed {
            self.clock.set_limiter(settings.limit_speed);
            self.clock.reset();
        }
        self.keys.load_settings(&settings.key_binds);
        self.border_visibility = settings.border_visibility;
        self.refresh_border();
        info!("Applied new settings");
    }

    fn handle_engine_events(&mut self, engine_events: &[EngineEvent]) -> Result<()> {
        for event in engine_events {
            match event {
                EngineEvent::FrameReady => self.render_frame(),
                EngineEvent::RamUpdated => self.flush_save()?,
                EngineEvent::BorderChanged => self.refresh_border(),
                EngineEvent::Breakpoint => debug!("Breakpoint hit"),
            }
        }
        Ok(())
    }

    /// Presents are dispatched onto this thread, so a render still in flight
    /// is finished here before the next one for the same surface.
    fn finish_present(&self, surface: Surface) {
        if self.renderer.is_in_flight(surface) {
            self.backend_jobs.run_pending();
        }
    }

    fn render_frame(&mut self) {
        self.finish_present(Surface::Screen);
        if let Err(e) = self
            .renderer
            .render_frame_async(self.session.engine(), &self.cancel)
        {
            trace!("Dropping frame: {e}");
        }
    }

    fn refresh_border(&mut self) {
        let show = self
            .border_visibility
            .shows_border(self.session.engine().has_custom_border());
        self.renderer.set_show_border(show);
        if !show {
            return;
        }
        self.finish_present(Surface::Border);
        if let Err(e) = self
            .renderer
            .render_border_async(self.session.engine(), &self.cancel)
        {
            trace!("Skipping border update: {e}");
        }
    }

    fn flush_save(&mut self) -> Result<()> {
        let Some(save) = self.save.as_mut() else {
            return Ok(());
        };
        let engine = self.session.engine();
        save.write_ram(engine.external_ram(), engine.rtc_state())
    }

    fn finish(self, result: Result<()>) {
        if let Err(e) = result {
            error!("Emulation stopped: {e}");
            self.events.emit(SessionEvent::Failed(Arc::new(e)));
        }
        self.teardown();
    }

    fn teardown(mut self) {
        self.session.pause();
        if let Err(e) = self.flush_save() {
            error!("Failed to flush save file: {e}");
        }
        if let Some(mut save) = self.save.take()
            && let Err(e) = save.sync()
        {
            error!("{e}");
        }

        self.cancel.cancel();
        drop(self.session.into_engine());

        if let Some(mut backend) = self.renderer.dispose() {
            backend.close();
        }
        self.backend_jobs.run_pending();

        self.snapshot.set_frame_rate(0.0);
        self.snapshot.set_status(EmulationStatus::Stopped);
        info!("Emulation thread stopped");
        self.events.emit(SessionEvent::Stopped);
    }
}

/// Open the companion save of a battery-backed cartridge and load it into
/// the engine.
fn open_save(engine: &mut dyn Engine, path: PathBuf) -> Result<Option<SaveFile>> {
    let Some(info) = engine.rom_information() else {
        return Ok(None);
    };
    if !info.is_persistent() {
        return Ok(None);
    }
    let ram_size = engine.saved_ram_size();
    let has_timer = info.has_timer;

    let mut ram = vec![0u8; ram_size];
    let mut rtc = engine.rtc_state().cloned();
    let save = SaveFile::open(&path, ram_size, has_timer, &mut ram, rtc.as_mut())?;

    let dst = engine.external_ram_mut();
    let len = dst.len().min(ram.len());
    dst[..len].copy_from_slice(&ram[..len]);
    if let (Some(restored), Some(live)) = (rtc, engine.rtc_state_mut()) {
        *live = restored;
    }
    Ok(Some(save))
}
