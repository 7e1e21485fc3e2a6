//! Presentation backend boundary and the in-memory headless backend.

use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel as cb;
use log::debug;

use crate::error::{Error, Result};
use crate::input::KeyCode;
use crate::render::{DrawLayout, Surface};

/// Native event pumped by the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The window was closed.
    Quit,
    KeyDown(KeyCode),
    KeyUp(KeyCode),
    /// The window changed size; draw rectangles need recomputing.
    Resized,
}

/// Window, texture and present primitives of the host platform.
///
/// A backend is created on the emulation thread and only ever touched from
/// there.
pub trait PresentationBackend: Send {
    /// Inner size of the window in pixels.
    fn window_size(&self) -> (u32, u32);
    fn poll_event(&mut self) -> Option<DeviceEvent>;
    /// Replace the texture of `surface` with `pixels` (32-bit, tightly packed).
    fn upload(&mut self, surface: Surface, pixels: &[u8]) -> Result<()>;
    /// Clear the window, draw the surfaces at `layout` and flip.
    fn present(&mut self, layout: &DrawLayout) -> Result<()>;
    /// Release the window.
    fn close(&mut self);
}

/// What a [`HeadlessBackend`] has been asked to show so far.
#[derive(Debug, Clone, Default)]
pub struct HeadlessOutput {
    pub presents: u64,
    pub screen: Vec<u8>,
    pub border: Vec<u8>,
    pub last_layout: Option<DrawLayout>,
    pub window_size: (u32, u32),
    pub closed: bool,
}

/// Test and CLI side of a [`HeadlessBackend`]: feeds device events in and
/// observes what was presented.
#[derive(Clone)]
pub struct HeadlessHandle {
    events: cb::Sender<DeviceEvent>,
    output: Arc<Mutex<HeadlessOutput>>,
}

impl HeadlessHandle {
    pub fn send(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    pub fn press(&self, key: KeyCode) {
        self.send(DeviceEvent::KeyDown(key));
    }

    pub fn release(&self, key: KeyCode) {
        self.send(DeviceEvent::KeyUp(key));
    }

    /// Change the reported window size and emit [`DeviceEvent::Resized`].
    pub fn resize(&self, width: u32, height: u32) {
        self.output().window_size = (width, height);
        self.send(DeviceEvent::Resized);
    }

    pub fn close_window(&self) {
        self.send(DeviceEvent::Quit);
    }

    pub fn snapshot(&self) -> HeadlessOutput {
        self.output().clone()
    }

    fn output(&self) -> std::sync::MutexGuard<'_, HeadlessOutput> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Backend without a window: uploads are copied into memory and presents
/// are counted.
pub struct HeadlessBackend {
    events: cb::Receiver<DeviceEvent>,
    output: Arc<Mutex<HeadlessOutput>>,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> (Self, HeadlessHandle) {
        let (tx, rx) = cb::unbounded();
        let output = Arc::new(Mutex::new(HeadlessOutput {
            window_size: (width, height),
            ..HeadlessOutput::default()
        }));
        (
            Self {
                events: rx,
                output: Arc::clone(&output),
            },
            HeadlessHandle { events: tx, output },
        )
    }

    fn output(&self) -> std::sync::MutexGuard<'_, HeadlessOutput> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PresentationBackend for HeadlessBackend {
    fn window_size(&self) -> (u32, u32) {
        self.output().window_size
    }

    fn poll_event(&mut self) -> Option<DeviceEvent> {
        self.events.try_recv().ok()
    }

    fn upload(&mut self, surface: Surface, pixels: &[u8]) -> Result<()> {
        let mut out = self.output();
        if out.closed {
            return Err(Error::Backend("window is closed".into()));
        }
        let dst = match surface {
            Surface::Screen => &mut out.screen,
            Surface::Border => &mut out.border,
        };
        dst.clear();
        dst.extend_from_slice(pixels);
        Ok(())
    }

    fn present(&mut self, layout: &DrawLayout) -> Result<()> {
        let mut out = self.output();
        if out.closed {
            return Err(Error::Backend("window is closed".into()));
        }
        out.presents += 1;
        out.last_layout = Some(*layout);
        Ok(())
    }

    fn close(&mut self) {
        debug!("Closing headless window");
        self.output().closed = true;
    }
}
