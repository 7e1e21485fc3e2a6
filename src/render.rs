//! Asynchronous, cancellable transfer of engine pixels to the presentation
//! backend.
//!
//! Pixels are written into a fixed buffer per surface on the emulation
//! thread; the upload and present are posted onto the backend's owning
//! context through a [`Dispatcher`]. Each call returns a [`RenderFuture`]
//! that resolves once the present ran or was abandoned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::backend::{DeviceEvent, PresentationBackend};
use crate::dispatch::Dispatcher;
use crate::engine::Engine;
use crate::error::{Error, Result};

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;
pub const BORDER_WIDTH: usize = 256;
pub const BORDER_HEIGHT: usize = 224;

/// Offset of the screen inside a Super Game Boy border.
const SCREEN_IN_BORDER_X: i32 = 48;
const SCREEN_IN_BORDER_Y: i32 = 40;

/// Texture a render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    Screen,
    Border,
}

impl Surface {
    pub const fn width(self) -> usize {
        match self {
            Surface::Screen => SCREEN_WIDTH,
            Surface::Border => BORDER_WIDTH,
        }
    }

    pub const fn height(self) -> usize {
        match self {
            Surface::Screen => SCREEN_HEIGHT,
            Surface::Border => BORDER_HEIGHT,
        }
    }

    /// Bytes per row of the surface's pixel buffer.
    pub const fn stride(self) -> usize {
        self.width() * 4
    }

    pub const fn buffer_len(self) -> usize {
        self.stride() * self.height()
    }

    const fn index(self) -> usize {
        match self {
            Surface::Screen => 0,
            Surface::Border => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Destination rectangles of both surfaces inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawLayout {
    pub border: Rect,
    pub screen: Rect,
    pub show_border: bool,
}

/// Largest rectangle with aspect `aw:ah` centred in a `w`×`h` window.
fn letterbox(w: i32, h: i32, aw: i32, ah: i32) -> Rect {
    let scaled_w = h * aw / ah;
    if scaled_w <= w {
        Rect {
            x: (w - scaled_w) / 2,
            y: 0,
            w: scaled_w,
            h,
        }
    } else {
        let scaled_h = w * ah / aw;
        Rect {
            x: 0,
            y: (h - scaled_h) / 2,
            w,
            h: scaled_h,
        }
    }
}

impl DrawLayout {
    /// Letterbox the surfaces into a window of `width`×`height` pixels.
    ///
    /// With the border shown the screen sits at its hardware offset inside
    /// the border rectangle; otherwise it fills the window on its own.
    pub fn compute(width: u32, height: u32, show_border: bool) -> Self {
        let w = width.min(i32::MAX as u32 / 256) as i32;
        let h = height.min(i32::MAX as u32 / 256) as i32;
        let border = letterbox(w, h, BORDER_WIDTH as i32, BORDER_HEIGHT as i32);
        let screen = if show_border {
            Rect {
                x: border.x + SCREEN_IN_BORDER_X * border.w / BORDER_WIDTH as i32,
                y: border.y + SCREEN_IN_BORDER_Y * border.h / BORDER_HEIGHT as i32,
                w: SCREEN_WIDTH as i32 * border.w / BORDER_WIDTH as i32,
                h: SCREEN_HEIGHT as i32 * border.h / BORDER_HEIGHT as i32,
            }
        } else {
            letterbox(w, h, SCREEN_WIDTH as i32, SCREEN_HEIGHT as i32)
        };
        Self {
            border,
            screen,
            show_border,
        }
    }
}

/// Shared cancel flag passed to every render call.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How a render finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Presented,
    Cancelled,
}

struct Completion {
    outcome: Mutex<Option<RenderOutcome>>,
    ready: Condvar,
}

/// Completion handle of one render.
#[derive(Clone)]
pub struct RenderFuture {
    inner: Arc<Completion>,
}

impl RenderFuture {
    fn pending() -> Self {
        Self {
            inner: Arc::new(Completion {
                outcome: Mutex::new(None),
                ready: Condvar::new(),
            }),
        }
    }

    fn resolved(outcome: RenderOutcome) -> Self {
        let future = Self::pending();
        future.resolve(outcome);
        future
    }

    fn slot(&self) -> MutexGuard<'_, Option<RenderOutcome>> {
        self.inner
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// First resolution wins.
    fn resolve(&self, outcome: RenderOutcome) {
        let mut slot = self.slot();
        if slot.is_none() {
            *slot = Some(outcome);
            self.inner.ready.notify_all();
        }
    }

    pub fn is_ready(&self) -> bool {
        self.slot().is_some()
    }

    pub fn try_outcome(&self) -> Option<RenderOutcome> {
        *self.slot()
    }

    /// Block until the render resolves.
    pub fn wait(&self) -> RenderOutcome {
        let mut slot = self.slot();
        loop {
            if let Some(outcome) = *slot {
                return outcome;
            }
            slot = self
                .inner
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block for at most `timeout`; `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RenderOutcome> {
        let slot = self.slot();
        let (slot, _) = self
            .inner
            .ready
            .wait_timeout_while(slot, timeout, |o| o.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        *slot
    }
}

/// Resolves the future as cancelled if the present job is dropped unrun.
struct PendingPresent(RenderFuture);

impl Drop for PendingPresent {
    fn drop(&mut self) {
        self.0.resolve(RenderOutcome::Cancelled);
    }
}

type SharedBackend = Arc<Mutex<Option<Box<dyn PresentationBackend>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RenderPipeline {
    backend: SharedBackend,
    layout: Arc<Mutex<DrawLayout>>,
    buffers: [Arc<Mutex<Vec<u8>>>; 2],
    in_flight: [Option<RenderFuture>; 2],
    dispatcher: Arc<dyn Dispatcher>,
}

impl RenderPipeline {
    /// `dispatcher` posts onto the context that owns `backend`.
    pub fn new(
        backend: Box<dyn PresentationBackend>,
        dispatcher: Arc<dyn Dispatcher>,
        show_border: bool,
    ) -> Self {
        let (w, h) = backend.window_size();
        let layout = DrawLayout::compute(w, h, show_border);
        debug!("Initial draw layout for {w}x{h}: {layout:?}");
        Self {
            backend: Arc::new(Mutex::new(Some(backend))),
            layout: Arc::new(Mutex::new(layout)),
            buffers: [
                Arc::new(Mutex::new(vec![0; Surface::Screen.buffer_len()])),
                Arc::new(Mutex::new(vec![0; Surface::Border.buffer_len()])),
            ],
            in_flight: [None, None],
            dispatcher,
        }
    }

    pub fn layout(&self) -> DrawLayout {
        *lock(&self.layout)
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.backend).is_none()
    }

    /// Next native event from the backend, if it is still open.
    pub fn poll_device_event(&self) -> Option<DeviceEvent> {
        lock(&self.backend).as_mut()?.poll_event()
    }

    /// Recompute the destination rectangles from the window size.
    pub fn recalculate_draw_rectangle(&self) {
        let guard = lock(&self.backend);
        let Some(backend) = guard.as_ref() else {
            return;
        };
        let (w, h) = backend.window_size();
        let mut layout = lock(&self.layout);
        *layout = DrawLayout::compute(w, h, layout.show_border);
        trace!("Draw layout for {w}x{h}: {:?}", *layout);
    }

    pub fn set_show_border(&self, show: bool) {
        if lock(&self.layout).show_border == show {
            return;
        }
        lock(&self.layout).show_border = show;
        self.recalculate_draw_rectangle();
    }

    /// Whether the last render of `surface` has not been presented yet.
    pub fn is_in_flight(&self, surface: Surface) -> bool {
        self.in_flight[surface.index()]
            .as_ref()
            .is_some_and(|f| !f.is_ready())
    }

    pub fn render_frame_async(
        &mut self,
        engine: &dyn Engine,
        cancel: &CancellationToken,
    ) -> Result<RenderFuture> {
        self.render_async(Surface::Screen, engine, cancel)
    }

    pub fn render_border_async(
        &mut self,
        engine: &dyn Engine,
        cancel: &CancellationToken,
    ) -> Result<RenderFuture> {
        self.render_async(Surface::Border, engine, cancel)
    }

    fn render_async(
        &mut self,
        surface: Surface,
        engine: &dyn Engine,
        cancel: &CancellationToken,
    ) -> Result<RenderFuture> {
        if self.is_in_flight(surface) {
            return Err(Error::RenderInFlight(surface));
        }
        let idx = surface.index();
        if cancel.is_cancelled() {
            return Ok(RenderFuture::resolved(RenderOutcome::Cancelled));
        }

        {
            let mut pixels = lock(&self.buffers[idx]);
            match surface {
                Surface::Screen => engine.write_frame(&mut pixels, surface.stride()),
                Surface::Border => engine.write_border(&mut pixels, surface.stride()),
            }
        }

        if cancel.is_cancelled() {
            return Ok(RenderFuture::resolved(RenderOutcome::Cancelled));
        }

        let future = RenderFuture::pending();
        let pending = PendingPresent(future.clone());
        let cancel = cancel.clone();
        let backend = Arc::clone(&self.backend);
        let layout = Arc::clone(&self.layout);
        let pixels = Arc::clone(&self.buffers[idx]);
        self.dispatcher.dispatch(Box::new(move || {
            let pending = pending;
            if cancel.is_cancelled() {
                return;
            }
            let mut guard = lock(&backend);
            let Some(backend) = guard.as_mut() else {
                return;
            };
            let layout = *lock(&layout);
            let presented = backend
                .upload(surface, &lock(&pixels))
                .and_then(|()| backend.present(&layout));
            match presented {
                Ok(()) => pending.0.resolve(RenderOutcome::Presented),
                Err(e) => warn!("Failed to present {surface:?}: {e}"),
            }
        }));

        self.in_flight[idx] = Some(future.clone());
        Ok(future)
    }

    /// Detach the backend; presents queued after this resolve cancelled.
    /// Returns the backend so the caller can close its window.
    pub fn dispose(&mut self) -> Option<Box<dyn PresentationBackend>> {
        self.in_flight = [None, None];
        lock(&self.backend).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::dispatch::dispatch_queue;
    use crate::engine::NullEngine;

    fn pipeline() -> (
        RenderPipeline,
        crate::dispatch::DispatchQueue,
        crate::backend::HeadlessHandle,
    ) {
        let (backend, handle) = HeadlessBackend::new(512, 448);
        let (dispatcher, queue) = dispatch_queue();
        let pipeline = RenderPipeline::new(Box::new(backend), Arc::new(dispatcher), false);
        (pipeline, queue, handle)
    }

    #[test]
    fn frame_is_presented_on_the_backend_context() {
        let (mut pipeline, queue, handle) = pipeline();
        let engine = NullEngine::default();
        let future = pipeline
            .render_frame_async(&engine, &CancellationToken::new())
            .unwrap();

        assert!(!future.is_ready());
        assert_eq!(handle.snapshot().presents, 0);
        queue.run_pending();

        assert_eq!(future.wait(), RenderOutcome::Presented);
        let out = handle.snapshot();
        assert_eq!(out.presents, 1);
        assert_eq!(out.screen.len(), Surface::Screen.buffer_len());
    }

    #[test]
    fn cancel_before_present_resolves_cancelled() {
        let (mut pipeline, queue, handle) = pipeline();
        let engine = NullEngine::default();
        let token = CancellationToken::new();
        let future = pipeline.render_frame_async(&engine, &token).unwrap();

        token.cancel();
        queue.run_pending();

        assert_eq!(future.wait(), RenderOutcome::Cancelled);
        assert_eq!(handle.snapshot().presents, 0);
    }

    #[test]
    fn cancelled_token_resolves_immediately() {
        let (mut pipeline, queue, _handle) = pipeline();
        let token = CancellationToken::new();
        token.cancel();
        let future = pipeline
            .render_border_async(&NullEngine::default(), &token)
            .unwrap();
        assert_eq!(future.try_outcome(), Some(RenderOutcome::Cancelled));
        assert!(queue.is_empty());
    }

    #[test]
    fn second_render_while_in_flight_is_rejected() {
        let (mut pipeline, queue, _handle) = pipeline();
        let engine = NullEngine::default();
        let token = CancellationToken::new();
        let _first = pipeline.render_frame_async(&engine, &token).unwrap();
        assert!(pipeline.is_in_flight(Surface::Screen));
        assert!(!pipeline.is_in_flight(Surface::Border));

        assert!(matches!(
            pipeline.render_frame_async(&engine, &token),
            Err(Error::RenderInFlight(Surface::Screen))
        ));
        // Other surface is independent.
        assert!(pipeline.render_border_async(&engine, &token).is_ok());

        queue.run_pending();
        assert!(!pipeline.is_in_flight(Surface::Screen));
        assert!(pipeline.render_frame_async(&engine, &token).is_ok());
    }

    #[test]
    fn dispose_cancels_queued_presents() {
        let (mut pipeline, queue, handle) = pipeline();
        let future = pipeline
            .render_frame_async(&NullEngine::default(), &CancellationToken::new())
            .unwrap();
        let mut backend = pipeline.dispose().unwrap();
        backend.close();
        queue.run_pending();

        assert_eq!(future.wait(), RenderOutcome::Cancelled);
        assert!(handle.snapshot().closed);
        assert!(pipeline.is_disposed());
    }

    #[test]
    fn dropped_job_resolves_cancelled() {
        let (mut pipeline, queue, _handle) = pipeline();
        let future = pipeline
            .render_frame_async(&NullEngine::default(), &CancellationToken::new())
            .unwrap();
        drop(queue);
        assert_eq!(
            future.wait_timeout(Duration::from_secs(1)),
            Some(RenderOutcome::Cancelled)
        );
    }

    #[test]
    fn letterbox_centres_surfaces() {
        let wide = DrawLayout::compute(1000, 448, false);
        assert_eq!(
            wide.screen,
            Rect {
                x: (1000 - 497) / 2,
                y: 0,
                w: 497,
                h: 448
            }
        );

        let tall = DrawLayout::compute(512, 1000, true);
        assert_eq!(
            tall.border,
            Rect {
                x: 0,
                y: (1000 - 448) / 2,
                w: 512,
                h: 448
            }
        );
        assert_eq!(
            tall.screen,
            Rect {
                x: 96,
                y: tall.border.y + 80,
                w: 320,
                h: 288
            }
        );
    }

    #[test]
    fn resize_recomputes_layout() {
        let (pipeline, _queue, handle) = pipeline();
        handle.resize(256, 224);
        assert_eq!(pipeline.poll_device_event(), Some(DeviceEvent::Resized));
        pipeline.recalculate_draw_rectangle();
        assert_eq!(pipeline.layout().border.w, 256);
    }
}
