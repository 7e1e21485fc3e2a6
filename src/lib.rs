//! Real-time harness around a Game Boy emulation core.
//!
//! The harness runs an [`engine::Engine`] on a dedicated worker thread,
//! paces it to 60 frames per second, hands finished frames to a
//! [`backend::PresentationBackend`] and keeps battery-backed cartridge RAM
//! in a companion `.sav` file. [`controller::SessionController`] is the
//! entry point for front-ends.

/// Window, texture and device-event boundary.
pub mod backend;

/// Cartridge header inspection.
pub mod cartridge;

/// Frame pacing.
pub mod clock;

/// User settings persisted as TOML.
pub mod config;

/// Front-end handle that starts and drives the emulation thread.
pub mod controller;

/// Posting closures onto the thread that owns some state.
pub mod dispatch;

/// Emulation core boundary and the instruction-less null engine.
pub mod engine;

pub mod error;

/// Session notifications and their observer list.
pub mod events;

/// Key bindings and the Game Boy button state table.
pub mod input;

/// Asynchronous, cancellable presentation of frames and borders.
pub mod render;

/// ROM discovery.
pub mod roms;

/// Cartridge real-time clock registers.
pub mod rtc;

mod run_loop;

/// Battery-backed save file codec.
pub mod save;

/// Emulation status state machine.
pub mod session;

pub use controller::SessionController;
pub use error::{Error, Result};
