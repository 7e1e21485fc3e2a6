use std::path::PathBuf;

use thiserror::Error;

/// Result returned by the harness.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the emulation harness.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ROM file {0:?} does not exist")]
    RomNotFound(PathBuf),
    #[error("ROM files must be at least {min} bytes ({len} given)")]
    RomTooSmall { len: u64, min: u64 },
    #[error("ROM files cannot exceed {max} bytes ({len} given)")]
    RomTooLarge { len: u64, max: u64 },
    /// The engine refused an operation (bad cartridge, unsupported hardware, ...).
    #[error("engine error: {0}")]
    Engine(String),
    /// A render for the same surface is still waiting to be presented.
    #[error("a {0:?} render is already in flight")]
    RenderInFlight(crate::render::Surface),
    #[error("presentation backend error: {0}")]
    Backend(String),
    #[error("emulation thread is not running")]
    NotRunning,
    #[error("emulation thread is already running")]
    AlreadyRunning,
    #[error("emulation thread panicked")]
    WorkerPanicked,
    #[error("invalid settings {path:?}: {message}")]
    Settings { path: PathBuf, message: String },
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
