use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use gbrun::backend::{HeadlessBackend, PresentationBackend};
use gbrun::config::{self, Settings};
use gbrun::dispatch::dispatch_queue;
use gbrun::engine::{HardwareType, NullEngine};
use gbrun::events::SessionEvent;
use gbrun::{SessionController, roms};
use log::{error, info, warn};

#[derive(Parser)]
#[command(version, about = "Run a Game Boy ROM through the gbrun harness")]
struct Args {
    /// Path to ROM file; defaults to the first ROM in the search path
    rom: Option<PathBuf>,

    /// Settings file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Force original Game Boy hardware
    #[arg(long, conflicts_with = "cgb")]
    dmg: bool,

    /// Force Game Boy Color hardware
    #[arg(long, conflicts_with = "dmg")]
    cgb: bool,

    /// Run as fast as possible instead of 60 fps
    #[arg(long)]
    no_limit: bool,

    /// Stop after presenting this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<u64>,
}

fn resolve_rom(args: &Args, settings: &Settings) -> Option<PathBuf> {
    if let Some(rom) = &args.rom {
        return Some(rom.clone());
    }
    let dir = settings.roms_search_path.as_ref()?;
    match roms::find_roms(dir) {
        Ok(found) => found.into_iter().next(),
        Err(e) => {
            warn!("{e}");
            None
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_settings_path);
    let mut settings = config::load_from_file(&config_path);
    if args.dmg {
        settings.hardware_type = HardwareType::GameBoy;
    } else if args.cgb {
        settings.hardware_type = HardwareType::GameBoyColor;
    }
    if args.no_limit {
        settings.limit_speed = false;
    }

    let Some(rom_path) = resolve_rom(&args, &settings) else {
        error!("No ROM supplied");
        return ExitCode::FAILURE;
    };

    let (dispatcher, queue) = dispatch_queue();
    let mut controller = SessionController::new(settings.clone(), Arc::new(dispatcher));

    let stopped = Arc::new(AtomicBool::new(false));
    let failed = Arc::new(AtomicBool::new(false));
    {
        let stopped = Arc::clone(&stopped);
        let failed = Arc::clone(&failed);
        controller.subscribe(move |event| match event {
            SessionEvent::Failed(e) => {
                error!("{e}");
                failed.store(true, Ordering::Relaxed);
            }
            SessionEvent::Stopped => stopped.store(true, Ordering::Relaxed),
            other => info!("{other:?}"),
        });
    }

    let (backend, window) = HeadlessBackend::new(settings.window_width, settings.window_height);
    let engine = Box::new(NullEngine::new(settings.use_bootstrap_rom));
    let started = controller.start(&rom_path, engine, move || {
        Ok(Box::new(backend) as Box<dyn PresentationBackend>)
    });
    if let Err(e) = started {
        error!("Failed to start {}: {e}", rom_path.display());
        return ExitCode::FAILURE;
    }

    let begin = Instant::now();
    let deadline = args.seconds.map(|s| begin + Duration::from_secs(s));
    let mut last_report = begin;
    while !stopped.load(Ordering::Relaxed) {
        queue.run_for(Duration::from_millis(100));

        let presents = window.snapshot().presents;
        let frames_done = args.frames.is_some_and(|n| presents >= n);
        let time_up = deadline.is_some_and(|d| Instant::now() >= d);
        if frames_done || time_up {
            controller.quit();
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            info!(
                "{presents} frames, {:.2} fps",
                controller.emulated_frame_rate()
            );
            last_report = Instant::now();
        }
    }

    if let Err(e) = controller.join() {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    queue.run_pending();

    let presents = window.snapshot().presents;
    let secs = begin.elapsed().as_secs_f64();
    info!(
        "Presented {presents} frames in {secs:.2}s ({:.2} fps average)",
        presents as f64 / secs.max(f64::EPSILON)
    );

    if failed.load(Ordering::Relaxed) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
