use std::time::{Duration, Instant};

use crate::session::EmulationStatus;

/// Reference frame rate the limiter paces against.
pub const REFERENCE_FRAME_RATE: f64 = 60.0;

/// Exact duration of one frame at 60 fps (16⅔ ms).
pub const FRAME_INTERVAL: Duration = Duration::from_nanos(16_666_667);

/// Below this much remaining budget the clock stops sleeping and spins.
///
/// OS sleeps overshoot by up to a scheduler tick, so the last stretch is
/// burned actively to land on the frame boundary.
const SPIN_THRESHOLD: Duration = Duration::from_millis(1);

/// Paces the run loop to one emulated frame per [`FRAME_INTERVAL`].
#[derive(Debug)]
pub struct FrameClock {
    frame_start: Instant,
    stream_start: Instant,
    previous_frame: Duration,
    current_frame: Duration,
    limiter: bool,
}

impl FrameClock {
    pub fn new(limiter: bool) -> Self {
        let now = Instant::now();
        Self {
            frame_start: now,
            stream_start: now,
            previous_frame: Duration::ZERO,
            current_frame: Duration::ZERO,
            limiter,
        }
    }

    /// Restart both timers and forget the frame history.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.previous_frame = Duration::ZERO;
        self.current_frame = Duration::ZERO;
        self.stream_start = now;
        self.frame_start = now;
    }

    pub fn limiter_enabled(&self) -> bool {
        self.limiter
    }

    pub fn set_limiter(&mut self, enabled: bool) {
        self.limiter = enabled;
    }

    /// Time spent in the current frame since the last [`FrameClock::wait`].
    pub fn elapsed(&self) -> Duration {
        self.frame_start.elapsed()
    }

    /// Block until the current frame has lasted at least [`FRAME_INTERVAL`].
    ///
    /// Returns immediately when the limiter is disabled; the frame timestamps
    /// are recorded either way so the measured frame rate stays meaningful.
    pub fn wait(&mut self) {
        if self.limiter {
            let elapsed = self.frame_start.elapsed();
            if elapsed < FRAME_INTERVAL {
                let remaining = FRAME_INTERVAL - elapsed;
                if remaining > SPIN_THRESHOLD {
                    std::thread::sleep(remaining - SPIN_THRESHOLD);
                }
                while self.frame_start.elapsed() < FRAME_INTERVAL {
                    std::hint::spin_loop();
                }
            }
        }

        self.previous_frame = self.current_frame;
        self.current_frame = self.stream_start.elapsed();
        self.frame_start = Instant::now();
    }

    /// Frames per second measured over the last two [`FrameClock::wait`] calls.
    pub fn emulated_frame_rate(&self, status: EmulationStatus) -> f64 {
        if status != EmulationStatus::Running {
            return 0.0;
        }
        let delta = self.current_frame.saturating_sub(self.previous_frame);
        if delta.is_zero() {
            0.0
        } else {
            1.0 / delta.as_secs_f64()
        }
    }

    pub fn emulated_speed(&self, status: EmulationStatus) -> f64 {
        self.emulated_frame_rate(status) / REFERENCE_FRAME_RATE
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_wait_returns_immediately() {
        let mut clock = FrameClock::new(false);
        let start = Instant::now();
        for _ in 0..100 {
            clock.wait();
        }
        assert!(start.elapsed() < FRAME_INTERVAL * 10);
    }

    #[test]
    fn limited_wait_paces_to_sixty_hertz() {
        let mut clock = FrameClock::new(true);
        clock.reset();
        clock.wait();

        const ITERATIONS: u32 = 100;
        let start = Instant::now();
        for _ in 0..ITERATIONS {
            clock.wait();
        }
        let mean = start.elapsed().as_secs_f64() / f64::from(ITERATIONS);
        let target = FRAME_INTERVAL.as_secs_f64();
        assert!(
            (mean - target).abs() <= target * 0.10,
            "mean frame interval {:.3} ms",
            mean * 1000.0
        );
    }

    #[test]
    fn frame_rate_is_zero_unless_running() {
        let mut clock = FrameClock::new(true);
        clock.reset();
        clock.wait();
        clock.wait();
        assert_eq!(clock.emulated_frame_rate(EmulationStatus::Paused), 0.0);
        assert_eq!(clock.emulated_frame_rate(EmulationStatus::Stopped), 0.0);

        let fps = clock.emulated_frame_rate(EmulationStatus::Running);
        assert!(fps > 50.0 && fps < 70.0, "fps = {fps}");
    }

    #[test]
    fn reset_clears_frame_history() {
        let mut clock = FrameClock::new(false);
        clock.wait();
        clock.wait();
        clock.reset();
        assert_eq!(clock.emulated_frame_rate(EmulationStatus::Running), 0.0);
    }
}
