use std::time::{Duration, SystemTime};

/// Bit 8 of the day counter, stored in the day-high register.
pub const DAY_HIGH_BIT: u16 = 0x0100;
/// Halt flag in the day-high register; a halted clock does not tick.
pub const DAY_HALT_FLAG: u16 = 0x4000;
/// Day counter overflow flag in the day-high register.
pub const DAY_CARRY_FLAG: u16 = 0x8000;

const DAY_COUNTER_MASK: u16 = 0x01FF;
const SECONDS_PER_DAY: u64 = 86_400;

/// Register file of an MBC3 cartridge clock.
///
/// `days` packs both day registers: the low byte is the day-low register and
/// the high byte is the day-high register (day bit 8, halt, carry).
/// `date_time` is the wall-clock instant the live registers correspond to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcState {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub days: u16,
    pub latched_seconds: u8,
    pub latched_minutes: u8,
    pub latched_hours: u8,
    pub latched_days: u16,
    /// While set, [`RtcState::update`] leaves the registers alone.
    pub frozen: bool,
    pub date_time: SystemTime,
}

impl RtcState {
    pub fn new(now: SystemTime) -> Self {
        Self {
            seconds: 0,
            minutes: 0,
            hours: 0,
            days: 0,
            latched_seconds: 0,
            latched_minutes: 0,
            latched_hours: 0,
            latched_days: 0,
            frozen: false,
            date_time: now,
        }
    }

    /// Copy the live registers into the latched snapshot.
    pub fn latch(&mut self) {
        self.latched_seconds = self.seconds;
        self.latched_minutes = self.minutes;
        self.latched_hours = self.hours;
        self.latched_days = self.days;
    }

    pub fn halted(&self) -> bool {
        self.days & DAY_HALT_FLAG != 0
    }

    pub fn day_counter(&self) -> u16 {
        self.days & DAY_COUNTER_MASK
    }

    /// Advance the live registers to `now`.
    ///
    /// Only whole seconds are consumed; the fractional remainder stays in
    /// `date_time` so repeated calls never lose time. A halted clock moves
    /// its base forward without ticking.
    pub fn update(&mut self, now: SystemTime) {
        if self.frozen {
            return;
        }

        let Ok(elapsed) = now.duration_since(self.date_time) else {
            // Wall clock went backwards; rebase instead of ticking.
            self.date_time = now;
            return;
        };

        if self.halted() {
            self.date_time = now;
            return;
        }

        let seconds = elapsed.as_secs();
        if seconds > 0 {
            self.date_time += Duration::from_secs(seconds);
            self.advance_seconds(seconds);
        }
    }

    /// Run the counters forward, carrying out-of-range values the way the
    /// hardware does (an invalid seconds value wraps at 64 before ticking).
    pub fn advance_seconds(&mut self, mut seconds: u64) {
        let registers_valid = self.seconds <= 59 && self.minutes <= 59 && self.hours <= 23;
        if registers_valid && seconds >= SECONDS_PER_DAY {
            self.add_days(seconds / SECONDS_PER_DAY);
            seconds %= SECONDS_PER_DAY;
        }

        while seconds > 0 {
            let until_minute_tick = self.seconds_until_minute_tick();
            if seconds < until_minute_tick {
                self.seconds = ((self.seconds as u64 + seconds) & 0x3F) as u8;
                return;
            }

            seconds -= until_minute_tick;
            self.seconds = 0;
            self.minute_tick();
        }
    }

    fn seconds_until_minute_tick(&self) -> u64 {
        let sec = self.seconds as u64;
        if sec <= 59 {
            60 - sec
        } else {
            (63 - sec + 1) + 60
        }
    }

    fn minute_tick(&mut self) {
        let overflow = self.minutes == 59;
        self.minutes = ((self.minutes as u16 + 1) & 0x3F) as u8;
        if overflow {
            self.minutes = 0;
            self.hour_tick();
        }
    }

    fn hour_tick(&mut self) {
        let overflow = self.hours == 23;
        self.hours = ((self.hours as u16 + 1) & 0x1F) as u8;
        if overflow {
            self.hours = 0;
            self.day_tick();
        }
    }

    fn add_days(&mut self, days: u64) {
        let total = u64::from(self.day_counter()) + days;
        let mut flags = self.days & !DAY_COUNTER_MASK;
        if total > u64::from(DAY_COUNTER_MASK) {
            flags |= DAY_CARRY_FLAG;
        }
        self.days = flags | (total % (u64::from(DAY_COUNTER_MASK) + 1)) as u16;
    }

    fn day_tick(&mut self) {
        let counter = self.day_counter();
        let flags = self.days & !DAY_COUNTER_MASK;
        if counter >= DAY_COUNTER_MASK {
            self.days = flags | DAY_CARRY_FLAG;
        } else {
            self.days = flags | (counter + 1);
        }
    }
}
