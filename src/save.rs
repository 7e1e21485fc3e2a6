//! Battery-backed save files.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! [0, ram_size)           external RAM
//! +0   5 x i32            seconds, minutes, hours, days-low, days-high
//! +20  5 x i32            latched seconds, minutes, hours, days-low, days-high
//! +40  i64                seconds since 1970-01-01T00:00:00 UTC
//! ```
//!
//! The clock block is only present for cartridges with a timer. The layout
//! matches the one VBA writes, so saves move freely between the two.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::error::{Error, Result};
use crate::rtc::RtcState;

/// Size of the clock block appended after the RAM image.
pub const RTC_BLOCK_SIZE: usize = 48;

/// Save file that sits next to `rom_path`.
pub fn save_path_for(rom_path: &Path) -> PathBuf {
    rom_path.with_extension("sav")
}

/// Open battery save, kept open for the lifetime of the loaded ROM.
#[derive(Debug)]
pub struct SaveFile {
    file: File,
    path: PathBuf,
    ram_size: usize,
    has_timer: bool,
}

impl SaveFile {
    /// Open (creating if needed) the save at `path` and size it to exactly
    /// `ram_size` bytes plus the clock block when `has_timer` is set.
    ///
    /// The persisted RAM is copied into `ram` and, when a clock block is
    /// present and `rtc` is given, the clock registers are restored.
    pub fn open(
        path: &Path,
        ram_size: usize,
        has_timer: bool,
        ram: &mut [u8],
        rtc: Option<&mut RtcState>,
    ) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(e, format!("opening save file {}", path.display())))?;

        let expected = ram_size + if has_timer { RTC_BLOCK_SIZE } else { 0 };
        let previous_len = file
            .metadata()
            .map_err(|e| Error::io(e, format!("inspecting save file {}", path.display())))?
            .len();
        file.set_len(expected as u64)
            .map_err(|e| Error::io(e, format!("resizing save file {}", path.display())))?;

        let mut image = vec![0u8; expected];
        file.read_exact(&mut image)
            .map_err(|e| Error::io(e, format!("reading save file {}", path.display())))?;

        let copied = ram_size.min(ram.len());
        ram[..copied].copy_from_slice(&image[..copied]);

        // A clock block that was never written holds no time worth restoring.
        let has_clock_block = previous_len >= expected as u64;
        if let (true, true, Some(rtc)) = (has_timer, has_clock_block, rtc) {
            let mut block = [0u8; RTC_BLOCK_SIZE];
            block.copy_from_slice(&image[ram_size..]);
            rtc.frozen = true;
            decode_rtc(&block, rtc);
            rtc.frozen = false;
            debug!(
                "Restored RTC {}d {:02}:{:02}:{:02} from {}",
                rtc.day_counter(),
                rtc.hours,
                rtc.minutes,
                rtc.seconds,
                path.display()
            );
        }

        info!("Opened save file {} ({expected} bytes)", path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
            ram_size,
            has_timer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ram_size(&self) -> usize {
        self.ram_size
    }

    pub fn has_timer(&self) -> bool {
        self.has_timer
    }

    /// Overwrite the save with the current RAM (and clock) contents.
    pub fn write_ram(&mut self, ram: &[u8], rtc: Option<&RtcState>) -> Result<()> {
        let mut image = vec![0u8; self.ram_size];
        let copied = self.ram_size.min(ram.len());
        image[..copied].copy_from_slice(&ram[..copied]);

        if self.has_timer {
            match rtc {
                Some(rtc) => image.extend_from_slice(&encode_rtc(rtc)),
                // Keep the file length invariant even without a clock to dump.
                None => image.extend_from_slice(&[0u8; RTC_BLOCK_SIZE]),
            }
        }

        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&image))
            .and_then(|_| self.file.flush())
            .map_err(|e| Error::io(e, format!("writing save file {}", self.path.display())))
    }

    /// Flush file contents to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| Error::io(e, format!("syncing save file {}", self.path.display())))
    }

    /// Save over a handle that refuses writes.
    #[cfg(test)]
    pub(crate) fn read_only(path: &Path, ram_size: usize, has_timer: bool) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::io(e, format!("opening save file {}", path.display())))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            ram_size,
            has_timer,
        })
    }
}

/// Serialize the clock registers into the 48-byte block.
pub fn encode_rtc(rtc: &RtcState) -> [u8; RTC_BLOCK_SIZE] {
    let words: [i32; 10] = [
        i32::from(rtc.seconds),
        i32::from(rtc.minutes),
        i32::from(rtc.hours),
        i32::from(rtc.days) & 0xFF,
        (i32::from(rtc.days) >> 8) & 0xFF,
        i32::from(rtc.latched_seconds),
        i32::from(rtc.latched_minutes),
        i32::from(rtc.latched_hours),
        i32::from(rtc.latched_days) & 0xFF,
        (i32::from(rtc.latched_days) >> 8) & 0xFF,
    ];

    let mut block = [0u8; RTC_BLOCK_SIZE];
    for (chunk, word) in block.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    block[40..].copy_from_slice(&unix_seconds(rtc.date_time).to_le_bytes());
    block
}

/// Restore the clock registers from a 48-byte block.
///
/// Each register only keeps the low byte of its 32-bit slot.
pub fn decode_rtc(block: &[u8; RTC_BLOCK_SIZE], rtc: &mut RtcState) {
    let byte = |index: usize| block[index * 4];
    let days = |low: usize| u16::from(byte(low)) | (u16::from(byte(low + 1)) << 8);

    rtc.seconds = byte(0);
    rtc.minutes = byte(1);
    rtc.hours = byte(2);
    rtc.days = days(3);
    rtc.latched_seconds = byte(5);
    rtc.latched_minutes = byte(6);
    rtc.latched_hours = byte(7);
    rtc.latched_days = days(8);

    let mut secs = [0u8; 8];
    secs.copy_from_slice(&block[40..]);
    rtc.date_time = from_unix_seconds(i64::from_le_bytes(secs));
}

fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
        Err(before) => {
            let secs = before.duration();
            // Round toward the past so a decode never lands after `time`.
            let whole = i64::try_from(secs.as_secs()).unwrap_or(i64::MAX);
            if secs.subsec_nanos() > 0 {
                -whole.saturating_add(1)
            } else {
                -whole
            }
        }
    }
}

fn from_unix_seconds(secs: i64) -> SystemTime {
    let offset = Duration::from_secs(secs.unsigned_abs());
    let time = if secs >= 0 {
        UNIX_EPOCH.checked_add(offset)
    } else {
        UNIX_EPOCH.checked_sub(offset)
    };
    time.unwrap_or(UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_rtc() -> RtcState {
        let mut rtc = RtcState::new(UNIX_EPOCH + Duration::from_secs(1_600_000_000));
        rtc.seconds = 42;
        rtc.minutes = 17;
        rtc.hours = 5;
        rtc.days = 0x41AB;
        rtc.latched_seconds = 40;
        rtc.latched_minutes = 16;
        rtc.latched_hours = 4;
        rtc.latched_days = 0x01AA;
        rtc
    }

    #[test]
    fn rtc_block_layout() {
        let block = encode_rtc(&sample_rtc());
        let word = |i: usize| i32::from_le_bytes(block[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(
            (0..10).map(word).collect::<Vec<_>>(),
            vec![42, 17, 5, 0xAB, 0x41, 40, 16, 4, 0xAA, 0x01]
        );
        assert_eq!(
            i64::from_le_bytes(block[40..48].try_into().unwrap()),
            1_600_000_000
        );
    }

    #[test]
    fn rtc_roundtrips_through_block() {
        let original = sample_rtc();
        let mut restored = RtcState::new(UNIX_EPOCH);
        decode_rtc(&encode_rtc(&original), &mut restored);
        assert_eq!(restored, original);
    }

    #[test]
    fn pre_epoch_timestamps_roundtrip() {
        let mut rtc = sample_rtc();
        rtc.date_time = UNIX_EPOCH - Duration::from_secs(86_400);
        let mut restored = RtcState::new(UNIX_EPOCH);
        decode_rtc(&encode_rtc(&rtc), &mut restored);
        assert_eq!(restored.date_time, rtc.date_time);
    }

    #[test]
    fn open_resizes_to_exact_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("game.sav");
        let mut ram = vec![0u8; 0x2000];

        std::fs::write(&path, vec![0x11u8; 0x10]).unwrap();
        let save = SaveFile::open(&path, 0x2000, true, &mut ram, None).unwrap();
        drop(save);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0x2000 + 48);

        std::fs::write(&path, vec![0x22u8; 0x9000]).unwrap();
        let save = SaveFile::open(&path, 0x2000, true, &mut ram, None).unwrap();
        drop(save);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0x2000 + 48);
        assert!(ram.iter().all(|&b| b == 0x22));
    }

    #[test]
    fn open_without_timer_has_no_clock_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.sav");
        let mut ram = vec![0u8; 0x800];
        SaveFile::open(&path, 0x800, false, &mut ram, None).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0x800);
    }

    #[test]
    fn write_then_reopen_restores_ram_and_clock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rtc.sav");
        let mut ram = vec![0u8; 0x2000];
        let mut rtc = RtcState::new(UNIX_EPOCH);

        let mut save = SaveFile::open(&path, 0x2000, true, &mut ram, Some(&mut rtc)).unwrap();
        ram[0] = 0xAA;
        ram[0x1FFF] = 0x55;
        let written = sample_rtc();
        save.write_ram(&ram, Some(&written)).unwrap();
        drop(save);

        let mut ram2 = vec![0u8; 0x2000];
        let mut rtc2 = RtcState::new(UNIX_EPOCH);
        SaveFile::open(&path, 0x2000, true, &mut ram2, Some(&mut rtc2)).unwrap();
        assert_eq!(ram2, ram);
        assert_eq!(rtc2, written);
        assert!(!rtc2.frozen);
    }

    #[test]
    fn fresh_save_keeps_the_live_clock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.sav");
        let mut ram = vec![0u8; 0x2000];
        let mut rtc = sample_rtc();

        SaveFile::open(&path, 0x2000, true, &mut ram, Some(&mut rtc)).unwrap();
        assert_eq!(rtc, sample_rtc());
    }

    #[test]
    fn write_failure_names_the_save_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.sav");
        std::fs::write(&path, vec![0u8; 0x800]).unwrap();

        let mut save = SaveFile::read_only(&path, 0x800, false).unwrap();
        match save.write_ram(&[0xAB; 0x800], None) {
            Err(Error::Io { context, .. }) => assert!(context.contains("ro.sav")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(std::fs::read(&path).unwrap(), vec![0u8; 0x800]);
    }

    #[test]
    fn save_path_replaces_extension() {
        assert_eq!(
            save_path_for(Path::new("roms/crystal.gbc")),
            PathBuf::from("roms/crystal.sav")
        );
    }
}
