//! FAT-on-SD filesystem adapter.
//!
//! The FAT filesystem implementation itself is consumed as a library
//! (`embedded-sdmmc`); this module only wires up the block device and the
//! single-file open/read/write/close/delete surface needed by
//! [`GoldenImageStore`].

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
use embedded_sdmmc::sdcard::SdCard;
use embedded_sdmmc::{Mode, RawDirectory, RawFile, RawVolume, TimeSource, Timestamp, VolumeIdx, VolumeManager};

use crate::config::GOLDEN_IMAGE_NAME;
use crate::error::{Error, Result};

use super::{GoldenImageStore, OpenMode};

/// This appliance has no RTC wired to the SD card path; every file gets a
/// fixed epoch timestamp, matching the original firmware's lack of a
/// live time source for FAT directory entries.
pub struct FixedEpoch;

impl TimeSource for FixedEpoch {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 0,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

fn map_mode(mode: OpenMode) -> Mode {
    match mode {
        OpenMode::ReadOnly => Mode::ReadOnly,
        OpenMode::WriteCreateTruncate => Mode::ReadWriteCreateOrTruncate,
        OpenMode::AppendCreate => Mode::ReadWriteCreateOrAppend,
    }
}

/// FAT-on-SD adapter, generic over the SPI/CS/DELAY types wired by the
/// board support crate.
///
/// `embedded-sdmmc` 0.7's `Volume`/`Directory`/`File` are RAII handles that
/// borrow the `VolumeManager` that opened them, so a struct cannot hold an
/// owned `VolumeManager` and one of its handles side by side without
/// becoming self-referential. The `Raw*` variants sidestep that: they are
/// plain `Copy` indices the manager looks up on every call, so they carry
/// no borrow and can be stored as ordinary fields.
pub struct SdFs<SPI, CS, DELAY> {
    volume_mgr: VolumeManager<SdCard<SPI, CS, DELAY>, FixedEpoch>,
    volume: RawVolume,
    root_dir: RawDirectory,
    open_file: Option<RawFile>,
}

impl<SPI, CS, DELAY, E> SdFs<SPI, CS, DELAY>
where
    SPI: Transfer<u8, Error = E> + embedded_hal::blocking::spi::Write<u8, Error = E>,
    CS: OutputPin,
    DELAY: DelayMs<u16>,
{
    pub fn mount(spi: SPI, cs: CS, delay: DELAY) -> Result<Self> {
        let sdcard = SdCard::new(spi, cs, delay);
        let mut volume_mgr = VolumeManager::new(sdcard, FixedEpoch);
        let volume = volume_mgr.open_raw_volume(VolumeIdx(0)).map_err(|_| Error::SdError)?;
        let root_dir = volume_mgr.open_root_dir(volume).map_err(|_| Error::SdError)?;
        Ok(SdFs { volume_mgr, volume, root_dir, open_file: None })
    }
}

impl<SPI, CS, DELAY, E> GoldenImageStore for SdFs<SPI, CS, DELAY>
where
    SPI: Transfer<u8, Error = E> + embedded_hal::blocking::spi::Write<u8, Error = E>,
    CS: OutputPin,
    DELAY: DelayMs<u16>,
{
    fn file_present(&mut self) -> Result<bool> {
        match self.volume_mgr.open_file_in_dir(self.root_dir, GOLDEN_IMAGE_NAME, Mode::ReadOnly) {
            Ok(file) => {
                let _ = self.volume_mgr.close_file(file);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    fn open(&mut self, mode: OpenMode) -> Result<()> {
        self.close()?;
        let file = self
            .volume_mgr
            .open_file_in_dir(self.root_dir, GOLDEN_IMAGE_NAME, map_mode(mode))
            .map_err(|_| Error::SdError)?;
        self.open_file = Some(file);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.open_file.ok_or(Error::NoFileOpen)?;
        self.volume_mgr.read(file, buf).map_err(|_| Error::SdError)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let file = self.open_file.ok_or(Error::NoFileOpen)?;
        self.volume_mgr.write(file, buf).map_err(|_| Error::SdError)?;
        Ok(())
    }

    fn size(&mut self) -> Result<u32> {
        let file = self.open_file.ok_or(Error::NoFileOpen)?;
        Ok(self.volume_mgr.file_length(file).map_err(|_| Error::SdError)?)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.open_file.take() {
            self.volume_mgr.close_file(file).map_err(|_| Error::SdError)?;
        }
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.close()?;
        match self.volume_mgr.delete_file_in_dir(self.root_dir, GOLDEN_IMAGE_NAME) {
            Ok(()) => Ok(()),
            Err(_) => Ok(()),
        }
    }
}

impl<SPI, CS, DELAY, E> Drop for SdFs<SPI, CS, DELAY>
where
    SPI: Transfer<u8, Error = E> + embedded_hal::blocking::spi::Write<u8, Error = E>,
    CS: OutputPin,
    DELAY: DelayMs<u16>,
{
    fn drop(&mut self) {
        let _ = self.volume_mgr.close_dir(self.root_dir);
        let _ = self.volume_mgr.close_volume(self.volume);
    }
}
