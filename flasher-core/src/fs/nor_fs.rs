//! Log-structured filesystem adapter over the external NOR chip.
//!
//! The filesystem implementation itself is consumed as a library
//! (`littlefs2`); this module only supplies the `Storage` configuration and
//! glues it to [`GoldenImageStore`].

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
use littlefs2::driver::Storage;
use littlefs2::fs::{Allocation, FileOpenFlags, Filesystem};
use littlefs2::io::{Error as LfsError, Seek, SeekFrom};
use littlefs2::path::PathBuf;

use crate::config::GOLDEN_IMAGE_NAME;
use crate::error::{Error, Result};
use crate::nor::NorFlash;

use super::{GoldenImageStore, OpenMode};

/// `littlefs2::Storage` configuration over the NOR driver, matching the
/// library configuration values named for this device: 128 B read/prog,
/// 64 KiB blocks, 128 blocks, wear-leveling disabled (`BLOCK_CYCLES = -1`).
pub struct NorStorage<SPI, CS, DELAY> {
    nor: NorFlash<SPI, CS, DELAY>,
}

impl<SPI, CS, DELAY> NorStorage<SPI, CS, DELAY> {
    pub fn new(nor: NorFlash<SPI, CS, DELAY>) -> Self {
        NorStorage { nor }
    }
}

impl<SPI, CS, DELAY, E> Storage for NorStorage<SPI, CS, DELAY>
where
    SPI: Transfer<u8, Error = E>,
    CS: OutputPin,
    DELAY: DelayMs<u8>,
{
    const READ_SIZE: usize = 128;
    const WRITE_SIZE: usize = 128;
    const BLOCK_SIZE: usize = 64 * 1024;
    const BLOCK_COUNT: usize = 128;
    const BLOCK_CYCLES: isize = -1;

    type CACHE_SIZE = generic_array::typenum::U128;
    type LOOKAHEAD_SIZE = generic_array::typenum::U16;

    fn read(&mut self, off: usize, buf: &mut [u8]) -> core::result::Result<usize, LfsError> {
        self.nor
            .read(off as u32, buf)
            .map(|_| buf.len())
            .map_err(|_| LfsError::Io)
    }

    fn write(&mut self, off: usize, data: &[u8]) -> core::result::Result<usize, LfsError> {
        self.nor
            .write(off as u32, data)
            .map(|_| data.len())
            .map_err(|_| LfsError::Io)
    }

    fn erase(&mut self, off: usize, len: usize) -> core::result::Result<usize, LfsError> {
        let block_size = Self::BLOCK_SIZE as u32;
        let mut remaining = len as u32;
        let mut addr = off as u32;
        while remaining > 0 {
            self.nor.erase_block(addr).map_err(|_| LfsError::Io)?;
            let step = block_size.min(remaining);
            addr += step;
            remaining -= step;
        }
        Ok(len)
    }

    /// `sync` has nothing to flush -- every write already blocks on the
    /// chip's own write-in-progress bit.
    fn sync(&mut self) -> core::result::Result<(), LfsError> {
        Ok(())
    }
}

/// Tracks the one file this adapter ever has open, as a mode plus a byte
/// offset rather than a live handle -- `littlefs2`'s `Filesystem<'a, S>`
/// borrows the `Storage` it mounts, so a handle opened against it cannot
/// be stored alongside the `Storage` itself without becoming
/// self-referential. Every operation instead re-mounts the (already
/// formatted) filesystem and reaches the file through
/// `open_file_and_then`, seeking to the saved offset first; the borrow
/// lives only for the duration of that one call.
struct OpenFile {
    mode: OpenMode,
    pos: u32,
}

/// Mount policy: try to mount, format-then-mount once on failure, and
/// treat a second failure as fatal, matching the original init sequence.
pub struct NorFs<SPI, CS, DELAY> {
    storage: NorStorage<SPI, CS, DELAY>,
    alloc: Allocation<NorStorage<SPI, CS, DELAY>>,
    open_file: Option<OpenFile>,
}

impl<SPI, CS, DELAY, E> NorFs<SPI, CS, DELAY>
where
    SPI: Transfer<u8, Error = E>,
    CS: OutputPin,
    DELAY: DelayMs<u8>,
{
    pub fn mount(nor: NorFlash<SPI, CS, DELAY>) -> Result<Self> {
        let mut storage = NorStorage::new(nor);
        let mut alloc = Filesystem::allocate();

        match Filesystem::mount(&mut alloc, &mut storage) {
            Ok(_fs) => {}
            Err(_) => {
                Filesystem::format(&mut storage).map_err(|_| Error::FsError)?;
                Filesystem::mount(&mut alloc, &mut storage).map_err(|_| Error::FsError)?;
            }
        };

        Ok(NorFs { storage, alloc, open_file: None })
    }

    fn path() -> PathBuf {
        PathBuf::from(GOLDEN_IMAGE_NAME)
    }

    fn open_flags(mode: OpenMode) -> FileOpenFlags {
        match mode {
            OpenMode::ReadOnly => FileOpenFlags::READ,
            OpenMode::WriteCreateTruncate => {
                FileOpenFlags::READ | FileOpenFlags::WRITE | FileOpenFlags::CREATE | FileOpenFlags::TRUNCATE
            }
            OpenMode::AppendCreate => {
                FileOpenFlags::READ | FileOpenFlags::WRITE | FileOpenFlags::CREATE | FileOpenFlags::APPEND
            }
        }
    }
}

impl<SPI, CS, DELAY, E> GoldenImageStore for NorFs<SPI, CS, DELAY>
where
    SPI: Transfer<u8, Error = E>,
    CS: OutputPin,
    DELAY: DelayMs<u8>,
{
    fn file_present(&mut self) -> Result<bool> {
        let fs = Filesystem::mount(&mut self.alloc, &mut self.storage).map_err(|_| Error::FsError)?;
        match fs.open_file_and_then(&mut self.storage, &Self::path(), |_file| Ok(())) {
            Ok(()) => Ok(true),
            Err(LfsError::NoSuchEntry) => Ok(false),
            Err(_) => Err(Error::FsError),
        }
    }

    fn open(&mut self, mode: OpenMode) -> Result<()> {
        self.close()?;
        let fs = Filesystem::mount(&mut self.alloc, &mut self.storage).map_err(|_| Error::FsError)?;
        let flags = Self::open_flags(mode);
        fs.open_file_with_options_and_then(
            |opts: &mut FileOpenFlags| { *opts = flags; opts },
            &mut self.storage,
            &Self::path(),
            |_file| Ok(()),
        )
        .map_err(|_| Error::FsError)?;
        self.open_file = Some(OpenFile { mode, pos: 0 });
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pos = self.open_file.as_ref().ok_or(Error::NoFileOpen)?.pos;
        let fs = Filesystem::mount(&mut self.alloc, &mut self.storage).map_err(|_| Error::FsError)?;
        let n = fs
            .open_file_and_then(&mut self.storage, &Self::path(), |file| {
                file.seek(SeekFrom::Start(pos))?;
                file.read(buf)
            })
            .map_err(|_| Error::FsError)?;
        self.open_file.as_mut().unwrap().pos += n as u32;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let open = self.open_file.as_ref().ok_or(Error::NoFileOpen)?;
        let mode = open.mode;
        let pos = open.pos;
        let fs = Filesystem::mount(&mut self.alloc, &mut self.storage).map_err(|_| Error::FsError)?;
        let flags = Self::open_flags(mode);
        fs.open_file_with_options_and_then(
            |opts: &mut FileOpenFlags| { *opts = flags; opts },
            &mut self.storage,
            &Self::path(),
            |file| {
                if mode == OpenMode::AppendCreate {
                    file.seek(SeekFrom::End(0))?;
                } else {
                    file.seek(SeekFrom::Start(pos))?;
                }
                file.write(buf)
            },
        )
        .map_err(|_| Error::FsError)?;
        self.open_file.as_mut().unwrap().pos += buf.len() as u32;
        Ok(())
    }

    fn size(&mut self) -> Result<u32> {
        self.open_file.as_ref().ok_or(Error::NoFileOpen)?;
        let fs = Filesystem::mount(&mut self.alloc, &mut self.storage).map_err(|_| Error::FsError)?;
        fs.open_file_and_then(&mut self.storage, &Self::path(), |file| file.len())
            .map(|n| n as u32)
            .map_err(|_| Error::FsError)
    }

    fn close(&mut self) -> Result<()> {
        self.open_file = None;
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.close()?;
        let fs = Filesystem::mount(&mut self.alloc, &mut self.storage).map_err(|_| Error::FsError)?;
        match fs.remove(&mut self.storage, &Self::path()) {
            Ok(()) | Err(LfsError::NoSuchEntry) => Ok(()),
            Err(_) => Err(Error::FsError),
        }
    }
}
