//! Filesystem adapters.
//!
//! Both the log-structured adapter over NOR ([`nor_fs`]) and the FAT
//! adapter over SD ([`sd_fs`]) are consumed through the same
//! [`GoldenImageStore`] trait, so the orchestrator and the XMODEM receiver
//! are generic over "a place that can hold the golden image" instead of
//! hard-coding either filesystem. Each adapter holds at most one open file
//! handle internally -- mirroring the single static file handle the ported
//! C API kept per filesystem -- rather than returning a separate handle
//! object per open.

pub mod nor_fs;
pub mod sd_fs;

use crate::crc::Crc32Accumulator;
use crate::error::Result;

/// File open mode, mirroring the small mode-mapping table both adapters
/// expose over their respective libraries' native open-option types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteCreateTruncate,
    AppendCreate,
}

/// A store that can hold exactly the one golden image this crate moves
/// around. Implemented by [`nor_fs::NorFs`] and [`sd_fs::SdFs`].
pub trait GoldenImageStore {
    /// Returns true if the golden image file exists.
    fn file_present(&mut self) -> Result<bool>;

    /// Opens the golden image file in the given mode. Only one file may be
    /// open at a time; opening a new one implicitly closes the previous.
    fn open(&mut self, mode: OpenMode) -> Result<()>;

    /// Reads up to `buf.len()` bytes from the currently open file,
    /// returning the number of bytes read (0 at EOF).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Writes all of `buf` to the currently open file.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Size in bytes of the currently open file.
    fn size(&mut self) -> Result<u32>;

    /// Closes the currently open file, if any.
    fn close(&mut self) -> Result<()>;

    /// Deletes the golden image file, if present.
    fn delete(&mut self) -> Result<()>;
}

/// Computes the golden-image CRC-32 by reading the already-open file to
/// EOF through the caller-lent `scratch` buffer, sharing the same
/// accumulator (and its trailing-word wart, see [`crate::crc`]) used on both
/// the SD and the NOR side. `scratch` is the orchestrator's one process-wide
/// transfer buffer -- this helper borrows it for the duration of the call
/// and touches nothing else, preserving the "at most one active user"
/// invariant structurally rather than by convention.
pub fn compute_open_file_crc<S: GoldenImageStore>(store: &mut S, scratch: &mut [u8]) -> Result<u32> {
    let mut acc = Crc32Accumulator::new();
    loop {
        let n = store.read(scratch)?;
        if n == 0 {
            break;
        }
        acc.update(&scratch[..n]);
        if n < scratch.len() {
            break;
        }
    }
    Ok(acc.finish())
}
