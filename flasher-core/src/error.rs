use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The crate-wide error type.
pub enum Error {
    /// An operation was attempted in a state that does not permit it.
    InvalidState,
    /// The underlying SPI transaction failed.
    SpiError,
    /// A GPIO operation (chip-select, mode pin, button pin) failed.
    GpioError,
    /// The NOR chip did not become ready within the caller-supplied bound.
    FlashTimeout,
    /// The JEDEC ID read back did not match any known part.
    UnknownPart,
    /// The requested address or length falls outside the device's geometry.
    OutOfRange,
    /// The log-structured filesystem reported an error mounting, formatting,
    /// or operating on a file.
    FsError,
    /// The FAT filesystem reported an error mounting, or operating on a file.
    SdError,
    /// The requested file does not exist.
    FileNotFound,
    /// A file operation was attempted with no file open.
    NoFileOpen,
    /// The console UART did not complete a transfer before its timeout.
    ConsoleTimeout,
    /// Too many consecutive XMODEM packet errors.
    XmodemAborted,
    /// A computed CRC did not match the expected value.
    CrcMismatch,
    /// Something that should be unreachable was reached.
    Unreachable,

    #[doc(hidden)]
    __Nonexhaustive,
}

/// The result type used throughout this crate.
pub type Result<T> = core::result::Result<T, Error>;

#[rustfmt::skip]
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &Error::InvalidState    => write!(f, "operation not permitted in the current state"),
            &Error::SpiError        => write!(f, "SPI transaction failed"),
            &Error::GpioError       => write!(f, "GPIO operation failed"),
            &Error::FlashTimeout    => write!(f, "NOR flash did not become ready in time"),
            &Error::UnknownPart     => write!(f, "unrecognized JEDEC id"),
            &Error::OutOfRange      => write!(f, "address or length out of range"),
            &Error::FsError         => write!(f, "log-structured filesystem error"),
            &Error::SdError         => write!(f, "FAT filesystem error"),
            &Error::FileNotFound    => write!(f, "file not found"),
            &Error::NoFileOpen      => write!(f, "no file is open"),
            &Error::ConsoleTimeout  => write!(f, "console transfer timed out"),
            &Error::XmodemAborted   => write!(f, "too many xmodem errors, transfer aborted"),
            &Error::CrcMismatch     => write!(f, "CRC mismatch"),
            &Error::Unreachable     => write!(f, "an unreachable state was reached"),
            &Error::__Nonexhaustive => unreachable!(),
        }
    }
}

bitflags::bitflags! {
    /// Accumulated error bitmask surfaced on the console at the end of a
    /// transfer attempt. Distinct from [`Error`]: this is the on-device
    /// status word, not a Rust control-flow type. Orthogonal and
    /// accumulating within one orchestrator pass, cleared at `End`. Bit
    /// positions are fixed by the appliance's wire-level status report, not
    /// chosen for Rust convenience -- do not renumber them.
    pub struct ErrorMask: u16 {
        const NONE             = 0x0000;
        /// SD card not found / mount failure.
        const SD_NOT_FOUND     = 0x0001;
        /// SD source file missing.
        const SD_FILE_MISSING  = 0x0002;
        /// NOR not found / FS mount failure.
        const NOR_NOT_FOUND    = 0x0004;
        /// Transfer failure, either path.
        const TRANSFER_FAILURE = 0x0008;
        /// Post-copy CRC mismatch.
        const CRC_MISMATCH     = 0x0010;
        /// HAL error handler invoked.
        const HAL_ERROR        = 0x1000;
        /// ARM fault handler invoked.
        const ARM_FAULT        = 0x2000;
        /// Assertion failed.
        const ASSERTION_FAILED = 0x4000;
        /// Reserved: sleep failure. Never set by this crate; kept for
        /// ABI parity with the status word's bit layout.
        const SLEEP_FAILURE    = 0x8000;
    }
}

impl Default for ErrorMask {
    fn default() -> Self {
        ErrorMask::NONE
    }
}
