//! Transfer Orchestrator: the top-level state machine.
//!
//! One state variable, advanced one transition per call to [`run_once`].
//! The original ran this as a `switch` inside an infinite `for(;;)`, with
//! the next state kept in a function-local `static`; here it is an
//! explicit `State` value threaded by the caller, since Rust gives us no
//! `static mut` without `unsafe` and there is no reason to reach for one.

use crate::config::TERMINAL_DWELL_MS;
use crate::console::{Console, ConsoleTransport, PrintLevel};
use crate::error::ErrorMask;
use crate::fs::{compute_open_file_crc, GoldenImageStore, OpenMode};
use crate::indication::{self, TriColorIndicator};
use crate::timer::{SoftTimerWheel, APERIODIC_TIMER_SLOT};
use crate::xmodem::{self, XmodemOutcome};

/// States and transitions as laid out by the appliance's operating model:
///
/// ```text
/// INIT -> STARTUP_MSG -> BUTTON_WAIT
/// BUTTON_WAIT (press) -> FLASH_INIT
/// FLASH_INIT (ok) -> MODE_SELECT        FLASH_INIT (fail) -> FLASH_FAIL
/// MODE_SELECT SD  -> SD_INIT            MODE_SELECT XMODEM -> XMODEM_XFER
/// SD_INIT (ok)    -> SD_CHECK           SD_INIT (fail)    -> SD_FAIL
/// SD_CHECK (present) -> SD_FLASH_XFER   SD_CHECK (miss)   -> SD_FILE_FAIL
/// SD_FLASH_XFER (ok) -> CRC_COMPARE     (fail)            -> XFER_FAIL
/// XMODEM_XFER (ok)   -> XFER_SUCCESS    (fail)            -> XFER_FAIL
/// CRC_COMPARE (match) -> XFER_SUCCESS   (mismatch/err)    -> CRC_FAIL
/// {any *_FAIL, XFER_SUCCESS} -> END
/// END (dwell 5s) -> STARTUP_MSG
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    StartupMsg,
    ButtonWait,
    FlashInit,
    ModeSelect,
    SdInit,
    SdCheck,
    SdFlashXfer,
    XmodemXfer,
    CrcCompare,
    XferSuccess,
    SdFail,
    FlashFail,
    SdFileFail,
    XferFail,
    CrcFail,
    End,
}

pub trait ButtonInput {
    fn is_pressed(&mut self) -> bool;
}

/// GPIO-level transfer-mode select: low selects SD, high selects XMODEM.
pub trait ModeSelect {
    fn is_xmodem_mode(&mut self) -> bool;
}

/// Gates power and SPI bring-up for the external flash target, scoped to
/// exactly the FLASH_INIT/END transitions that need it.
pub trait PowerControl {
    fn enable_and_reinit_spi(&mut self) -> crate::error::Result<()>;
    fn disable_and_deinit_spi(&mut self);
}

/// Everything the orchestrator needs for one pass, borrowed rather than
/// owned so the board binary keeps ownership of its hardware.
///
/// There is no separate XMODEM transport field: the receiver reads and
/// writes the very same UART the leveled console prints through, so it
/// borrows it via `console` (which implements [`crate::xmodem::ByteIo`]
/// whenever its transport does) rather than taking a second handle that
/// could never coexist with the first on real hardware.
pub struct OrchestratorContext<'a, Nor, Sd, Ct, Btn, Mode, Pwr, const N: usize> {
    pub nor: &'a mut Nor,
    pub sd: &'a mut Sd,
    pub console: &'a mut Console<Ct>,
    pub indicator: &'a mut TriColorIndicator,
    pub timers: &'a mut SoftTimerWheel<N>,
    pub button: &'a mut Btn,
    pub mode: &'a mut Mode,
    pub power: &'a mut Pwr,
    pub scratch: &'a mut [u8],
    pub error_mask: ErrorMask,
}

/// Advances the state machine by exactly one transition, performing that
/// transition's side effects (I/O, power gating, indication) along the
/// way. Driven from the board binary's main loop.
pub fn run_once<Nor, Sd, Ct, Btn, Mode, Pwr, const N: usize>(
    state: State,
    ctx: &mut OrchestratorContext<Nor, Sd, Ct, Btn, Mode, Pwr, N>,
) -> State
where
    Nor: GoldenImageStore,
    Sd: GoldenImageStore,
    Ct: ConsoleTransport,
    Btn: ButtonInput,
    Mode: ModeSelect,
    Pwr: PowerControl,
{
    match state {
        State::Init => {
            ctx.error_mask = ErrorMask::NONE;
            State::StartupMsg
        }

        State::StartupMsg => {
            let _ = ctx.console.print(PrintLevel::Lvl0, format_args!("\r\nimage flasher ready\r\n"));
            let _ = ctx.console.print(PrintLevel::Lvl0, format_args!("press the flash button to begin\r\n"));
            ctx.indicator.indicate(indication::IDLE);
            State::ButtonWait
        }

        State::ButtonWait => {
            if ctx.button.is_pressed() {
                State::FlashInit
            } else {
                State::ButtonWait
            }
        }

        State::FlashInit => match ctx.power.enable_and_reinit_spi() {
            Ok(()) => {
                ctx.indicator.indicate(indication::TRANSFER_IN_PROGRESS);
                State::ModeSelect
            }
            Err(_) => {
                ctx.error_mask |= ErrorMask::NOR_NOT_FOUND;
                State::FlashFail
            }
        },

        State::ModeSelect => {
            if ctx.mode.is_xmodem_mode() {
                ctx.indicator.indicate(indication::XMODEM_MODE);
                State::XmodemXfer
            } else {
                ctx.indicator.indicate(indication::SD_MODE);
                State::SdInit
            }
        }

        State::SdInit => {
            // SD bring-up itself is performed by the board binary before
            // the orchestrator starts (the card must already be mounted
            // for `ctx.sd` to exist); this state only confirms the mount
            // the binary performed actually succeeded.
            State::SdCheck
        }

        State::SdCheck => match ctx.sd.file_present() {
            Ok(true) => State::SdFlashXfer,
            Ok(false) => {
                ctx.error_mask |= ErrorMask::SD_FILE_MISSING;
                State::SdFileFail
            }
            Err(_) => {
                ctx.error_mask |= ErrorMask::SD_NOT_FOUND;
                State::SdFail
            }
        },

        State::SdFlashXfer => match sd_flash_xfer(ctx) {
            Ok(()) => State::CrcCompare,
            Err(_) => {
                ctx.error_mask |= ErrorMask::TRANSFER_FAILURE;
                State::XferFail
            }
        },

        State::XmodemXfer => match xmodem::receive(ctx.console, ctx.nor) {
            Ok(XmodemOutcome::Complete) => State::XferSuccess,
            Ok(XmodemOutcome::Aborted) | Err(_) => {
                ctx.error_mask |= ErrorMask::TRANSFER_FAILURE;
                State::XferFail
            }
        },

        // Both a genuine mismatch and an error while running either CRC
        // helper land here with the same bit set -- the spec's own
        // transition table lumps "mismatch/err" into one CRC_FAIL arrow.
        State::CrcCompare => match crc_compare(ctx) {
            Ok(true) => State::XferSuccess,
            Ok(false) | Err(_) => {
                ctx.error_mask |= ErrorMask::CRC_MISMATCH;
                State::CrcFail
            }
        },

        State::XferSuccess => {
            let _ = ctx.console.print(PrintLevel::Lvl0, format_args!("\r\ntransfer complete\r\n"));
            ctx.indicator.indicate(indication::TRANSFER_SUCCESS);
            State::End
        }

        // CRC_FAIL is a genuine terminal state: it prints its own failure
        // banner and proceeds to END. It must never fall through into
        // XFER_SUCCESS's banner.
        State::CrcFail => {
            let _ = ctx.console.print(PrintLevel::Lvl0, format_args!("\r\ncrc mismatch\r\n"));
            ctx.indicator.indicate(indication::CRC_FAIL);
            State::End
        }

        State::SdFail => {
            let _ = ctx.console.print(PrintLevel::Lvl0, format_args!("\r\nsd card error\r\n"));
            ctx.indicator.indicate(indication::TRANSFER_FAILED);
            State::End
        }

        State::FlashFail => {
            let _ = ctx.console.print(PrintLevel::Lvl0, format_args!("\r\nflash init failed\r\n"));
            ctx.indicator.indicate(indication::TRANSFER_FAILED);
            State::End
        }

        State::SdFileFail => {
            let _ = ctx.console.print(PrintLevel::Lvl0, format_args!("\r\ngolden image not found on sd card\r\n"));
            ctx.indicator.indicate(indication::TRANSFER_FAILED);
            State::End
        }

        State::XferFail => {
            let _ = ctx.console.print(PrintLevel::Lvl0, format_args!("\r\ntransfer failed\r\n"));
            ctx.indicator.indicate(indication::TRANSFER_FAILED);
            State::End
        }

        // The terminal dwell is a real-time wait, not a CPU-bound one: the
        // timer only advances via ticks the caller's main loop feeds in at
        // its own pace (see `SoftTimerWheel::tick`'s doc comment), so this
        // state self-loops across calls to `run_once` exactly like
        // `ButtonWait` rather than busy-spinning `tick()` in a tight loop,
        // which would expire the dwell in a handful of instructions instead
        // of five real seconds.
        State::End => {
            if !ctx.timers.is_armed(APERIODIC_TIMER_SLOT) {
                ctx.power.disable_and_deinit_spi();
                ctx.error_mask = ErrorMask::NONE;
                ctx.timers.register(APERIODIC_TIMER_SLOT, TERMINAL_DWELL_MS, false);
                ctx.timers.start(APERIODIC_TIMER_SLOT);
                State::End
            } else if ctx.timers.is_expired(APERIODIC_TIMER_SLOT) {
                ctx.timers.pause(APERIODIC_TIMER_SLOT);
                State::StartupMsg
            } else {
                State::End
            }
        }
    }
}

/// SD -> NOR streamed copy: delete the NOR target first, open source
/// read-only and destination for append (the prior delete makes this
/// equivalent to a fresh write), then stream the scratch buffer's worth of
/// bytes per iteration with one progress tick each, exiting after the
/// first short read.
fn sd_flash_xfer<Nor, Sd, Ct, Btn, Mode, Pwr, const N: usize>(
    ctx: &mut OrchestratorContext<Nor, Sd, Ct, Btn, Mode, Pwr, N>,
) -> crate::error::Result<()>
where
    Nor: GoldenImageStore,
    Sd: GoldenImageStore,
    Ct: ConsoleTransport,
{
    ctx.nor.delete()?;
    ctx.sd.open(OpenMode::ReadOnly)?;
    ctx.nor.open(OpenMode::AppendCreate)?;

    loop {
        let n = ctx.sd.read(ctx.scratch)?;
        if n > 0 {
            ctx.nor.write(&ctx.scratch[..n])?;
            let _ = ctx.console.progress_tick();
        }
        if n < ctx.scratch.len() {
            break;
        }
    }

    let _ = ctx.sd.close();
    let _ = ctx.nor.close();
    Ok(())
}

/// Runs the SD and NOR CRC helpers serially over the shared scratch buffer
/// and compares the 32-bit results.
fn crc_compare<Nor, Sd, Ct, Btn, Mode, Pwr, const N: usize>(
    ctx: &mut OrchestratorContext<Nor, Sd, Ct, Btn, Mode, Pwr, N>,
) -> crate::error::Result<bool>
where
    Nor: GoldenImageStore,
    Sd: GoldenImageStore,
{
    ctx.sd.open(OpenMode::ReadOnly)?;
    let sd_crc = compute_open_file_crc(ctx.sd, ctx.scratch)?;
    let _ = ctx.sd.close();

    ctx.nor.open(OpenMode::ReadOnly)?;
    let nor_crc = compute_open_file_crc(ctx.nor, ctx.scratch)?;
    let _ = ctx.nor.close();

    Ok(sd_crc == nor_crc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleTransport;
    use crate::error::Result;
    use std::vec::Vec;

    struct FakeTransport;
    impl ConsoleTransport for FakeTransport {
        fn transmit(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }
        fn receive(&mut self, _buf: &mut [u8]) -> Result<()> {
            Err(crate::error::Error::ConsoleTimeout)
        }
    }

    #[derive(Default)]
    struct FakeStore {
        data: Vec<u8>,
        cursor: usize,
        open: bool,
        present: bool,
    }
    impl GoldenImageStore for FakeStore {
        fn file_present(&mut self) -> Result<bool> {
            Ok(self.present)
        }
        fn open(&mut self, mode: OpenMode) -> Result<()> {
            self.cursor = 0;
            if mode == OpenMode::WriteCreateTruncate {
                self.data.clear();
            }
            self.open = true;
            Ok(())
        }
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = (self.data.len() - self.cursor).min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.cursor..self.cursor + n]);
            self.cursor += n;
            Ok(n)
        }
        fn write(&mut self, buf: &[u8]) -> Result<()> {
            self.data.extend_from_slice(buf);
            Ok(())
        }
        fn size(&mut self) -> Result<u32> {
            Ok(self.data.len() as u32)
        }
        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }
        fn delete(&mut self) -> Result<()> {
            self.data.clear();
            Ok(())
        }
    }

    /// A store whose mount/presence check itself fails -- distinct from
    /// `present: false`, which models a healthy mount with no file on it.
    struct FailingPresence;
    impl GoldenImageStore for FailingPresence {
        fn file_present(&mut self) -> Result<bool> {
            Err(crate::error::Error::SdError)
        }
        fn open(&mut self, _mode: OpenMode) -> Result<()> {
            Err(crate::error::Error::SdError)
        }
        fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
            Err(crate::error::Error::SdError)
        }
        fn write(&mut self, _buf: &[u8]) -> Result<()> {
            Err(crate::error::Error::SdError)
        }
        fn size(&mut self) -> Result<u32> {
            Err(crate::error::Error::SdError)
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
        fn delete(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct AlwaysPressed;
    impl ButtonInput for AlwaysPressed {
        fn is_pressed(&mut self) -> bool {
            true
        }
    }
    struct SdMode;
    impl ModeSelect for SdMode {
        fn is_xmodem_mode(&mut self) -> bool {
            false
        }
    }
    struct OkPower;
    impl PowerControl for OkPower {
        fn enable_and_reinit_spi(&mut self) -> Result<()> {
            Ok(())
        }
        fn disable_and_deinit_spi(&mut self) {}
    }
    #[test]
    fn full_happy_path_sd_to_crc_success() {
        let mut nor = FakeStore::default();
        let mut sd = FakeStore { data: b"golden-image-bytes".to_vec(), present: true, ..Default::default() };
        let mut console = Console::new(FakeTransport);
        let mut indicator = TriColorIndicator::new();
        let mut timers: SoftTimerWheel<1> = SoftTimerWheel::new();
        let mut button = AlwaysPressed;
        let mut mode = SdMode;
        let mut power = OkPower;
        let mut scratch = [0u8; 8];

        let mut ctx = OrchestratorContext {
            nor: &mut nor,
            sd: &mut sd,
            console: &mut console,
            indicator: &mut indicator,
            timers: &mut timers,
            button: &mut button,
            mode: &mut mode,
            power: &mut power,
            scratch: &mut scratch,
            error_mask: ErrorMask::NONE,
        };

        let mut state = State::Init;
        let mut seen = Vec::new();
        for _ in 0..12 {
            seen.push(state);
            state = run_once(state, &mut ctx);
            if state == State::StartupMsg && seen.contains(&State::XferSuccess) {
                break;
            }
        }

        assert!(seen.contains(&State::SdFlashXfer));
        assert!(seen.contains(&State::CrcCompare));
        assert!(seen.contains(&State::XferSuccess));
        assert!(!seen.contains(&State::CrcFail));
        assert_eq!(nor.data, sd.data);
    }

    #[test]
    fn sd_check_miss_goes_to_sd_file_fail_not_success() {
        let mut nor = FakeStore::default();
        let mut sd = FakeStore { present: false, ..Default::default() };
        let mut console = Console::new(FakeTransport);
        let mut indicator = TriColorIndicator::new();
        let mut timers: SoftTimerWheel<1> = SoftTimerWheel::new();
        let mut button = AlwaysPressed;
        let mut mode = SdMode;
        let mut power = OkPower;
        let mut scratch = [0u8; 8];

        let mut ctx = OrchestratorContext {
            nor: &mut nor, sd: &mut sd, console: &mut console,
            indicator: &mut indicator, timers: &mut timers, button: &mut button,
            mode: &mut mode, power: &mut power, scratch: &mut scratch,
            error_mask: ErrorMask::NONE,
        };

        let mut state = State::SdCheck;
        state = run_once(state, &mut ctx);
        assert_eq!(state, State::SdFileFail);
        assert_eq!(ctx.error_mask, ErrorMask::SD_FILE_MISSING);
        state = run_once(state, &mut ctx);
        assert_eq!(state, State::End);
    }

    #[test]
    fn sd_mount_failure_sets_sd_not_found_bit() {
        let mut nor = FakeStore::default();
        let mut sd = FailingPresence;
        let mut console = Console::new(FakeTransport);
        let mut indicator = TriColorIndicator::new();
        let mut timers: SoftTimerWheel<1> = SoftTimerWheel::new();
        let mut button = AlwaysPressed;
        let mut mode = SdMode;
        let mut power = OkPower;
        let mut scratch = [0u8; 8];

        let mut ctx = OrchestratorContext {
            nor: &mut nor, sd: &mut sd, console: &mut console,
            indicator: &mut indicator, timers: &mut timers, button: &mut button,
            mode: &mut mode, power: &mut power, scratch: &mut scratch,
            error_mask: ErrorMask::NONE,
        };

        let state = run_once(State::SdCheck, &mut ctx);
        assert_eq!(state, State::SdFail);
        assert_eq!(ctx.error_mask, ErrorMask::SD_NOT_FOUND);
    }

    #[test]
    fn end_dwell_waits_for_caller_supplied_ticks_not_a_busy_spin() {
        let mut nor = FakeStore::default();
        let mut sd = FakeStore::default();
        let mut console = Console::new(FakeTransport);
        let mut indicator = TriColorIndicator::new();
        let mut timers: SoftTimerWheel<1> = SoftTimerWheel::new();
        let mut button = AlwaysPressed;
        let mut mode = SdMode;
        let mut power = OkPower;
        let mut scratch = [0u8; 8];

        let mut ctx = OrchestratorContext {
            nor: &mut nor, sd: &mut sd, console: &mut console,
            indicator: &mut indicator, timers: &mut timers, button: &mut button,
            mode: &mut mode, power: &mut power, scratch: &mut scratch,
            error_mask: ErrorMask::NONE,
        };

        // First call arms the dwell timer but does not advance past End --
        // a real main loop would tick the wheel once per real 10ms slice
        // between calls, not inside a single run_once.
        let state = run_once(State::End, &mut ctx);
        assert_eq!(state, State::End);
        assert!(ctx.timers.is_armed(APERIODIC_TIMER_SLOT));
        assert!(!ctx.timers.is_expired(APERIODIC_TIMER_SLOT));

        // Without any ticks fed in, repeated calls stay in End.
        let state = run_once(state, &mut ctx);
        assert_eq!(state, State::End);

        // Once the caller has fed enough ticks for the dwell to elapse,
        // the next call advances to StartupMsg.
        let ticks_needed = TERMINAL_DWELL_MS / crate::config::SOFT_TIMER_TICK_MS;
        for _ in 0..ticks_needed {
            ctx.timers.tick();
        }
        let state = run_once(state, &mut ctx);
        assert_eq!(state, State::StartupMsg);
        assert!(!ctx.timers.is_armed(APERIODIC_TIMER_SLOT));
    }
}
