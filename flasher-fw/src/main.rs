#![no_std]
#![no_main]

use cortex_m_rt::{entry, exception};

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::{Transfer, Write as SpiWrite};
use embedded_hal::digital::v2::OutputPin;

use flasher_core::console::Console;
use flasher_core::error::{Error, ErrorMask, Result};
use flasher_core::fs::nor_fs::NorFs;
use flasher_core::fs::sd_fs::SdFs;
use flasher_core::fs::{GoldenImageStore, OpenMode};
use flasher_core::indication::TriColorIndicator;
use flasher_core::nor::NorFlash;
use flasher_core::orchestrator::{self, OrchestratorContext, State};
use flasher_core::reset_cause::ResetCause;
use flasher_core::timer::SoftTimerWheel;

use flasher_hal::Board;

const TIMER_SLOTS: usize = 4;

/// Stands in for the SD card when no card answered the mount attempt at
/// boot. Every operation fails the same way `SdCheck`'s `Err` arm expects,
/// so a card-less board still walks the orchestrator's `SD_NOT_FOUND` path
/// instead of panicking.
enum SdSlot<SPI, CS, DELAY> {
    Mounted(SdFs<SPI, CS, DELAY>),
    Absent,
}

impl<SPI, CS, DELAY, E> GoldenImageStore for SdSlot<SPI, CS, DELAY>
where
    SPI: Transfer<u8, Error = E> + SpiWrite<u8, Error = E>,
    CS: OutputPin,
    DELAY: DelayMs<u16>,
{
    fn file_present(&mut self) -> Result<bool> {
        match self {
            SdSlot::Mounted(fs) => fs.file_present(),
            SdSlot::Absent => Err(Error::SdError),
        }
    }
    fn open(&mut self, mode: OpenMode) -> Result<()> {
        match self {
            SdSlot::Mounted(fs) => fs.open(mode),
            SdSlot::Absent => Err(Error::SdError),
        }
    }
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            SdSlot::Mounted(fs) => fs.read(buf),
            SdSlot::Absent => Err(Error::SdError),
        }
    }
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            SdSlot::Mounted(fs) => fs.write(buf),
            SdSlot::Absent => Err(Error::SdError),
        }
    }
    fn size(&mut self) -> Result<u32> {
        match self {
            SdSlot::Mounted(fs) => fs.size(),
            SdSlot::Absent => Err(Error::SdError),
        }
    }
    fn close(&mut self) -> Result<()> {
        match self {
            SdSlot::Mounted(fs) => fs.close(),
            SdSlot::Absent => Ok(()),
        }
    }
    fn delete(&mut self) -> Result<()> {
        match self {
            SdSlot::Mounted(fs) => fs.delete(),
            SdSlot::Absent => Ok(()),
        }
    }
}

fn reset_cause_str(cause: ResetCause) -> &'static str {
    match cause {
        ResetCause::PowerOn => "power-on",
        ResetCause::Pin => "pin",
        ResetCause::Software => "software",
        ResetCause::IndependentWatchdog => "independent watchdog",
        ResetCause::WindowWatchdog => "window watchdog",
        ResetCause::LowPower => "low-power",
        ResetCause::Brownout => "brownout",
        ResetCause::SleepComplete => "sleep-complete",
        ResetCause::Unknown => "unknown",
    }
}

#[entry]
fn main() -> ! {
    let mut board = Board::init();

    let mut console = Console::new(board.console);
    let _ = console.print(
        flasher_core::console::PrintLevel::Lvl0,
        format_args!("\r\nimage flasher, reset cause: {}\r\n", reset_cause_str(board.reset_cause)),
    );

    // NOR init only needs delay for courtesy pacing between busy-bit polls
    // (see `NorFlash::wait_for_ready`), not for a bounded wait, so the
    // cycle-counted `SpinDelay` serves it just as well as the SYST-backed
    // `Delay` -- freeing the latter for the main loop's own tick pacing
    // below. `SpinDelay` is `Copy`, so the same value also goes to the SD
    // card's `SdFs::mount` further down.
    let nor = match NorFlash::init(board.nor_spi, board.nor_cs, board.sd_delay) {
        Ok(nor) => nor,
        // A NOR chip that never answers its JEDEC ID query is a fatal
        // hardware fault, not a transfer-time error: there is no
        // orchestrator state for it to report through.
        Err(_) => fatal(&mut console, &mut board.leds, &mut board.leds2, "nor flash not found"),
    };
    let mut nor_fs = match NorFs::mount(nor) {
        Ok(fs) => fs,
        Err(_) => fatal(&mut console, &mut board.leds, &mut board.leds2, "unable to mount image filesystem"),
    };

    // The SD card may simply not be inserted on an XMODEM-only board; a
    // failed mount here is not fatal, it just leaves `SdSlot::Absent` so
    // an SD-mode run takes the `SD_NOT_FOUND` path instead of panicking.
    let mut sd_fs = match SdFs::mount(board.sd_spi, board.sd_cs, board.sd_delay) {
        Ok(fs) => SdSlot::Mounted(fs),
        Err(_) => SdSlot::Absent,
    };

    let mut indicator = TriColorIndicator::new();
    let mut timers: SoftTimerWheel<TIMER_SLOTS> = SoftTimerWheel::new();
    let mut scratch = [0u8; flasher_core::config::SCRATCH_BUFFER_SIZE];
    let mut state = State::Init;

    // One indicator tick per `BLINK_TIME_BASE_MS`, driven off the same
    // 10 ms loop pace as the timer wheel rather than a second hardware
    // timer -- counts down, not up, so it needs no wraparound handling.
    let mut blink_ticks_remaining: u32 =
        flasher_core::config::BLINK_TIME_BASE_MS / flasher_core::config::SOFT_TIMER_TICK_MS;

    loop {
        // Paces the software timer wheel to a real 10 ms tick. The main
        // loop is the sole writer of `timers`, so this single-threaded
        // polling pace stands in for the hardware tick interrupt the
        // original firmware masked critical sections against -- there is
        // no second context here for a critical section to protect
        // against.
        board.delay.delay_ms(flasher_core::config::SOFT_TIMER_TICK_MS as u8);
        timers.tick();

        blink_ticks_remaining -= 1;
        if blink_ticks_remaining == 0 {
            blink_ticks_remaining =
                flasher_core::config::BLINK_TIME_BASE_MS / flasher_core::config::SOFT_TIMER_TICK_MS;
            indicator.tick();
        }
        board.leds.drive(indicator.levels_triad1());
        board.leds2.drive(indicator.levels_triad2());

        let mut ctx = OrchestratorContext {
            nor: &mut nor_fs,
            sd: &mut sd_fs,
            console: &mut console,
            indicator: &mut indicator,
            timers: &mut timers,
            button: &mut board.button,
            mode: &mut board.mode,
            power: &mut board.power,
            scratch: &mut scratch,
            error_mask: ErrorMask::NONE,
        };

        state = orchestrator::run_once(state, &mut ctx);
    }
}

/// Prints a one-line failure banner, lights both LED triads solid red and
/// never returns: a hardware bring-up failure at boot has no orchestrator
/// state to fall back into. `!` lets callers use this directly as the `Err`
/// arm of a `match` that must produce a value. `blink_on` is always true
/// here rather than driven by a ticked indicator, since nothing paces a
/// tick once this function is reached -- the fatal pattern is steady red
/// at boot instead of its usual 250 ms blink.
fn fatal<T>(
    console: &mut Console<flasher_hal::ConsoleUart>,
    leds: &mut flasher_hal::LedTriad1,
    leds2: &mut flasher_hal::LedTriad2,
    msg: &str,
) -> T {
    let _ = console.print(flasher_core::console::PrintLevel::Lvl0, format_args!("\r\nfatal: {}\r\n", msg));
    let mut indicator = TriColorIndicator::new();
    indicator.indicate(flasher_core::indication::FATAL);
    leds.drive(indicator.levels_triad1());
    leds2.drive(indicator.levels_triad2());
    reset_or_halt()
}

/// In a release build, a fatal condition at boot resets the MCU so the
/// next boot can retry; in a debug build it halts so the condition can be
/// inspected under a debugger instead of looping through the same fault.
fn reset_or_halt() -> ! {
    #[cfg(debug_assertions)]
    loop {
        cortex_m::asm::bkpt();
    }
    #[cfg(not(debug_assertions))]
    cortex_m::peripheral::SCB::sys_reset();
}

/// Hardware fault with no Rust-level panic involved (bad memory access,
/// divide-by-zero, unaligned access on a strict core). Distinct from
/// [`panic`]: the ARM fault vector fires before any panic machinery runs.
#[exception]
fn HardFault(_frame: &cortex_m_rt::ExceptionFrame) -> ! {
    let _ = ErrorMask::ARM_FAULT;
    reset_or_halt()
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    let _ = ErrorMask::ASSERTION_FAILED;
    reset_or_halt()
}
