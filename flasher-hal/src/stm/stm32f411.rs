//! STM32F411 board bring-up.
//!
//! Pin assignment (reference design):
//!
//! | Signal              | Pin  |
//! |----------------------|------|
//! | Flash button (active low) | PA0  |
//! | Transfer mode select | PA1  |
//! | Flash power enable   | PC13 |
//! | NOR SPI (SPI2)       | PB13/14/15, CS PB12 |
//! | SD SPI (SPI1)        | PA5/6/7, CS PA4     |
//! | Console UART         | USART2 (PA2/PA3), 115200 8N1 |
//! | Primary LED triad (R/G/B) | PB0/PB1/PB2 |
//! | Secondary LED triad (R1/G1/B1) | PB3/PB4/PB5 |
//! | Soft-timer tick      | paced by `delay_ms`, 10 ms period |

use stm32f4xx_hal as hal;

use hal::delay::Delay;
use hal::gpio::{Alternate, Input, Output, PullUp, PushPull};
use hal::gpio::gpioa::{PA0, PA1, PA4};
use hal::gpio::gpiob::{PB0, PB1, PB12, PB2, PB3, PB4, PB5};
use hal::gpio::gpioc::PC13;
use hal::pac::{SPI1, SPI2, USART2};
use hal::prelude::*;
use hal::serial::{Rx, Serial, Tx};
use hal::spi::Spi;

use embedded_hal::digital::v2::OutputPin;

use flasher_core::console::ConsoleTransport;
use flasher_core::error::{Error, Result};
use flasher_core::indication::TriadLevels;
use flasher_core::orchestrator::{ButtonInput, ModeSelect, PowerControl};
use flasher_core::reset_cause::RawResetFlags;
use flasher_core::xmodem::ByteIo;

/// Reads the RCC's latched reset-status bits and clears them, exactly the
/// classify-then-clear order spec'd for reset-cause handling: a second
/// reset before the cache is read must not see the prior cause.
fn read_and_clear_reset_flags(rcc: &hal::pac::RCC) -> RawResetFlags {
    let csr = rcc.csr.read();
    let flags = RawResetFlags {
        por: csr.porrstf().bit_is_set(),
        pin: csr.pinrstf().bit_is_set(),
        sw: csr.sftrstf().bit_is_set(),
        iwdg: csr.iwdgrstf().bit_is_set(),
        wwdg: csr.wwdgrstf().bit_is_set(),
        low_power: csr.lpwrrstf().bit_is_set(),
        brownout: csr.borrstf().bit_is_set(),
        sleep_complete: false,
    };
    rcc.csr.modify(|_, w| w.rmvf().set_bit());
    flags
}

/// SPI bus + chip-select pair wired to the NOR flash chip (SPI2).
pub type NorSpi = Spi<SPI2, (hal::gpio::gpiob::PB13<Alternate<hal::gpio::AF5>>, hal::gpio::gpiob::PB14<Alternate<hal::gpio::AF5>>, hal::gpio::gpiob::PB15<Alternate<hal::gpio::AF5>>)>;
pub type NorCs = PB12<Output<PushPull>>;

/// SPI bus + chip-select pair wired to the SD card (SPI1).
pub type SdSpi = Spi<SPI1, (hal::gpio::gpioa::PA5<Alternate<hal::gpio::AF5>>, hal::gpio::gpioa::PA6<Alternate<hal::gpio::AF5>>, hal::gpio::gpioa::PA7<Alternate<hal::gpio::AF5>>)>;
pub type SdCs = PA4<Output<PushPull>>;

/// Flash-button input, active low.
pub struct FlashButton {
    pin: PA0<Input<PullUp>>,
}

impl ButtonInput for FlashButton {
    fn is_pressed(&mut self) -> bool {
        self.pin.is_low().unwrap_or(false)
    }
}

/// Transfer-mode select pin: low selects SD, high selects XMODEM.
pub struct ModePin {
    pin: PA1<Input<PullUp>>,
}

impl ModeSelect for ModePin {
    fn is_xmodem_mode(&mut self) -> bool {
        self.pin.is_high().unwrap_or(false)
    }
}

/// Gates power to the external flash target. The SPI peripherals are
/// brought up once at board init and kept alive across passes -- there is
/// no safe way to tear down and recreate an `embedded-hal` SPI instance
/// without `unsafe` PAC access, so "re-init" here is simplified to
/// asserting the power rail; the peripheral clocks were never gated off
/// in the first place.
pub struct FlashPower {
    pin: PC13<Output<PushPull>>,
}

impl PowerControl for FlashPower {
    fn enable_and_reinit_spi(&mut self) -> Result<()> {
        self.pin.set_high().map_err(|_| Error::GpioError)
    }

    fn disable_and_deinit_spi(&mut self) {
        let _ = self.pin.set_low();
    }
}

/// Drives one physical LED triad's push-pull GPIO pins from
/// [`TriadLevels`]. Two instances exist on `Board` -- `leds` and `leds2` --
/// matching [`TriColorIndicator::levels_triad1`]/`levels_triad2`.
pub struct LedTriad<R, G, B> {
    r: R,
    g: G,
    b: B,
}

impl<R, G, B, E> LedTriad<R, G, B>
where
    R: OutputPin<Error = E>,
    G: OutputPin<Error = E>,
    B: OutputPin<Error = E>,
{
    fn set(pin: &mut impl OutputPin<Error = E>, level: bool) {
        let _ = if level { pin.set_high() } else { pin.set_low() };
    }

    /// Writes all three channels. Individual pin-set failures are not
    /// reported -- an indicator LED refusing to light is not a condition
    /// the appliance's error model has a slot for, and failing the whole
    /// drive call would stop the other two channels from updating too.
    pub fn drive(&mut self, levels: TriadLevels) {
        Self::set(&mut self.r, levels.red);
        Self::set(&mut self.g, levels.green);
        Self::set(&mut self.b, levels.blue);
    }
}

pub type LedTriad1 = LedTriad<PB0<Output<PushPull>>, PB1<Output<PushPull>>, PB2<Output<PushPull>>>;
pub type LedTriad2 = LedTriad<PB3<Output<PushPull>>, PB4<Output<PushPull>>, PB5<Output<PushPull>>>;

/// Console/XMODEM transport over USART2. Blocking transmit via
/// `nb::block!`; receive is bounded by `RX_SPIN_BUDGET` polls rather than a
/// hardware timer channel, since this board's UART peripheral exposes no
/// receive-timeout interrupt of its own.
pub struct ConsoleUart {
    tx: Tx<USART2>,
    rx: Rx<USART2>,
}

const RX_SPIN_BUDGET: u32 = 10_000_000;

impl ConsoleUart {
    fn recv_one(&mut self) -> Result<u8> {
        for _ in 0..RX_SPIN_BUDGET {
            match self.rx.read() {
                Ok(b) => return Ok(b),
                Err(nb::Error::WouldBlock) => continue,
                Err(_) => return Err(Error::ConsoleTimeout),
            }
        }
        Err(Error::ConsoleTimeout)
    }
}

impl ConsoleTransport for ConsoleUart {
    fn transmit(&mut self, data: &[u8]) -> Result<()> {
        for &b in data {
            nb::block!(self.tx.write(b)).map_err(|_| Error::ConsoleTimeout)?;
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<()> {
        for slot in buf.iter_mut() {
            *slot = self.recv_one()?;
        }
        Ok(())
    }
}

impl ByteIo for ConsoleUart {
    fn recv_byte(&mut self) -> Result<u8> {
        self.recv_one()
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.receive(buf)
    }

    fn send_byte(&mut self, byte: u8) -> Result<()> {
        nb::block!(self.tx.write(byte)).map_err(|_| Error::ConsoleTimeout)
    }
}

/// Busy-wait delay for the SD card path. The NOR driver claims the board's
/// one `SYST`-backed [`Delay`] for its own bounded wait-for-ready polling;
/// a second owner can't share that peripheral, and the SD card only needs
/// delay for its own power-up backoff, not for a tight polling loop, so a
/// cycle-counted `asm::delay` spin serves it just as well without
/// contending for `SYST`.
#[derive(Clone, Copy)]
pub struct SpinDelay {
    cycles_per_ms: u32,
}

impl SpinDelay {
    fn new(sysclk_hz: u32) -> Self {
        SpinDelay { cycles_per_ms: sysclk_hz / 1000 }
    }
}

impl embedded_hal::blocking::delay::DelayMs<u16> for SpinDelay {
    fn delay_ms(&mut self, ms: u16) {
        cortex_m::asm::delay(self.cycles_per_ms * ms as u32);
    }
}

impl embedded_hal::blocking::delay::DelayMs<u8> for SpinDelay {
    fn delay_ms(&mut self, ms: u8) {
        cortex_m::asm::delay(self.cycles_per_ms * ms as u32);
    }
}

/// All board peripherals, assembled once at startup and handed to the
/// orchestrator's main loop.
///
/// There is no dedicated hardware tick-timer peripheral: the software
/// timer wheel's tick is paced from the main loop by a real `delay_ms`
/// call on `delay` rather than a TIM2 update interrupt. A genuinely
/// interrupt-driven tick would need a `#[interrupt] fn TIM2` vector
/// registered with the NVIC, but the single-threaded main loop here is
/// the only writer of timer state, so masking a tick IRQ around
/// register/start/pause (as the original firmware did) has nothing to
/// protect against -- the loop already serializes every access.
pub struct Board {
    pub button: FlashButton,
    pub mode: ModePin,
    pub power: FlashPower,
    pub console: ConsoleUart,
    pub nor_spi: NorSpi,
    pub nor_cs: NorCs,
    pub sd_spi: SdSpi,
    pub sd_cs: SdCs,
    pub delay: Delay,
    pub sd_delay: SpinDelay,
    /// Primary LED triad (R/G/B).
    pub leds: LedTriad1,
    /// Secondary LED triad (R1/G1/B1), red/blue swapped in hardware.
    pub leds2: LedTriad2,
    /// Classified once, here, before any peripheral that could itself
    /// trigger a reset (watchdog, brownout detector) is reconfigured.
    pub reset_cause: flasher_core::reset_cause::ResetCause,
}

impl Board {
    /// Takes ownership of the device peripherals and brings the board up:
    /// clocks, GPIO, both SPI buses, the console UART at 115200 8N1, and
    /// the 10 ms software-timer tick.
    pub fn init() -> Self {
        let cp = cortex_m::Peripherals::take().expect("core peripherals already taken");
        let dp = hal::pac::Peripherals::take().expect("peripherals already taken");

        // Classify and clear the reset cause before anything else touches
        // RCC -- a watchdog reconfigured later in this function must not be
        // mistaken for the one that caused *this* boot.
        let reset_flags = read_and_clear_reset_flags(&dp.RCC);
        let reset_cause = flasher_core::reset_cause::classify(reset_flags);

        let rcc = dp.RCC.constrain();
        let clocks = rcc.cfgr.sysclk(96.mhz()).freeze();

        let gpioa = dp.GPIOA.split();
        let gpiob = dp.GPIOB.split();
        let gpioc = dp.GPIOC.split();

        let button = FlashButton { pin: gpioa.pa0.into_pull_up_input() };
        let mode = ModePin { pin: gpioa.pa1.into_pull_up_input() };
        let power = FlashPower { pin: gpioc.pc13.into_push_pull_output() };

        let tx_pin = gpioa.pa2.into_alternate_af7();
        let rx_pin = gpioa.pa3.into_alternate_af7();
        let serial = Serial::usart2(
            dp.USART2,
            (tx_pin, rx_pin),
            hal::serial::config::Config::default().baudrate(115_200.bps()),
            clocks,
        )
        .expect("usart2 init failed");
        let (tx, rx) = serial.split();
        let console = ConsoleUart { tx, rx };

        let nor_sck = gpiob.pb13.into_alternate_af5();
        let nor_miso = gpiob.pb14.into_alternate_af5();
        let nor_mosi = gpiob.pb15.into_alternate_af5();
        let nor_spi = Spi::spi2(
            dp.SPI2,
            (nor_sck, nor_miso, nor_mosi),
            embedded_hal::spi::MODE_0,
            8.mhz().into(),
            clocks,
        );
        let nor_cs = gpiob.pb12.into_push_pull_output();

        let sd_sck = gpioa.pa5.into_alternate_af5();
        let sd_miso = gpioa.pa6.into_alternate_af5();
        let sd_mosi = gpioa.pa7.into_alternate_af5();
        let sd_spi = Spi::spi1(
            dp.SPI1,
            (sd_sck, sd_miso, sd_mosi),
            embedded_hal::spi::MODE_0,
            8.mhz().into(),
            clocks,
        );
        let sd_cs = gpioa.pa4.into_push_pull_output();

        let delay = Delay::new(cp.SYST, clocks);
        let sd_delay = SpinDelay::new(clocks.sysclk().0);

        let leds = LedTriad {
            r: gpiob.pb0.into_push_pull_output(),
            g: gpiob.pb1.into_push_pull_output(),
            b: gpiob.pb2.into_push_pull_output(),
        };
        let leds2 = LedTriad {
            r: gpiob.pb3.into_push_pull_output(),
            g: gpiob.pb4.into_push_pull_output(),
            b: gpiob.pb5.into_push_pull_output(),
        };

        Board {
            button, mode, power, console, nor_spi, nor_cs, sd_spi, sd_cs, delay, sd_delay,
            leds, leds2, reset_cause,
        }
    }
}
