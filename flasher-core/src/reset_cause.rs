//! Reset-cause classification.
//!
//! Classified once at boot from the MCU's latched reset-status bits, then
//! cleared so the next reset starts from a clean slate. Every cause the
//! silicon can report is kept here for console/log parity even though this
//! crate only ever acts on a subset of them -- brownout and
//! sleep-completion flags in particular are carried through but never
//! consulted, matching the original firmware's behavior exactly.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    PowerOn,
    Pin,
    Software,
    IndependentWatchdog,
    WindowWatchdog,
    LowPower,
    Brownout,
    SleepComplete,
    Unknown,
}

/// Raw reset-status bits as latched by the MCU's reset-and-clock-control
/// peripheral. The board support crate reads these once at boot and hands
/// them to [`classify`] before clearing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawResetFlags {
    pub por: bool,
    pub pin: bool,
    pub sw: bool,
    pub iwdg: bool,
    pub wwdg: bool,
    pub low_power: bool,
    pub brownout: bool,
    pub sleep_complete: bool,
}

/// Classifies the raw flags into a single dominant cause, preferring the
/// most specific explanation when multiple bits are latched at once (as
/// silicon commonly does on a watchdog reset, which also sets the
/// pin-reset bit).
pub fn classify(flags: RawResetFlags) -> ResetCause {
    if flags.iwdg {
        ResetCause::IndependentWatchdog
    } else if flags.wwdg {
        ResetCause::WindowWatchdog
    } else if flags.sw {
        ResetCause::Software
    } else if flags.low_power {
        ResetCause::LowPower
    } else if flags.brownout {
        ResetCause::Brownout
    } else if flags.sleep_complete {
        ResetCause::SleepComplete
    } else if flags.por {
        ResetCause::PowerOn
    } else if flags.pin {
        ResetCause::Pin
    } else {
        ResetCause::Unknown
    }
}
