//! Software timer wheel.
//!
//! A fixed bank of timer slots, each decremented by one tick per call to
//! [`SoftTimerWheel::tick`]. `tick` is meant to be driven from a periodic
//! hardware timer interrupt; everything else runs from the main loop.

use crate::config::SOFT_TIMER_TICK_MS;

#[derive(Clone, Copy)]
struct Slot {
    armed: bool,
    periodic: bool,
    set_ticks: u32,
    current_ticks: u32,
    expired: bool,
}

impl Slot {
    const fn new() -> Self {
        Slot { armed: false, periodic: false, set_ticks: 0, current_ticks: 0, expired: false }
    }
}

fn ms_to_ticks(ms: u32) -> u32 {
    ms / SOFT_TIMER_TICK_MS
}

/// A bank of `N` independent countdown timers. One slot is reserved by
/// convention (slot 0) for the orchestrator's single aperiodic timeout
/// timer, matching the original firmware's dedicated "generic countdown
/// timer" slot.
pub struct SoftTimerWheel<const N: usize> {
    slots: [Slot; N],
}

impl<const N: usize> SoftTimerWheel<N> {
    pub const fn new() -> Self {
        SoftTimerWheel { slots: [Slot::new(); N] }
    }

    /// Registers (or re-registers) a timer with the given timeout and
    /// periodicity. Does not start it -- call [`SoftTimerWheel::start`].
    pub fn register(&mut self, id: usize, timeout_ms: u32, periodic: bool) {
        let ticks = ms_to_ticks(timeout_ms);
        self.slots[id] = Slot { armed: false, periodic, set_ticks: ticks, current_ticks: ticks, expired: false };
    }

    pub fn start(&mut self, id: usize) {
        let slot = &mut self.slots[id];
        slot.current_ticks = slot.set_ticks;
        slot.expired = false;
        slot.armed = true;
    }

    pub fn pause(&mut self, id: usize) {
        self.slots[id].armed = false;
    }

    pub fn is_expired(&self, id: usize) -> bool {
        self.slots[id].expired
    }

    /// True once [`start`](Self::start) has been called and until a
    /// matching [`pause`](Self::pause) or [`register`](Self::register).
    /// Lets a caller tell "never started" apart from "started and still
    /// counting down" without consuming the `expired` latch.
    pub fn is_armed(&self, id: usize) -> bool {
        self.slots[id].armed
    }

    /// Decrements every armed, non-zero slot by one tick. A slot reaching
    /// zero is marked expired; periodic slots reload and stay armed,
    /// aperiodic slots stay at zero until explicitly restarted.
    pub fn tick(&mut self) {
        for slot in self.slots.iter_mut() {
            if !slot.armed || slot.current_ticks == 0 {
                continue;
            }
            slot.current_ticks -= 1;
            if slot.current_ticks == 0 {
                slot.expired = true;
                if slot.periodic {
                    slot.current_ticks = slot.set_ticks;
                }
            }
        }
    }
}

impl<const N: usize> Default for SoftTimerWheel<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience slot index for the single aperiodic countdown timer used to
/// bound XMODEM idle waits and the end-of-run console dwell.
pub const APERIODIC_TIMER_SLOT: usize = 0;
