#![no_std]
#![allow(non_snake_case)]

//! Board bring-up and the concrete types that satisfy `flasher-core`'s
//! hardware-facing traits. Mirrors the way the core bootloader's hardware
//! layer is split out from its portable core: board-specific code lives
//! here, behind a per-board feature flag, while `flasher-core` stays
//! generic over `embedded-hal`.

#[cfg(feature = "stm")]
pub mod stm;

#[cfg(feature = "stm32f411")]
pub use stm::stm32f411::{Board, ConsoleUart, LedTriad1, LedTriad2};
