#[cfg(feature = "stm32f411")]
pub mod stm32f411;
