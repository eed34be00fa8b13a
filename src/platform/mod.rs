//! Concrete OSAL and [`crate::port::Port`] implementations for a given
//! MCU (`spec.md` §2 Component K).
//!
//! The core crate is platform-independent and tested entirely against
//! [`crate::port::mock::MockPort`]; this module is the one place real
//! hardware is touched, gated behind the `esp32` feature so a host build
//! never pulls in `esp-hal`.

#[cfg(feature = "esp32")]
pub mod esp32;
