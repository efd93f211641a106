//! Environmental monitor: CO2, humidity and temperature on a 128x128 OLED.
//!
//! Everything hardware-independent lives here, written against the
//! `embedded-hal` traits so it can be tested on the host:
//!
//! ```text
//! cargo test --lib --target x86_64-unknown-linux-gnu
//! ```
//!
//! The RP2040 wiring (pins, tasks, statics) is in the `envmon_rs` binary.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod bus;
pub mod channel;
pub mod conditioner;
pub mod display;
pub mod fan;
pub mod font;
pub mod framebuffer;
pub mod gas;
pub mod onewire;
pub mod orchestrator;
pub mod publish;
pub mod retry;
pub mod sensor;
pub mod settings;
pub mod ssd1327;

#[cfg(test)]
mod testing;

/// Shown on the panel until the first readouts arrive.
pub const DEVICE_TAG: &str = "envmon";
