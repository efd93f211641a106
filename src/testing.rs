//! Test doubles shared across modules.

use embedded_hal_async::delay::DelayNs;

/// Delay that returns immediately and adds up what it was asked to wait.
#[derive(Default)]
pub struct Delay {
    pub waited_ms: u32,
}

impl DelayNs for Delay {
    async fn delay_ns(&mut self, ns: u32) {
        self.waited_ms += ns / 1_000_000;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.waited_ms += ms;
    }
}
