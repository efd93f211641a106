//! Shared I2C bus arbitration.
//!
//! The gas sensor and the OLED may sit on the same two-wire bus. Every multi
//! step exchange (ready query + data read, window setup + frame data) has to
//! run without the other driver's traffic interleaved, so each one runs under
//! the bus lock for its whole duration. When the two are wired to separate
//! buses each bus gets its own arbiter and the lock is never contended, so no
//! lock spans the two components.
//!
//! A transaction that does not finish in time is dropped and the lock
//! released, so a wedged device costs only its own driver.

use core::ops::AsyncFnOnce;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{with_timeout, Duration};

/// Fixed allowance for any transaction
const BASE_TIMEOUT_US: u64 = 10_000;
/// Slowest configured bus clock
const SLOWEST_BUS_HZ: u64 = 100_000;

/// Time allowed for a transaction moving `bytes` bytes: 10 ms plus nine
/// clocks per byte at 100 kHz.
pub const fn transaction_timeout(bytes: usize) -> Duration {
    Duration::from_micros(BASE_TIMEOUT_US + bytes as u64 * 9 * 1_000_000 / SLOWEST_BUS_HZ)
}

/// The transaction overran its time limit and was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct BusTimeout;

pub struct BusArbiter<M: RawMutex, BUS> {
    bus: Mutex<M, BUS>,
}

impl<M: RawMutex, BUS> BusArbiter<M, BUS> {
    pub const fn new(bus: BUS) -> Self {
        Self { bus: Mutex::new(bus) }
    }

    /// Lock the bus. The guard is the transaction scope; drop it to let the
    /// other driver in.
    pub async fn acquire(&self) -> MutexGuard<'_, M, BUS> {
        self.bus.lock().await
    }

    /// Run `transaction` with exclusive use of the bus, giving up after
    /// `timeout`. The clock starts once the lock is held. The transaction's
    /// own result, errors included, is handed back untouched; retrying is up
    /// to the caller.
    pub async fn with_bus<F, R>(&self, timeout: Duration, transaction: F) -> Result<R, BusTimeout>
    where
        F: AsyncFnOnce(&mut BUS) -> R,
    {
        let mut bus = self.bus.lock().await;
        with_timeout(timeout, transaction(&mut *bus)).await.map_err(|_| {
            warn!("bus transaction timed out");
            BusTimeout
        })
    }
}
