//! SCD30 CO2, humidity and temperature sensor.
//!
//! Every word the sensor sends is two bytes followed by a CRC-8, and each
//! measurement is a big-endian `f32` spread over two such words.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::bus::{transaction_timeout, BusArbiter, BusTimeout};
use crate::channel::Monitor;
use crate::conditioner::condition;
use crate::publish::Publisher;
use crate::retry::{Attempt, BoundedRetry, BRING_UP_BACKOFF_MS};
use crate::settings::Settings;

/// Continuous measurement, ambient pressure compensation off
const START_CONTINUOUS: [u8; 5] = [0x00, 0x10, 0x00, 0x00, 0x81];
const GET_READY: [u8; 2] = [0x02, 0x02];
const READ_MEASUREMENT: [u8; 2] = [0x03, 0x00];

pub const MEASUREMENT_LEN: usize = 18;
/// Ready query and data read, plus four address bytes
const POLL_BYTES: usize = 4 + GET_READY.len() + 3 + READ_MEASUREMENT.len() + MEASUREMENT_LEN;

/// Pause between ready queries
pub const POLL_INTERVAL_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum GasError<E> {
    Bus(E),
    Checksum,
    /// The sensor did not finish the exchange in time.
    Timeout,
}

impl<E> From<BusTimeout> for GasError<E> {
    fn from(_: BusTimeout) -> Self {
        GasError::Timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum GasState {
    Configuring,
    Polling,
    /// Bring-up exhausted its retries. Nothing further is attempted.
    Disabled,
}

/// One measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// ppm
    pub co2: f32,
    /// °C
    pub temperature: f32,
    /// %RH
    pub humidity: f32,
}

impl Sample {
    /// Decode a measurement payload, `None` if any word fails its CRC.
    pub fn parse(buf: &[u8; MEASUREMENT_LEN]) -> Option<Self> {
        let mut values = [0f32; 3];
        for (value, group) in values.iter_mut().zip(buf.chunks_exact(6)) {
            let (hi, lo) = group.split_at(3);
            if crc8(&hi[..2]) != hi[2] || crc8(&lo[..2]) != lo[2] {
                return None;
            }
            *value = f32::from_be_bytes([hi[0], hi[1], lo[0], lo[1]]);
        }
        let [co2, temperature, humidity] = values;
        Some(Self { co2, temperature, humidity })
    }
}

/// Sensirion CRC-8: polynomial 0x31, initial value 0xFF.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFFu8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x31 } else { crc << 1 };
        }
    }
    crc
}

pub struct Scd30 {
    address: u8,
    state: GasState,
}

impl Scd30 {
    pub fn new(address: u8) -> Self {
        Self { address, state: GasState::Configuring }
    }

    pub fn state(&self) -> GasState {
        self.state
    }

    /// Start continuous measurement.
    pub async fn start<I: I2c>(&self, bus: &mut I) -> Result<(), GasError<I::Error>> {
        bus.write(self.address, &START_CONTINUOUS).await.map_err(GasError::Bus)
    }

    /// Whether a new measurement is waiting.
    pub async fn data_ready<I: I2c>(&self, bus: &mut I) -> Result<bool, GasError<I::Error>> {
        bus.write(self.address, &GET_READY).await.map_err(GasError::Bus)?;
        let mut buf = [0u8; 3];
        bus.read(self.address, &mut buf).await.map_err(GasError::Bus)?;
        if crc8(&buf[..2]) != buf[2] {
            return Err(GasError::Checksum);
        }
        Ok(u16::from_be_bytes([buf[0], buf[1]]) == 1)
    }

    pub async fn read_measurement<I: I2c>(&self, bus: &mut I) -> Result<Sample, GasError<I::Error>> {
        bus.write(self.address, &READ_MEASUREMENT).await.map_err(GasError::Bus)?;
        let mut buf = [0u8; MEASUREMENT_LEN];
        bus.read(self.address, &mut buf).await.map_err(GasError::Bus)?;
        Sample::parse(&buf).ok_or(GasError::Checksum)
    }

    /// Start the sensor, retrying with back-off. On exhaustion the sensor is
    /// disabled and the last error returned.
    pub async fn bring_up<M, I, D>(
        &mut self,
        arbiter: &BusArbiter<M, I>,
        delay: &mut D,
    ) -> Result<(), GasError<I::Error>>
    where
        M: RawMutex,
        I: I2c,
        D: DelayNs,
    {
        self.state = GasState::Configuring;
        let mut retry = BoundedRetry::bring_up();
        loop {
            let this = &*self;
            let result = arbiter
                .with_bus(transaction_timeout(START_CONTINUOUS.len() + 1), async |bus: &mut I| this.start(bus).await)
                .await
                .unwrap_or_else(|timeout| Err(timeout.into()));
            match result {
                Ok(()) => {
                    info!("CO2 sensor started at {=u8:#x}", self.address);
                    self.state = GasState::Polling;
                    return Ok(());
                }
                Err(e) => match retry.failed() {
                    Attempt::Retry { remaining } => {
                        info!("CO2 sensor start failed, {} attempts left", remaining);
                        delay.delay_ms(BRING_UP_BACKOFF_MS).await;
                    }
                    Attempt::Exhausted => {
                        self.state = GasState::Disabled;
                        return Err(e);
                    }
                },
            }
        }
    }

    /// Ready query and, when ready, the data read, as one bus transaction.
    pub async fn poll_once<M: RawMutex, I: I2c>(
        &self,
        arbiter: &BusArbiter<M, I>,
    ) -> Result<Option<Sample>, GasError<I::Error>> {
        arbiter
            .with_bus(transaction_timeout(POLL_BYTES), async |bus: &mut I| {
                if !self.data_ready(bus).await? {
                    return Ok(None);
                }
                self.read_measurement(bus).await.map(Some)
            })
            .await?
    }
}

/// Feed one measurement to the channels. The sensor's temperature is only
/// used when no one-wire probe owns the channel.
pub fn feed<P: Publisher>(sample: &Sample, monitor: &Monitor, settings: &Settings, publisher: &P) {
    if !monitor.probe_present() {
        condition(&monitor.temp, &settings.temp(), sample.temperature, publisher);
    }
    condition(&monitor.co2, &settings.co2(), sample.co2, publisher);
    condition(&monitor.rh, &settings.rh(), sample.humidity, publisher);
}

/// Gas sensor task body. Returns only if bring-up fails.
pub async fn run<M, I, D, P>(
    mut scd30: Scd30,
    arbiter: &BusArbiter<M, I>,
    mut delay: D,
    monitor: &Monitor,
    settings: &Settings,
    publisher: &P,
) where
    M: RawMutex,
    I: I2c,
    D: DelayNs,
    P: Publisher,
{
    if scd30.bring_up(arbiter, &mut delay).await.is_err() {
        error!("CO2 sensor configuration failed");
        publisher.error("CO2", "Configuration failed");
        return;
    }

    loop {
        delay.delay_ms(POLL_INTERVAL_MS).await;
        match scd30.poll_once(arbiter).await {
            Ok(Some(sample)) => feed(&sample, monitor, settings, publisher),
            Ok(None) => {}
            Err(GasError::Bus(_)) => info!("CO2 sensor bus error"),
            Err(GasError::Checksum) => info!("CO2 sensor checksum error"),
            Err(GasError::Timeout) => info!("CO2 sensor timed out"),
        }
    }
}
