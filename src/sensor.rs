//! DS18B20 temperature probes on the one-wire bus.

use embedded_hal_async::delay::DelayNs;

use crate::channel::Monitor;
use crate::conditioner::condition;
use crate::onewire::{self, DeviceSet, OneWire, Rom, MATCH_ROM, SKIP_ROM};
use crate::publish::Publisher;
use crate::settings::Settings;

const CONVERT_T: u8 = 0x44;
const WRITE_SCRATCHPAD: u8 = 0x4E;
const READ_SCRATCHPAD: u8 = 0xBE;

/// Pause between measurement cycles
pub const POLL_INTERVAL_MS: u32 = 100;

/// Resolution settings for temperature readings
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum Resolution {
    Bits9 = 0x1F,  // 0.5°C
    Bits10 = 0x3F, // 0.25°C
    Bits11 = 0x5F, // 0.125°C
    Bits12 = 0x7F, // 0.0625°C
}

impl Resolution {
    /// Worst-case conversion time.
    pub const fn conversion_time_ms(self) -> u32 {
        match self {
            Resolution::Bits9 => 94,
            Resolution::Bits10 => 188,
            Resolution::Bits11 => 375,
            Resolution::Bits12 => 750,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum ProbeError<E> {
    Bus(E),
    /// Nothing answered the reset pulse
    NoPresence,
    Checksum,
}

/// DS18B20 temperature sensor driver
pub struct Ds18b20<W> {
    wire: W,
    resolution: Resolution,
}

impl<W: OneWire> Ds18b20<W> {
    /// Probes power up at 12 bits.
    pub fn new(wire: W) -> Self {
        Self { wire, resolution: Resolution::Bits12 }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    async fn reset(&mut self) -> Result<(), ProbeError<W::Error>> {
        match self.wire.reset().await.map_err(ProbeError::Bus)? {
            true => Ok(()),
            false => Err(ProbeError::NoPresence),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), ProbeError<W::Error>> {
        self.wire.write_bytes(bytes).await.map_err(ProbeError::Bus)
    }

    /// Enumerate every device on the bus.
    pub async fn search(&mut self) -> Result<DeviceSet, ProbeError<W::Error>> {
        onewire::search(&mut self.wire).await.map_err(ProbeError::Bus)
    }

    /// Set the resolution for all devices (broadcast)
    pub async fn set_resolution(&mut self, resolution: Resolution) -> Result<(), ProbeError<W::Error>> {
        self.reset().await?;
        // Th and Tl alarm registers are unused
        self.write(&[SKIP_ROM, WRITE_SCRATCHPAD, 0x00, 0x00, resolution as u8]).await?;
        self.resolution = resolution;
        Ok(())
    }

    /// Start a new measurement on all devices. Allow
    /// [`Resolution::conversion_time_ms`] before reading.
    pub async fn start(&mut self) -> Result<(), ProbeError<W::Error>> {
        self.reset().await?;
        self.write(&[SKIP_ROM, CONVERT_T]).await
    }

    /// Read the last conversion of one device, in °C.
    pub async fn temperature(&mut self, rom: &Rom) -> Result<f32, ProbeError<W::Error>> {
        self.reset().await?;
        self.write(&[MATCH_ROM]).await?;
        self.write(&rom.0).await?;
        self.write(&[READ_SCRATCHPAD]).await?;
        let mut data = [0; 9];
        self.wire.read_bytes(&mut data).await.map_err(ProbeError::Bus)?;
        if onewire::crc8(&data) != 0 {
            return Err(ProbeError::Checksum);
        }
        Ok(i16::from_le_bytes([data[0], data[1]]) as f32 / 16.0)
    }
}

/// Find the probes and set them to 12 bits. An empty set means the
/// temperature channels stay with the gas sensor and no polling happens.
pub async fn discover<W: OneWire, P: Publisher>(probes: &mut Ds18b20<W>, publisher: &P) -> DeviceSet {
    let devices = match probes.search().await {
        Ok(devices) => devices,
        Err(_) => DeviceSet::new(),
    };
    if devices.is_empty() {
        error!("no one-wire temperature probes found");
        publisher.error("temp", "No OWB devices");
        return devices;
    }

    for rom in &devices {
        let hex = rom.hex();
        info!("probe {=[u8]:a}", &hex[..]);
    }
    if probes.set_resolution(Resolution::Bits12).await.is_err() {
        warn!("probe resolution not set");
    }
    devices
}

/// One measurement cycle. The first probe feeds `temp`, the second `otemp`.
/// A probe whose read fails is skipped until the next cycle.
pub async fn poll_once<W: OneWire, D: DelayNs, P: Publisher>(
    probes: &mut Ds18b20<W>,
    devices: &[Rom],
    delay: &mut D,
    monitor: &Monitor,
    settings: &Settings,
    publisher: &P,
) {
    if probes.start().await.is_err() {
        info!("probe conversion not started");
        return;
    }
    delay.delay_ms(probes.resolution().conversion_time_ms()).await;

    let channels = [(&monitor.temp, settings.temp()), (&monitor.otemp, settings.otemp())];
    for (rom, (channel, config)) in devices.iter().zip(channels) {
        match probes.temperature(rom).await {
            Ok(celsius) => {
                condition(channel, &config, celsius, publisher);
            }
            Err(_) => debug!("{=str} probe read skipped", channel.tag()),
        }
    }
}

/// Probe acquisition loop. Returns straight away when nothing was found.
pub async fn run<W: OneWire, D: DelayNs, P: Publisher>(
    mut probes: Ds18b20<W>,
    devices: DeviceSet,
    mut delay: D,
    monitor: &Monitor,
    settings: &Settings,
    publisher: &P,
) {
    if devices.is_empty() {
        return;
    }
    loop {
        delay.delay_ms(POLL_INTERVAL_MS).await;
        poll_once(&mut probes, &devices, &mut delay, monitor, settings, publisher).await;
    }
}
