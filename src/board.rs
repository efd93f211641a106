//! RP2040 board support: pin assignment, the one-wire line, the RTC and the
//! log-backed publisher.

use core::convert::Infallible;

use cortex_m::interrupt;
use defmt::{error, info};
use embassy_rp::gpio::{Flex, Pin, Pull};
use embassy_rp::i2c::{self, Async, I2c};
use embassy_rp::peripherals::{I2C0, RTC};
use embassy_rp::rtc::Rtc;
use embassy_rp::{bind_interrupts, Peripheral, Peripherals};
use embassy_time::{block_for, Duration, Timer};

use envmon_rs::onewire::OneWire;
use envmon_rs::orchestrator::{ClockTime, WallClock};
use envmon_rs::publish::Publisher;

#[cfg(feature = "separate-display-bus")]
use embassy_rp::peripherals::I2C1;

/// Compiled-in setting overrides, applied over the defaults at boot.
pub const SETTINGS: &[(&str, &str)] = &[("fanco2", "1000"), ("oledflip", "0")];

pub type GasBus = I2c<'static, I2C0, Async>;
#[cfg(feature = "separate-display-bus")]
pub type DisplayBus = I2c<'static, I2C1, Async>;
#[cfg(not(feature = "separate-display-bus"))]
pub type DisplayBus = GasBus;

#[cfg(not(feature = "separate-display-bus"))]
bind_interrupts!(pub struct Irqs {
    I2C0_IRQ => i2c::InterruptHandler<I2C0>;
});

#[cfg(feature = "separate-display-bus")]
bind_interrupts!(pub struct Irqs {
    I2C0_IRQ => i2c::InterruptHandler<I2C0>;
    I2C1_IRQ => i2c::InterruptHandler<I2C1>;
});

pub struct Board {
    /// SCD30, and the OLED unless it has its own bus
    pub gas_bus: GasBus,
    #[cfg(feature = "separate-display-bus")]
    pub display_bus: DisplayBus,
    pub onewire: OneWirePin<'static>,
    pub clock: RtcClock,
}

impl Board {
    pub fn new(p: Peripherals, i2c_frequency: u32) -> Self {
        let mut config = i2c::Config::default();
        config.frequency = i2c_frequency;

        // I2C0: SDA GP4, SCL GP5
        let gas_bus = I2c::new_async(p.I2C0, p.PIN_5, p.PIN_4, Irqs, config);

        // I2C1: SDA GP6, SCL GP7
        #[cfg(feature = "separate-display-bus")]
        let display_bus = {
            let mut config = i2c::Config::default();
            config.frequency = i2c_frequency;
            I2c::new_async(p.I2C1, p.PIN_7, p.PIN_6, Irqs, config)
        };

        Self {
            gas_bus,
            #[cfg(feature = "separate-display-bus")]
            display_bus,
            // DS18B20 data line on GP16, 4k7 pull-up fitted
            onewire: OneWirePin::new(p.PIN_16),
            clock: RtcClock::new(Rtc::new(p.RTC)),
        }
    }
}

/// Bit-banged one-wire master on a GPIO, emulating open drain by switching
/// the pin between driving low and floating.
pub struct OneWirePin<'d> {
    pin: Flex<'d>,
}

impl<'d> OneWirePin<'d> {
    pub fn new(pin: impl Peripheral<P = impl Pin> + 'd) -> Self {
        let mut pin = Flex::new(pin);
        pin.set_pull(Pull::Up);
        pin.set_low();
        pin.set_as_input();
        Self { pin }
    }

    fn drive_low(&mut self) {
        self.pin.set_as_output();
    }

    fn release(&mut self) {
        self.pin.set_as_input();
    }
}

impl OneWire for OneWirePin<'_> {
    type Error = Infallible;

    async fn reset(&mut self) -> Result<bool, Infallible> {
        self.drive_low();
        Timer::after_micros(480).await;
        let present = interrupt::free(|_| {
            self.release();
            block_for(Duration::from_micros(70));
            self.pin.is_low()
        });
        Timer::after_micros(410).await;
        Ok(present)
    }

    async fn write_bit(&mut self, bit: bool) -> Result<(), Infallible> {
        let (low, high) = if bit { (6, 64) } else { (60, 10) };
        interrupt::free(|_| {
            self.drive_low();
            block_for(Duration::from_micros(low));
            self.release();
            block_for(Duration::from_micros(high));
        });
        Ok(())
    }

    async fn read_bit(&mut self) -> Result<bool, Infallible> {
        let bit = interrupt::free(|_| {
            self.drive_low();
            block_for(Duration::from_micros(6));
            self.release();
            block_for(Duration::from_micros(9));
            let bit = self.pin.is_high();
            block_for(Duration::from_micros(55));
            bit
        });
        Ok(bit)
    }
}

/// RP2040 RTC as the wall clock. It reads as unset until something sets it.
pub struct RtcClock {
    rtc: Rtc<'static, RTC>,
}

impl RtcClock {
    pub fn new(rtc: Rtc<'static, RTC>) -> Self {
        Self { rtc }
    }
}

impl WallClock for RtcClock {
    fn now(&mut self) -> Option<ClockTime> {
        if !self.rtc.is_running() {
            return None;
        }
        let now = self.rtc.now().ok()?;
        Some(ClockTime {
            year: now.year,
            month: now.month,
            day: now.day,
            hour: now.hour,
            minute: now.minute,
            second: now.second,
        })
    }
}

/// Reports and faults go to the defmt log.
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn report(&self, tag: &str, value: &str) {
        info!("{=str} {=str}", tag, value);
    }

    fn error(&self, tag: &str, message: &str) {
        error!("{=str}: {=str}", tag, message);
    }

    fn emit(&self, topic: &str, payload: &[u8]) {
        info!("{=str} {=[u8]:a}", topic, payload);
    }
}
