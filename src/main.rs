#![no_std]
#![no_main]

use defmt::*;

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Delay;
use static_cell::{ConstStaticCell, StaticCell};

use {defmt_rtt as _, panic_probe as _};

use envmon_rs::bus::BusArbiter;
use envmon_rs::channel::Monitor;
use envmon_rs::display::{self, Display};
use envmon_rs::framebuffer::{self, SharedFramebuffer, BUFFER_SIZE};
use envmon_rs::gas::{self, Scd30};
use envmon_rs::onewire::DeviceSet;
use envmon_rs::orchestrator::{self, Orchestrator};
use envmon_rs::sensor::{self, Ds18b20};
use envmon_rs::settings::Settings;
use envmon_rs::ssd1327::Ssd1327;
use envmon_rs::DEVICE_TAG;

mod board;

use board::{Board, DisplayBus, GasBus, LogPublisher, OneWirePin, RtcClock};

type GasArbiter = BusArbiter<CriticalSectionRawMutex, GasBus>;
type DisplayArbiter = BusArbiter<CriticalSectionRawMutex, DisplayBus>;

static SETTINGS: StaticCell<Settings> = StaticCell::new();
static GAS_BUS: StaticCell<GasArbiter> = StaticCell::new();
#[cfg(feature = "separate-display-bus")]
static DISPLAY_BUS: StaticCell<DisplayArbiter> = StaticCell::new();
static FRAME: ConstStaticCell<[u8; BUFFER_SIZE]> = ConstStaticCell::new([0; BUFFER_SIZE]);

static MONITOR: Monitor = Monitor::new();
static FRAMEBUFFER: SharedFramebuffer<CriticalSectionRawMutex> = framebuffer::shared();
static PUBLISHER: LogPublisher = LogPublisher;
/// Reconnect hook for a telemetry transport: signal it when the link comes
/// back up and every report is resent. `LogPublisher` has no link, so
/// nothing signals it in this build.
static RECONNECT: Signal<CriticalSectionRawMutex, ()> = Signal::new();

#[embassy_executor::task]
async fn gas_task(arbiter: &'static GasArbiter, settings: &'static Settings) {
    let scd30 = Scd30::new(settings.co2_address);
    gas::run(scd30, arbiter, Delay, &MONITOR, settings, &PUBLISHER).await;
    warn!("gas sensor task stopped");
}

#[embassy_executor::task]
async fn probe_task(probes: Ds18b20<OneWirePin<'static>>, devices: DeviceSet, settings: &'static Settings) {
    sensor::run(probes, devices, Delay, &MONITOR, settings, &PUBLISHER).await;
}

#[embassy_executor::task]
async fn display_task(arbiter: &'static DisplayArbiter, frame: &'static mut [u8; BUFFER_SIZE], settings: &'static Settings) {
    let panel = Ssd1327::new(settings.oled_address, settings.oled_flip);
    display::run(Display::new(panel, frame), arbiter, &FRAMEBUFFER, Delay, DEVICE_TAG, &PUBLISHER).await;
    warn!("display task stopped");
}

#[embassy_executor::task]
async fn orchestrator_task(settings: &'static Settings, mut clock: RtcClock) {
    let orchestrator = Orchestrator::new(&MONITOR, settings, &PUBLISHER);
    orchestrator::run(orchestrator, &FRAMEBUFFER, &mut clock, &RECONNECT).await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Program start");
    let peripherals = embassy_rp::init(Default::default());
    let settings: &'static Settings = SETTINGS.init(Settings::load(board::SETTINGS));
    let board = Board::new(peripherals, settings.i2c_frequency);

    let gas_bus: &'static GasArbiter = GAS_BUS.init(BusArbiter::new(board.gas_bus));
    #[cfg(feature = "separate-display-bus")]
    let display_bus: &'static DisplayArbiter = DISPLAY_BUS.init(BusArbiter::new(board.display_bus));
    #[cfg(not(feature = "separate-display-bus"))]
    let display_bus: &'static DisplayArbiter = gas_bus;

    // Probe discovery settles who owns the temperature channel before the
    // gas sensor starts reporting.
    let mut probes = Ds18b20::new(board.onewire);
    let devices = sensor::discover(&mut probes, &PUBLISHER).await;
    MONITOR.set_probe_present(!devices.is_empty());

    spawner.spawn(display_task(display_bus, FRAME.take(), settings)).unwrap();
    spawner.spawn(gas_task(gas_bus, settings)).unwrap();
    if !devices.is_empty() {
        spawner.spawn(probe_task(probes, devices, settings)).unwrap();
    }
    spawner.spawn(orchestrator_task(settings, board.clock)).unwrap();
}
