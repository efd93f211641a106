//! Once-a-second screen update, hourly report refresh and fan control.

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Instant, Timer};
use heapless::String;

use crate::channel::Monitor;
use crate::fan::FanController;
use crate::font::draw_text;
use crate::framebuffer::{Framebuffer, SharedFramebuffer, HEIGHT};
use crate::publish::Publisher;
use crate::settings::Settings;

const MICROS_PER_SECOND: u64 = 1_000_000;

// Readout layout, top to bottom. `y` is each readout's baseline.
const CO2_SIZE: u8 = 4;
const TEMP_SIZE: u8 = 5;
const RH_SIZE: u8 = 3;
const CO2_HEIGHT: i32 = 28;
const TEMP_HEIGHT: i32 = 35;
const RH_HEIGHT: i32 = 21;
/// Room left for the clock line
const CLOCK_HEIGHT: i32 = 9;
const GAP: i32 = (HEIGHT as i32 - CO2_HEIGHT - TEMP_HEIGHT - RH_HEIGHT - CLOCK_HEIGHT) / 3;
const CO2_Y: i32 = HEIGHT as i32 - 1 - CO2_HEIGHT;
const TEMP_Y: i32 = CO2_Y - GAP - TEMP_HEIGHT;
const RH_Y: i32 = TEMP_Y - GAP - RH_HEIGHT;
const TEMP_X: i32 = 10;

pub type ReadoutText = String<8>;
pub type ClockText = String<24>;

/// Calendar time from the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

pub trait WallClock {
    /// Current time, `None` until the clock has been set.
    fn now(&mut self) -> Option<ClockTime>;
}

/// `YYYY-MM-DD`, a 4-unit gap, `HH:MM:SS`. No zone suffix: the RTC keeps
/// none, and the line already nearly fills a size 1 row.
pub fn clock_text(time: &ClockTime) -> ClockText {
    let mut text = ClockText::new();
    let _ = write!(
        text,
        "{:04}-{:02}-{:02}\u{4}{:02}:{:02}:{:02}",
        time.year, time.month, time.day, time.hour, time.minute, time.second
    );
    text
}

fn readout(value: impl core::fmt::Display, width: usize, precision: Option<usize>) -> ReadoutText {
    let mut text = ReadoutText::new();
    let _ = match precision {
        Some(precision) => write!(text, "{:>width$.precision$}", value),
        None => write!(text, "{:>width$}", value),
    };
    text
}

fn filler(text: &str) -> ReadoutText {
    let mut filler = ReadoutText::new();
    let _ = filler.push_str(text);
    filler
}

/// CO2 ppm in four digits. Below 300 or missing shows `____`.
pub fn co2_text(co2: Option<f32>) -> ReadoutText {
    match co2 {
        Some(ppm) if ppm >= 10000.0 => filler("^^^^"),
        Some(ppm) if ppm >= 300.0 => readout(ppm as i32, 4, None),
        _ => filler("____"),
    }
}

/// Temperature as `dd.d` °C or `ddd` °F, rounded to whole degrees.
pub fn temp_text(celsius: Option<f32>, fahrenheit: bool) -> ReadoutText {
    let Some(celsius) = celsius else {
        return filler(if fahrenheit { "___" } else { "__._" });
    };
    if fahrenheit {
        let degrees = libm::roundf((celsius + 40.0) * 1.8 - 40.0) as i32;
        if degrees <= -100 {
            filler("___")
        } else if degrees >= 1000 {
            filler("^^^")
        } else {
            readout(degrees, 3, None)
        }
    } else if celsius <= -10.0 {
        filler("__._")
    } else if celsius >= 100.0 {
        filler("^^.^")
    } else {
        readout(celsius, 4, Some(1))
    }
}

/// Relative humidity in two digits.
pub fn rh_text(rh: Option<f32>) -> ReadoutText {
    match rh {
        Some(rh) if rh >= 100.0 => filler("^^"),
        Some(rh) if rh > 0.0 => readout(rh as i32, 2, None),
        _ => filler("__"),
    }
}

/// What is currently on the panel, so unchanged readouts are not redrawn.
#[derive(Default)]
pub struct Screen {
    clock: Option<ClockText>,
    co2: Option<ReadoutText>,
    temp: Option<ReadoutText>,
    rh: Option<ReadoutText>,
}

fn changed<const N: usize>(shown: &mut Option<String<N>>, text: &String<N>) -> bool {
    if shown.as_ref() == Some(text) {
        return false;
    }
    *shown = Some(text.clone());
    true
}

impl Screen {
    pub fn draw_clock(&mut self, fb: &mut Framebuffer, time: &ClockTime) {
        let text = clock_text(time);
        if changed(&mut self.clock, &text) {
            draw_text(fb, 1, 0, 0, &text);
        }
    }

    pub fn draw_co2(&mut self, fb: &mut Framebuffer, co2: Option<f32>) {
        let text = co2_text(co2);
        if changed(&mut self.co2, &text) {
            let x = draw_text(fb, CO2_SIZE, 0, CO2_Y, &text);
            draw_text(fb, 1, x, CO2_Y + 9, "CO2");
            draw_text(fb, 1, x, CO2_Y, "ppm");
        }
    }

    pub fn draw_temp(&mut self, fb: &mut Framebuffer, celsius: Option<f32>, fahrenheit: bool) {
        let text = temp_text(celsius, fahrenheit);
        if changed(&mut self.temp, &text) {
            let x = draw_text(fb, TEMP_SIZE, TEMP_X, TEMP_Y, &text);
            let x = draw_text(fb, 1, x, TEMP_Y + 12, "o");
            draw_text(fb, 2, x, TEMP_Y, if fahrenheit { "F" } else { "C" });
        }
    }

    pub fn draw_rh(&mut self, fb: &mut Framebuffer, rh: Option<f32>) {
        let text = rh_text(rh);
        if changed(&mut self.rh, &text) {
            let x = draw_text(fb, RH_SIZE, 0, RH_Y, &text);
            let x = draw_text(fb, 2, x, RH_Y, "%");
            draw_text(fb, 1, x, RH_Y + 8, "R");
            draw_text(fb, 1, x, RH_Y, "H");
        }
    }
}

/// Microseconds from `now_us` to the next whole second.
pub fn micros_to_next_second(now_us: u64) -> u64 {
    MICROS_PER_SECOND - now_us % MICROS_PER_SECOND
}

pub struct Orchestrator<'a, P> {
    monitor: &'a Monitor,
    settings: &'a Settings,
    publisher: &'a P,
    fan: FanController,
    screen: Screen,
    last_hour: Option<u32>,
}

impl<'a, P: Publisher> Orchestrator<'a, P> {
    pub fn new(monitor: &'a Monitor, settings: &'a Settings, publisher: &'a P) -> Self {
        Self {
            monitor,
            settings,
            publisher,
            fan: FanController::from_settings(settings),
            screen: Screen::default(),
            last_hour: None,
        }
    }

    /// Re-emit every report and forget the fan state.
    pub fn reconnected(&self) {
        info!("reconnected, resending all reports");
        self.monitor.send_all();
    }

    /// One tick. The hour comes from the wall clock once it is set and
    /// from `uptime_secs` before that.
    pub async fn tick<F: RawMutex>(
        &mut self,
        framebuffer: &SharedFramebuffer<F>,
        now: Option<ClockTime>,
        uptime_secs: u64,
    ) {
        let hour = match now {
            Some(time) => time.hour as u32,
            None => (uptime_secs / 3600) as u32,
        };
        if self.last_hour != Some(hour) {
            self.last_hour = Some(hour);
            debug!("hourly refresh");
            self.monitor.send_all();
        }

        let co2 = self.monitor.co2.current();
        {
            let mut fb = framebuffer.lock().await;
            if let Some(time) = now {
                self.screen.draw_clock(&mut fb, &time);
            }
            self.screen.draw_co2(&mut fb, co2);
            self.screen.draw_temp(&mut fb, self.monitor.temp.current(), self.settings.fahrenheit);
            self.screen.draw_rh(&mut fb, self.monitor.rh.current());
        }

        self.fan.evaluate(co2, &self.monitor.fan, self.publisher);
    }
}

/// Orchestrator task body, ticking on second boundaries.
pub async fn run<F, R, C, P>(
    mut orchestrator: Orchestrator<'_, P>,
    framebuffer: &SharedFramebuffer<F>,
    clock: &mut C,
    reconnect: &Signal<R, ()>,
) -> !
where
    F: RawMutex,
    R: RawMutex,
    C: WallClock,
    P: Publisher,
{
    loop {
        if reconnect.try_take().is_some() {
            orchestrator.reconnected();
        }
        let uptime = Instant::now().as_secs();
        orchestrator.tick(framebuffer, clock.now(), uptime).await;
        Timer::after_micros(micros_to_next_second(Instant::now().as_micros())).await;
    }
}
