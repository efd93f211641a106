//! Damping and report hysteresis, shared by every channel.

use core::fmt::Write;

use heapless::String;

use crate::channel::{Channel, ChannelConfig};
use crate::publish::Publisher;

/// Fraction of a quantum a value must travel past the rounding point before
/// a report fires.
const HYSTERESIS: f32 = 0.3;

pub type ReportText = String<16>;

/// Leaky average: `(prev * window + raw) / (window + 1)`. The first sample
/// of a channel is taken as-is.
pub fn damp(prev: Option<f32>, raw: f32, window: u32) -> f32 {
    let Some(prev) = prev else {
        return raw;
    };
    let weight = window as f32;
    let damped = (prev * weight + raw) / (weight + 1.0);
    // Float rounding must not push the result past either input.
    damped.clamp(prev.min(raw), prev.max(raw))
}

/// Decide whether `proposed` warrants a new report given the `last` one.
/// Returns the rounded value to report, or `None` to stay quiet.
pub fn hysteresis(last: f32, proposed: f32, places: i8) -> Option<f32> {
    let mag = quantum(places);
    let mut value = proposed;
    if value < last {
        value += mag * HYSTERESIS;
        if value > last {
            return None;
        }
    } else if value > last {
        value -= mag * HYSTERESIS;
        if value < last {
            return None;
        }
    }
    let rounded = round_to(value, places);
    (rounded != last).then_some(rounded)
}

/// `10^-places`
fn quantum(places: i8) -> f32 {
    libm::powf(10.0, -(places as f32))
}

fn round_to(value: f32, places: i8) -> f32 {
    if places > 0 {
        let scale = libm::powf(10.0, places as f32);
        libm::roundf(value * scale) / scale
    } else {
        let mag = quantum(places);
        libm::roundf(value / mag) * mag
    }
}

/// Integer when `places <= 0`, otherwise fixed point.
pub fn format_value(value: f32, places: i8) -> ReportText {
    let mut text = ReportText::new();
    // 16 bytes holds any reading this device produces
    let _ = if places <= 0 {
        write!(text, "{}", value as i32)
    } else {
        write!(text, "{:.*}", places as usize, value)
    };
    text
}

/// Push one raw sample through `channel`. Returns the reported value when a
/// report went out.
pub fn condition<P: Publisher>(
    channel: &Channel,
    config: &ChannelConfig,
    raw: f32,
    publisher: &P,
) -> Option<f32> {
    let current = match config.window {
        Some(window) => damp(channel.current(), raw, window),
        None => raw,
    };
    channel.store_current(current);

    let reported = hysteresis(channel.take_last(), current, config.places)?;
    channel.store_last(reported);
    publisher.report(channel.tag(), &format_value(reported, config.places));
    trace!("{=str} reported {}", channel.tag(), reported);
    Some(reported)
}
