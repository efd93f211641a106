//! Device settings.
//!
//! Loaded once at boot from the compiled-in defaults plus a table of named
//! overrides, then shared read-only with every task.

use crate::channel::ChannelConfig;

pub const MAX_ACTION_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// 7-bit I2C address of the CO2 sensor
    pub co2_address: u8,
    pub co2_places: i8,
    pub co2_damp: u32,
    pub temp_places: i8,
    /// Precision of the second probe
    pub otemp_places: i8,
    pub rh_places: i8,
    pub rh_damp: u32,
    /// 7-bit I2C address of the OLED panel
    pub oled_address: u8,
    pub oled_flip: bool,
    /// Show temperature in Fahrenheit
    pub fahrenheit: bool,
    /// Fan actions, `topic[ payload]`
    pub fan_on: &'static str,
    pub fan_off: &'static str,
    /// CO2 ppm above which the fan is switched on
    pub fan_co2: u32,
    pub i2c_frequency: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    UnknownName,
    InvalidValue,
}

impl Settings {
    pub const DEFAULT: Settings = Settings {
        co2_address: 0x61,
        co2_places: -1,
        co2_damp: 100,
        temp_places: 1,
        otemp_places: 1,
        rh_places: 0,
        rh_damp: 10,
        oled_address: 0x3D,
        oled_flip: false,
        fahrenheit: false,
        fan_on: "",
        fan_off: "",
        fan_co2: 1000,
        i2c_frequency: 100_000,
    };

    /// Apply every `(name, value)` pair on top of the defaults. Bad entries are
    /// logged and skipped so a typo never stops the device from booting.
    pub fn load(overrides: &[(&'static str, &'static str)]) -> Self {
        let mut settings = Self::DEFAULT;
        for &(name, value) in overrides {
            match settings.set(name, value) {
                Ok(()) => info!("setting {=str} = {=str}", name, value),
                Err(SettingsError::UnknownName) => warn!("unknown setting {=str}", name),
                Err(SettingsError::InvalidValue) => {
                    warn!("bad value {=str} for setting {=str}", value, name)
                }
            }
        }
        settings
    }

    /// Set one named setting from its textual value.
    pub fn set(&mut self, name: &str, value: &'static str) -> Result<(), SettingsError> {
        match name {
            "co2address" => self.co2_address = parse_int(value)?,
            "co2places" => self.co2_places = parse_int(value)?,
            "co2damp" => self.co2_damp = parse_int(value)?,
            "tempplaces" => self.temp_places = parse_int(value)?,
            "otempplaces" => self.otemp_places = parse_int(value)?,
            "rhplaces" => self.rh_places = parse_int(value)?,
            "rhdamp" => self.rh_damp = parse_int(value)?,
            "oledaddress" => self.oled_address = parse_int(value)?,
            "oledflip" => self.oled_flip = parse_bool(value)?,
            "f" => self.fahrenheit = parse_bool(value)?,
            "fanon" => self.fan_on = parse_action(value)?,
            "fanoff" => self.fan_off = parse_action(value)?,
            "fanco2" => self.fan_co2 = parse_int(value)?,
            "i2cfrequency" => self.i2c_frequency = parse_int(value)?,
            _ => return Err(SettingsError::UnknownName),
        }
        Ok(())
    }

    pub fn co2(&self) -> ChannelConfig {
        ChannelConfig::damped(self.co2_places, self.co2_damp)
    }

    pub fn rh(&self) -> ChannelConfig {
        ChannelConfig::damped(self.rh_places, self.rh_damp)
    }

    pub fn temp(&self) -> ChannelConfig {
        ChannelConfig::raw(self.temp_places)
    }

    pub fn otemp(&self) -> ChannelConfig {
        ChannelConfig::raw(self.otemp_places)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Decimal, or hex with a `0x` prefix, optionally signed.
fn parse_int<T: TryFrom<i64>>(value: &str) -> Result<T, SettingsError> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|_| SettingsError::InvalidValue)?;
    let number = if negative { -magnitude } else { magnitude };
    T::try_from(number).map_err(|_| SettingsError::InvalidValue)
}

fn parse_bool(value: &str) -> Result<bool, SettingsError> {
    match value.trim() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" | "" => Ok(false),
        _ => Err(SettingsError::InvalidValue),
    }
}

fn parse_action(value: &'static str) -> Result<&'static str, SettingsError> {
    if value.len() > MAX_ACTION_LEN {
        return Err(SettingsError::InvalidValue);
    }
    Ok(value)
}
