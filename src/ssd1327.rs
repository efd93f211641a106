//! SSD1327 128x128 4-bit grayscale OLED, I2C command framing.
//!
//! The driver owns no bus. Each call takes the bus for the duration of one
//! I2C write so the caller can hold the bus lock across a whole refresh.

use display_interface::{DataFormat, DisplayError};
use embedded_hal_async::i2c::{I2c, Operation};
use heapless::Vec;

/// Control byte: the rest of the write is commands
const CONTROL_COMMAND: u8 = 0x00;
/// Control byte: the rest of the write is GDDRAM data
const CONTROL_DATA: u8 = 0x40;

const SET_COLUMN_ADDRESS: u8 = 0x15;
const SET_ROW_ADDRESS: u8 = 0x75;
const SET_REMAP: u8 = 0xA0;
const NORMAL_DISPLAY: u8 = 0xA4;
const ALL_ON: u8 = 0xA5;
const DISPLAY_ON: u8 = 0xAF;

/// Remap values matching the panel mounting
const REMAP_NORMAL: u8 = 0x52;
const REMAP_FLIPPED: u8 = 0x41;

const LAST_COLUMN: u8 = 0x7F;
const LAST_ROW: u8 = 0x7F;

#[derive(Debug, Clone, Copy)]
pub struct Ssd1327 {
    address: u8,
    flip: bool,
}

impl Ssd1327 {
    pub fn new(address: u8, flip: bool) -> Self {
        Self { address, flip }
    }

    async fn send_commands<I: I2c>(&self, bus: &mut I, commands: &[u8]) -> Result<(), DisplayError> {
        let mut frame: Vec<u8, 16> = Vec::new();
        frame.push(CONTROL_COMMAND).map_err(|_| DisplayError::InvalidFormatError)?;
        frame.extend_from_slice(commands).map_err(|_| DisplayError::InvalidFormatError)?;
        bus.write(self.address, &frame).await.map_err(|_| DisplayError::BusWriteError)
    }

    /// Power the panel on with every pixel lit and set the remap for the
    /// mounting orientation.
    pub async fn bring_up<I: I2c>(&self, bus: &mut I) -> Result<(), DisplayError> {
        let remap = if self.flip { REMAP_FLIPPED } else { REMAP_NORMAL };
        self.send_commands(bus, &[ALL_ON, DISPLAY_ON, SET_REMAP, remap]).await
    }

    /// Address the whole panel. With `normal` the all-on test pattern from
    /// bring-up is also switched off.
    pub async fn set_window<I: I2c>(&self, bus: &mut I, normal: bool) -> Result<(), DisplayError> {
        let window = [SET_COLUMN_ADDRESS, 0x00, LAST_COLUMN, SET_ROW_ADDRESS, 0x00, LAST_ROW];
        if normal {
            let mut commands = [NORMAL_DISPLAY; 7];
            commands[1..].copy_from_slice(&window);
            self.send_commands(bus, &commands).await
        } else {
            self.send_commands(bus, &window).await
        }
    }

    /// Stream pixel data into GDDRAM at the current window position.
    pub async fn send_data<I: I2c>(&self, bus: &mut I, data: DataFormat<'_>) -> Result<(), DisplayError> {
        let DataFormat::U8(bytes) = data else {
            return Err(DisplayError::DataFormatNotImplemented);
        };
        bus.transaction(self.address, &mut [Operation::Write(&[CONTROL_DATA]), Operation::Write(bytes)])
            .await
            .map_err(|_| DisplayError::BusWriteError)
    }
}
