//! One-wire bus primitives and ROM search.
//!
//! The line driver (timing, pin handling) lives with the board; everything
//! here works in terms of the [`OneWire`] bit and byte operations.

use heapless::Vec;

/// Devices tracked on the bus.
pub const MAX_DEVICES: usize = 8;

pub const SEARCH_ROM: u8 = 0xF0;
pub const MATCH_ROM: u8 = 0x55;
pub const SKIP_ROM: u8 = 0xCC;

/// Discovered devices in search order. Index 0 is the primary probe.
pub type DeviceSet = Vec<Rom, MAX_DEVICES>;

#[allow(async_fn_in_trait)]
pub trait OneWire {
    type Error;

    /// Reset pulse. `true` when at least one device answered with presence.
    async fn reset(&mut self) -> Result<bool, Self::Error>;

    async fn write_bit(&mut self, bit: bool) -> Result<(), Self::Error>;

    async fn read_bit(&mut self) -> Result<bool, Self::Error>;

    /// LSB first.
    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        for &byte in bytes {
            for bit in 0..8 {
                self.write_bit(byte & (1 << bit) != 0).await?;
            }
        }
        Ok(())
    }

    /// LSB first.
    async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        for byte in buf.iter_mut() {
            *byte = 0;
            for bit in 0..8 {
                if self.read_bit().await? {
                    *byte |= 1 << bit;
                }
            }
        }
        Ok(())
    }
}

impl<T: OneWire + ?Sized> OneWire for &mut T {
    type Error = T::Error;

    async fn reset(&mut self) -> Result<bool, Self::Error> {
        (**self).reset().await
    }

    async fn write_bit(&mut self, bit: bool) -> Result<(), Self::Error> {
        (**self).write_bit(bit).await
    }

    async fn read_bit(&mut self) -> Result<bool, Self::Error> {
        (**self).read_bit().await
    }
}

/// 64-bit device ROM code: family, 48-bit serial, CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rom(pub [u8; 8]);

impl Rom {
    pub fn family(&self) -> u8 {
        self.0[0]
    }

    pub fn is_valid(&self) -> bool {
        crc8(&self.0[..7]) == self.0[7]
    }

    /// Hex text, most significant byte (the CRC) first.
    pub fn hex(&self) -> [u8; 16] {
        const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
        let mut hex = [0u8; 16];
        for (i, byte) in self.0.iter().rev().enumerate() {
            hex[i * 2] = DIGITS[(byte >> 4) as usize];
            hex[i * 2 + 1] = DIGITS[(byte & 0xF) as usize];
        }
        hex
    }
}

/// Dallas/Maxim CRC-8 (polynomial 0x31 reflected). Running it over data
/// followed by its CRC yields zero.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &b in data {
        let mut data_byte = b;
        for _ in 0..8 {
            let mix = (crc ^ data_byte) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            data_byte >>= 1;
        }
    }
    crc
}

/// Enumerate the bus with the Search ROM binary-tree walk, stopping after
/// [`MAX_DEVICES`]. ROMs failing their CRC are dropped.
pub async fn search<W: OneWire>(wire: &mut W) -> Result<DeviceSet, W::Error> {
    let mut devices = DeviceSet::new();
    let mut rom = [0u8; 8];
    let mut last_discrepancy = 0usize;

    'search: loop {
        if !wire.reset().await? {
            break;
        }
        wire.write_bytes(&[SEARCH_ROM]).await?;

        let mut last_zero = 0usize;
        for bit_number in 1..=64usize {
            let index = bit_number - 1;
            let id_bit = wire.read_bit().await?;
            let complement_bit = wire.read_bit().await?;

            let direction = match (id_bit, complement_bit) {
                // Nobody left answering
                (true, true) => break 'search,
                (id, complement) if id != complement => id,
                // Devices disagree on this bit
                _ => {
                    let take_one = if bit_number < last_discrepancy {
                        rom[index / 8] & (1 << (index % 8)) != 0
                    } else {
                        bit_number == last_discrepancy
                    };
                    if !take_one {
                        last_zero = bit_number;
                    }
                    take_one
                }
            };

            if direction {
                rom[index / 8] |= 1 << (index % 8);
            } else {
                rom[index / 8] &= !(1 << (index % 8));
            }
            wire.write_bit(direction).await?;
        }

        let found = Rom(rom);
        if found.is_valid() {
            if devices.push(found).is_err() {
                break;
            }
        } else {
            warn!("one-wire ROM failed CRC, skipped");
        }

        last_discrepancy = last_zero;
        if last_discrepancy == 0 || devices.is_full() {
            break;
        }
    }

    Ok(devices)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn test_crc8() {
        assert_eq!(crc8(&[]), 0x00);
        // Maxim application note 27 example
        assert_eq!(crc8(&[0x02, 0x1C, 0xB8, 0x01, 0x00, 0x00, 0x00]), 0xA2);
        assert!(rom(0x42).is_valid());
        let mut corrupt = rom(0x42);
        corrupt.0[3] ^= 0x10;
        assert!(!corrupt.is_valid());
        assert_eq!(crc8(&scratchpad(21.5)), 0);
    }

    #[test]
    fn test_rom_hex() {
        let rom = Rom([0x28, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0xAB]);
        assert_eq!(&rom.hex(), b"AB06050403020128");
        assert_eq!(rom.family(), 0x28);
    }

    #[test]
    fn test_search_finds_every_device() {
        let mut bus = SimBus::with_probes(&[(0x11, 20.0), (0x92, 21.0), (0x13, 22.0), (0x54, 23.0)]);
        let found = block_on(search(&mut bus)).unwrap();
        assert_eq!(found.len(), 4);
        for device in &bus.devices {
            assert!(found.contains(&device.rom));
        }
    }

    #[test]
    fn test_search_single_and_empty_bus() {
        let mut bus = SimBus::with_probes(&[(0x42, 20.0)]);
        let found = block_on(search(&mut bus)).unwrap();
        assert_eq!(found.as_slice(), &[rom(0x42)]);

        let mut empty = SimBus::new(std::vec::Vec::new());
        assert!(block_on(search(&mut empty)).unwrap().is_empty());
    }

    #[test]
    fn test_search_caps_device_count() {
        let probes: std::vec::Vec<(u8, f32)> = (1..=10).map(|s| (s, 20.0)).collect();
        let mut bus = SimBus::with_probes(&probes);
        let found = block_on(search(&mut bus)).unwrap();
        assert_eq!(found.len(), MAX_DEVICES);
    }
}
