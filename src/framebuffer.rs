//! Packed grayscale framebuffer for the 128x128 OLED.
//!
//! Pixels are `DEPTH` bits, packed left to right with the leftmost pixel of a
//! byte in its most significant bits, rows of `STRIDE` bytes. This is the
//! panel's native GDDRAM layout, so a refresh streams [`Framebuffer::as_bytes`]
//! unchanged.
//!
//! Every write compares before it stores: the dirty flag is only raised when
//! a stored byte actually changes. Redrawing an unchanged readout therefore
//! costs no panel traffic.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;

pub const WIDTH: usize = 128;
pub const HEIGHT: usize = 128;
/// Bits per pixel
pub const DEPTH: usize = 4;
pub const PIXELS_PER_BYTE: usize = 8 / DEPTH;
/// Bytes per row
pub const STRIDE: usize = WIDTH * DEPTH / 8;
pub const BUFFER_SIZE: usize = STRIDE * HEIGHT;
/// Brightest representable level
pub const MAX_LEVEL: u8 = ((1u16 << DEPTH) - 1) as u8;

/// The framebuffer behind its lock. Producers and the display driver only
/// touch the pixels while holding it.
pub type SharedFramebuffer<M> = Mutex<M, Framebuffer>;

pub const fn shared<M: RawMutex>() -> SharedFramebuffer<M> {
    Mutex::new(Framebuffer::new())
}

pub struct Framebuffer {
    buffer: [u8; BUFFER_SIZE],
    dirty: bool,
}

impl Framebuffer {
    /// Blank, and dirty so the first refresh clears the panel.
    pub const fn new() -> Self {
        Self { buffer: [0; BUFFER_SIZE], dirty: true }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn as_bytes(&self) -> &[u8; BUFFER_SIZE] {
        &self.buffer
    }

    /// Blank every pixel.
    pub fn clear(&mut self) {
        if self.buffer.iter().any(|&b| b != 0) {
            self.buffer.fill(0);
            self.dirty = true;
        }
    }

    /// Byte offset and bit shift of pixel (x, y), `None` off the panel.
    fn locate(x: i32, y: i32) -> Option<(usize, u32)> {
        if x < 0 || y < 0 || x as usize >= WIDTH || y as usize >= HEIGHT {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        let offset = y * STRIDE + x * DEPTH / 8;
        let shift = ((PIXELS_PER_BYTE - 1 - x % PIXELS_PER_BYTE) * DEPTH) as u32;
        Some((offset, shift))
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<u8> {
        let (offset, shift) = Self::locate(x, y)?;
        Some((self.buffer[offset] >> shift) & MAX_LEVEL)
    }

    /// Set one pixel. Off-panel coordinates are ignored and `value` is
    /// clamped to [`MAX_LEVEL`].
    pub fn set_pixel_block(&mut self, x: i32, y: i32, value: u8) {
        let Some((offset, shift)) = Self::locate(x, y) else {
            return;
        };
        let value = value.min(MAX_LEVEL);
        let old = self.buffer[offset];
        let new = (old & !(MAX_LEVEL << shift)) | (value << shift);
        if new != old {
            self.buffer[offset] = new;
            self.dirty = true;
        }
    }

    /// Copy a row of `width` packed pixels from `src` to (x, y).
    ///
    /// `x` and `width` are rounded down to whole bytes. The part of the row
    /// hanging off either side of the panel is dropped. Returns the number
    /// of source bytes the full row occupies.
    pub fn blit(&mut self, x: i32, y: i32, src: &[u8], width: i32) -> usize {
        let ppb = PIXELS_PER_BYTE as i32;
        let mut x = x - x % ppb;
        let width = (width - width % ppb).max(0);
        let row_bytes = width as usize * DEPTH / 8;

        if y < 0 || y as usize >= HEIGHT || x + width <= 0 || x >= WIDTH as i32 {
            return row_bytes;
        }

        let mut pixels = width;
        let mut skip = 0;
        if x < 0 {
            pixels += x;
            skip = (-x) as usize * DEPTH / 8;
            x = 0;
        }
        if x + pixels > WIDTH as i32 {
            pixels = WIDTH as i32 - x;
        }

        let len = pixels as usize * DEPTH / 8;
        let Some(src) = src.get(skip..(skip + len).min(src.len())) else {
            return row_bytes;
        };
        let start = y as usize * STRIDE + x as usize * DEPTH / 8;
        let dst = &mut self.buffer[start..start + src.len()];
        if dst != src {
            dst.copy_from_slice(src);
            self.dirty = true;
        }
        row_bytes
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean() -> Framebuffer {
        let mut fb = Framebuffer::new();
        fb.clear_dirty();
        fb
    }

    #[test]
    fn test_geometry() {
        assert_eq!(STRIDE, 64);
        assert_eq!(BUFFER_SIZE, 8192);
        assert_eq!(MAX_LEVEL, 15);
    }

    #[test]
    fn test_pixel_packing_left_pixel_high_nibble() {
        let mut fb = clean();
        fb.set_pixel_block(0, 0, 0xA);
        fb.set_pixel_block(1, 0, 0x5);
        fb.set_pixel_block(127, 127, 0x3);
        assert_eq!(fb.as_bytes()[0], 0xA5);
        assert_eq!(fb.as_bytes()[BUFFER_SIZE - 1], 0x03);
        assert_eq!(fb.pixel(0, 0), Some(0xA));
        assert_eq!(fb.pixel(1, 0), Some(0x5));
    }

    #[test]
    fn test_same_value_does_not_dirty() {
        let mut fb = clean();
        fb.set_pixel_block(10, 10, 0);
        assert!(!fb.is_dirty());
        fb.set_pixel_block(10, 10, 7);
        assert!(fb.is_dirty());
        fb.clear_dirty();
        fb.set_pixel_block(10, 10, 7);
        assert!(!fb.is_dirty());
    }

    #[test]
    fn test_value_clamped_and_off_panel_ignored() {
        let mut fb = clean();
        fb.set_pixel_block(3, 4, 200);
        assert_eq!(fb.pixel(3, 4), Some(MAX_LEVEL));
        fb.clear_dirty();
        fb.set_pixel_block(-1, 0, 5);
        fb.set_pixel_block(0, 128, 5);
        fb.set_pixel_block(128, 0, 5);
        assert!(!fb.is_dirty());
        assert_eq!(fb.pixel(-1, 0), None);
    }

    #[test]
    fn test_blit_compare_before_write() {
        let mut fb = clean();
        let row = [0x12, 0x34];
        assert_eq!(fb.blit(4, 5, &row, 4), 2);
        assert!(fb.is_dirty());
        assert_eq!(fb.pixel(4, 5), Some(1));
        assert_eq!(fb.pixel(7, 5), Some(4));
        fb.clear_dirty();
        fb.blit(4, 5, &row, 4);
        assert!(!fb.is_dirty());
        fb.blit(4, 5, &[0, 0], 4);
        assert!(fb.is_dirty());
    }

    #[test]
    fn test_blit_aligns_to_bytes() {
        let mut fb = clean();
        // x=5 rounds down to 4, width 5 rounds down to 4
        assert_eq!(fb.blit(5, 0, &[0xFF, 0xFF, 0xFF], 5), 2);
        assert_eq!(fb.pixel(3, 0), Some(0));
        assert_eq!(fb.pixel(4, 0), Some(15));
        assert_eq!(fb.pixel(7, 0), Some(15));
        assert_eq!(fb.pixel(8, 0), Some(0));
    }

    #[test]
    fn test_blit_truncates_at_edges() {
        let mut fb = clean();
        let row = [0x11, 0x22, 0x33, 0x44];
        // Two pixels hang off the left edge
        fb.blit(-2, 1, &row, 8);
        assert_eq!(fb.pixel(0, 1), Some(2));
        assert_eq!(fb.pixel(5, 1), Some(4));
        // Four pixels hang off the right edge
        fb.blit(124, 2, &row, 8);
        assert_eq!(fb.pixel(124, 2), Some(1));
        assert_eq!(fb.pixel(127, 2), Some(2));
        // Entirely off the panel
        fb.clear_dirty();
        fb.blit(-8, 3, &row, 8);
        fb.blit(128, 3, &row, 8);
        fb.blit(0, -1, &row, 8);
        fb.blit(0, 128, &row, 8);
        assert!(!fb.is_dirty());
    }

    #[test]
    fn test_clear_only_dirties_when_needed() {
        let mut fb = clean();
        fb.clear();
        assert!(!fb.is_dirty());
        fb.set_pixel_block(0, 0, 1);
        fb.clear_dirty();
        fb.clear();
        assert!(fb.is_dirty());
        assert_eq!(fb.pixel(0, 0), Some(0));
    }
}
