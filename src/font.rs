//! Bitmap text in five sizes.
//!
//! Glyphs come from the embedded-graphics 6x9 font and are scaled up by the
//! size tier, so a size `n` cell is `6n` by `9n` pixels. Lit pixels are drawn
//! at full brightness and the rest of the cell is cleared, which lets a
//! readout be redrawn in place without erasing it first.
//!
//! Coordinates follow the panel's row order: `y` grows upward and names the
//! text baseline, with `2n` rows of descender space below it.

use embedded_graphics::mono_font::ascii::FONT_6X9;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};

use crate::framebuffer::{Framebuffer, DEPTH, MAX_LEVEL, PIXELS_PER_BYTE};

const GLYPH_W: usize = 6;
const GLYPH_H: usize = 9;
pub const MAX_SIZE: u8 = 5;
/// Widest row: a sub-space of 31 units at the largest size
const MAX_ROW_BYTES: usize = 32 * MAX_SIZE as usize * DEPTH / 8;

/// Cell width of a size tier.
pub const fn text_width(size: u8) -> i32 {
    size as i32 * GLYPH_W as i32
}

/// Cell height of a size tier.
pub const fn text_height(size: u8) -> i32 {
    size as i32 * GLYPH_H as i32
}

/// One unscaled glyph.
struct Glyph {
    bits: [[bool; GLYPH_W]; GLYPH_H],
}

impl Glyph {
    fn render(c: char) -> Self {
        let mut glyph = Glyph { bits: [[false; GLYPH_W]; GLYPH_H] };
        let mut utf8 = [0u8; 4];
        let style = MonoTextStyle::new(&FONT_6X9, BinaryColor::On);
        // Drawing into a Glyph cannot fail
        let _ = Text::with_baseline(c.encode_utf8(&mut utf8), Point::zero(), style, Baseline::Top)
            .draw(&mut glyph);
        glyph
    }

    fn lit(&self, col: usize, row: usize) -> bool {
        self.bits[row][col]
    }
}

impl OriginDimensions for Glyph {
    fn size(&self) -> Size {
        Size::new(GLYPH_W as u32, GLYPH_H as u32)
    }
}

impl DrawTarget for Glyph {
    type Color = BinaryColor;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, colour) in pixels {
            if let (Ok(x), Ok(y)) = (usize::try_from(point.x), usize::try_from(point.y)) {
                if x < GLYPH_W && y < GLYPH_H {
                    self.bits[y][x] = colour.is_on();
                }
            }
        }
        Ok(())
    }
}

/// Draw `text` at size 1..=5 with its baseline at `y`, starting at `x`.
/// Returns the x just past the last character so draws can be chained.
///
/// Control characters (below space) are blank gaps `size * c` pixels wide.
/// `.` and `:` are narrowed to `2 * size`. Anything from 0x7F up is skipped.
pub fn draw_text(fb: &mut Framebuffer, size: u8, x: i32, y: i32, text: &str) -> i32 {
    let size = size.clamp(1, MAX_SIZE);
    let scale = size as usize;
    let w = text_width(size);
    let h = text_height(size);
    let y = y - 2 * size as i32;
    let mut x = x;

    for &byte in text.as_bytes() {
        if byte >= 0x7F {
            continue;
        }
        let (glyph, width, first_col) = match byte {
            c if c < b' ' => (Glyph::render(' '), size as i32 * c as i32, 0),
            b'.' | b':' => (Glyph::render(byte as char), 2 * size as i32, 2 * scale),
            c => (Glyph::render(c as char), w, 0),
        };

        let mut row = [0u8; MAX_ROW_BYTES];
        for dy in 0..h {
            row.fill(0);
            let glyph_row = dy as usize / scale;
            for col in 0..width as usize {
                let cell_col = first_col + col;
                if cell_col < w as usize && glyph.lit(cell_col / scale, glyph_row) {
                    let shift = (PIXELS_PER_BYTE - 1 - col % PIXELS_PER_BYTE) * DEPTH;
                    if let Some(packed) = row.get_mut(col / PIXELS_PER_BYTE) {
                        *packed |= MAX_LEVEL << shift;
                    }
                }
            }
            fb.blit(x, y + h - 1 - dy, &row, width);
        }
        x += width;
    }
    x
}
