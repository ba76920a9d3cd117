//! Frame buffer for the 4.2" B/W/Red e-paper panel.
//!
//! Two 1-bit planes laid out the way the panel controller reads them: rows of
//! bytes, eight horizontal pixels per byte, MSB first. In the black plane a set
//! bit is white; in the red plane a set bit is red.
//!
//! The buffer is allocated once at start-up and moved between owners every
//! cycle; `clear` resets it in place.

use embedded_graphics::{pixelcolor::BinaryColor, prelude::*};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

/// Panel dimensions
pub const PANEL_WIDTH: u32 = 400;
pub const PANEL_HEIGHT: u32 = 300;

/// Panel colours
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
    Red,
}

/// Fixed-size two-plane frame buffer
#[derive(Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    black_buffer: Vec<u8>,
    red_buffer: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let buffer_size = Self::plane_len(width, height);
        Self {
            width,
            height,
            black_buffer: vec![0xFF; buffer_size], // White by default
            red_buffer: vec![0x00; buffer_size],   // No red by default
        }
    }

    /// Bytes per plane for a panel of the given size
    pub fn plane_len(width: u32, height: u32) -> usize {
        (width.div_ceil(8) * height) as usize
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn clear(&mut self, color: Color) {
        match color {
            Color::White => {
                self.black_buffer.fill(0xFF);
                self.red_buffer.fill(0x00);
            }
            Color::Black => {
                self.black_buffer.fill(0x00);
                self.red_buffer.fill(0x00);
            }
            Color::Red => {
                self.black_buffer.fill(0xFF);
                self.red_buffer.fill(0xFF);
            }
        }
    }

    pub fn black_buffer(&self) -> &[u8] {
        &self.black_buffer
    }

    pub fn red_buffer(&self) -> &[u8] {
        &self.red_buffer
    }

    fn index(&self, x: u32, y: u32) -> Option<(usize, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bytes_per_row = self.width.div_ceil(8);
        let byte_index = (y * bytes_per_row + x / 8) as usize;
        Some((byte_index, 0x80 >> (x % 8)))
    }

    /// Set one pixel; coordinates outside the panel are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        let Some((byte_index, bit_mask)) = self.index(x, y) else {
            return;
        };

        match color {
            Color::White => {
                self.black_buffer[byte_index] |= bit_mask;
                self.red_buffer[byte_index] &= !bit_mask;
            }
            Color::Black => {
                self.black_buffer[byte_index] &= !bit_mask;
                self.red_buffer[byte_index] &= !bit_mask;
            }
            Color::Red => {
                self.black_buffer[byte_index] |= bit_mask;
                self.red_buffer[byte_index] |= bit_mask;
            }
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        let (byte_index, bit_mask) = self.index(x, y)?;
        if self.red_buffer[byte_index] & bit_mask != 0 {
            Some(Color::Red)
        } else if self.black_buffer[byte_index] & bit_mask == 0 {
            Some(Color::Black)
        } else {
            Some(Color::White)
        }
    }

    /// Number of non-white pixels
    pub fn ink_count(&self) -> u32 {
        let black = self.black_buffer.iter().map(|&b| b.count_zeros()).sum::<u32>();
        let red = self.red_buffer.iter().map(|&b| b.count_ones()).sum::<u32>();
        black + red
    }
}

impl OriginDimensions for PixelBuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Text and primitives draw black ink (`On`) on white paper (`Off`).
impl DrawTarget for PixelBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            let color = match color {
                BinaryColor::On => Color::Black,
                BinaryColor::Off => Color::White,
            };
            self.set_pixel(point.x as u32, point.y as u32, color);
        }
        Ok(())
    }
}
