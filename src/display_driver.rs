//! Boundary between the station and the physical panel.
//!
//! A driver receives a finished [`PixelBuffer`] by reference and performs
//! one physical update. It never keeps the buffer: ownership stays with the
//! controller, which hands the same buffer to the composer next cycle.

use crate::pixel_buffer::{Color, PixelBuffer};
use std::io::Write;
use thiserror::Error;

/// How the panel is updated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshMode {
    /// Redraw the content
    Partial,
    /// Clear the panel to white first, then redraw; removes ghosting
    Full,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisplayError {
    /// The panel or its bus reported an error. Not retried.
    #[error("panel hardware fault: {0}")]
    HardwareFault(String),
}

pub trait DisplayDriver {
    /// Physically show `buffer`.
    ///
    /// # Panics
    /// If `buffer` does not match the panel size. That is a composer bug,
    /// not a condition to recover from.
    fn refresh(
        &mut self,
        buffer: &PixelBuffer,
        mode: RefreshMode,
        border: Option<Color>,
    ) -> Result<(), DisplayError>;
}

/// Enforce the buffer size contract of [`DisplayDriver::refresh`].
pub fn assert_panel_size(buffer: &PixelBuffer, width: u32, height: u32) {
    assert!(
        buffer.width() == width && buffer.height() == height,
        "frame buffer is {}x{}, panel is {}x{}",
        buffer.width(),
        buffer.height(),
        width,
        height
    );
}

/// Development driver: prints a down-sampled ASCII rendering of each frame.
pub struct ConsoleDisplay<W> {
    out: W,
    width: u32,
    height: u32,
}

impl ConsoleDisplay<std::io::Stdout> {
    pub fn stdout(width: u32, height: u32) -> Self {
        Self::new(std::io::stdout(), width, height)
    }
}

impl<W: Write> ConsoleDisplay<W> {
    /// Horizontal pixels per character
    const CELL_WIDTH: u32 = 4;
    /// Vertical pixels per character
    const CELL_HEIGHT: u32 = 8;

    pub fn new(out: W, width: u32, height: u32) -> Self {
        Self { out, width, height }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// One character per cell: `#` for mostly ink, `+` for some ink, `r` for red.
    pub fn render(buffer: &PixelBuffer) -> Vec<String> {
        let columns = buffer.width().div_ceil(Self::CELL_WIDTH);
        let rows = buffer.height().div_ceil(Self::CELL_HEIGHT);
        let cell_area = Self::CELL_WIDTH * Self::CELL_HEIGHT;

        (0..rows)
            .map(|row| {
                (0..columns)
                    .map(|column| {
                        let mut black = 0;
                        let mut red = 0;
                        for dy in 0..Self::CELL_HEIGHT {
                            for dx in 0..Self::CELL_WIDTH {
                                let x = column * Self::CELL_WIDTH + dx;
                                let y = row * Self::CELL_HEIGHT + dy;
                                match buffer.pixel(x, y) {
                                    Some(Color::Black) => black += 1,
                                    Some(Color::Red) => red += 1,
                                    _ => {}
                                }
                            }
                        }
                        if red > black {
                            'r'
                        } else if black * 3 >= cell_area {
                            '#'
                        } else if black > 0 {
                            '+'
                        } else {
                            ' '
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

impl<W: Write> DisplayDriver for ConsoleDisplay<W> {
    fn refresh(
        &mut self,
        buffer: &PixelBuffer,
        mode: RefreshMode,
        border: Option<Color>,
    ) -> Result<(), DisplayError> {
        assert_panel_size(buffer, self.width, self.height);

        let edge = match border {
            Some(Color::Black) => '#',
            Some(Color::Red) => 'r',
            _ => '-',
        };
        let lines = Self::render(buffer);
        let columns = buffer.width().div_ceil(Self::CELL_WIDTH) as usize;
        let rule: String = std::iter::repeat(edge).take(columns + 2).collect();

        // Console output is best effort; a closed pipe is not a panel fault
        let _ = writeln!(self.out, "[{:?} refresh]", mode);
        let _ = writeln!(self.out, "{}", rule);
        for line in &lines {
            let _ = writeln!(self.out, "|{}|", line);
        }
        let _ = writeln!(self.out, "{}", rule);
        let _ = self.out.flush();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_buffer::{PANEL_HEIGHT, PANEL_WIDTH};

    #[test]
    fn console_renders_ink_cells() {
        let mut buffer = PixelBuffer::new(8, 8);
        for y in 0..8 {
            for x in 0..4 {
                buffer.set_pixel(x, y, Color::Black);
            }
        }
        buffer.set_pixel(5, 0, Color::Black);

        assert_eq!(ConsoleDisplay::<Vec<u8>>::render(&buffer), vec!["#+".to_string()]);
    }

    #[test]
    fn console_marks_red_cells() {
        let mut buffer = PixelBuffer::new(4, 8);
        buffer.set_pixel(0, 0, Color::Red);
        assert_eq!(ConsoleDisplay::<Vec<u8>>::render(&buffer), vec!["r".to_string()]);
    }

    #[test]
    fn console_refresh_prints_a_frame() {
        let mut display = ConsoleDisplay::new(Vec::new(), PANEL_WIDTH, PANEL_HEIGHT);
        let buffer = PixelBuffer::new(PANEL_WIDTH, PANEL_HEIGHT);

        display
            .refresh(&buffer, RefreshMode::Full, Some(Color::Black))
            .unwrap();

        let output = String::from_utf8(display.into_inner()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[0], "[Full refresh]");
        // 300 / 8 rounded up, plus two rules
        assert_eq!(lines.len(), 1 + 38 + 2);
        assert!(lines[1].starts_with("####"));
        assert_eq!(lines[2].len(), 100 + 2);
    }

    #[test]
    fn console_refresh_of_an_empty_frame_prints_only_rules() {
        let mut display = ConsoleDisplay::new(Vec::new(), 0, 0);

        display
            .refresh(&PixelBuffer::new(0, 0), RefreshMode::Partial, None)
            .unwrap();

        let output = String::from_utf8(display.into_inner()).unwrap();
        assert_eq!(output, "[Partial refresh]\n--\n--\n");
    }

    #[test]
    #[should_panic(expected = "frame buffer is 200x300, panel is 400x300")]
    fn wrong_buffer_size_is_a_bug() {
        let mut display = ConsoleDisplay::new(Vec::new(), PANEL_WIDTH, PANEL_HEIGHT);
        let buffer = PixelBuffer::new(200, 300);
        let _ = display.refresh(&buffer, RefreshMode::Partial, None);
    }
}
