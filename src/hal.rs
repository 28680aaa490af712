//! Hardware collaborators.
//!
//! Managers own their drivers through these traits. Register-level
//! protocols live in the implementations, outside this crate.

use core::fmt::{self, Write as _};

use embassy_time::Duration;
use ratatui_core::{buffer::Buffer, layout::Rect};

use crate::{config::DisplayConfig, error::Error};

pub trait TemperatureSensor {
    /// Probes the device and applies its register configuration.
    fn initialize(&mut self) -> Result<(), Error>;

    /// Latest conversion, in degrees Celsius.
    fn read_scaled_temperature(&mut self) -> Result<f32, Error>;
}

/// PWM output driving the heater.
pub trait Actuator {
    fn start(&mut self) -> Result<(), Error>;
    fn stop(&mut self) -> Result<(), Error>;
    fn set_drive_level(&mut self, level: u32) -> Result<(), Error>;
}

/// A timer that, while started, raises one notification per period.
pub trait PeriodicTimer {
    fn start(&mut self) -> Result<(), Error>;
    fn stop(&mut self) -> Result<(), Error>;
    fn set_period(&mut self, period: Duration) -> Result<(), Error>;
}

pub trait DisplayDevice {
    fn initialize(&mut self, config: &DisplayConfig) -> Result<(), Error>;

    /// Draws text at a character cell, clearing the rest of that row.
    fn draw_formatted(&mut self, x: u16, y: u16, args: fmt::Arguments<'_>) -> Result<(), Error>;

    /// Pushes the framebuffer to the panel.
    fn present(&mut self) -> Result<(), Error>;
}

/// The bus side of a display: ships a finished frame to the controller.
pub trait DisplayPanel {
    fn flush(&mut self, frame: &Buffer) -> Result<(), Error>;
}

const LINE_CAPACITY: usize = 64;

/// A [`DisplayDevice`] rendering text into an owned character framebuffer.
pub struct FrameBufferDisplay<P> {
    panel: P,
    frame: Buffer,
}

impl<P: DisplayPanel> FrameBufferDisplay<P> {
    pub fn new(panel: P) -> Self {
        Self {
            panel,
            frame: Buffer::empty(Rect::new(0, 0, 0, 0)),
        }
    }

    pub fn frame(&self) -> &Buffer {
        &self.frame
    }

    pub fn panel(&self) -> &P {
        &self.panel
    }

    /// Text of row `y`, trailing blanks included.
    pub fn row_text(&self, y: u16) -> heapless::String<LINE_CAPACITY> {
        let mut row = heapless::String::new();
        for x in 0..self.frame.area.width {
            if let Some(cell) = self.frame.cell((x, y)) {
                let _ = row.push_str(cell.symbol());
            }
        }
        row
    }
}

impl<P: DisplayPanel> DisplayDevice for FrameBufferDisplay<P> {
    fn initialize(&mut self, config: &DisplayConfig) -> Result<(), Error> {
        self.frame = Buffer::empty(Rect::new(0, 0, config.width, config.height));
        self.panel.flush(&self.frame)
    }

    fn draw_formatted(&mut self, x: u16, y: u16, args: fmt::Arguments<'_>) -> Result<(), Error> {
        let area = self.frame.area;
        if x >= area.width || y >= area.height {
            return Err(Error::Fail);
        }

        let mut line = heapless::String::<LINE_CAPACITY>::new();
        line.write_fmt(args).map_err(|_| Error::Fail)?;

        for column in x..area.width {
            if let Some(cell) = self.frame.cell_mut((column, y)) {
                cell.reset();
            }
        }
        // Clipped at the right edge.
        for (column, ch) in (x..area.width).zip(line.chars()) {
            if let Some(cell) = self.frame.cell_mut((column, y)) {
                cell.set_char(ch);
            }
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), Error> {
        self.panel.flush(&self.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingPanel {
        flushes: usize,
    }

    impl DisplayPanel for CountingPanel {
        fn flush(&mut self, _frame: &Buffer) -> Result<(), Error> {
            self.flushes += 1;
            Ok(())
        }
    }

    fn display() -> FrameBufferDisplay<CountingPanel> {
        let mut display = FrameBufferDisplay::new(CountingPanel::default());
        display
            .initialize(&DisplayConfig {
                width: 8,
                height: 2,
            })
            .unwrap();
        display
    }

    #[test]
    fn draws_clipped_rows() {
        let mut display = display();
        display.draw_formatted(2, 1, format_args!("{:.1}C!", 21.3)).unwrap();
        assert_eq!(display.row_text(1).as_str(), "  21.3C!");
        display.draw_formatted(0, 0, format_args!("0123456789")).unwrap();
        assert_eq!(display.row_text(0).as_str(), "01234567");
    }

    #[test]
    fn redraw_clears_stale_text() {
        let mut display = display();
        display.draw_formatted(0, 0, format_args!("longtext")).unwrap();
        display.draw_formatted(0, 0, format_args!("ab")).unwrap();
        assert_eq!(display.row_text(0).as_str(), "ab      ");
    }

    #[test]
    fn out_of_frame_draw_fails() {
        let mut display = display();
        assert_eq!(display.draw_formatted(0, 2, format_args!("x")), Err(Error::Fail));
        assert_eq!(display.draw_formatted(8, 0, format_args!("x")), Err(Error::Fail));
    }

    #[test]
    fn present_flushes_panel() {
        let mut display = display();
        display.present().unwrap();
        assert_eq!(display.panel().flushes, 2);
        assert_eq!(display.frame().area.width, 8);
    }
}
