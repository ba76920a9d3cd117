//! Waveshare 4.2" B/W/Red V2 panel driver
//!
//! Speaks the SSD1683 command set over any embedded-hal 1.0 SPI device and
//! GPIO pins, following the Waveshare C reference sequence. On the Pi the
//! bus and pins come from linux-embedded-hal (feature `hardware`).
//!
//! Every refresh wakes the controller with a hardware reset, draws, then
//! powers the panel off and puts it into deep sleep. Leaving an e-paper panel
//! powered after drawing damages it over time.

use crate::display_driver::{assert_panel_size, DisplayDriver, DisplayError, RefreshMode};
use crate::pixel_buffer::{Color, PixelBuffer, PANEL_HEIGHT, PANEL_WIDTH};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;
use log::{debug, info};

/// SSD1683 commands used by this driver
mod command {
    pub const POWER_OFF: u8 = 0x02;
    pub const DEEP_SLEEP: u8 = 0x10;
    pub const DATA_ENTRY_MODE: u8 = 0x11;
    pub const SW_RESET: u8 = 0x12;
    pub const TEMPERATURE_SENSOR: u8 = 0x18;
    pub const MASTER_ACTIVATION: u8 = 0x20;
    pub const UPDATE_CONTROL_2: u8 = 0x22;
    pub const WRITE_BLACK_RAM: u8 = 0x24;
    pub const WRITE_RED_RAM: u8 = 0x26;
    pub const BORDER_WAVEFORM: u8 = 0x3C;
    pub const RAM_X_RANGE: u8 = 0x44;
    pub const RAM_Y_RANGE: u8 = 0x45;
    pub const RAM_X_COUNTER: u8 = 0x4E;
    pub const RAM_Y_COUNTER: u8 = 0x4F;
}

/// Polls of the BUSY line before giving up; a tri-colour refresh takes ~15 s
const BUSY_POLL_LIMIT: u32 = 4_000;
const BUSY_POLL_MS: u32 = 10;

/// Largest single SPI write; spidev rejects transfers above its buffer size
const SPI_CHUNK: usize = 4096;

/// Waveshare 4.2" B/W/Red V2 on embedded-hal.
pub struct Epd4in2bV2<SPI, DC, RST, BUSY, DELAY> {
    spi: SPI,
    dc_pin: DC,
    rst_pin: RST,
    busy_pin: BUSY,
    delay: DELAY,
    width: u32,
    height: u32,
}

impl<SPI, DC, RST, BUSY, DELAY> Epd4in2bV2<SPI, DC, RST, BUSY, DELAY>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: InputPin,
    DELAY: DelayNs,
{
    pub fn new(spi: SPI, dc_pin: DC, rst_pin: RST, busy_pin: BUSY, delay: DELAY) -> Self {
        Self {
            spi,
            dc_pin,
            rst_pin,
            busy_pin,
            delay,
            width: PANEL_WIDTH,
            height: PANEL_HEIGHT,
        }
    }

    /// Hardware reset; also the only way out of deep sleep
    fn reset(&mut self) -> Result<(), DisplayError> {
        self.rst_pin.set_high().map_err(fault)?;
        self.delay.delay_ms(200);
        self.rst_pin.set_low().map_err(fault)?;
        self.delay.delay_ms(5);
        self.rst_pin.set_high().map_err(fault)?;
        self.delay.delay_ms(200);
        Ok(())
    }

    fn send_command(&mut self, command: u8) -> Result<(), DisplayError> {
        self.dc_pin.set_low().map_err(fault)?;
        self.spi.write(&[command]).map_err(fault)
    }

    fn send_data(&mut self, data: &[u8]) -> Result<(), DisplayError> {
        self.dc_pin.set_high().map_err(fault)?;
        for chunk in data.chunks(SPI_CHUNK) {
            self.spi.write(chunk).map_err(fault)?;
        }
        Ok(())
    }

    /// Wait while BUSY is high (rev2.2+ modules). A panel that never
    /// releases BUSY is a hardware fault.
    fn wait_until_idle(&mut self) -> Result<(), DisplayError> {
        let mut polls = 0;
        while self.busy_pin.is_high().map_err(fault)? {
            if polls >= BUSY_POLL_LIMIT {
                return Err(DisplayError::HardwareFault(format!(
                    "BUSY stuck high after {} ms",
                    BUSY_POLL_LIMIT * BUSY_POLL_MS
                )));
            }
            self.delay.delay_ms(BUSY_POLL_MS);
            polls += 1;
        }
        Ok(())
    }

    /// Wake, reset and configure the controller for a full-window write.
    pub fn init(&mut self, border: Option<Color>) -> Result<(), DisplayError> {
        self.reset()?;
        self.wait_until_idle()?;
        self.send_command(command::SW_RESET)?;
        self.wait_until_idle()?;

        self.send_command(command::BORDER_WAVEFORM)?;
        self.send_data(&[border_waveform(border)])?;

        self.send_command(command::TEMPERATURE_SENSOR)?;
        self.send_data(&[0x80])?; // internal sensor

        self.send_command(command::DATA_ENTRY_MODE)?;
        self.send_data(&[0x03])?; // X then Y increment

        let last_column = (self.width / 8 - 1) as u8;
        let last_row = self.height - 1;
        self.send_command(command::RAM_X_RANGE)?;
        self.send_data(&[0x00, last_column])?;
        self.send_command(command::RAM_Y_RANGE)?;
        self.send_data(&[0x00, 0x00, (last_row % 256) as u8, (last_row / 256) as u8])?;

        self.send_command(command::RAM_X_COUNTER)?;
        self.send_data(&[0x00])?;
        self.send_command(command::RAM_Y_COUNTER)?;
        self.send_data(&[0x00, 0x00])?;
        self.wait_until_idle()
    }

    fn turn_on_display(&mut self) -> Result<(), DisplayError> {
        self.send_command(command::UPDATE_CONTROL_2)?;
        self.send_data(&[0xF7])?;
        self.send_command(command::MASTER_ACTIVATION)?;
        self.wait_until_idle()
    }

    /// Write both planes and update. The red RAM is inverted relative to
    /// the buffer's red plane.
    pub fn display(&mut self, black: &[u8], red: &[u8]) -> Result<(), DisplayError> {
        self.send_command(command::WRITE_BLACK_RAM)?;
        self.send_data(black)?;

        self.send_command(command::WRITE_RED_RAM)?;
        self.dc_pin.set_high().map_err(fault)?;
        let mut inverted = [0u8; 256];
        for chunk in red.chunks(inverted.len()) {
            for (out, byte) in inverted.iter_mut().zip(chunk) {
                *out = !byte;
            }
            self.spi.write(&inverted[..chunk.len()]).map_err(fault)?;
        }

        self.turn_on_display()
    }

    /// Drive every pixel to white.
    pub fn clear(&mut self) -> Result<(), DisplayError> {
        let plane = PixelBuffer::plane_len(self.width, self.height);
        let white = [0xFFu8; 256];

        self.send_command(command::WRITE_BLACK_RAM)?;
        self.dc_pin.set_high().map_err(fault)?;
        for start in (0..plane).step_by(white.len()) {
            let len = white.len().min(plane - start);
            self.spi.write(&white[..len]).map_err(fault)?;
        }

        // Red RAM is inverted: 0xFF means no red
        self.send_command(command::WRITE_RED_RAM)?;
        self.dc_pin.set_high().map_err(fault)?;
        for start in (0..plane).step_by(white.len()) {
            let len = white.len().min(plane - start);
            self.spi.write(&white[..len]).map_err(fault)?;
        }

        self.turn_on_display()
    }

    fn draw(
        &mut self,
        buffer: &PixelBuffer,
        mode: RefreshMode,
        border: Option<Color>,
    ) -> Result<(), DisplayError> {
        self.init(border)?;
        if mode == RefreshMode::Full {
            self.clear()?;
        }
        self.display(buffer.black_buffer(), buffer.red_buffer())
    }

    /// Power off, then deep sleep. The image persists without power.
    pub fn sleep(&mut self) -> Result<(), DisplayError> {
        self.send_command(command::POWER_OFF)?;
        self.wait_until_idle()?;
        self.send_command(command::DEEP_SLEEP)?;
        self.send_data(&[0x01])
    }
}

impl<SPI, DC, RST, BUSY, DELAY> DisplayDriver for Epd4in2bV2<SPI, DC, RST, BUSY, DELAY>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: InputPin,
    DELAY: DelayNs,
{
    fn refresh(
        &mut self,
        buffer: &PixelBuffer,
        mode: RefreshMode,
        border: Option<Color>,
    ) -> Result<(), DisplayError> {
        assert_panel_size(buffer, self.width, self.height);

        debug!("Panel refresh: {:?}", mode);
        let drawn = self.draw(buffer, mode, border);

        // Sleep even when drawing failed; an awake panel degrades
        let slept = self.sleep();
        drawn.and(slept)?;

        info!("Panel refreshed ({:?})", mode);
        Ok(())
    }
}

/// Border waveform: GS transition following the LUT of the border colour.
fn border_waveform(border: Option<Color>) -> u8 {
    match border {
        Some(Color::Black) => 0x04,
        Some(Color::Red) => 0x06,
        Some(Color::White) | None => 0x05,
    }
}

fn fault<E: core::fmt::Debug>(error: E) -> DisplayError {
    DisplayError::HardwareFault(format!("{:?}", error))
}

#[cfg(all(target_os = "linux", feature = "hardware"))]
pub use self::linux::{open, EpaperDisplay};

#[cfg(all(target_os = "linux", feature = "hardware"))]
mod linux {
    use super::Epd4in2bV2;
    use crate::config::DisplayConfig;
    use crate::pixel_buffer::{PANEL_HEIGHT, PANEL_WIDTH};
    use anyhow::{bail, Context};
    use linux_embedded_hal::{
        gpio_cdev::{Chip, LineRequestFlags},
        spidev::{SpiModeFlags, SpidevOptions},
        CdevPin, Delay, SpidevDevice,
    };

    /// The panel on the Pi's kernel SPI bus and GPIO character device.
    pub type EpaperDisplay = Epd4in2bV2<SpidevDevice, CdevPin, CdevPin, CdevPin, Delay>;

    /// Open the SPI device and request the DC, RST and BUSY lines.
    /// Chip select is driven by the kernel SPI driver.
    ///
    /// The configured size must be the panel's, since every frame the
    /// controller composes is checked against it.
    pub fn open(display: &DisplayConfig) -> anyhow::Result<EpaperDisplay> {
        if (display.width, display.height) != (PANEL_WIDTH, PANEL_HEIGHT) {
            bail!(
                "[display] is {}x{}, the 4.2\" panel is {}x{}",
                display.width,
                display.height,
                PANEL_WIDTH,
                PANEL_HEIGHT
            );
        }
        let hw = &display.hardware;
        let mut spi = SpidevDevice::open(&hw.spi_device)
            .with_context(|| format!("open {}", hw.spi_device))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(4_000_000)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options).context("configure SPI")?;

        let mut chip = Chip::new(&hw.gpiochip).with_context(|| format!("open {}", hw.gpiochip))?;
        let mut output = |offset: u32, name: &str| -> anyhow::Result<CdevPin> {
            let handle = chip
                .get_line(offset)?
                .request(LineRequestFlags::OUTPUT, 0, name)?;
            Ok(CdevPin::new(handle)?)
        };
        let dc = output(hw.dc_pin, "weather-station-dc").context("request DC line")?;
        let rst = output(hw.rst_pin, "weather-station-rst").context("request RST line")?;

        let busy_handle = chip
            .get_line(hw.busy_pin)?
            .request(LineRequestFlags::INPUT, 0, "weather-station-busy")
            .context("request BUSY line")?;
        let busy = CdevPin::new(busy_handle)?;

        Ok(Epd4in2bV2::new(spi, dc, rst, busy, Delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::digital::ErrorType as DigitalErrorType;
    use embedded_hal::spi::{ErrorType as SpiErrorType, Operation};
    use std::cell::RefCell;
    use std::convert::Infallible;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Command(u8),
        Data(Vec<u8>),
        Reset,
    }

    /// Shared view of the wires: DC level and everything sent.
    #[derive(Default)]
    struct Bus {
        dc_high: bool,
        events: Vec<Event>,
    }

    impl Bus {
        /// Commands in order
        fn commands(&self) -> Vec<u8> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Command(c) => Some(*c),
                    _ => None,
                })
                .collect()
        }

        /// Data bytes sent after occurrence number `skip` of `command`
        fn data_after(&self, command: u8, skip: usize) -> Vec<u8> {
            let mut seen = 0;
            let mut collecting = false;
            let mut data = Vec::new();
            for event in &self.events {
                match event {
                    Event::Command(_) if collecting => break,
                    Event::Command(c) if *c == command => {
                        if seen == skip {
                            collecting = true;
                        }
                        seen += 1;
                    }
                    Event::Data(bytes) if collecting => data.extend_from_slice(bytes),
                    _ => {}
                }
            }
            data
        }
    }

    struct MockSpi(Rc<RefCell<Bus>>);

    impl SpiErrorType for MockSpi {
        type Error = Infallible;
    }

    impl SpiDevice for MockSpi {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
            let mut bus = self.0.borrow_mut();
            for op in operations.iter() {
                if let Operation::Write(bytes) = op {
                    let event = if bus.dc_high {
                        Event::Data(bytes.to_vec())
                    } else {
                        Event::Command(bytes[0])
                    };
                    bus.events.push(event);
                }
            }
            Ok(())
        }
    }

    struct DcPin(Rc<RefCell<Bus>>);
    struct RstPin(Rc<RefCell<Bus>>);
    struct BusyPin {
        stuck: bool,
    }
    struct NoDelay;

    impl DigitalErrorType for DcPin {
        type Error = Infallible;
    }
    impl OutputPin for DcPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().dc_high = false;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().dc_high = true;
            Ok(())
        }
    }

    impl DigitalErrorType for RstPin {
        type Error = Infallible;
    }
    impl OutputPin for RstPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().events.push(Event::Reset);
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    impl DigitalErrorType for BusyPin {
        type Error = Infallible;
    }
    impl InputPin for BusyPin {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.stuck)
        }
        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(!self.stuck)
        }
    }

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    fn panel(
        stuck: bool,
    ) -> (
        Epd4in2bV2<MockSpi, DcPin, RstPin, BusyPin, NoDelay>,
        Rc<RefCell<Bus>>,
    ) {
        let bus = Rc::new(RefCell::new(Bus::default()));
        let epd = Epd4in2bV2::new(
            MockSpi(bus.clone()),
            DcPin(bus.clone()),
            RstPin(bus.clone()),
            BusyPin { stuck },
            NoDelay,
        );
        (epd, bus)
    }

    fn frame() -> PixelBuffer {
        let mut buffer = PixelBuffer::new(PANEL_WIDTH, PANEL_HEIGHT);
        buffer.set_pixel(0, 0, Color::Black);
        buffer.set_pixel(9, 0, Color::Red);
        buffer
    }

    #[test]
    fn partial_refresh_draws_once_and_sleeps() {
        let (mut epd, bus) = panel(false);

        epd.refresh(&frame(), RefreshMode::Partial, None).unwrap();

        let bus = bus.borrow();
        let commands = bus.commands();
        assert_eq!(bus.events[0], Event::Reset);
        assert_eq!(commands[0], command::SW_RESET);
        let activations = commands
            .iter()
            .filter(|&&c| c == command::MASTER_ACTIVATION)
            .count();
        assert_eq!(activations, 1);
        assert_eq!(
            &commands[commands.len() - 2..],
            &[command::POWER_OFF, command::DEEP_SLEEP]
        );

        let black = bus.data_after(command::WRITE_BLACK_RAM, 0);
        assert_eq!(black.len(), 15_000);
        assert_eq!(black[0], 0b0111_1111);
        let red = bus.data_after(command::WRITE_RED_RAM, 0);
        assert_eq!(red.len(), 15_000);
        assert_eq!(red[1], !0b0100_0000);
    }

    #[test]
    fn full_refresh_clears_to_white_first() {
        let (mut epd, bus) = panel(false);

        epd.refresh(&frame(), RefreshMode::Full, None).unwrap();

        let bus = bus.borrow();
        let activations = bus
            .commands()
            .iter()
            .filter(|&&c| c == command::MASTER_ACTIVATION)
            .count();
        assert_eq!(activations, 2);

        let cleared = bus.data_after(command::WRITE_BLACK_RAM, 0);
        assert_eq!(cleared.len(), 15_000);
        assert!(cleared.iter().all(|&b| b == 0xFF));
        let drawn = bus.data_after(command::WRITE_BLACK_RAM, 1);
        assert_eq!(drawn[0], 0b0111_1111);
    }

    #[test]
    fn border_colour_selects_waveform() {
        let (mut epd, bus) = panel(false);
        epd.refresh(&frame(), RefreshMode::Partial, Some(Color::Black))
            .unwrap();
        assert_eq!(bus.borrow().data_after(command::BORDER_WAVEFORM, 0), vec![0x04]);

        let (mut epd, bus) = panel(false);
        epd.refresh(&frame(), RefreshMode::Partial, None).unwrap();
        assert_eq!(bus.borrow().data_after(command::BORDER_WAVEFORM, 0), vec![0x05]);
    }

    #[test]
    fn stuck_busy_line_is_a_hardware_fault() {
        let (mut epd, _bus) = panel(true);

        let result = epd.refresh(&frame(), RefreshMode::Partial, None);

        assert!(matches!(result, Err(DisplayError::HardwareFault(_))));
    }

    #[test]
    #[should_panic(expected = "frame buffer is 400x200")]
    fn rejects_wrong_buffer_size() {
        let (mut epd, _bus) = panel(false);
        let _ = epd.refresh(&PixelBuffer::new(400, 200), RefreshMode::Partial, None);
    }
}
