//! # Weather Icons
//!
//! Small 1-bit icons for the four forecast slots, plus the bitmap type shared
//! with the large "Now" image.
//!
//! The icons are drawn once at start-up from embedded-graphics primitives into
//! a fixed table indexed by [`IconKind`]; after that, composing a frame only
//! blits bitmaps. Forecast symbol codes map onto the table through a static
//! lookup, and anything not in it resolves to [`IconKind::Fallback`].

use embedded_graphics::{
    image::{Image, ImageRaw},
    mono_font::{ascii::FONT_10X20, MonoTextStyle},
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{Circle, Line, Polyline, PrimitiveStyle, Rectangle},
    text::{Alignment, Text},
};
use std::convert::Infallible;
use thiserror::Error;

/// Edge length of a small slot icon
pub const ICON_SIZE: u32 = 48;

/// Why an icon or image could not be used. Resolved by falling back, never surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    /// Symbol code not in the lookup table
    #[error("no icon for symbol '{0}'")]
    Missing(String),

    /// Image service unreachable or not configured
    #[error("image unavailable: {0}")]
    Unavailable(String),

    /// Payload of the wrong size for the expected bitmap
    #[error("malformed bitmap: expected {expected} bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },
}

/// A packed 1-bit bitmap: rows of bytes, MSB first, a set bit is ink.
///
/// This is the layout `ImageRaw<BinaryColor>` reads, so blitting needs no
/// conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonoBitmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl MonoBitmap {
    /// Blank (all paper) bitmap
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0x00; Self::byte_len(width, height)],
        }
    }

    /// Wrap raw packed bytes, rejecting payloads of the wrong length.
    pub fn from_bytes(width: u32, height: u32, bytes: &[u8]) -> Result<Self, AssetError> {
        let expected = Self::byte_len(width, height);
        if bytes.len() != expected {
            return Err(AssetError::Malformed {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data: bytes.to_vec(),
        })
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        (width.div_ceil(8) * height) as usize
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let index = (y * self.width.div_ceil(8) + x / 8) as usize;
        self.data[index] & (0x80 >> (x % 8)) != 0
    }

    pub fn ink_count(&self) -> u32 {
        self.data.iter().map(|b| b.count_ones()).sum()
    }

    /// Blit onto `target` with the top-left corner at `top_left`.
    pub fn draw_at<D>(&self, target: &mut D, top_left: Point)
    where
        D: DrawTarget<Color = BinaryColor>,
    {
        let raw = ImageRaw::<BinaryColor>::new(&self.data, self.width);
        Image::new(&raw, top_left).draw(target).ok();
    }

    fn set(&mut self, x: u32, y: u32, ink: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        let index = (y * self.width.div_ceil(8) + x / 8) as usize;
        let mask = 0x80 >> (x % 8);
        if ink {
            self.data[index] |= mask;
        } else {
            self.data[index] &= !mask;
        }
    }
}

impl OriginDimensions for MonoBitmap {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for MonoBitmap {
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
            self.set(point.x as u32, point.y as u32, color.is_on());
        }
        Ok(())
    }
}

/// Icon classes the panel can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IconKind {
    ClearSky,
    Fair,
    PartlyCloudy,
    Cloudy,
    Fog,
    Rain,
    Sleet,
    Snow,
    Thunder,
    Fallback,
}

impl IconKind {
    pub const COUNT: usize = 10;

    pub const ALL: [IconKind; IconKind::COUNT] = [
        IconKind::ClearSky,
        IconKind::Fair,
        IconKind::PartlyCloudy,
        IconKind::Cloudy,
        IconKind::Fog,
        IconKind::Rain,
        IconKind::Sleet,
        IconKind::Snow,
        IconKind::Thunder,
        IconKind::Fallback,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Short name used in log lines.
    pub fn label(self) -> &'static str {
        match self {
            IconKind::ClearSky => "Clear",
            IconKind::Fair => "Fair",
            IconKind::PartlyCloudy => "Partly cloudy",
            IconKind::Cloudy => "Cloudy",
            IconKind::Fog => "Fog",
            IconKind::Rain => "Rain",
            IconKind::Sleet => "Sleet",
            IconKind::Snow => "Snow",
            IconKind::Thunder => "Thunder",
            IconKind::Fallback => "?",
        }
    }

    /// Look up a forecast symbol code such as `"lightrainshowers_day"`.
    pub fn for_symbol(symbol_code: &str) -> Result<IconKind, AssetError> {
        let base = strip_variant(symbol_code);
        SYMBOL_TABLE
            .iter()
            .find(|(code, _)| *code == base)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| AssetError::Missing(symbol_code.to_string()))
    }
}

/// Day, night and polar-twilight variants share one icon.
fn strip_variant(symbol_code: &str) -> &str {
    ["_day", "_night", "_polartwilight"]
        .iter()
        .find_map(|suffix| symbol_code.strip_suffix(suffix))
        .unwrap_or(symbol_code)
}

/// Forecast service symbol codes (variant suffix removed) to icon class.
/// The "lights..." spellings are the service's own.
static SYMBOL_TABLE: &[(&str, IconKind)] = &[
    ("clearsky", IconKind::ClearSky),
    ("fair", IconKind::Fair),
    ("partlycloudy", IconKind::PartlyCloudy),
    ("cloudy", IconKind::Cloudy),
    ("fog", IconKind::Fog),
    ("lightrain", IconKind::Rain),
    ("rain", IconKind::Rain),
    ("heavyrain", IconKind::Rain),
    ("lightrainshowers", IconKind::Rain),
    ("rainshowers", IconKind::Rain),
    ("heavyrainshowers", IconKind::Rain),
    ("lightsleet", IconKind::Sleet),
    ("sleet", IconKind::Sleet),
    ("heavysleet", IconKind::Sleet),
    ("lightsleetshowers", IconKind::Sleet),
    ("sleetshowers", IconKind::Sleet),
    ("heavysleetshowers", IconKind::Sleet),
    ("lightsnow", IconKind::Snow),
    ("snow", IconKind::Snow),
    ("heavysnow", IconKind::Snow),
    ("lightsnowshowers", IconKind::Snow),
    ("snowshowers", IconKind::Snow),
    ("heavysnowshowers", IconKind::Snow),
    ("lightrainandthunder", IconKind::Thunder),
    ("rainandthunder", IconKind::Thunder),
    ("heavyrainandthunder", IconKind::Thunder),
    ("lightrainshowersandthunder", IconKind::Thunder),
    ("rainshowersandthunder", IconKind::Thunder),
    ("heavyrainshowersandthunder", IconKind::Thunder),
    ("lightsleetandthunder", IconKind::Thunder),
    ("sleetandthunder", IconKind::Thunder),
    ("heavysleetandthunder", IconKind::Thunder),
    ("lightssleetshowersandthunder", IconKind::Thunder),
    ("sleetshowersandthunder", IconKind::Thunder),
    ("heavysleetshowersandthunder", IconKind::Thunder),
    ("lightsnowandthunder", IconKind::Thunder),
    ("snowandthunder", IconKind::Thunder),
    ("heavysnowandthunder", IconKind::Thunder),
    ("lightssnowshowersandthunder", IconKind::Thunder),
    ("snowshowersandthunder", IconKind::Thunder),
    ("heavysnowshowersandthunder", IconKind::Thunder),
];

/// The pre-rendered small icons, one per [`IconKind`].
#[derive(Clone, Debug)]
pub struct IconSet {
    icons: Vec<MonoBitmap>,
}

impl IconSet {
    /// Draw every icon once. Called at start-up; the set is immutable afterwards.
    pub fn render() -> Self {
        let icons = IconKind::ALL
            .iter()
            .map(|&kind| {
                let mut canvas = MonoBitmap::new(ICON_SIZE, ICON_SIZE);
                draw_icon(&mut canvas, kind);
                canvas
            })
            .collect();
        Self { icons }
    }

    pub fn get(&self, kind: IconKind) -> &MonoBitmap {
        &self.icons[kind.index()]
    }

    /// Icon for a symbol code, with the fallback for unknown codes.
    pub fn for_symbol(&self, symbol_code: &str) -> (IconKind, &MonoBitmap) {
        let kind = match IconKind::for_symbol(symbol_code) {
            Ok(kind) => kind,
            Err(e) => {
                log::warn!("{}, using fallback icon", e);
                IconKind::Fallback
            }
        };
        (kind, self.get(kind))
    }
}

fn ink() -> PrimitiveStyle<BinaryColor> {
    PrimitiveStyle::with_fill(BinaryColor::On)
}

fn stroke(width: u32) -> PrimitiveStyle<BinaryColor> {
    PrimitiveStyle::with_stroke(BinaryColor::On, width)
}

fn draw_icon(canvas: &mut MonoBitmap, kind: IconKind) {
    match kind {
        IconKind::ClearSky => sun(canvas, Point::new(24, 24), 10, 20),
        IconKind::Fair => {
            sun(canvas, Point::new(20, 20), 8, 16);
            cloud(canvas, Point::new(18, 30), 24);
        }
        IconKind::PartlyCloudy => {
            sun(canvas, Point::new(16, 16), 7, 14);
            cloud(canvas, Point::new(6, 18), 38);
        }
        IconKind::Cloudy => cloud(canvas, Point::new(4, 12), 40),
        IconKind::Fog => {
            for y in [14, 22, 30, 38] {
                Line::new(Point::new(6, y), Point::new(41, y))
                    .into_styled(stroke(3))
                    .draw(canvas)
                    .ok();
            }
        }
        IconKind::Rain => {
            cloud(canvas, Point::new(4, 4), 40);
            drops(canvas, &[10, 20, 30, 40]);
        }
        IconKind::Sleet => {
            cloud(canvas, Point::new(4, 4), 40);
            drops(canvas, &[12, 32]);
            flakes(canvas, &[22, 42]);
        }
        IconKind::Snow => {
            cloud(canvas, Point::new(4, 4), 40);
            flakes(canvas, &[12, 24, 36]);
        }
        IconKind::Thunder => {
            cloud(canvas, Point::new(4, 4), 40);
            let bolt = [
                Point::new(26, 28),
                Point::new(18, 38),
                Point::new(25, 38),
                Point::new(19, 47),
            ];
            Polyline::new(&bolt).into_styled(stroke(3)).draw(canvas).ok();
        }
        IconKind::Fallback => {
            Rectangle::new(Point::new(4, 4), Size::new(40, 40))
                .into_styled(stroke(2))
                .draw(canvas)
                .ok();
            Text::with_alignment(
                "?",
                Point::new(24, 31),
                MonoTextStyle::new(&FONT_10X20, BinaryColor::On),
                Alignment::Center,
            )
            .draw(canvas)
            .ok();
        }
    }
}

/// Filled disc with eight rays reaching out to `reach`.
fn sun(canvas: &mut MonoBitmap, center: Point, radius: u32, reach: u32) {
    Circle::with_center(center, radius * 2).into_styled(ink()).draw(canvas).ok();

    let inner = (radius + 3) as f32;
    let outer = reach as f32;
    for step in 0..8 {
        let angle = step as f32 * std::f32::consts::FRAC_PI_4;
        let (sin, cos) = angle.sin_cos();
        let from = center + Point::new((cos * inner) as i32, (sin * inner) as i32);
        let to = center + Point::new((cos * outer) as i32, (sin * outer) as i32);
        Line::new(from, to).into_styled(stroke(2)).draw(canvas).ok();
    }
}

/// A cloud `width` pixels wide whose top-left corner is `origin`. A ring of
/// paper around it keeps it readable on top of a sun.
fn cloud(canvas: &mut MonoBitmap, origin: Point, width: u32) {
    let w = width as i32;
    let puffs = [
        (Point::new(w / 5, w * 3 / 10), w as u32 * 2 / 5),
        (Point::new(w / 2, w / 4), w as u32 / 2),
        (Point::new(w * 3 / 4, w * 7 / 20), w as u32 * 2 / 5),
    ];
    let base = Rectangle::new(
        origin + Point::new(w / 5, w * 3 / 10),
        Size::new(width * 11 / 20, width / 4),
    );

    for (paper, pad) in [(BinaryColor::Off, 4), (BinaryColor::On, 0)] {
        let style = PrimitiveStyle::with_fill(paper);
        for (center, diameter) in puffs {
            Circle::with_center(origin + center, diameter + pad)
                .into_styled(style)
                .draw(canvas)
                .ok();
        }
        base.offset(pad as i32 / 2).into_styled(style).draw(canvas).ok();
    }
}

fn drops(canvas: &mut MonoBitmap, columns: &[i32]) {
    for &x in columns {
        Line::new(Point::new(x, 34), Point::new(x - 4, 44))
            .into_styled(stroke(2))
            .draw(canvas)
            .ok();
    }
}

fn flakes(canvas: &mut MonoBitmap, columns: &[i32]) {
    for &x in columns {
        let c = Point::new(x - 2, 40);
        for (dx, dy) in [(4, 0), (0, 4), (3, 3), (3, -3)] {
            Line::new(c - Point::new(dx, dy), c + Point::new(dx, dy))
                .into_styled(stroke(1))
                .draw(canvas)
                .ok();
        }
    }
}
