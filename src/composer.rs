//! Four-slot forecast layout for the 4.2" panel
//!
//! ```text
//! +--------------------------------------------------+
//! | Drammen                            Updated 08:05 |
//! +------------+------------+------------+-----------+
//! |    Now     |   13:00    |   17:00    | Tomorrow  |
//! |  [96x96]   |  [48x48]   |  [48x48]   |  [48x48]  |
//! |    -3°     |    -1°     |    -4°     |    2°     |
//! |   0.4 mm   |   0.0 mm   |   1.2 mm   |  0.0 mm   |
//! |   3 m/s    |   4 m/s    |   2 m/s    |  6 m/s    |
//! +------------+------------+------------+-----------+
//! ```
//!
//! The composer only draws into the frame buffer it is handed and gives it
//! back; it never touches the panel.

use crate::config::Labels;
use crate::icons::IconSet;
use crate::images::{ImageSource, LARGE_ICON_SIZE};
use crate::pixel_buffer::{Color, PixelBuffer};
use crate::{ForecastHorizon, ForecastRecord, Location};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use embedded_graphics::{
    mono_font::{
        iso_8859_1::{FONT_10X20, FONT_7X13},
        MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{Line, PrimitiveStyle},
    text::{Alignment, Text},
};
use log::{debug, warn};

/// Height of the header band, rule included
const HEADER_HEIGHT: i32 = 34;
/// Baseline of the slot labels
const LABEL_BASELINE: i32 = 56;
/// Top of the icon area; the large image fills it, small icons are centred in it
pub const ICON_TOP: i32 = 62;
const TEMPERATURE_BASELINE: i32 = 186;
const PRECIPITATION_BASELINE: i32 = 216;
const WIND_BASELINE: i32 = 240;

pub struct DisplayComposer<I> {
    icons: IconSet,
    images: I,
    offset: FixedOffset,
    labels: Labels,
}

impl<I: ImageSource> DisplayComposer<I> {
    pub fn new(icons: IconSet, images: I, utc_offset_minutes: i32, labels: Labels) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or(Utc.fix());
        Self {
            icons,
            images,
            offset,
            labels,
        }
    }

    /// Draw a complete frame for `records` into `buffer` and hand it back.
    ///
    /// The buffer is cleared first, so nothing of the previous frame survives.
    /// Never fails: unknown symbols and a missing large image degrade to the
    /// fallback and small icons.
    pub async fn compose(
        &mut self,
        location: &Location,
        records: &[ForecastRecord; 4],
        updated_at: DateTime<Utc>,
        mut buffer: PixelBuffer,
    ) -> PixelBuffer {
        buffer.clear(Color::White);
        debug!(
            "Composing {}x{} frame for {}",
            buffer.width(),
            buffer.height(),
            location.name
        );

        self.draw_header(&mut buffer, location, updated_at);

        let slot_width = buffer.width() as i32 / 4;
        for record in records {
            let left = record.horizon.slot() as i32 * slot_width;
            self.draw_slot(&mut buffer, record, left, slot_width).await;
        }

        draw_rules(&mut buffer, slot_width);
        buffer
    }

    fn draw_header(
        &self,
        buffer: &mut PixelBuffer,
        location: &Location,
        updated_at: DateTime<Utc>,
    ) {
        let style = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
        let updated = format!(
            "{} {}",
            self.labels.updated,
            updated_at.with_timezone(&self.offset).format("%H:%M")
        );

        Text::new(&location.display_name(), Point::new(6, 22), style)
            .draw(buffer)
            .ok();
        Text::with_alignment(
            &updated,
            Point::new(buffer.width() as i32 - 6, 22),
            style,
            Alignment::Right,
        )
        .draw(buffer)
        .ok();
    }

    async fn draw_slot(
        &mut self,
        buffer: &mut PixelBuffer,
        record: &ForecastRecord,
        left: i32,
        width: i32,
    ) {
        let center = left + width / 2;
        let large = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
        let small = MonoTextStyle::new(&FONT_7X13, BinaryColor::On);

        let label = self.slot_label(record);
        Text::with_alignment(&label, Point::new(center, LABEL_BASELINE), large, Alignment::Center)
            .draw(buffer)
            .ok();

        self.draw_icon(buffer, record, left, width).await;

        let lines = [
            (format_temperature(record.temperature), TEMPERATURE_BASELINE, large),
            (
                format!("{:.1} mm", record.precipitation_amount.max(0.0)),
                PRECIPITATION_BASELINE,
                small,
            ),
            (format!("{:.0} m/s", record.wind_speed), WIND_BASELINE, small),
        ];
        for (text, baseline, style) in lines {
            Text::with_alignment(&text, Point::new(center, baseline), style, Alignment::Center)
                .draw(buffer)
                .ok();
        }
    }

    async fn draw_icon(
        &mut self,
        buffer: &mut PixelBuffer,
        record: &ForecastRecord,
        left: i32,
        width: i32,
    ) {
        if record.horizon == ForecastHorizon::Now {
            match self.images.large_icon(&record.symbol_code).await {
                Ok(image) => {
                    let x = left + (width - image.width() as i32) / 2;
                    image.draw_at(buffer, Point::new(x, ICON_TOP));
                    return;
                }
                Err(e) => warn!(
                    "Large image for '{}': {}, using small icon",
                    record.symbol_code, e
                ),
            }
        }

        let (kind, icon) = self.icons.for_symbol(&record.symbol_code);
        debug!(
            "{:?} slot: '{}' drawn as {}",
            record.horizon,
            record.symbol_code,
            kind.label()
        );
        icon.draw_at(buffer, small_icon_origin(left, width, icon.width()));
    }

    fn slot_label(&self, record: &ForecastRecord) -> String {
        match record.horizon {
            ForecastHorizon::Now => self.labels.now.clone(),
            ForecastHorizon::TomorrowNoon => self.labels.tomorrow.clone(),
            ForecastHorizon::PlusFourHours | ForecastHorizon::PlusEightHours => record
                .timestamp
                .with_timezone(&self.offset)
                .format("%H:00")
                .to_string(),
        }
    }
}

/// Top-left corner of a small icon centred in the icon area of a slot.
pub fn small_icon_origin(left: i32, width: i32, icon_size: u32) -> Point {
    let size = icon_size as i32;
    Point::new(
        left + (width - size) / 2,
        ICON_TOP + (LARGE_ICON_SIZE as i32 - size) / 2,
    )
}

/// Whole degrees with a degree sign; never shows "-0°".
pub fn format_temperature(celsius: f32) -> String {
    let rounded = celsius.round();
    if rounded == 0.0 {
        "0°".to_string()
    } else {
        format!("{:.0}°", rounded)
    }
}

/// Header rule and the three slot separators.
fn draw_rules(buffer: &mut PixelBuffer, slot_width: i32) {
    let style = PrimitiveStyle::with_stroke(BinaryColor::On, 2);
    let right = buffer.width() as i32 - 1;
    let bottom = buffer.height() as i32 - 1;

    Line::new(Point::new(0, HEADER_HEIGHT - 2), Point::new(right, HEADER_HEIGHT - 2))
        .into_styled(style)
        .draw(buffer)
        .ok();
    for slot in 1..4 {
        let x = slot * slot_width;
        Line::new(Point::new(x, HEADER_HEIGHT + 4), Point::new(x, bottom - 4))
            .into_styled(style)
            .draw(buffer)
            .ok();
    }
}
