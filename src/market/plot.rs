use std::io::Cursor;

use axum::{debug_handler, extract::{Query, State}, Json};
use base64::Engine;
use image::{ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use time::macros::date;

use super::{parse_date, parse_symbol, yesterday, Bar, MarketClient};
use crate::{appresult::ApiError, AppResult};

const GRID_LINES: i64 = 5;
const SWATCH: u32 = 16;

const WIDTH: u32 = 1200;
const HEIGHT: u32 = 600;
const MARGIN: u32 = 48;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([96, 96, 96]);
const GRID: Rgb<u8> = Rgb([228, 228, 228]);
pub(crate) const CLOSE: Rgb<u8> = Rgb([31, 119, 180]);
pub(crate) const HIGH: Rgb<u8> = Rgb([255, 127, 14]);
pub(crate) const LOW: Rgb<u8> = Rgb([44, 160, 44]);

#[derive(Debug, Deserialize)]
pub(crate) struct PlotQuery {
    symbol: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Plot {
    image_url: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn plot(
    State(market): State<MarketClient>,
    Query(query): Query<PlotQuery>,
) -> AppResult<Json<Plot>> {
    let symbol = parse_symbol(query.symbol.as_deref())?;
    let start = parse_date(query.start.as_deref(), date!(2023 - 01 - 09))?;
    let end = parse_date(query.end.as_deref(), yesterday())?;
    if start > end {
        return Err(ApiError::bad_request("start must not be after end").into());
    }

    let bars = market.daily_range(&symbol, start, end).await.map_err(ApiError::from)?;
    if bars.is_empty() {
        return Err(ApiError::not_found(format!("No price data for {symbol} in range")).into());
    }
    tracing::debug!(%symbol, bars = bars.len(), "rendering price chart");

    let png = render_chart(&bars)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(png);
    Ok(Json(Plot { image_url: format!("data:image/png;base64,{encoded}") }))
}

/// Close, high and low as three polylines over a shared price axis.
pub(crate) fn render_chart(bars: &[Bar]) -> Result<Vec<u8>, image::ImageError> {
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);

    let left = MARGIN as i64;
    let right = (WIDTH - MARGIN) as i64;
    let top = MARGIN as i64;
    let bottom = (HEIGHT - MARGIN) as i64;
    for step in 0..=GRID_LINES {
        let y = top + (bottom - top) * step / GRID_LINES;
        draw_line(&mut img, (left, y), (right, y), GRID);
    }
    draw_line(&mut img, (left, top), (left, bottom), AXIS);
    draw_line(&mut img, (left, bottom), (right, bottom), AXIS);

    let (mut lo, mut hi) = bars.iter().fold((f64::MAX, f64::MIN), |(lo, hi), bar| {
        (lo.min(bar.l).min(bar.c), hi.max(bar.h).max(bar.c))
    });
    if hi - lo < f64::EPSILON {
        lo -= 1.0;
        hi += 1.0;
    }
    let first = bars.first().map_or(0, |bar| bar.t);
    let last = bars.last().map_or(0, |bar| bar.t);

    let point = |t: i64, price: f64| -> (i64, i64) {
        let x = if last > first {
            left + ((t - first) as f64 / (last - first) as f64 * (right - left) as f64).round() as i64
        } else {
            (left + right) / 2
        };
        let y = bottom - ((price - lo) / (hi - lo) * (bottom - top) as f64).round() as i64;
        (x, y)
    };

    let series: [(Rgb<u8>, fn(&Bar) -> f64); 3] = [
        (LOW, |bar| bar.l),
        (HIGH, |bar| bar.h),
        (CLOSE, |bar| bar.c),
    ];
    for (color, value) in series {
        let points: Vec<_> = bars.iter().map(|bar| point(bar.t, value(bar))).collect();
        match points.as_slice() {
            [only] => draw_line(&mut img, *only, *only, color),
            points => {
                for pair in points.windows(2) {
                    draw_line(&mut img, pair[0], pair[1], color);
                }
            }
        }
    }

    draw_legend(&mut img);

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

/// Close, high and low swatches stacked in the top-right corner, in that order.
fn draw_legend(img: &mut RgbImage) {
    let x0 = WIDTH - MARGIN - SWATCH;
    for (row, color) in [CLOSE, HIGH, LOW].into_iter().enumerate() {
        let y0 = MARGIN + 8 + row as u32 * (SWATCH + 6);
        for y in y0..y0 + SWATCH {
            for x in x0..x0 + SWATCH {
                img.put_pixel(x, y, color);
            }
        }
    }
}

/// Legend swatch origin for series `row` (0 = close, 1 = high, 2 = low).
#[cfg(test)]
pub(crate) fn swatch_origin(row: u32) -> (u32, u32) {
    (WIDTH - MARGIN - SWATCH, MARGIN + 8 + row * (SWATCH + 6))
}

/// Bresenham, two pixels thick. Points outside the canvas are skipped.
fn draw_line(img: &mut RgbImage, (mut x0, mut y0): (i64, i64), (x1, y1): (i64, i64), color: Rgb<u8>) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        for (px, py) in [(x0, y0), (x0, y0 + 1)] {
            if px >= 0 && py >= 0 && (px as u32) < img.width() && (py as u32) < img.height() {
                img.put_pixel(px as u32, py as u32, color);
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}
