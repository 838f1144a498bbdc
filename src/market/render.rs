use crate::error::AppError;
use crate::market::band::Band;
use crate::market::types::Candle;
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BandSeriesOptions {
    pub line_width: f64,
    pub upper_line: Rgba,
    pub middle_line: Rgba,
    pub lower_line: Rgba,
    pub top_fill: Rgba,
    pub bottom_fill: Rgba,
}

impl Default for BandSeriesOptions {
    fn default() -> Self {
        Self {
            line_width: 1.0,
            upper_line: Rgba::new(38, 166, 154, 1.0),
            middle_line: Rgba::new(120, 123, 134, 1.0),
            lower_line: Rgba::new(239, 83, 80, 1.0),
            top_fill: Rgba::new(38, 166, 154, 0.12),
            bottom_fill: Rgba::new(239, 83, 80, 0.12),
        }
    }
}

/// One row of the band series on the shared time axis. Rows without a band
/// (not enough candles yet) are whitespace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BandRow {
    pub time: i64,
    pub band: Option<Band>,
}

pub fn band_rows(candles: &[Candle], bands: &[Option<Band>]) -> Vec<BandRow> {
    candles
        .iter()
        .zip(bands.iter())
        .map(|(candle, band)| BandRow {
            time: candle.bucket_start,
            band: *band,
        })
        .collect()
}

/// A row positioned by the host on the horizontal axis, in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct BarCoordinate<R> {
    pub x: f64,
    pub row: R,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RendererData<R> {
    pub bars: Vec<BarCoordinate<R>>,
    pub visible_range: Option<Range<usize>>,
    pub bar_spacing: f64,
}

impl<R> Default for RendererData<R> {
    fn default() -> Self {
        Self {
            bars: Vec::new(),
            visible_range: None,
            bar_spacing: 0.0,
        }
    }
}

/// Canvas-like drawing surface supplied by the host.
pub trait DrawTarget {
    fn begin_path(&mut self);
    fn move_to(&mut self, x: f64, y: f64);
    fn line_to(&mut self, x: f64, y: f64);
    fn close_path(&mut self);
    fn fill(&mut self, color: Rgba) -> Result<(), AppError>;
    fn stroke(&mut self, color: Rgba, width: f64) -> Result<(), AppError>;
}

/// Maps a price onto the vertical pixel axis; `None` when the host cannot.
pub type PriceToCoordinate<'a> = dyn Fn(f64) -> Option<f64> + 'a;

pub trait SeriesRenderer {
    fn draw(&self, target: &mut dyn DrawTarget, price_to_coordinate: &PriceToCoordinate<'_>);
}

/// Extension point a chart host consumes to draw a custom series.
pub trait CustomSeries {
    type Row;
    type Options;
    type Renderer: SeriesRenderer;

    /// `[low, high, close]` used by the host for price-axis autoscaling.
    fn price_value_builder(&self, row: &Self::Row) -> [f64; 3];
    fn is_whitespace(&self, row: &Self::Row) -> bool;
    fn renderer(&self) -> &Self::Renderer;
    fn update(&mut self, data: RendererData<Self::Row>, options: Self::Options);
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

#[derive(Debug, Default)]
struct BandPolylines {
    upper: Vec<Point>,
    middle: Vec<Point>,
    lower: Vec<Point>,
}

#[derive(Debug, Clone, Default)]
pub struct BandRenderer {
    data: RendererData<BandRow>,
    options: BandSeriesOptions,
}

impl BandRenderer {
    fn polylines(
        &self,
        range: Range<usize>,
        price_to_coordinate: &PriceToCoordinate<'_>,
    ) -> Result<BandPolylines, AppError> {
        let to_y = |price: f64| -> Result<f64, AppError> {
            price_to_coordinate(price)
                .filter(|y| y.is_finite())
                .ok_or_else(|| AppError::Render(format!("price {price} has no coordinate")))
        };

        let mut lines = BandPolylines::default();
        for bar in &self.data.bars[range] {
            let Some(band) = bar.row.band else {
                continue;
            };
            if !bar.x.is_finite() {
                return Err(AppError::Render(format!(
                    "bar at time {} has no horizontal coordinate",
                    bar.row.time
                )));
            }
            lines.upper.push(Point {
                x: bar.x,
                y: to_y(band.upper)?,
            });
            lines.middle.push(Point {
                x: bar.x,
                y: to_y(band.middle)?,
            });
            lines.lower.push(Point {
                x: bar.x,
                y: to_y(band.lower)?,
            });
        }
        Ok(lines)
    }

    fn try_draw(
        &self,
        target: &mut dyn DrawTarget,
        price_to_coordinate: &PriceToCoordinate<'_>,
    ) -> Result<(), AppError> {
        let Some(range) = self.data.visible_range.clone() else {
            return Ok(());
        };
        let end = range.end.min(self.data.bars.len());
        if range.start >= end {
            return Ok(());
        }

        let lines = self.polylines(range.start..end, price_to_coordinate)?;
        if lines.middle.len() < 2 {
            return Ok(());
        }

        fill_between(target, &lines.upper, &lines.middle, self.options.top_fill)?;
        fill_between(target, &lines.lower, &lines.middle, self.options.bottom_fill)?;

        let width = self.options.line_width;
        stroke_polyline(target, &lines.upper, self.options.upper_line, width)?;
        stroke_polyline(target, &lines.lower, self.options.lower_line, width)?;
        stroke_polyline(target, &lines.middle, self.options.middle_line, width)?;
        Ok(())
    }
}

impl SeriesRenderer for BandRenderer {
    fn draw(&self, target: &mut dyn DrawTarget, price_to_coordinate: &PriceToCoordinate<'_>) {
        if let Err(error) = self.try_draw(target, price_to_coordinate) {
            tracing::warn!(%error, "band frame skipped");
        }
    }
}

/// Closed region bounded by `edge` forward and `middle` backward.
fn fill_between(
    target: &mut dyn DrawTarget,
    edge: &[Point],
    middle: &[Point],
    color: Rgba,
) -> Result<(), AppError> {
    let Some(first) = edge.first() else {
        return Ok(());
    };
    target.begin_path();
    target.move_to(first.x, first.y);
    for point in edge.iter().skip(1) {
        target.line_to(point.x, point.y);
    }
    for point in middle.iter().rev() {
        target.line_to(point.x, point.y);
    }
    target.close_path();
    target.fill(color)
}

fn stroke_polyline(
    target: &mut dyn DrawTarget,
    points: &[Point],
    color: Rgba,
    width: f64,
) -> Result<(), AppError> {
    let Some(first) = points.first() else {
        return Ok(());
    };
    target.begin_path();
    target.move_to(first.x, first.y);
    for point in points.iter().skip(1) {
        target.line_to(point.x, point.y);
    }
    target.stroke(color, width)
}

#[derive(Debug, Clone, Default)]
pub struct BandSeries {
    renderer: BandRenderer,
}

impl BandSeries {
    pub fn new(options: BandSeriesOptions) -> Self {
        Self {
            renderer: BandRenderer {
                data: RendererData::default(),
                options,
            },
        }
    }

    pub fn options(&self) -> &BandSeriesOptions {
        &self.renderer.options
    }
}

impl CustomSeries for BandSeries {
    type Row = BandRow;
    type Options = BandSeriesOptions;
    type Renderer = BandRenderer;

    fn price_value_builder(&self, row: &BandRow) -> [f64; 3] {
        match row.band {
            Some(band) => [band.lower, band.upper, band.middle],
            None => [f64::NAN; 3],
        }
    }

    fn is_whitespace(&self, row: &BandRow) -> bool {
        match row.band {
            Some(band) => {
                !(band.upper.is_finite() && band.middle.is_finite() && band.lower.is_finite())
            }
            None => true,
        }
    }

    fn renderer(&self) -> &BandRenderer {
        &self.renderer
    }

    fn update(&mut self, data: RendererData<BandRow>, options: BandSeriesOptions) {
        self.renderer.data = data;
        self.renderer.options = options;
    }
}
